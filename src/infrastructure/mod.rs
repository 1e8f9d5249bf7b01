//! 基础设施层模块
//! 
//! 负责共享存储、缓存、数据持久化、配置管理等基础设施相关功能

pub mod config;
pub mod store;
pub mod cache;
pub mod database;

// 重新导出常用类型和错误
pub use config::Config;
pub use database::{Database, DatabaseError};
pub use store::{MemoryStore, RedisStore, SharedStore, SharedStoreRef, StoreError};
