//! Valuation Gateway Rust 服务
//! 
//! 多租户房产估值后端的缓存、限流、配额与弹性调用层，基于三层架构设计

// 核心模块
pub mod shared;          // 共享模块（错误处理、类型定义、时钟、指标）
pub mod infrastructure;  // 基础设施层（共享存储、缓存、数据库、配置）
pub mod business;        // 业务逻辑层（领域模型、限流、配额、熔断、估值）
pub mod presentation;    // 表示层（HTTP处理、路由）
pub mod auth;            // 凭据提取和准入决策

// 重新导出核心类型
pub use infrastructure::{Config, Database};
pub use shared::{AppError, AppResult};
pub use presentation::{create_routes, AppState};
