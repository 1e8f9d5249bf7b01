//! 共享存储模块
//!
//! 缓存、限流窗口、配额计数器共用的网络化键值存储抽象：
//! - `RedisStore`: 生产环境，多进程共享
//! - `MemoryStore`: 单进程开发与测试
//!
//! 每个写操作都是单次原子往返，应用层不加锁

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub mod memory_store;
pub mod redis_store;
#[cfg(test)]
pub mod testing;

pub use memory_store::MemoryStore;
pub use redis_store::RedisStore;

/// 存储错误
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("存储连接失败: {0}")]
    Connection(String),

    #[error("存储命令失败: {0}")]
    Command(String),

    #[error("键类型不匹配: {0}")]
    WrongType(String),
}

impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        if e.is_connection_refusal() || e.is_connection_dropped() || e.is_io_error() || e.is_timeout() {
            StoreError::Connection(e.to_string())
        } else {
            StoreError::Command(e.to_string())
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// 计数器递增操作
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterOp {
    pub key: String,
    pub delta: i64,
    /// 键尚无过期时间时设置的TTL
    pub ttl: Duration,
}

impl CounterOp {
    pub fn new(key: impl Into<String>, delta: i64, ttl: Duration) -> Self {
        Self {
            key: key.into(),
            delta,
            ttl,
        }
    }
}

/// 递增后的计数器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterState {
    pub value: i64,
    pub ttl_remaining: Duration,
}

/// 一页扫描结果，cursor为0表示扫描结束
#[derive(Debug, Clone, Default)]
pub struct ScanPage {
    pub cursor: u64,
    pub keys: Vec<String>,
}

/// 共享键值存储
#[async_trait]
pub trait SharedStore: Send + Sync + std::fmt::Debug {
    /// 连接测试
    async fn ping(&self) -> StoreResult<()>;

    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()>;

    /// 删除若干键，返回实际删除数量
    async fn delete(&self, keys: &[String]) -> StoreResult<u64>;

    /// 原子批量递增；每个键在没有过期时间时设置 `ttl`
    async fn increment(&self, ops: &[CounterOp]) -> StoreResult<Vec<CounterState>>;

    /// 向集合添加成员，集合TTL延长到 max(当前, ttl)
    async fn set_add(&self, key: &str, members: &[String], ttl: Duration) -> StoreResult<()>;

    async fn set_remove(&self, key: &str, members: &[String]) -> StoreResult<()>;

    async fn set_members(&self, key: &str) -> StoreResult<Vec<String>>;

    /// 按glob模式分页扫描键
    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> StoreResult<ScanPage>;
}

pub type SharedStoreRef = Arc<dyn SharedStore>;
