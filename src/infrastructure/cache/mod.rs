//! 缓存基础设施模块
//!
//! 基于共享存储的标签化缓存：
//! - 条目: `cache:entry:{key}`，TTL 由存储负责过期
//! - 键 -> 标签: `cache:keytags:{key}`
//! - 标签 -> 键: `cache:tag:{tag}`
//! - 命中统计: `cache:metrics:{namespace}:{counter}`
//!
//! 两个索引在每次变更时同步维护，级联失效不需要全量扫描

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::infrastructure::store::StoreError;
use crate::shared::constants::cache as cache_constants;

pub mod tag_index;
pub mod cache_engine;
pub mod warmup;

mod invalidation_test;
mod cache_warmup_tests;

// 重新导出主要类型
pub use cache_engine::{tag_list, CacheEngine, CascadeReport, PatternInvalidation};
pub use tag_index::TagIndex;
pub use warmup::{spawn_warmup_scheduler, WarmupReport, WarmupTask};

/// 缓存错误
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("缓存存储错误: {0}")]
    Store(#[from] StoreError),

    #[error("缓存序列化失败: {0}")]
    Serialization(String),
}

/// 缓存操作结果
#[derive(Debug, Clone, PartialEq)]
pub enum CacheResult<T> {
    Hit(T),
    Miss,
    Error(String),
}

impl<T> CacheResult<T> {
    pub fn is_hit(&self) -> bool {
        matches!(self, CacheResult::Hit(_))
    }

    pub fn is_miss(&self) -> bool {
        matches!(self, CacheResult::Miss)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, CacheResult::Error(_))
    }

    /// 存储故障时按未命中处理
    pub fn into_option(self) -> Option<T> {
        match self {
            CacheResult::Hit(value) => Some(value),
            _ => None,
        }
    }
}

/// 缓存引擎配置
#[derive(Debug, Clone)]
pub struct CacheEngineConfig {
    pub default_ttl: Duration,
    /// 模式失效时每页扫描的键数量
    pub scan_page_size: usize,
    /// 单次模式失效允许占用的最长时间
    pub scan_timeout: Duration,
    pub metrics_ttl: Duration,
}

impl Default for CacheEngineConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(cache_constants::DEFAULT_TTL_SECONDS),
            scan_page_size: cache_constants::SCAN_PAGE_SIZE,
            scan_timeout: Duration::from_millis(cache_constants::SCAN_TIMEOUT_MS),
            metrics_ttl: Duration::from_secs(cache_constants::METRICS_TTL_SECONDS),
        }
    }
}

/// 缓存条目的序列化外壳
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEnvelope {
    pub value: serde_json::Value,
    /// 绝对过期时间（毫秒时间戳）
    pub expires_at_ms: i64,
}

/// 缓存键构建器
#[derive(Debug, Clone)]
pub struct CacheKeyBuilder {
    prefix: String,
}

impl Default for CacheKeyBuilder {
    fn default() -> Self {
        Self::new("cache:")
    }
}

impl CacheKeyBuilder {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
        }
    }

    /// 缓存条目键
    pub fn entry_key(&self, key: &str) -> String {
        format!("{}entry:{}", self.prefix, key)
    }

    /// 从条目存储键还原逻辑键
    pub fn logical_key<'a>(&self, entry_key: &'a str) -> Option<&'a str> {
        entry_key
            .strip_prefix(&self.prefix)
            .and_then(|rest| rest.strip_prefix("entry:"))
    }

    /// 条目的标签集合键
    pub fn key_tags_key(&self, key: &str) -> String {
        format!("{}keytags:{}", self.prefix, key)
    }

    /// 标签的成员集合键
    pub fn tag_key(&self, tag: &str) -> String {
        format!("{}tag:{}", self.prefix, tag)
    }

    /// 命中统计计数器键
    pub fn metrics_key(&self, namespace: &str, counter: &str) -> String {
        format!("{}metrics:{}:{}", self.prefix, namespace, counter)
    }
}

/// 键的命名空间：第一个 `:` 之前的部分
pub fn namespace_of(key: &str) -> &str {
    key.split(':').next().unwrap_or(key)
}

/// 统计计数器名称
pub mod counters {
    pub const HITS: &str = "hits";
    pub const MISSES: &str = "misses";
    pub const SETS: &str = "sets";
    pub const INVALIDATIONS: &str = "invalidations";

    pub const ALL: [&str; 4] = [HITS, MISSES, SETS, INVALIDATIONS];
}
