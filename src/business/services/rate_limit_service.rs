use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, warn};

use crate::infrastructure::store::{CounterOp, SharedStoreRef};
use crate::shared::clock::SharedClock;
use crate::shared::constants::rate_limit as limits;

/// 速率限制配置
///
/// 不同名称的配置使用独立的计数器
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub name: String,
    pub max_requests: u32,
    pub window: Duration,
}

impl RateLimitConfig {
    pub fn new(name: impl Into<String>, max_requests: u32, window: Duration) -> Self {
        Self {
            name: name.into(),
            max_requests,
            window,
        }
    }

    /// 通用API窗口
    pub fn api() -> Self {
        Self::new(
            "api",
            limits::API_MAX_REQUESTS,
            Duration::from_secs(limits::API_WINDOW_SECONDS),
        )
    }

    /// 登录尝试窗口（更严格）
    pub fn login() -> Self {
        Self::new(
            "login",
            limits::LOGIN_MAX_REQUESTS,
            Duration::from_secs(limits::LOGIN_WINDOW_SECONDS),
        )
    }

    fn counter_key(&self, key: &str) -> String {
        format!("ratelimit:{}:{}", self.name, key)
    }
}

/// 窗口状态，用于响应头
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitInfo {
    pub limit: u32,
    pub remaining: u32,
    pub reset_time: DateTime<Utc>,
    /// 窗口长度（秒）
    pub window: u64,
}

/// 速率限制结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub info: RateLimitInfo,
}

/// 速率限制服务
/// 固定窗口计数，计数器与窗口都保存在共享存储中
#[derive(Debug, Clone)]
pub struct RateLimitService {
    store: SharedStoreRef,
    clock: SharedClock,
}

impl RateLimitService {
    /// 创建新的速率限制服务
    pub fn new(store: SharedStoreRef, clock: SharedClock) -> Self {
        Self { store, clock }
    }

    /// 检查并计数
    ///
    /// 一次原子递增完成计数与窗口开启：计数器首次出现时带上窗口长度的TTL，
    /// 过期即是窗口翻转。存储不可用时拒绝请求
    pub async fn check_rate_limit(&self, key: &str, config: &RateLimitConfig) -> RateLimitDecision {
        let now = self.clock.now();
        let op = CounterOp::new(config.counter_key(key), 1, config.window);

        let state = match self.store.increment(&[op]).await {
            Ok(mut states) if !states.is_empty() => states.remove(0),
            Ok(_) => {
                error!("❌ 速率限制计数返回为空，拒绝请求: name={}, key={}", config.name, key);
                return Self::fail_closed(now, config);
            }
            Err(e) => {
                error!("❌ 速率限制存储不可用，拒绝请求: name={}, key={}, error={}", config.name, key, e);
                return Self::fail_closed(now, config);
            }
        };

        let count = state.value.max(0) as u64;
        let limit = config.max_requests as u64;
        let allowed = count <= limit;
        let remaining = limit.saturating_sub(count) as u32;
        let reset_time = now + to_chrono(state.ttl_remaining);

        if allowed {
            debug!(
                "✅ 速率检查通过: name={}, key={}, count={}/{}",
                config.name, key, count, limit
            );
        } else {
            warn!(
                "⚠️ 速率限制触发: name={}, key={}, count={}/{}, reset={}",
                config.name, key, count, limit, reset_time
            );
        }

        RateLimitDecision {
            allowed,
            info: RateLimitInfo {
                limit: config.max_requests,
                remaining,
                reset_time,
                window: config.window.as_secs(),
            },
        }
    }

    /// 清除一个窗口（例如登录成功后）
    pub async fn reset(&self, key: &str, config: &RateLimitConfig) -> bool {
        match self.store.delete(&[config.counter_key(key)]).await {
            Ok(deleted) => deleted > 0,
            Err(e) => {
                warn!("速率限制窗口重置失败: name={}, key={}, error={}", config.name, key, e);
                false
            }
        }
    }

    fn fail_closed(now: DateTime<Utc>, config: &RateLimitConfig) -> RateLimitDecision {
        RateLimitDecision {
            allowed: false,
            info: RateLimitInfo {
                limit: config.max_requests,
                remaining: 0,
                reset_time: now + to_chrono(config.window),
                window: config.window.as_secs(),
            },
        }
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::zero())
}

/// 全局速率限制服务实例
pub type SharedRateLimitService = Arc<RateLimitService>;
