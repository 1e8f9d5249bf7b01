//! 弹性调用包装
//!
//! 熔断器 + 指数退避重试 + 降级：
//! - 每次尝试前向熔断器申请许可，熔断开启时直接走降级，不调用动作
//! - 第 n 次尝试失败后等待 `2^n * base_delay` 再重试
//! - 熔断器在重试过程中开启时立即停止重试

pub mod circuit_breaker;

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use thiserror::Error;
use tracing::{debug, error, warn};

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitBreakerState,
    CircuitSnapshot,
};

use crate::shared::constants::resilience as defaults;

/// 弹性调用错误
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ResilienceError {
    #[error("circuit '{name}' is open")]
    CircuitOpen { name: String },

    #[error("action '{name}' timed out after {timeout:?}")]
    Timeout { name: String, timeout: Duration },

    #[error("action '{name}' failed: {message}")]
    ActionFailed { name: String, message: String },

    #[error("action '{name}' failed after {attempts} attempts: {last_error}")]
    Exhausted {
        name: String,
        attempts: u32,
        last_error: String,
    },
}

impl ResilienceError {
    /// 出错的动作名称
    pub fn name(&self) -> &str {
        match self {
            ResilienceError::CircuitOpen { name }
            | ResilienceError::Timeout { name, .. }
            | ResilienceError::ActionFailed { name, .. }
            | ResilienceError::Exhausted { name, .. } => name,
        }
    }
}

pub type Fallback<T> =
    Box<dyn FnOnce(ResilienceError) -> BoxFuture<'static, Result<T, ResilienceError>> + Send>;

/// 单次调用选项
pub struct ResilienceOptions<T> {
    pub name: String,
    pub retries: u32,
    pub base_delay: Duration,
    /// 覆盖熔断器配置的单次尝试超时
    pub timeout: Option<Duration>,
    pub fallback: Option<Fallback<T>>,
}

impl<T> std::fmt::Debug for ResilienceOptions<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilienceOptions")
            .field("name", &self.name)
            .field("retries", &self.retries)
            .field("base_delay", &self.base_delay)
            .field("timeout", &self.timeout)
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

impl<T: Send + 'static> ResilienceOptions<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            retries: defaults::DEFAULT_RETRIES,
            base_delay: Duration::from_millis(defaults::BASE_DELAY_MS),
            timeout: None,
            fallback: None,
        }
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// 降级函数，接收最终错误，可以是异步的
    pub fn with_fallback<F, Fut>(mut self, fallback: F) -> Self
    where
        F: FnOnce(ResilienceError) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, ResilienceError>> + Send + 'static,
    {
        self.fallback = Some(Box::new(move |err| fallback(err).boxed()));
        self
    }
}

/// 第 n 次（从1开始）失败后的等待时间
pub fn backoff_delay(base_delay: Duration, failed_attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(failed_attempt.min(16));
    base_delay.saturating_mul(factor)
}

/// 一次调用在重试全部用尽前可能花费的最长时间
pub fn retry_budget(attempt_timeout: Duration, retries: u32, base_delay: Duration) -> Duration {
    let retries = retries.max(1);
    (1..retries).fold(attempt_timeout.saturating_mul(retries), |total, failed| {
        total.saturating_add(backoff_delay(base_delay, failed))
    })
}

/// 弹性调用包装器，熔断器状态只在进程内共享
#[derive(Debug, Clone, Default)]
pub struct ResilienceWrapper {
    registry: CircuitBreakerRegistry,
}

impl ResilienceWrapper {
    pub fn new(registry: CircuitBreakerRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &CircuitBreakerRegistry {
        &self.registry
    }

    /// 执行动作；重试耗尽且没有降级时返回带动作名称的错误
    pub async fn execute<T, E, F, Fut>(&self, mut action: F, options: ResilienceOptions<T>) -> Result<T, ResilienceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let name = options.name.clone();
        let retries = options.retries.max(1);
        let mut attempts = 0u32;
        let mut last_error: Option<ResilienceError> = None;

        while attempts < retries {
            let Some(timeout) = self.registry.try_acquire_for(&name, options.timeout).await else {
                debug!("熔断开启，跳过调用: name={}", name);
                last_error = Some(ResilienceError::CircuitOpen { name: name.clone() });
                break;
            };
            attempts += 1;

            let failure = match tokio::time::timeout(timeout, action()).await {
                Ok(Ok(value)) => {
                    self.registry.record_success(&name).await;
                    if attempts > 1 {
                        debug!("重试成功: name={}, attempts={}", name, attempts);
                    }
                    return Ok(value);
                }
                Ok(Err(e)) => ResilienceError::ActionFailed {
                    name: name.clone(),
                    message: e.to_string(),
                },
                Err(_) => ResilienceError::Timeout {
                    name: name.clone(),
                    timeout,
                },
            };

            self.registry.record_failure(&name).await;
            warn!("⚠️ 调用失败: name={}, attempt={}/{}, error={}", name, attempts, retries, failure);
            last_error = Some(failure);

            if attempts >= retries {
                break;
            }
            if self.registry.state(&name).await == Some(CircuitBreakerState::Open) {
                debug!("熔断器已开启，停止重试: name={}", name);
                break;
            }
            tokio::time::sleep(backoff_delay(options.base_delay, attempts)).await;
        }

        let terminal = match last_error {
            Some(ResilienceError::CircuitOpen { .. }) if attempts == 0 => {
                ResilienceError::CircuitOpen { name: name.clone() }
            }
            Some(e) => ResilienceError::Exhausted {
                name: name.clone(),
                attempts,
                last_error: e.to_string(),
            },
            None => ResilienceError::Exhausted {
                name: name.clone(),
                attempts,
                last_error: "no attempt made".to_string(),
            },
        };

        match options.fallback {
            Some(fallback) => {
                debug!("执行降级: name={}, error={}", name, terminal);
                fallback(terminal).await
            }
            None => {
                error!("❌ 调用最终失败: {}", terminal);
                Err(terminal)
            }
        }
    }
}
