//! 熔断器
//!
//! 滚动窗口内的错误率超过阈值后开启；冷却期过后进入半开状态，
//! 只放行一个探测请求：成功则关闭，失败则重新开启并重新计时。
//! 探测请求超过单次超时仍未上报结果（调用方被取消）时视为丢失，允许新的探测

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::shared::constants::resilience as defaults;
use crate::shared::metrics::CIRCUIT_TRANSITIONS;

/// 熔断器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitBreakerState {
    Closed,    // 正常状态
    Open,      // 熔断开启
    HalfOpen,  // 半开状态
}

impl CircuitBreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitBreakerState::Closed => "closed",
            CircuitBreakerState::Open => "open",
            CircuitBreakerState::HalfOpen => "half_open",
        }
    }
}

/// 熔断器配置
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    pub error_threshold_percentage: f64,
    /// 窗口内调用次数达到该值后才评估错误率
    pub volume_threshold: u32,
    pub rolling_window: Duration,
    /// 开启后的冷却时间
    pub reset_timeout: Duration,
    /// 单次尝试的超时
    pub timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            error_threshold_percentage: defaults::ERROR_THRESHOLD_PERCENTAGE,
            volume_threshold: defaults::VOLUME_THRESHOLD,
            rolling_window: Duration::from_secs(defaults::ROLLING_WINDOW_SECONDS),
            reset_timeout: Duration::from_secs(defaults::RESET_TIMEOUT_SECONDS),
            timeout: Duration::from_millis(defaults::ATTEMPT_TIMEOUT_MS),
        }
    }
}

/// 熔断器
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: CircuitBreakerState,
    /// (时间, 是否成功)
    outcomes: VecDeque<(Instant, bool)>,
    opened_at: Option<Instant>,
    /// 半开探测的结果截止时间
    probe_deadline: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: CircuitBreakerState::Closed,
            outcomes: VecDeque::new(),
            opened_at: None,
            probe_deadline: None,
        }
    }

    pub fn state(&self) -> CircuitBreakerState {
        self.state
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// 检查是否允许请求通过
    pub fn can_execute(&mut self) -> bool {
        let timeout = self.config.timeout;
        self.admit(timeout)
    }

    /// 按指定的尝试超时申请许可；半开探测在超时后仍未上报结果则视为丢失
    pub fn admit(&mut self, attempt_timeout: Duration) -> bool {
        match self.state {
            CircuitBreakerState::Closed => true,
            CircuitBreakerState::Open => {
                let cooled_down = self
                    .opened_at
                    .map(|opened| opened.elapsed() >= self.config.reset_timeout)
                    .unwrap_or(true);
                if cooled_down {
                    self.transition(CircuitBreakerState::HalfOpen);
                    self.probe_deadline = Some(Instant::now() + attempt_timeout);
                    debug!("熔断器进入半开状态，放行探测请求: name={}", self.name);
                    true
                } else {
                    false
                }
            }
            CircuitBreakerState::HalfOpen => match self.probe_deadline {
                Some(deadline) if Instant::now() < deadline => false,
                Some(_) => {
                    warn!("半开探测未上报结果，重新放行探测请求: name={}", self.name);
                    self.probe_deadline = Some(Instant::now() + attempt_timeout);
                    true
                }
                None => {
                    self.probe_deadline = Some(Instant::now() + attempt_timeout);
                    true
                }
            },
        }
    }

    /// 记录成功
    pub fn record_success(&mut self) {
        match self.state {
            CircuitBreakerState::HalfOpen => self.reset(),
            CircuitBreakerState::Open => {
                // 开启前已经放行的请求，结果忽略
            }
            CircuitBreakerState::Closed => self.push_outcome(true),
        }
    }

    /// 记录失败
    pub fn record_failure(&mut self) {
        match self.state {
            CircuitBreakerState::Closed => {
                self.push_outcome(false);
                let total = self.outcomes.len() as u32;
                let error_percentage = self.error_percentage();
                if total >= self.config.volume_threshold
                    && error_percentage >= self.config.error_threshold_percentage
                {
                    warn!(
                        "🔴 熔断器开启: name={}, calls={}, error_rate={:.1}%",
                        self.name, total, error_percentage
                    );
                    self.open();
                }
            }
            CircuitBreakerState::HalfOpen => {
                warn!("🔴 熔断器重新开启：半开探测失败, name={}", self.name);
                self.open();
            }
            CircuitBreakerState::Open => {
                // 已经是开启状态
            }
        }
    }

    /// 滚动窗口内的错误率（百分比）
    pub fn error_percentage(&self) -> f64 {
        if self.outcomes.is_empty() {
            return 0.0;
        }
        let failures = self.outcomes.iter().filter(|(_, ok)| !ok).count();
        failures as f64 * 100.0 / self.outcomes.len() as f64
    }

    /// 滚动窗口内的调用次数
    pub fn calls_in_window(&self) -> usize {
        self.outcomes.len()
    }

    /// 重置熔断器
    pub fn reset(&mut self) {
        if self.state != CircuitBreakerState::Closed {
            info!("🟢 熔断器已恢复为正常状态: name={}", self.name);
        }
        self.transition(CircuitBreakerState::Closed);
        self.outcomes.clear();
        self.opened_at = None;
        self.probe_deadline = None;
    }

    fn open(&mut self) {
        self.transition(CircuitBreakerState::Open);
        self.opened_at = Some(Instant::now());
        self.probe_deadline = None;
        self.outcomes.clear();
    }

    fn push_outcome(&mut self, success: bool) {
        let now = Instant::now();
        self.outcomes.push_back((now, success));
        while let Some((at, _)) = self.outcomes.front() {
            if now.duration_since(*at) > self.config.rolling_window {
                self.outcomes.pop_front();
            } else {
                break;
            }
        }
    }

    fn transition(&mut self, next: CircuitBreakerState) {
        if self.state != next {
            CIRCUIT_TRANSITIONS
                .with_label_values(&[self.name.as_str(), next.as_str()])
                .inc();
        }
        self.state = next;
    }
}

/// 熔断器状态快照（健康检查用）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CircuitSnapshot {
    pub name: String,
    pub state: CircuitBreakerState,
    pub error_percentage: f64,
    pub calls_in_window: usize,
}

/// 进程内熔断器注册表，按动作名称懒创建
#[derive(Debug, Clone, Default)]
pub struct CircuitBreakerRegistry {
    default_config: CircuitBreakerConfig,
    overrides: Arc<RwLock<HashMap<String, CircuitBreakerConfig>>>,
    breakers: Arc<RwLock<HashMap<String, CircuitBreaker>>>,
}

impl CircuitBreakerRegistry {
    pub fn new(default_config: CircuitBreakerConfig) -> Self {
        Self {
            default_config,
            overrides: Arc::new(RwLock::new(HashMap::new())),
            breakers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// 为某个动作指定独立配置（需在首次调用前设置）
    pub async fn configure(&self, name: &str, config: CircuitBreakerConfig) {
        self.overrides.write().await.insert(name.to_string(), config);
    }

    /// 申请一次执行许可，返回本次尝试的超时
    pub async fn try_acquire(&self, name: &str) -> Option<Duration> {
        self.try_acquire_for(name, None).await
    }

    /// 同 `try_acquire`，`attempt_timeout` 覆盖熔断器配置的单次超时
    pub async fn try_acquire_for(&self, name: &str, attempt_timeout: Option<Duration>) -> Option<Duration> {
        let config = self.config_for(name).await;
        let mut breakers = self.breakers.write().await;
        let breaker = breakers
            .entry(name.to_string())
            .or_insert_with(|| CircuitBreaker::new(name, config));
        let timeout = attempt_timeout.unwrap_or(breaker.config().timeout);
        if breaker.admit(timeout) {
            Some(timeout)
        } else {
            None
        }
    }

    pub async fn record_success(&self, name: &str) {
        if let Some(breaker) = self.breakers.write().await.get_mut(name) {
            breaker.record_success();
        }
    }

    pub async fn record_failure(&self, name: &str) {
        if let Some(breaker) = self.breakers.write().await.get_mut(name) {
            breaker.record_failure();
        }
    }

    pub async fn state(&self, name: &str) -> Option<CircuitBreakerState> {
        self.breakers.read().await.get(name).map(|b| b.state())
    }

    pub async fn snapshot(&self) -> Vec<CircuitSnapshot> {
        let breakers = self.breakers.read().await;
        let mut snapshot: Vec<CircuitSnapshot> = breakers
            .iter()
            .map(|(name, breaker)| CircuitSnapshot {
                name: name.clone(),
                state: breaker.state(),
                error_percentage: breaker.error_percentage(),
                calls_in_window: breaker.calls_in_window(),
            })
            .collect();
        snapshot.sort_by(|a, b| a.name.cmp(&b.name));
        snapshot
    }

    /// 某个动作实际生效的配置
    pub async fn config_for(&self, name: &str) -> CircuitBreakerConfig {
        self.overrides
            .read()
            .await
            .get(name)
            .cloned()
            .unwrap_or_else(|| self.default_config.clone())
    }
}
