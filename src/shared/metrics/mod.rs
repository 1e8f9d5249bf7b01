//! Prometheus指标
//!
//! 进程内注册表，由 `/metrics` 端点导出

use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};

pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

/// 准入决策计数（outcome: allowed / unauthenticated / forbidden / quota_exceeded / rate_limited / error）
pub static ADMISSION_DECISIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_counter_vec(
        "admission_decisions_total",
        "Admission decisions by outcome",
        &["outcome"],
    )
});

/// 熔断器状态迁移计数
pub static CIRCUIT_TRANSITIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_counter_vec(
        "circuit_breaker_transitions_total",
        "Circuit breaker state transitions",
        &["name", "state"],
    )
});

/// 缓存读取结果计数（进程内视角，共享计数见 get_metrics）
pub static CACHE_LOOKUPS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_counter_vec(
        "cache_lookups_total",
        "Cache lookups by namespace and result",
        &["namespace", "result"],
    )
});

fn register_counter_vec(name: &str, help: &str, labels: &[&str]) -> IntCounterVec {
    let counter = IntCounterVec::new(Opts::new(name, help), labels)
        .unwrap_or_else(|e| panic!("invalid metric definition {}: {}", name, e));
    if let Err(e) = REGISTRY.register(Box::new(counter.clone())) {
        tracing::warn!("指标注册失败: name={}, error={}", name, e);
    }
    counter
}

/// 以文本格式导出所有指标
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        tracing::warn!("指标编码失败: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
