//! 健康检查处理器
//!
//! 共享存储连通性、熔断器状态与Prometheus指标

use std::time::Instant;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json},
};
use serde::Serialize;
use tracing::{instrument, warn};

use crate::business::services::{CircuitBreakerState, CircuitSnapshot};
use crate::presentation::routes::AppState;
use crate::shared::metrics;

/// 单项健康检查结果
#[derive(Debug, Serialize)]
pub struct HealthCheck {
    pub status: String,
    pub response_time_ms: u64,
    pub error: Option<String>,
}

/// 健康检查响应
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    pub timestamp: String,
    pub store: HealthCheck,
    pub circuits: Vec<CircuitSnapshot>,
}

/// 健康检查
///
/// 存储不可用时返回503；有熔断器打开时状态为 degraded
#[instrument(skip(state))]
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let started = Instant::now();
    let store = match state.store.ping().await {
        Ok(()) => HealthCheck {
            status: "healthy".to_string(),
            response_time_ms: started.elapsed().as_millis() as u64,
            error: None,
        },
        Err(e) => {
            warn!("🏥 共享存储健康检查失败: {}", e);
            HealthCheck {
                status: "unhealthy".to_string(),
                response_time_ms: started.elapsed().as_millis() as u64,
                error: Some(e.to_string()),
            }
        }
    };

    let circuits = state.breakers.snapshot().await;
    let store_ok = store.error.is_none();
    let any_open = circuits.iter().any(|c| c.state == CircuitBreakerState::Open);

    let (status_code, status) = match (store_ok, any_open) {
        (false, _) => (StatusCode::SERVICE_UNAVAILABLE, "unhealthy"),
        (true, true) => (StatusCode::OK, "degraded"),
        (true, false) => (StatusCode::OK, "ok"),
    };

    (
        status_code,
        Json(HealthResponse {
            status: status.to_string(),
            service: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            store,
            circuits,
        }),
    )
}

/// Prometheus 文本格式指标
pub async fn prometheus_metrics() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::render(),
    )
}
