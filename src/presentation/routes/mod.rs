//! 路由配置模块
//! 
//! 组织和配置所有HTTP路由

use std::sync::Arc;

use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::auth::{admission_middleware, AdmissionGuard};
use crate::business::services::{
    CircuitBreakerRegistry, RateLimitConfig, SharedRateLimitService, ValuationService,
};
use crate::infrastructure::cache::CacheEngine;
use crate::infrastructure::SharedStoreRef;
use crate::presentation::handlers;
use crate::shared::clock::SharedClock;

/// 处理器共享状态
#[derive(Debug, Clone)]
pub struct AppState {
    pub store: SharedStoreRef,
    pub cache: CacheEngine,
    pub valuation: ValuationService,
    pub rate_limiter: SharedRateLimitService,
    /// 登录尝试使用的限流窗口
    pub login_rate_limit: RateLimitConfig,
    /// 为true时按 `x-forwarded-for` 识别客户端（仅限部署在受信任代理之后）
    pub trust_proxy_headers: bool,
    pub breakers: CircuitBreakerRegistry,
    pub admission: Arc<AdmissionGuard>,
    pub clock: SharedClock,
}

/// 创建应用路由
pub fn create_routes(state: AppState) -> Router {
    // 需要准入检查的路由
    let guarded_routes = Router::new()
        .route("/api/valuations/:property_id", get(handlers::valuations::get_valuation))
        .route(
            "/api/valuations/:property_id/cache",
            delete(handlers::valuations::invalidate_valuation_cache),
        )
        .route("/api/cache/metrics/:namespace", get(handlers::cache::get_cache_metrics))
        .route("/api/cache/invalidate", post(handlers::cache::invalidate_cache))
        .route_layer(middleware::from_fn_with_state(
            state.admission.clone(),
            admission_middleware,
        ));

    // 公开路由
    let public_routes = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/metrics", get(handlers::health::prometheus_metrics))
        .route("/api/auth/login-attempt", post(handlers::auth::login_attempt));

    Router::new()
        .merge(public_routes)
        .merge(guarded_routes)
        .with_state(state)
        // 全局中间件
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
