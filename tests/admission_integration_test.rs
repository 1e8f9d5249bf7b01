//! 准入与估值路由集成测试
//!
//! 使用进程内存储和内存凭据驱动完整的 axum 路由

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    response::Response,
    Router,
};
use chrono::{TimeZone, Utc};
use serde_json::Value;
use tower::ServiceExt;

use valuation_gateway_rust::auth::{AdmissionGuard, InMemoryCredentialStore};
use valuation_gateway_rust::business::domain::{ApiKey, ProviderQuote};
use valuation_gateway_rust::business::services::{
    CircuitBreakerRegistry, ProviderError, QuotaLimits, QuotaService, RateLimitConfig,
    RateLimitService, ResilienceWrapper, ValuationProvider, ValuationService,
};
use valuation_gateway_rust::infrastructure::cache::{CacheEngine, CacheEngineConfig};
use valuation_gateway_rust::infrastructure::MemoryStore;
use valuation_gateway_rust::shared::clock::{ManualClock, SharedClock, SystemClock};
use valuation_gateway_rust::{create_routes, AppState};

#[derive(Debug)]
struct FixedProvider {
    name: &'static str,
    estimate: f64,
    calls: AtomicU32,
}

#[async_trait]
impl ValuationProvider for FixedProvider {
    fn name(&self) -> &str {
        self.name
    }

    async fn fetch(&self, _property_id: &str) -> Result<ProviderQuote, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ProviderQuote {
            provider: self.name.to_string(),
            estimate: self.estimate,
            currency: Some("USD".to_string()),
        })
    }
}

fn api_key(id: i64, is_active: bool) -> ApiKey {
    ApiKey {
        id,
        owner_id: 42,
        name: format!("partner-{}", id),
        key_hash: String::new(),
        is_active,
        expires_at: None,
        daily_limit: None,
        monthly_limit: None,
        created_at: Utc::now(),
        last_used_at: None,
    }
}

struct TestApp {
    router: Router,
    provider: Arc<FixedProvider>,
}

async fn test_app(api_limit: u32, daily_limit: u64) -> TestApp {
    build_app(api_limit, daily_limit, true, Arc::new(SystemClock)).await
}

async fn build_app(api_limit: u32, daily_limit: u64, trust_proxy_headers: bool, clock: SharedClock) -> TestApp {
    let store = Arc::new(MemoryStore::new());
    let cache = CacheEngine::new(store.clone(), CacheEngineConfig::default());

    let credentials = InMemoryCredentialStore::new();
    credentials.insert("live-key", api_key(1, true)).await;
    credentials.insert("other-key", api_key(2, true)).await;
    credentials.insert("disabled-key", api_key(3, false)).await;

    let quota = Arc::new(QuotaService::new(store.clone(), clock.clone()));
    let rate_limiter = Arc::new(RateLimitService::new(store.clone(), clock.clone()));
    let admission = Arc::new(
        AdmissionGuard::new(Arc::new(credentials), quota, rate_limiter.clone(), clock.clone())
            .with_rate_limit(RateLimitConfig::new("api", api_limit, Duration::from_secs(60)))
            .with_default_limits(QuotaLimits {
                daily: daily_limit,
                monthly: 10_000,
            }),
    );

    let provider = Arc::new(FixedProvider {
        name: "alpha",
        estimate: 100.0,
        calls: AtomicU32::new(0),
    });
    let second = Arc::new(FixedProvider {
        name: "beta",
        estimate: 200.0,
        calls: AtomicU32::new(0),
    });

    let breakers = CircuitBreakerRegistry::default();
    let valuation = ValuationService::new(
        cache.clone(),
        ResilienceWrapper::new(breakers.clone()),
        vec![provider.clone(), second],
        clock.clone(),
    )
    .with_retry_policy(0, Duration::from_millis(1));

    let router = create_routes(AppState {
        store,
        cache,
        valuation,
        rate_limiter,
        login_rate_limit: RateLimitConfig::new("login", 2, Duration::from_secs(900)),
        trust_proxy_headers,
        breakers,
        admission,
        clock,
    });

    TestApp { router, provider }
}

async fn send(router: &Router, request: Request<Body>) -> Response {
    router.clone().oneshot(request).await.unwrap()
}

async fn json_body(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn get(uri: &str, api_key: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(key) = api_key {
        builder = builder.header("x-api-key", key);
    }
    builder.body(Body::empty()).unwrap()
}

fn header<'a>(response: &'a Response, name: &str) -> &'a str {
    response.headers()[name].to_str().unwrap()
}

#[tokio::test]
async fn test_health_and_metrics_are_public() {
    let app = test_app(10, 100).await;

    let response = send(&app.router, get("/health", None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["store"]["status"], "healthy");

    // 先产生一次准入决策
    send(&app.router, get("/api/valuations/p1", None)).await;
    let response = send(&app.router, get("/metrics", None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert!(String::from_utf8_lossy(&bytes).contains("admission_decisions_total"));
}

#[tokio::test]
async fn test_missing_or_unknown_credential_is_401() {
    let app = test_app(10, 100).await;

    let response = send(&app.router, get("/api/valuations/p1", None)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = json_body(response).await;
    assert_eq!(body["error"]["code"], "MISSING_API_KEY");

    let response = send(&app.router, get("/api/valuations/p1", Some("bogus"))).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(response).await["error"]["code"], "INVALID_API_KEY");
}

#[tokio::test]
async fn test_inactive_credential_is_403() {
    let app = test_app(10, 100).await;

    let response = send(&app.router, get("/api/valuations/p1", Some("disabled-key"))).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(json_body(response).await["error"]["code"], "API_KEY_INACTIVE");
    assert_eq!(app.provider.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_admitted_request_carries_headers_and_is_cached() {
    let app = test_app(10, 100).await;

    let response = send(&app.router, get("/api/valuations/p1", Some("live-key"))).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "x-ratelimit-limit"), "10");
    assert_eq!(header(&response, "x-ratelimit-remaining"), "9");
    assert_eq!(header(&response, "x-ratelimit-window"), "60");
    assert_eq!(header(&response, "x-quota-daily-limit"), "100");
    assert_eq!(header(&response, "x-quota-daily-used"), "1");
    assert_eq!(header(&response, "x-quota-daily-remaining"), "99");

    let body = json_body(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["estimate"], 150.0);
    assert_eq!(body["data"]["range"]["low"], 100.0);
    assert_eq!(body["data"]["range"]["high"], 200.0);
    assert_eq!(body["data"]["stale"], false);

    let response = send(&app.router, get("/api/valuations/p1", Some("live-key"))).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "x-quota-daily-used"), "2");
    assert_eq!(app.provider.calls.load(Ordering::SeqCst), 1);

    let response = send(&app.router, get("/api/cache/metrics/valuation", Some("live-key"))).await;
    let body = json_body(response).await;
    assert_eq!(body["data"]["hits"], 1);
    assert_eq!(body["data"]["misses"], 1);
}

#[tokio::test]
async fn test_query_parameter_credential() {
    let app = test_app(10, 100).await;

    let response = send(&app.router, get("/api/valuations/p1?api_key=live-key", None)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = send(&app.router, get("/api/valuations/p1?apiKey=live-key", None)).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_body_credential_and_invalidation() {
    let app = test_app(10, 100).await;

    send(&app.router, get("/api/valuations/p1", Some("live-key"))).await;

    let request = Request::builder()
        .method("POST")
        .uri("/api/cache/invalidate")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"apiKey":"live-key","tag":"property:p1"}"#))
        .unwrap();
    let response = send(&app.router, request).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["data"]["kind"], "tag");
    assert_eq!(body["data"]["deleted"], 1);

    // 缓存已失效，再次请求会调用提供方
    send(&app.router, get("/api/valuations/p1", Some("live-key"))).await;
    assert_eq!(app.provider.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_invalidate_requires_exactly_one_target() {
    let app = test_app(10, 100).await;

    let request = Request::builder()
        .method("POST")
        .uri("/api/cache/invalidate")
        .header("content-type", "application/json")
        .header("x-api-key", "live-key")
        .body(Body::from(r#"{"key":"valuation:p1","pattern":"valuation:*"}"#))
        .unwrap();
    let response = send(&app.router, request).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_delete_property_cache() {
    let app = test_app(10, 100).await;
    send(&app.router, get("/api/valuations/p9", Some("live-key"))).await;

    let request = Request::builder()
        .method("DELETE")
        .uri("/api/valuations/p9/cache")
        .header("x-api-key", "live-key")
        .body(Body::empty())
        .unwrap();
    let response = send(&app.router, request).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["data"]["deleted"], 1);
}

#[tokio::test]
async fn test_rate_limit_is_403_with_headers() {
    let app = test_app(2, 100).await;

    for _ in 0..2 {
        let response = send(&app.router, get("/api/valuations/p1", Some("live-key"))).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = send(&app.router, get("/api/valuations/p1", Some("live-key"))).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(header(&response, "x-ratelimit-remaining"), "0");
    assert_eq!(header(&response, "x-ratelimit-limit"), "2");
    assert!(response.headers().contains_key("x-ratelimit-reset"));
    assert_eq!(json_body(response).await["error"]["code"], "RATE_LIMIT_EXCEEDED");

    // 不同的key有独立窗口
    let response = send(&app.router, get("/api/valuations/p1", Some("other-key"))).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_daily_quota_is_403() {
    let app = test_app(100, 2).await;

    for _ in 0..2 {
        let response = send(&app.router, get("/api/valuations/p1", Some("live-key"))).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = send(&app.router, get("/api/valuations/p1", Some("live-key"))).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(header(&response, "x-quota-daily-remaining"), "0");
    let body = json_body(response).await;
    assert_eq!(body["error"]["code"], "QUOTA_EXCEEDED");
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("Daily quota exceeded (2/2)"));
}

fn login_attempt(ip: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/auth/login-attempt")
        .header("content-type", "application/json")
        .header("x-forwarded-for", ip)
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_login_attempts_are_limited_per_client() {
    let start = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
    let app = build_app(10, 100, true, Arc::new(ManualClock::new(start))).await;

    for remaining in ["1", "0"] {
        let response = send(&app.router, login_attempt("203.0.113.5", "{}")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(header(&response, "x-ratelimit-remaining"), remaining);
    }

    let response = send(&app.router, login_attempt("203.0.113.5", "{}")).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    // 重试时间按注入的时钟计算
    let body = json_body(response).await;
    let retry_after: i64 = body["error"]["message"]
        .as_str()
        .unwrap()
        .split_whitespace()
        .nth(1)
        .unwrap()
        .parse()
        .unwrap();
    assert!((899..=900).contains(&retry_after));

    let response = send(&app.router, login_attempt("198.51.100.1", "{}")).await;
    assert_eq!(response.status(), StatusCode::OK);

    // 客户端无法自行清空窗口
    let response = send(&app.router, login_attempt("203.0.113.5", r#"{"success":true}"#)).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_untrusted_forwarded_header_cannot_rotate_login_window() {
    let app = build_app(10, 100, false, Arc::new(SystemClock)).await;

    for ip in ["203.0.113.5", "203.0.113.6"] {
        let response = send(&app.router, login_attempt(ip, "{}")).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = send(&app.router, login_attempt("203.0.113.7", "{}")).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}
