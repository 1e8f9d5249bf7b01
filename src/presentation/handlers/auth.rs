//! 登录尝试限流处理器
//!
//! 凭据签发不在本服务内；这里只按客户端IP统计登录尝试次数。
//! 窗口只能等待过期或由内部调用 `RateLimitService::reset` 清空

use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, State},
    http::HeaderMap,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use tracing::{debug, instrument};

use crate::auth::{apply_admission_headers, AdmissionRejection, AuthError};
use crate::business::services::RateLimitInfo;
use crate::presentation::routes::AppState;
use crate::shared::ApiResponse;

/// 登录尝试结果
#[derive(Debug, Serialize)]
pub struct LoginAttemptResponse {
    pub client: String,
    pub allowed: bool,
    pub rate_limit: RateLimitInfo,
}

/// 记录一次登录尝试
#[instrument(skip(state, headers, connect_info))]
pub async fn login_attempt(
    State(state): State<AppState>,
    headers: HeaderMap,
    connect_info: Option<ConnectInfo<SocketAddr>>,
) -> Response {
    let peer = connect_info.as_ref().map(|c| c.0);
    let client = client_ip(&headers, peer, state.trust_proxy_headers);
    debug!("登录尝试: client={}", client);

    let decision = state
        .rate_limiter
        .check_rate_limit(&client, &state.login_rate_limit)
        .await;

    if !decision.allowed {
        let retry_after_seconds = (decision.info.reset_time - state.clock.now()).num_seconds().max(0);
        return AdmissionRejection {
            error: AuthError::RateLimited { retry_after_seconds },
            rate_limit: Some(decision.info),
            quota: None,
        }
        .into_response();
    }

    let mut response = Json(ApiResponse::success(LoginAttemptResponse {
        client,
        allowed: true,
        rate_limit: decision.info.clone(),
    }))
    .into_response();
    apply_admission_headers(response.headers_mut(), Some(&decision.info), None);
    response
}

/// 客户端地址；只有部署在受信任代理之后时才采用 `x-forwarded-for` 的第一个地址
fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>, trust_forwarded: bool) -> String {
    let forwarded = if trust_forwarded {
        headers
            .get("x-forwarded-for")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .map(|ip| ip.trim().to_string())
            .filter(|ip| !ip.is_empty())
    } else {
        None
    };

    forwarded
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}
