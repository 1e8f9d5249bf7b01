//! 准入中间件模块
//!
//! 每个受保护请求依次经过：凭据校验 → 配额检查 → 速率限制 → 记录用量

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderName, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::{debug, info, warn};

use super::credentials::{extract_credential, SharedCredentialStore};
use super::AuthError;
use crate::business::domain::{ApiKey, ApiKeyStatus};
use crate::business::services::{
    QuotaLimits, QuotaSnapshot, RateLimitConfig, RateLimitInfo, SharedQuotaService,
    SharedRateLimitService,
};
use crate::shared::clock::SharedClock;
use crate::shared::metrics::ADMISSION_DECISIONS;
use crate::shared::utils::mask_api_key;
use crate::shared::AppError;

/// 准入通过后放入请求扩展的信息
#[derive(Debug, Clone)]
pub struct AdmissionGrant {
    pub api_key: ApiKey,
    pub rate_limit: RateLimitInfo,
    pub quota: QuotaSnapshot,
}

/// 准入拒绝，已知的窗口与配额状态仍会写入响应头
#[derive(Debug, Clone)]
pub struct AdmissionRejection {
    pub error: AuthError,
    pub rate_limit: Option<RateLimitInfo>,
    pub quota: Option<QuotaSnapshot>,
}

impl AdmissionRejection {
    fn new(error: AuthError) -> Self {
        Self {
            error,
            rate_limit: None,
            quota: None,
        }
    }
}

impl IntoResponse for AdmissionRejection {
    fn into_response(self) -> Response {
        let mut response = AppError::Authentication(self.error).into_response();
        apply_admission_headers(response.headers_mut(), self.rate_limit.as_ref(), self.quota.as_ref());
        response
    }
}

/// 准入守卫
#[derive(Debug, Clone)]
pub struct AdmissionGuard {
    credentials: SharedCredentialStore,
    quota: SharedQuotaService,
    rate_limiter: SharedRateLimitService,
    rate_limit: RateLimitConfig,
    default_limits: QuotaLimits,
    count_rejected_requests: bool,
    clock: SharedClock,
}

impl AdmissionGuard {
    pub fn new(
        credentials: SharedCredentialStore,
        quota: SharedQuotaService,
        rate_limiter: SharedRateLimitService,
        clock: SharedClock,
    ) -> Self {
        Self {
            credentials,
            quota,
            rate_limiter,
            rate_limit: RateLimitConfig::api(),
            default_limits: QuotaLimits::default(),
            count_rejected_requests: true,
            clock,
        }
    }

    pub fn with_rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    pub fn with_default_limits(mut self, limits: QuotaLimits) -> Self {
        self.default_limits = limits;
        self
    }

    /// 被限流的请求是否仍计入配额
    pub fn with_count_rejected_requests(mut self, enabled: bool) -> Self {
        self.count_rejected_requests = enabled;
        self
    }

    /// 对一个请求做出准入决策，并计入Prometheus
    pub async fn admit(&self, credential: Option<&str>) -> Result<AdmissionGrant, AdmissionRejection> {
        let result = self.decide(credential).await;
        let outcome = match &result {
            Ok(_) => "allowed",
            Err(rejection) => rejection.error.outcome(),
        };
        ADMISSION_DECISIONS.with_label_values(&[outcome]).inc();
        result
    }

    async fn decide(&self, credential: Option<&str>) -> Result<AdmissionGrant, AdmissionRejection> {
        let raw_key = credential.ok_or_else(|| AdmissionRejection::new(AuthError::MissingCredential))?;

        let api_key = match self.credentials.find_by_key(raw_key).await {
            Ok(Some(api_key)) => api_key,
            Ok(None) => {
                debug!("API Key不存在: key={}", mask_api_key(raw_key));
                return Err(AdmissionRejection::new(AuthError::InvalidCredential));
            }
            Err(e) => {
                warn!("凭据查找失败: key={}, error={}", mask_api_key(raw_key), e);
                return Err(AdmissionRejection::new(e));
            }
        };

        match api_key.status_at(self.clock.now()) {
            ApiKeyStatus::Usable => {}
            ApiKeyStatus::Inactive => {
                return Err(AdmissionRejection::new(AuthError::CredentialInactive));
            }
            ApiKeyStatus::Expired => {
                return Err(AdmissionRejection::new(AuthError::CredentialExpired));
            }
        }

        let limits = self.limits_for(&api_key);

        let check = self.quota.has_available_quota(api_key.id, &limits).await;
        if !check.has_quota {
            let reason = check.reason.unwrap_or_else(|| "quota exceeded".to_string());
            return Err(AdmissionRejection {
                error: AuthError::QuotaExceeded(reason),
                rate_limit: None,
                quota: check.quota,
            });
        }

        let rate_key = format!("key:{}", api_key.id);
        let decision = self.rate_limiter.check_rate_limit(&rate_key, &self.rate_limit).await;
        if !decision.allowed {
            let quota = if self.count_rejected_requests {
                self.record(&api_key, &limits).await.ok().map(|(snapshot, _)| snapshot)
            } else {
                check.quota
            };
            let retry_after_seconds = (decision.info.reset_time - self.clock.now()).num_seconds().max(0);
            return Err(AdmissionRejection {
                error: AuthError::RateLimited { retry_after_seconds },
                rate_limit: Some(decision.info),
                quota,
            });
        }

        let (quota, exceeded) = self.record(&api_key, &limits).await.map_err(|error| AdmissionRejection {
            error,
            rate_limit: Some(decision.info.clone()),
            quota: check.quota,
        })?;
        if exceeded {
            let reason = quota
                .exceeded_reason()
                .unwrap_or_else(|| "quota exceeded".to_string());
            return Err(AdmissionRejection {
                error: AuthError::QuotaExceeded(reason),
                rate_limit: Some(decision.info),
                quota: Some(quota),
            });
        }

        debug!(
            "✅ 准入通过: key_id={}, owner={}, remaining={}",
            api_key.id, api_key.owner_id, decision.info.remaining
        );
        Ok(AdmissionGrant {
            api_key,
            rate_limit: decision.info,
            quota,
        })
    }

    /// 记录用量；并发越界时立即回滚，返回回滚后的快照和是否越界
    async fn record(&self, api_key: &ApiKey, limits: &QuotaLimits) -> Result<(QuotaSnapshot, bool), AuthError> {
        let record = self
            .quota
            .record_usage(api_key.id, api_key.owner_id, limits)
            .await
            .map_err(|e| {
                warn!("配额记录失败，拒绝请求: key_id={}, error={}", api_key.id, e);
                AuthError::QuotaExceeded("quota store unavailable".to_string())
            })?;

        if !record.exceeded {
            return Ok((record.quota, false));
        }

        info!("并发请求越过配额边界，回滚本次用量: key_id={}", api_key.id);
        if let Err(e) = self.quota.rollback_usage(api_key.id, api_key.owner_id, &record).await {
            warn!("配额回滚失败: key_id={}, error={}", api_key.id, e);
        }
        let mut snapshot = record.quota;
        snapshot.current_daily_usage = snapshot.current_daily_usage.saturating_sub(1);
        snapshot.current_monthly_usage = snapshot.current_monthly_usage.saturating_sub(1);
        Ok((snapshot, true))
    }

    fn limits_for(&self, api_key: &ApiKey) -> QuotaLimits {
        QuotaLimits {
            daily: api_key
                .daily_limit
                .map(|limit| limit.max(0) as u64)
                .unwrap_or(self.default_limits.daily),
            monthly: api_key
                .monthly_limit
                .map(|limit| limit.max(0) as u64)
                .unwrap_or(self.default_limits.monthly),
        }
    }
}

/// 写入 `X-RateLimit-*` 与 `X-Quota-*` 响应头
pub fn apply_admission_headers(
    headers: &mut HeaderMap,
    rate_limit: Option<&RateLimitInfo>,
    quota: Option<&QuotaSnapshot>,
) {
    if let Some(info) = rate_limit {
        insert_header(headers, "x-ratelimit-limit", info.limit);
        insert_header(headers, "x-ratelimit-remaining", info.remaining);
        insert_header(headers, "x-ratelimit-reset", info.reset_time.timestamp());
        insert_header(headers, "x-ratelimit-window", info.window);
    }

    if let Some(quota) = quota {
        insert_header(headers, "x-quota-daily-limit", quota.daily_limit);
        insert_header(headers, "x-quota-daily-used", quota.current_daily_usage);
        insert_header(headers, "x-quota-daily-remaining", quota.daily_remaining());
        insert_header(headers, "x-quota-monthly-limit", quota.monthly_limit);
        insert_header(headers, "x-quota-monthly-used", quota.current_monthly_usage);
        insert_header(headers, "x-quota-monthly-remaining", quota.monthly_remaining());
    }
}

fn insert_header(headers: &mut HeaderMap, name: &'static str, value: impl ToString) {
    if let Ok(value) = HeaderValue::from_str(&value.to_string()) {
        headers.insert(HeaderName::from_static(name), value);
    }
}

/// 准入中间件
pub async fn admission_middleware(
    State(guard): State<Arc<AdmissionGuard>>,
    request: Request,
    next: Next,
) -> Response {
    let (mut request, credential) = extract_credential(request).await;

    match guard.admit(credential.as_ref().map(|c| c.key.as_str())).await {
        Ok(grant) => {
            let rate_limit = grant.rate_limit.clone();
            let quota = grant.quota;
            request.extensions_mut().insert(grant);

            let mut response = next.run(request).await;
            apply_admission_headers(response.headers_mut(), Some(&rate_limit), Some(&quota));
            response
        }
        Err(rejection) => rejection.into_response(),
    }
}
