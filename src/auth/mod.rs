//! 认证和准入模块
//! 
//! 提供API Key提取、凭据查找和准入决策（凭据 → 配额 → 限流 → 记录用量）

pub mod credentials;
pub mod middleware;

// 重新导出常用类型
pub use credentials::{
    extract_credential, CachedCredentialStore, CredentialSource, CredentialStore,
    ExtractedCredential, InMemoryCredentialStore, SharedCredentialStore,
};
pub use middleware::{
    admission_middleware, apply_admission_headers, AdmissionGrant, AdmissionGuard,
    AdmissionRejection,
};

use axum::http::StatusCode;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("缺少API Key")]
    MissingCredential,
    #[error("无效的API Key")]
    InvalidCredential,
    #[error("API Key已停用")]
    CredentialInactive,
    #[error("API Key已过期")]
    CredentialExpired,
    #[error("配额不足: {0}")]
    QuotaExceeded(String),
    #[error("请求过于频繁，请在 {retry_after_seconds} 秒后重试")]
    RateLimited { retry_after_seconds: i64 },
    #[error("凭据服务不可用: {0}")]
    Backend(String),
}

impl AuthError {
    /// 缺失/无效凭据为401，其余准入拒绝为403
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::MissingCredential | AuthError::InvalidCredential => StatusCode::UNAUTHORIZED,
            AuthError::CredentialInactive
            | AuthError::CredentialExpired
            | AuthError::QuotaExceeded(_)
            | AuthError::RateLimited { .. } => StatusCode::FORBIDDEN,
            AuthError::Backend(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            AuthError::MissingCredential => "MISSING_API_KEY",
            AuthError::InvalidCredential => "INVALID_API_KEY",
            AuthError::CredentialInactive => "API_KEY_INACTIVE",
            AuthError::CredentialExpired => "API_KEY_EXPIRED",
            AuthError::QuotaExceeded(_) => "QUOTA_EXCEEDED",
            AuthError::RateLimited { .. } => "RATE_LIMIT_EXCEEDED",
            AuthError::Backend(_) => "AUTH_BACKEND_UNAVAILABLE",
        }
    }

    /// Prometheus 中的准入结果标签
    pub fn outcome(&self) -> &'static str {
        match self {
            AuthError::MissingCredential | AuthError::InvalidCredential => "unauthenticated",
            AuthError::CredentialInactive | AuthError::CredentialExpired => "forbidden",
            AuthError::QuotaExceeded(_) => "quota_exceeded",
            AuthError::RateLimited { .. } => "rate_limited",
            AuthError::Backend(_) => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(AuthError::MissingCredential.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(AuthError::InvalidCredential.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(AuthError::CredentialInactive.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(AuthError::CredentialExpired.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(AuthError::QuotaExceeded("daily".into()).status_code(), StatusCode::FORBIDDEN);
        assert_eq!(
            AuthError::RateLimited { retry_after_seconds: 3 }.status_code(),
            StatusCode::FORBIDDEN
        );
    }
}
