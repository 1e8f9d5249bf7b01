//! 统一错误处理模块
//! 
//! 定义系统中所有错误类型，提供统一的错误处理机制

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::business::services::ResilienceError;

/// 应用程序统一错误类型
#[derive(Debug, Error)]
pub enum AppError {
    /// 数据库相关错误
    #[error("数据库错误: {0}")]
    Database(#[from] crate::infrastructure::DatabaseError),

    /// 共享存储错误
    #[error("存储错误: {0}")]
    Store(#[from] crate::infrastructure::StoreError),

    /// 缓存错误
    #[error("缓存错误: {0}")]
    Cache(#[from] crate::infrastructure::cache::CacheError),

    /// 弹性调用失败（熔断、超时、重试耗尽）
    #[error("{0}")]
    Resilience(#[from] crate::business::services::ResilienceError),
    
    /// 准入相关错误
    #[error("{0}")]
    Authentication(#[from] crate::auth::AuthError),
    
    /// 验证错误
    #[error("验证错误: {0}")]
    Validation(String),
    
    /// 外部服务错误
    #[error("外部服务错误: {0}")]
    ExternalService(String),
}

impl AppError {
    /// 获取HTTP状态码
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Cache(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Resilience(ResilienceError::CircuitOpen { .. }) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Resilience(ResilienceError::Timeout { .. }) => StatusCode::GATEWAY_TIMEOUT,
            AppError::Resilience(_) => StatusCode::BAD_GATEWAY,
            AppError::Authentication(e) => e.status_code(),
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::ExternalService(_) => StatusCode::BAD_GATEWAY,
        }
    }
    
    /// 获取错误代码
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::Database(_) => "DATABASE_ERROR",
            AppError::Store(_) => "STORE_UNAVAILABLE",
            AppError::Cache(_) => "CACHE_ERROR",
            AppError::Resilience(ResilienceError::CircuitOpen { .. }) => "CIRCUIT_OPEN",
            AppError::Resilience(ResilienceError::Timeout { .. }) => "UPSTREAM_TIMEOUT",
            AppError::Resilience(_) => "UPSTREAM_FAILED",
            AppError::Authentication(e) => e.error_code(),
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::ExternalService(_) => "EXTERNAL_SERVICE_ERROR",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status_code = self.status_code();
        let error_code = self.error_code();
        
        if status_code.is_server_error() {
            tracing::error!(
                status = ?status_code,
                error_code = error_code,
                error = %self,
                "处理请求时发生错误"
            );
        } else {
            tracing::info!(
                status = ?status_code,
                error_code = error_code,
                error = %self,
                "请求被拒绝"
            );
        }
        
        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": self.to_string(),
                "timestamp": chrono::Utc::now().to_rfc3339(),
            }
        }));
        
        (status_code, body).into_response()
    }
}

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;

/// 验证错误构造宏
#[macro_export]
macro_rules! validation_error {
    ($msg:expr) => {
        $crate::shared::error::AppError::Validation($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::shared::error::AppError::Validation(format!($fmt, $($arg)*))
    };
}
