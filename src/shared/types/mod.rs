//! 共享类型定义模块

use serde::{Deserialize, Serialize};

/// API Key ID类型（配额主体）
pub type ApiKeyId = i64;

/// 租户所有者ID类型
pub type OwnerId = i64;

/// 房产ID类型
pub type PropertyId = String;

/// 统一API响应格式
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    pub timestamp: String,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn success_with_message(data: T, message: String) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}
