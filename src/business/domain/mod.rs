//! 领域模型模块
//! 
//! 定义业务领域的核心实体和值对象

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::shared::types::{ApiKeyId, OwnerId};

pub mod valuation;

pub use valuation::{ProviderQuote, Valuation, ValuationRange};

/// API Key领域模型
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiKey {
    pub id: ApiKeyId,
    /// 所属租户
    pub owner_id: OwnerId,
    pub name: String,
    pub key_hash: String,
    pub is_active: bool,
    pub expires_at: Option<DateTime<Utc>>,
    /// 为空时使用全局默认配额
    pub daily_limit: Option<i64>,
    pub monthly_limit: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

/// API Key 不可用的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiKeyStatus {
    Usable,
    Inactive,
    Expired,
}

impl ApiKey {
    /// 在给定时刻检查API Key状态
    pub fn status_at(&self, now: DateTime<Utc>) -> ApiKeyStatus {
        if !self.is_active {
            return ApiKeyStatus::Inactive;
        }

        if let Some(expires_at) = self.expires_at {
            if expires_at <= now {
                return ApiKeyStatus::Expired;
            }
        }

        ApiKeyStatus::Usable
    }

    /// 检查API Key是否有效
    pub fn is_valid(&self) -> bool {
        self.status_at(Utc::now()) == ApiKeyStatus::Usable
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn key() -> ApiKey {
        ApiKey {
            id: 1,
            owner_id: 10,
            name: "partner".to_string(),
            key_hash: "hash".to_string(),
            is_active: true,
            expires_at: None,
            daily_limit: None,
            monthly_limit: None,
            created_at: Utc::now(),
            last_used_at: None,
        }
    }

    #[test]
    fn test_status_checks_activity_before_expiry() {
        let now = Utc::now();
        let mut api_key = key();
        assert_eq!(api_key.status_at(now), ApiKeyStatus::Usable);

        api_key.expires_at = Some(now - Duration::seconds(1));
        assert_eq!(api_key.status_at(now), ApiKeyStatus::Expired);

        api_key.is_active = false;
        assert_eq!(api_key.status_at(now), ApiKeyStatus::Inactive);
        assert!(!api_key.is_valid());
    }
}
