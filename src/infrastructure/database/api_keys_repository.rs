//! API Key数据库操作
//! 
//! 只保存key的SHA-256哈希，按哈希查找

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use tracing::{debug, error, instrument, warn};

use crate::auth::{AuthError, CredentialStore};
use crate::business::domain::ApiKey;
use crate::shared::types::ApiKeyId;
use crate::shared::utils::sha256_hash;

#[derive(Debug, FromRow)]
struct ApiKeyRow {
    id: i64,
    owner_id: i64,
    name: String,
    key_hash: String,
    is_active: bool,
    expires_at: Option<DateTime<Utc>>,
    daily_limit: Option<i64>,
    monthly_limit: Option<i64>,
    created_at: DateTime<Utc>,
    last_used_at: Option<DateTime<Utc>>,
}

impl From<ApiKeyRow> for ApiKey {
    fn from(row: ApiKeyRow) -> Self {
        ApiKey {
            id: row.id,
            owner_id: row.owner_id,
            name: row.name,
            key_hash: row.key_hash,
            is_active: row.is_active,
            expires_at: row.expires_at,
            daily_limit: row.daily_limit,
            monthly_limit: row.monthly_limit,
            created_at: row.created_at,
            last_used_at: row.last_used_at,
        }
    }
}

/// API Key数据库服务
#[derive(Debug, Clone)]
pub struct ApiKeysRepository {
    pool: PgPool,
}

impl ApiKeysRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 按哈希查找API Key
    #[instrument(skip(self, key_hash))]
    pub async fn find_by_hash(&self, key_hash: &str) -> Result<Option<ApiKey>, sqlx::Error> {
        let row = sqlx::query_as::<_, ApiKeyRow>(
            r#"
            SELECT
                id,
                owner_id,
                name,
                key_hash,
                is_active,
                expires_at,
                daily_limit,
                monthly_limit,
                created_at,
                last_used_at
            FROM api_keys
            WHERE key_hash = $1
            "#,
        )
        .bind(key_hash)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(ApiKey::from))
    }

    /// 更新最后使用时间
    pub async fn touch_last_used(&self, id: ApiKeyId) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE api_keys SET last_used_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for ApiKeysRepository {
    async fn find_by_key(&self, raw_key: &str) -> Result<Option<ApiKey>, AuthError> {
        let key_hash = sha256_hash(raw_key);
        let found = self.find_by_hash(&key_hash).await.map_err(|e| {
            error!("数据库查询错误: {}", e);
            AuthError::Backend(e.to_string())
        })?;

        if let Some(api_key) = &found {
            debug!("🔑 API Key命中: id={}, owner={}", api_key.id, api_key.owner_id);
            let repository = self.clone();
            let id = api_key.id;
            tokio::spawn(async move {
                if let Err(e) = repository.touch_last_used(id).await {
                    warn!("更新API Key使用时间失败: id={}, error={}", id, e);
                }
            });
        }

        Ok(found)
    }
}
