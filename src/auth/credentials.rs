//! 凭据提取与凭据存储
//!
//! 提取顺序：`x-api-key` 头、`Authorization: Bearer`、查询参数、JSON请求体字段

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    extract::{Query, Request},
    http::{header, HeaderMap, Method},
};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::AuthError;
use crate::business::domain::ApiKey;
use crate::infrastructure::cache::{tag_list, CacheEngine, CacheResult};
use crate::shared::constants::http as http_constants;
use crate::shared::types::OwnerId;
use crate::shared::utils::sha256_hash;

/// 凭据来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    Header,
    Bearer,
    Query,
    Body,
}

/// 从请求中提取的凭据
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedCredential {
    pub key: String,
    pub source: CredentialSource,
}

impl ExtractedCredential {
    fn new(key: &str, source: CredentialSource) -> Option<Self> {
        let key = key.trim();
        if key.is_empty() {
            return None;
        }
        Some(Self {
            key: key.to_string(),
            source,
        })
    }
}

/// 从请求头中提取API key
pub fn credential_from_headers(headers: &HeaderMap) -> Option<ExtractedCredential> {
    if let Some(key) = headers
        .get(http_constants::API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| ExtractedCredential::new(value, CredentialSource::Header))
    {
        return Some(key);
    }

    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .and_then(|token| ExtractedCredential::new(token, CredentialSource::Bearer))
}

/// 从查询参数中提取API key
pub fn credential_from_query(uri: &axum::http::Uri) -> Option<ExtractedCredential> {
    let Query(params) = Query::<HashMap<String, String>>::try_from_uri(uri).ok()?;
    http_constants::API_KEY_QUERY_PARAMS
        .iter()
        .find_map(|name| params.get(*name))
        .and_then(|value| ExtractedCredential::new(value, CredentialSource::Query))
}

/// 从JSON请求体中提取API key
pub fn credential_from_body(body: &[u8]) -> Option<ExtractedCredential> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    let object = value.as_object()?;
    http_constants::API_KEY_BODY_FIELDS
        .iter()
        .find_map(|field| object.get(*field).and_then(|v| v.as_str()))
        .and_then(|key| ExtractedCredential::new(key, CredentialSource::Body))
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.starts_with("application/json"))
        .unwrap_or(false)
}

/// 按优先级提取凭据
///
/// 只有前面的来源都没有时才读取请求体；读取后的请求体原样放回请求
pub async fn extract_credential(request: Request) -> (Request, Option<ExtractedCredential>) {
    if let Some(credential) = credential_from_headers(request.headers())
        .or_else(|| credential_from_query(request.uri()))
    {
        return (request, Some(credential));
    }

    let method = request.method();
    if method == Method::GET || method == Method::HEAD || !is_json(request.headers()) {
        return (request, None);
    }

    let (parts, body) = request.into_parts();
    match to_bytes(body, http_constants::MAX_CREDENTIAL_BODY_BYTES).await {
        Ok(bytes) => {
            let credential = credential_from_body(&bytes);
            (Request::from_parts(parts, Body::from(bytes)), credential)
        }
        Err(e) => {
            warn!("读取请求体失败，无法提取凭据: {}", e);
            (Request::from_parts(parts, Body::empty()), None)
        }
    }
}

/// 凭据存储
#[async_trait]
pub trait CredentialStore: Send + Sync + std::fmt::Debug {
    /// 按明文key查找；未找到返回None
    async fn find_by_key(&self, raw_key: &str) -> Result<Option<ApiKey>, AuthError>;
}

pub type SharedCredentialStore = Arc<dyn CredentialStore>;

/// 内存凭据存储（开发与测试）
#[derive(Debug, Clone, Default)]
pub struct InMemoryCredentialStore {
    keys: Arc<RwLock<HashMap<String, ApiKey>>>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记一个明文key，存储时只保留哈希
    pub async fn insert(&self, raw_key: &str, mut api_key: ApiKey) {
        let key_hash = sha256_hash(raw_key);
        api_key.key_hash = key_hash.clone();
        self.keys.write().await.insert(key_hash, api_key);
    }

    pub async fn remove(&self, raw_key: &str) -> Option<ApiKey> {
        self.keys.write().await.remove(&sha256_hash(raw_key))
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn find_by_key(&self, raw_key: &str) -> Result<Option<ApiKey>, AuthError> {
        Ok(self.keys.read().await.get(&sha256_hash(raw_key)).cloned())
    }
}

/// 带缓存的凭据存储
///
/// 条目以 `owner:{owner_id}` 打标签，可以按租户整体失效；未找到的结果不缓存
#[derive(Debug, Clone)]
pub struct CachedCredentialStore {
    inner: SharedCredentialStore,
    cache: CacheEngine,
    ttl: Duration,
}

impl CachedCredentialStore {
    pub fn new(inner: SharedCredentialStore, cache: CacheEngine, ttl: Duration) -> Self {
        Self { inner, cache, ttl }
    }

    /// 失效某个租户的全部凭据缓存
    pub async fn evict_owner(&self, owner_id: OwnerId) -> u64 {
        match self.cache.invalidate_tag(&owner_tag(owner_id)).await {
            Ok(report) => report.deleted,
            Err(e) => {
                warn!("凭据缓存失效失败: owner={}, error={}", owner_id, e);
                0
            }
        }
    }
}

#[async_trait]
impl CredentialStore for CachedCredentialStore {
    async fn find_by_key(&self, raw_key: &str) -> Result<Option<ApiKey>, AuthError> {
        let cache_key = format!("credential:{}", sha256_hash(raw_key));
        if let CacheResult::Hit(api_key) = self.cache.get::<ApiKey>(&cache_key).await {
            return Ok(Some(api_key));
        }

        let found = self.inner.find_by_key(raw_key).await?;
        if let Some(api_key) = &found {
            let tags = tag_list([owner_tag(api_key.owner_id), format!("api_key:{}", api_key.id)]);
            if let Err(e) = self.cache.set(&cache_key, api_key, self.ttl, &tags).await {
                debug!("凭据缓存写入失败: id={}, error={}", api_key.id, e);
            }
        }
        Ok(found)
    }
}

fn owner_tag(owner_id: OwnerId) -> String {
    format!("owner:{}", owner_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::cache::CacheEngineConfig;
    use crate::infrastructure::store::MemoryStore;
    use axum::http::HeaderValue;
    use chrono::Utc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn api_key(id: i64, owner_id: i64) -> ApiKey {
        ApiKey {
            id,
            owner_id,
            name: format!("key-{}", id),
            key_hash: String::new(),
            is_active: true,
            expires_at: None,
            daily_limit: None,
            monthly_limit: None,
            created_at: Utc::now(),
            last_used_at: None,
        }
    }

    #[test]
    fn test_header_takes_priority_over_bearer() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer bearer-key"));
        assert_eq!(
            credential_from_headers(&headers),
            Some(ExtractedCredential { key: "bearer-key".into(), source: CredentialSource::Bearer })
        );

        headers.insert("x-api-key", HeaderValue::from_static("header-key"));
        assert_eq!(credential_from_headers(&headers).unwrap().key, "header-key");
    }

    #[test]
    fn test_non_bearer_authorization_is_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Basic dXNlcjpwYXNz"));
        assert!(credential_from_headers(&headers).is_none());
    }

    #[test]
    fn test_query_parameters() {
        let uri: axum::http::Uri = "/api/valuations/1?apiKey=camel".parse().unwrap();
        assert_eq!(credential_from_query(&uri).unwrap().key, "camel");

        let uri: axum::http::Uri = "/api/valuations/1?apiKey=camel&api_key=snake".parse().unwrap();
        assert_eq!(credential_from_query(&uri).unwrap().key, "snake");

        let uri: axum::http::Uri = "/api/valuations/1?api_key=".parse().unwrap();
        assert!(credential_from_query(&uri).is_none());
    }

    #[test]
    fn test_body_fields() {
        assert_eq!(credential_from_body(br#"{"apiKey":"from-body"}"#).unwrap().key, "from-body");
        assert_eq!(credential_from_body(br#"{"api_key":"snake"}"#).unwrap().source, CredentialSource::Body);
        assert!(credential_from_body(br#"{"apiKey": 42}"#).is_none());
        assert!(credential_from_body(b"not json").is_none());
    }

    #[tokio::test]
    async fn test_body_is_restored_after_extraction() {
        let request = axum::http::Request::builder()
            .method("POST")
            .uri("/api/cache/invalidate")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"apiKey":"k1","pattern":"valuation:"}"#))
            .unwrap();

        let (request, credential) = extract_credential(request).await;
        assert_eq!(credential.unwrap().key, "k1");

        let bytes = to_bytes(request.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], br#"{"apiKey":"k1","pattern":"valuation:"}"#);
    }

    #[tokio::test]
    async fn test_query_wins_over_body() {
        let request = axum::http::Request::builder()
            .method("POST")
            .uri("/x?api_key=query-key")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"apiKey":"body-key"}"#))
            .unwrap();

        let (_, credential) = extract_credential(request).await;
        assert_eq!(credential.unwrap().source, CredentialSource::Query);
    }

    #[tokio::test]
    async fn test_in_memory_store_hashes_keys() {
        let store = InMemoryCredentialStore::new();
        store.insert("secret", api_key(1, 10)).await;

        let found = store.find_by_key("secret").await.unwrap().unwrap();
        assert_eq!(found.key_hash, sha256_hash("secret"));
        assert!(store.find_by_key("other").await.unwrap().is_none());
    }

    #[derive(Debug)]
    struct CountingStore {
        inner: InMemoryCredentialStore,
        lookups: AtomicU32,
    }

    #[async_trait]
    impl CredentialStore for CountingStore {
        async fn find_by_key(&self, raw_key: &str) -> Result<Option<ApiKey>, AuthError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            self.inner.find_by_key(raw_key).await
        }
    }

    #[tokio::test]
    async fn test_cached_store_caches_hits_and_evicts_by_owner() {
        let inner = InMemoryCredentialStore::new();
        inner.insert("k1", api_key(1, 10)).await;
        inner.insert("k2", api_key(2, 10)).await;
        let counting = Arc::new(CountingStore { inner, lookups: AtomicU32::new(0) });

        let cache = CacheEngine::new(Arc::new(MemoryStore::new()), CacheEngineConfig::default());
        let store = CachedCredentialStore::new(counting.clone(), cache, Duration::from_secs(60));

        store.find_by_key("k1").await.unwrap();
        store.find_by_key("k1").await.unwrap();
        store.find_by_key("k2").await.unwrap();
        assert_eq!(counting.lookups.load(Ordering::SeqCst), 2);

        // 未找到的结果不缓存
        store.find_by_key("missing").await.unwrap();
        store.find_by_key("missing").await.unwrap();
        assert_eq!(counting.lookups.load(Ordering::SeqCst), 4);

        assert_eq!(store.evict_owner(10).await, 2);
        store.find_by_key("k1").await.unwrap();
        assert_eq!(counting.lookups.load(Ordering::SeqCst), 5);
    }
}
