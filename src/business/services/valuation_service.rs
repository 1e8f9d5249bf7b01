//! 估值服务
//!
//! 并发调用多个上游估值提供方，每个提供方独立走熔断与重试；
//! 单个提供方失败只被剔除，全部失败时降级为最近一次成功的结果

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::resilience::{retry_budget, ResilienceError, ResilienceOptions, ResilienceWrapper};
use crate::business::domain::{ProviderQuote, Valuation};
use crate::infrastructure::cache::{tag_list, CacheEngine, WarmupTask};
use crate::shared::clock::SharedClock;
use crate::shared::constants::{http as http_constants, resilience as resilience_constants, valuation as valuation_constants};
use crate::shared::{AppError, AppResult};

/// 上游提供方错误
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("请求失败: {0}")]
    Http(#[from] reqwest::Error),

    #[error("上游返回状态码 {0}")]
    Status(StatusCode),

    #[error("上游响应无效: {0}")]
    InvalidResponse(String),
}

/// 估值提供方
#[async_trait]
pub trait ValuationProvider: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &str;

    async fn fetch(&self, property_id: &str) -> Result<ProviderQuote, ProviderError>;
}

pub type SharedValuationProvider = Arc<dyn ValuationProvider>;

#[derive(Debug, Deserialize)]
struct ProviderResponse {
    estimate: f64,
    #[serde(default)]
    currency: Option<String>,
}

/// 基于HTTP的提供方：`GET {base_url}/valuations/{id}`
#[derive(Debug, Clone)]
pub struct HttpValuationProvider {
    name: String,
    base_url: String,
    api_key: Option<String>,
    client: Client,
}

impl HttpValuationProvider {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>, api_key: Option<String>, timeout: Duration) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(5))
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| {
                error!("❌ 创建HTTP客户端失败: {}", e);
                AppError::ExternalService(format!("创建HTTP客户端失败: {}", e))
            })?;

        Ok(Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            client,
        })
    }
}

#[async_trait]
impl ValuationProvider for HttpValuationProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, property_id: &str) -> Result<ProviderQuote, ProviderError> {
        let url = format!("{}/valuations/{}", self.base_url, property_id);
        let mut request = self.client.get(&url);
        if let Some(api_key) = &self.api_key {
            request = request.header(http_constants::API_KEY_HEADER, api_key);
        }

        debug!("🌐 请求估值提供方: provider={}, url={}", self.name, url);
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Status(status));
        }

        let body: ProviderResponse = response.json().await?;
        if !body.estimate.is_finite() || body.estimate < 0.0 {
            return Err(ProviderError::InvalidResponse(format!("estimate={}", body.estimate)));
        }

        Ok(ProviderQuote {
            provider: self.name.clone(),
            estimate: body.estimate,
            currency: body.currency,
        })
    }
}

/// 估值服务
#[derive(Debug, Clone)]
pub struct ValuationService {
    cache: CacheEngine,
    resilience: ResilienceWrapper,
    providers: Arc<Vec<SharedValuationProvider>>,
    clock: SharedClock,
    cache_ttl: Duration,
    retries: u32,
    base_delay: Duration,
}

impl ValuationService {
    pub fn new(
        cache: CacheEngine,
        resilience: ResilienceWrapper,
        providers: Vec<SharedValuationProvider>,
        clock: SharedClock,
    ) -> Self {
        Self {
            cache,
            resilience,
            providers: Arc::new(providers),
            clock,
            cache_ttl: Duration::from_secs(valuation_constants::CACHE_TTL_SECONDS),
            retries: resilience_constants::DEFAULT_RETRIES,
            base_delay: Duration::from_millis(resilience_constants::BASE_DELAY_MS),
        }
    }

    pub fn with_cache_ttl(mut self, cache_ttl: Duration) -> Self {
        self.cache_ttl = cache_ttl;
        self
    }

    pub fn with_retry_policy(mut self, retries: u32, base_delay: Duration) -> Self {
        self.retries = retries;
        self.base_delay = base_delay;
        self
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.name().to_string()).collect()
    }

    /// 获取估值：先查缓存，未命中时合并各提供方报价
    ///
    /// 降级得到的旧值直接返回，不写入主缓存键
    pub async fn get_valuation(&self, property_id: &str) -> Result<Valuation, ResilienceError> {
        let key = valuation_key(property_id);
        if let Some(cached) = self.cache.get::<Valuation>(&key).await.into_option() {
            return Ok(cached);
        }

        let valuation = self.combine_with_fallback(property_id).await?;
        if !valuation.stale {
            if let Err(e) = self
                .cache
                .set(&key, &valuation, self.cache_ttl, &property_tags(property_id))
                .await
            {
                warn!("估值缓存写入失败: property={}, error={}", property_id, e);
            }
        }
        Ok(valuation)
    }

    /// 删除该房产的全部缓存条目
    pub async fn invalidate_property(&self, property_id: &str) -> AppResult<u64> {
        let report = self
            .cache
            .invalidate_tag(&property_tag(property_id))
            .await?;
        info!("🧹 房产缓存已失效: property={}, deleted={}", property_id, report.deleted);
        Ok(report.deleted)
    }

    /// 合并全部提供方的报价；全部失败时走最近成功值降级
    pub async fn combine_with_fallback(&self, property_id: &str) -> Result<Valuation, ResilienceError> {
        let cache = self.cache.clone();
        let last_key = last_known_key(property_id);
        let service = self.clone();
        let id = property_id.to_string();
        let timeout = self.combine_timeout().await;

        self.resilience
            .execute(
                move || {
                    let service = service.clone();
                    let id = id.clone();
                    async move { service.combine(&id).await }
                },
                ResilienceOptions::new("valuation:combined")
                    .with_retries(1)
                    .with_timeout(timeout)
                    .with_fallback(move |err| async move {
                        match cache.get::<Valuation>(&last_key).await.into_option() {
                            Some(mut valuation) => {
                                warn!(
                                    "⚠️ 所有估值提供方不可用，返回最近一次结果: key={}, error={}",
                                    last_key, err
                                );
                                valuation.stale = true;
                                Ok(valuation)
                            }
                            None => {
                                error!("❌ 估值不可用且没有可降级的结果: key={}, error={}", last_key, err);
                                Err(err)
                            }
                        }
                    }),
            )
            .await
    }

    /// 合并调用的超时：最慢提供方的完整重试预算加上余量
    async fn combine_timeout(&self) -> Duration {
        let registry = self.resilience.registry();
        let mut budget = Duration::ZERO;
        for provider in self.providers.iter() {
            let config = registry.config_for(&provider_action(provider.name())).await;
            budget = budget.max(retry_budget(config.timeout, self.retries, self.base_delay));
        }
        budget + Duration::from_millis(resilience_constants::COMBINE_MARGIN_MS)
    }

    /// 并发调用各提供方，剔除失败者后合并
    pub async fn combine(&self, property_id: &str) -> Result<Valuation, ResilienceError> {
        let calls = self.providers.iter().map(|provider| {
            let options = ResilienceOptions::new(provider_action(provider.name()))
                .with_retries(self.retries)
                .with_base_delay(self.base_delay);
            let provider = provider.clone();
            let id = property_id.to_string();
            self.resilience.execute(
                move || {
                    let provider = provider.clone();
                    let id = id.clone();
                    async move { provider.fetch(&id).await }
                },
                options,
            )
        });

        let mut quotes = Vec::new();
        for result in join_all(calls).await {
            match result {
                Ok(quote) => quotes.push(quote),
                Err(e) => warn!("估值提供方已剔除: {}", e),
            }
        }

        let Some(valuation) = Valuation::combine(property_id, &quotes, self.clock.now()) else {
            return Err(ResilienceError::ActionFailed {
                name: "valuation:combined".to_string(),
                message: format!("所有估值提供方均失败: property={}", property_id),
            });
        };

        let last_ttl = Duration::from_secs(valuation_constants::LAST_KNOWN_TTL_SECONDS);
        if let Err(e) = self
            .cache
            .set(&last_known_key(property_id), &valuation, last_ttl, &[])
            .await
        {
            warn!("最近估值保存失败: property={}, error={}", property_id, e);
        }

        debug!(
            "估值合并完成: property={}, providers={}/{}, estimate={}",
            property_id,
            quotes.len(),
            self.providers.len(),
            valuation.estimate
        );
        Ok(valuation)
    }

    /// 为指定房产生成预热任务
    pub fn warmup_tasks(&self, property_ids: &[String]) -> Vec<WarmupTask> {
        property_ids
            .iter()
            .map(|id| {
                let service = self.clone();
                let property_id = id.clone();
                WarmupTask::new(valuation_key(id), self.cache_ttl, move || {
                    let service = service.clone();
                    let property_id = property_id.clone();
                    async move { Ok::<_, anyhow::Error>(service.combine(&property_id).await?) }
                })
                .with_tags(property_tags(id))
            })
            .collect()
    }
}

fn valuation_key(property_id: &str) -> String {
    format!("valuation:{}", property_id)
}

fn provider_action(provider: &str) -> String {
    format!("valuation:{}", provider)
}

fn last_known_key(property_id: &str) -> String {
    format!("valuation:last:{}", property_id)
}

fn property_tag(property_id: &str) -> String {
    format!("property:{}", property_id)
}

fn property_tags(property_id: &str) -> Vec<String> {
    tag_list([property_tag(property_id)])
}
