//! 配置模块
//!
//! 全部配置来自环境变量（启动时由 dotenv 加载 `.env`），缺省值见各字段

use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::business::services::{CircuitBreakerConfig, QuotaLimits, RateLimitConfig};
use crate::infrastructure::cache::CacheEngineConfig;
use crate::shared::constants::{cache, quota, rate_limit, resilience, valuation};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// 未配置时使用内存凭据存储（仅开发）
    pub database_url: Option<String>,
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub store: StoreConfig,
    pub cache: CacheConfig,
    pub rate_limit: RateLimitSettings,
    pub quota: QuotaSettings,
    pub resilience: ResilienceSettings,
    pub valuation: ValuationSettings,
    /// 开发模式下的明文API Key（`DEV_API_KEYS`，逗号分隔）
    pub dev_api_keys: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    /// 是否信任代理写入的 `x-forwarded-for`
    pub trust_proxy_headers: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_seconds: u64,
    pub idle_timeout_seconds: u64,
    pub max_lifetime_seconds: u64,
    pub test_before_acquire: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub redis_url: Option<String>,
    pub key_prefix: String,
    /// 为true时Redis不可用直接启动失败，否则退回内存存储
    pub require_redis: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub default_ttl_seconds: u64,
    pub scan_page_size: usize,
    pub scan_timeout_ms: u64,
    pub metrics_ttl_seconds: u64,
    pub credential_ttl_seconds: u64,
    pub warmup_interval_seconds: u64,
    pub warmup_property_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSettings {
    pub api_max_requests: u32,
    pub api_window_seconds: u64,
    pub login_max_requests: u32,
    pub login_window_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaSettings {
    pub default_daily_limit: u64,
    pub default_monthly_limit: u64,
    /// 被限流拒绝的请求是否计入配额
    pub count_rejected_requests: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResilienceSettings {
    pub retries: u32,
    pub base_delay_ms: u64,
    pub attempt_timeout_ms: u64,
    pub error_threshold_percentage: f64,
    pub volume_threshold: u32,
    pub rolling_window_seconds: u64,
    pub reset_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSettings {
    pub name: String,
    pub base_url: String,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValuationSettings {
    pub providers: Vec<ProviderSettings>,
    pub timeout_seconds: u64,
    pub cache_ttl_seconds: u64,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        // 从环境变量加载配置
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// 从任意键值来源构建配置
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let text = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let providers = get("VALUATION_PROVIDERS")
            .map(|raw| parse_providers(&raw, &get))
            .transpose()?
            .unwrap_or_default();

        let config = Config {
            database_url: get("DATABASE_URL"),

            server: ServerConfig {
                port: env_parse(&get, "PORT", 8080)?,
                host: text("HOST", "0.0.0.0"),
                trust_proxy_headers: env_parse(&get, "TRUST_PROXY_HEADERS", false)?,
            },

            database: DatabaseConfig {
                max_connections: env_parse(&get, "DB_MAX_CONNECTIONS", 20)?,
                min_connections: env_parse(&get, "DB_MIN_CONNECTIONS", 2)?,
                acquire_timeout_seconds: env_parse(&get, "DB_ACQUIRE_TIMEOUT", 30)?,
                idle_timeout_seconds: env_parse(&get, "DB_IDLE_TIMEOUT", 600)?,
                max_lifetime_seconds: env_parse(&get, "DB_MAX_LIFETIME", 1800)?,
                test_before_acquire: env_parse(&get, "DB_TEST_BEFORE_ACQUIRE", true)?,
            },

            store: StoreConfig {
                redis_url: get("REDIS_URL"),
                key_prefix: text("STORE_PREFIX", "valuation-gateway:"),
                require_redis: env_parse(&get, "REQUIRE_REDIS", false)?,
            },

            cache: CacheConfig {
                default_ttl_seconds: env_parse(&get, "CACHE_DEFAULT_TTL", cache::DEFAULT_TTL_SECONDS)?,
                scan_page_size: env_parse(&get, "CACHE_SCAN_PAGE_SIZE", cache::SCAN_PAGE_SIZE)?,
                scan_timeout_ms: env_parse(&get, "CACHE_SCAN_TIMEOUT_MS", cache::SCAN_TIMEOUT_MS)?,
                metrics_ttl_seconds: env_parse(&get, "CACHE_METRICS_TTL", cache::METRICS_TTL_SECONDS)?,
                credential_ttl_seconds: env_parse(&get, "CREDENTIAL_CACHE_TTL", cache::DEFAULT_TTL_SECONDS)?,
                warmup_interval_seconds: env_parse(&get, "WARMUP_INTERVAL", cache::WARMUP_INTERVAL_SECONDS)?,
                warmup_property_ids: split_list(get("WARMUP_PROPERTY_IDS")),
            },

            rate_limit: RateLimitSettings {
                api_max_requests: env_parse(&get, "RATE_LIMIT_API_MAX", rate_limit::API_MAX_REQUESTS)?,
                api_window_seconds: env_parse(&get, "RATE_LIMIT_API_WINDOW", rate_limit::API_WINDOW_SECONDS)?,
                login_max_requests: env_parse(&get, "RATE_LIMIT_LOGIN_MAX", rate_limit::LOGIN_MAX_REQUESTS)?,
                login_window_seconds: env_parse(&get, "RATE_LIMIT_LOGIN_WINDOW", rate_limit::LOGIN_WINDOW_SECONDS)?,
            },

            quota: QuotaSettings {
                default_daily_limit: env_parse(&get, "QUOTA_DAILY_LIMIT", quota::DEFAULT_DAILY_LIMIT)?,
                default_monthly_limit: env_parse(&get, "QUOTA_MONTHLY_LIMIT", quota::DEFAULT_MONTHLY_LIMIT)?,
                count_rejected_requests: env_parse(&get, "QUOTA_COUNT_REJECTED", true)?,
            },

            resilience: ResilienceSettings {
                retries: env_parse(&get, "RESILIENCE_RETRIES", resilience::DEFAULT_RETRIES)?,
                base_delay_ms: env_parse(&get, "RESILIENCE_BASE_DELAY_MS", resilience::BASE_DELAY_MS)?,
                attempt_timeout_ms: env_parse(&get, "RESILIENCE_TIMEOUT_MS", resilience::ATTEMPT_TIMEOUT_MS)?,
                error_threshold_percentage: env_parse(
                    &get,
                    "CIRCUIT_ERROR_THRESHOLD",
                    resilience::ERROR_THRESHOLD_PERCENTAGE,
                )?,
                volume_threshold: env_parse(&get, "CIRCUIT_VOLUME_THRESHOLD", resilience::VOLUME_THRESHOLD)?,
                rolling_window_seconds: env_parse(&get, "CIRCUIT_ROLLING_WINDOW", resilience::ROLLING_WINDOW_SECONDS)?,
                reset_timeout_seconds: env_parse(&get, "CIRCUIT_RESET_TIMEOUT", resilience::RESET_TIMEOUT_SECONDS)?,
            },

            valuation: ValuationSettings {
                providers,
                timeout_seconds: env_parse(&get, "VALUATION_TIMEOUT", valuation::PROVIDER_TIMEOUT_SECONDS)?,
                cache_ttl_seconds: env_parse(&get, "VALUATION_CACHE_TTL", valuation::CACHE_TTL_SECONDS)?,
            },

            dev_api_keys: split_list(get("DEV_API_KEYS")),
        };

        Ok(config)
    }
}

impl CacheConfig {
    pub fn engine_config(&self) -> CacheEngineConfig {
        CacheEngineConfig {
            default_ttl: Duration::from_secs(self.default_ttl_seconds),
            scan_page_size: self.scan_page_size,
            scan_timeout: Duration::from_millis(self.scan_timeout_ms),
            metrics_ttl: Duration::from_secs(self.metrics_ttl_seconds),
        }
    }
}

impl RateLimitSettings {
    pub fn api(&self) -> RateLimitConfig {
        RateLimitConfig::new("api", self.api_max_requests, Duration::from_secs(self.api_window_seconds))
    }

    pub fn login(&self) -> RateLimitConfig {
        RateLimitConfig::new("login", self.login_max_requests, Duration::from_secs(self.login_window_seconds))
    }
}

impl QuotaSettings {
    pub fn default_limits(&self) -> QuotaLimits {
        QuotaLimits {
            daily: self.default_daily_limit,
            monthly: self.default_monthly_limit,
        }
    }
}

impl ResilienceSettings {
    pub fn breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            error_threshold_percentage: self.error_threshold_percentage,
            volume_threshold: self.volume_threshold,
            rolling_window: Duration::from_secs(self.rolling_window_seconds),
            reset_timeout: Duration::from_secs(self.reset_timeout_seconds),
            timeout: Duration::from_millis(self.attempt_timeout_ms),
        }
    }
}

/// 解析环境变量，缺失时使用默认值，格式错误时报错
fn env_parse<T, G>(get: &G, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("环境变量 {} 的值无效 ({}): {}", key, raw, e)),
        None => Ok(default),
    }
}

fn split_list(raw: Option<String>) -> Vec<String> {
    raw.map(|value| {
        value
            .split(',')
            .map(|item| item.trim().to_string())
            .filter(|item| !item.is_empty())
            .collect()
    })
    .unwrap_or_default()
}

/// `name=url,name2=url2`；提供方的API Key读取 `VALUATION_PROVIDER_{NAME}_API_KEY`
fn parse_providers<G>(raw: &str, get: &G) -> anyhow::Result<Vec<ProviderSettings>>
where
    G: Fn(&str) -> Option<String>,
{
    split_list(Some(raw.to_string()))
        .into_iter()
        .map(|entry| {
            let (name, base_url) = entry
                .split_once('=')
                .ok_or_else(|| anyhow::anyhow!("估值提供方配置格式错误: {}", entry))?;
            let name = name.trim().to_string();
            let key_var = format!(
                "VALUATION_PROVIDER_{}_API_KEY",
                name.to_uppercase().replace('-', "_")
            );
            Ok(ProviderSettings {
                api_key: get(&key_var),
                base_url: base_url.trim().to_string(),
                name,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> anyhow::Result<Config> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.server.port, 8080);
        assert!(config.database_url.is_none());
        assert!(config.quota.count_rejected_requests);
        assert!(!config.server.trust_proxy_headers);
        assert_eq!(config.rate_limit.api(), RateLimitConfig::api());
        assert_eq!(config.rate_limit.login(), RateLimitConfig::login());
        assert_eq!(config.resilience.breaker_config(), CircuitBreakerConfig::default());
        assert!(config.valuation.providers.is_empty());
    }

    #[test]
    fn test_overrides_and_lists() {
        let config = load(&[
            ("PORT", "9000"),
            ("TRUST_PROXY_HEADERS", "true"),
            ("QUOTA_DAILY_LIMIT", "50"),
            ("QUOTA_COUNT_REJECTED", "false"),
            ("WARMUP_PROPERTY_IDS", "p1, p2,,p3"),
            ("VALUATION_PROVIDERS", "acme=https://acme.test, home-value=http://hv.local/api"),
            ("VALUATION_PROVIDER_HOME_VALUE_API_KEY", "secret"),
        ])
        .unwrap();

        assert_eq!(config.server.port, 9000);
        assert!(config.server.trust_proxy_headers);
        assert_eq!(config.quota.default_limits().daily, 50);
        assert!(!config.quota.count_rejected_requests);
        assert_eq!(config.cache.warmup_property_ids, vec!["p1", "p2", "p3"]);
        assert_eq!(config.valuation.providers.len(), 2);
        assert_eq!(config.valuation.providers[0].api_key, None);
        assert_eq!(config.valuation.providers[1].name, "home-value");
        assert_eq!(config.valuation.providers[1].api_key.as_deref(), Some("secret"));
    }

    #[test]
    fn test_invalid_number_is_rejected() {
        let err = load(&[("PORT", "not-a-port")]).unwrap_err();
        assert!(err.to_string().contains("PORT"));
        assert!(load(&[("VALUATION_PROVIDERS", "missing-url")]).is_err());
    }
}
