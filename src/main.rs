//! Valuation Gateway Rust 服务主入口
//! 
//! 组装共享存储、缓存、准入守卫与估值服务并启动HTTP服务器

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use valuation_gateway_rust::auth::{
    AdmissionGuard, CachedCredentialStore, InMemoryCredentialStore, SharedCredentialStore,
};
use valuation_gateway_rust::business::domain::ApiKey;
use valuation_gateway_rust::business::services::{
    CircuitBreakerRegistry, HttpValuationProvider, QuotaService, RateLimitService,
    ResilienceWrapper, SharedValuationProvider, ValuationService,
};
use valuation_gateway_rust::infrastructure::cache::{spawn_warmup_scheduler, CacheEngine};
use valuation_gateway_rust::infrastructure::{MemoryStore, RedisStore, SharedStoreRef};
use valuation_gateway_rust::shared::clock::{SharedClock, SystemClock};
use valuation_gateway_rust::shared::constants::store as store_constants;
use valuation_gateway_rust::{create_routes, AppState, Config, Database};

/// 命令行参数（覆盖环境变量中的监听地址）
#[derive(Debug, Parser)]
#[command(name = "valuation-gateway-rust", version, about = "房产估值网关")]
struct Args {
    /// 监听地址
    #[arg(long)]
    host: Option<String>,

    /// 监听端口
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志 - 默认INFO等级，便于生产环境使用
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "valuation_gateway_rust=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    info!("🚀 启动 Valuation Gateway Rust 服务");

    // 加载配置
    let mut config = Config::load()?;
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    info!("✅ 配置加载成功");

    let clock: SharedClock = Arc::new(SystemClock);
    let store = connect_store(&config).await?;

    let cache = CacheEngine::new(store.clone(), config.cache.engine_config());
    info!("✅ 缓存引擎初始化成功");

    let credentials = credential_store(&config, cache.clone()).await?;

    let quota = Arc::new(QuotaService::new(store.clone(), clock.clone()));
    let rate_limiter = Arc::new(RateLimitService::new(store.clone(), clock.clone()));
    let admission = Arc::new(
        AdmissionGuard::new(credentials, quota, rate_limiter.clone(), clock.clone())
            .with_rate_limit(config.rate_limit.api())
            .with_default_limits(config.quota.default_limits())
            .with_count_rejected_requests(config.quota.count_rejected_requests),
    );
    info!("✅ 准入守卫初始化成功");

    let breakers = CircuitBreakerRegistry::new(config.resilience.breaker_config());
    let valuation = ValuationService::new(
        cache.clone(),
        ResilienceWrapper::new(breakers.clone()),
        valuation_providers(&config)?,
        clock.clone(),
    )
    .with_cache_ttl(Duration::from_secs(config.valuation.cache_ttl_seconds))
    .with_retry_policy(
        config.resilience.retries,
        Duration::from_millis(config.resilience.base_delay_ms),
    );
    info!("✅ 估值服务初始化成功: providers={:?}", valuation.provider_names());

    // 缓存预热
    if !config.cache.warmup_property_ids.is_empty() {
        let tasks = valuation.warmup_tasks(&config.cache.warmup_property_ids);
        spawn_warmup_scheduler(
            cache.clone(),
            tasks,
            Duration::from_secs(config.cache.warmup_interval_seconds),
        );
        info!("🔥 缓存预热已启动: properties={}", config.cache.warmup_property_ids.len());
    }

    let app = create_routes(AppState {
        store,
        cache,
        valuation,
        rate_limiter,
        login_rate_limit: config.rate_limit.login(),
        trust_proxy_headers: config.server.trust_proxy_headers,
        breakers,
        admission,
        clock,
    });
    info!("✅ 路由创建成功");

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("🌐 服务器启动成功，监听地址: {}", addr);
    info!("📖 健康检查: http://localhost:{}/health", config.server.port);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        tokio::signal::ctrl_c().await.ok();
        info!("🛑 接收到关闭信号，正在优雅关闭服务器...");
    })
    .await?;

    Ok(())
}

/// 连接共享存储；未要求Redis时退回进程内存储
async fn connect_store(config: &Config) -> anyhow::Result<SharedStoreRef> {
    let Some(redis_url) = config.store.redis_url.as_deref() else {
        warn!("⚠️ 未配置 REDIS_URL，使用进程内存储（多实例部署时计数不共享）");
        return Ok(memory_store());
    };

    match RedisStore::connect(redis_url, config.store.key_prefix.clone()).await {
        Ok(store) => {
            info!("✅ Redis共享存储连接成功");
            Ok(Arc::new(store))
        }
        Err(e) if !config.store.require_redis => {
            warn!("⚠️ Redis连接失败，退回进程内存储: {}", e);
            Ok(memory_store())
        }
        Err(e) => Err(e.into()),
    }
}

/// 进程内存储，附带后台过期清理
fn memory_store() -> SharedStoreRef {
    let store = MemoryStore::new();
    store.spawn_sweeper(Duration::from_secs(store_constants::MEMORY_SWEEP_INTERVAL_SECONDS));
    Arc::new(store)
}

/// 有数据库时使用带缓存的数据库凭据，否则使用 `DEV_API_KEYS`
async fn credential_store(config: &Config, cache: CacheEngine) -> anyhow::Result<SharedCredentialStore> {
    if config.database_url.is_some() {
        let database = Database::new(config).await?;
        database.health_check().await?;
        info!("✅ 数据库连接成功");

        return Ok(Arc::new(CachedCredentialStore::new(
            Arc::new(database.api_keys.clone()),
            cache,
            Duration::from_secs(config.cache.credential_ttl_seconds),
        )));
    }

    warn!("⚠️ 未配置 DATABASE_URL，使用开发模式凭据: keys={}", config.dev_api_keys.len());
    let store = InMemoryCredentialStore::new();
    for (index, raw_key) in config.dev_api_keys.iter().enumerate() {
        let id = index as i64 + 1;
        store
            .insert(
                raw_key,
                ApiKey {
                    id,
                    owner_id: 1,
                    name: format!("dev-{}", id),
                    key_hash: String::new(),
                    is_active: true,
                    expires_at: None,
                    daily_limit: None,
                    monthly_limit: None,
                    created_at: chrono::Utc::now(),
                    last_used_at: None,
                },
            )
            .await;
    }
    Ok(Arc::new(store))
}

fn valuation_providers(config: &Config) -> anyhow::Result<Vec<SharedValuationProvider>> {
    let timeout = Duration::from_secs(config.valuation.timeout_seconds);
    let mut providers: Vec<SharedValuationProvider> = Vec::new();
    for settings in &config.valuation.providers {
        let provider = HttpValuationProvider::new(
            settings.name.clone(),
            settings.base_url.clone(),
            settings.api_key.clone(),
            timeout,
        )?;
        providers.push(Arc::new(provider));
    }
    if providers.is_empty() {
        warn!("⚠️ 未配置 VALUATION_PROVIDERS，估值请求将只能返回缓存或降级结果");
    }
    Ok(providers)
}
