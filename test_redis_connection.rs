//! Redis连接测试
//! 验证共享存储的连接、读写、计数与扫描是否正常工作

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use valuation_gateway_rust::infrastructure::cache::{CacheEngine, CacheEngineConfig, CacheResult};
use valuation_gateway_rust::infrastructure::store::{CounterOp, RedisStore, SharedStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt::init();

    let redis_url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
    info!("🔍 开始Redis连接测试: {}", redis_url);

    let store = match RedisStore::connect(&redis_url, "connection-test:".to_string()).await {
        Ok(store) => {
            info!("✅ Redis客户端创建成功");
            Arc::new(store)
        }
        Err(e) => {
            error!("❌ Redis连接失败: {}", e);
            info!("💡 请确保Redis服务器正在运行：");
            info!("   - 启动Redis: redis-server");
            info!("   - 或使用Docker: docker run -d -p 6379:6379 redis:alpine");
            return Ok(());
        }
    };

    store.ping().await?;
    info!("✅ Redis PING测试成功 - 连接正常");

    // 计数器
    let op = CounterOp::new("counter", 1, Duration::from_secs(30));
    let states = store.increment(&[op.clone(), op]).await?;
    info!("✅ 原子递增成功: {:?}", states);

    // 缓存与标签失效
    let cache = CacheEngine::new(store.clone(), CacheEngineConfig::default());
    let test_value = "Hello Redis from Valuation Gateway!".to_string();
    cache
        .set("valuation:test", &test_value, Duration::from_secs(60), &["property:test".to_string()])
        .await?;

    match cache.get::<String>("valuation:test").await {
        CacheResult::Hit(value) if value == test_value => info!("✅ 数据完整性验证通过"),
        other => error!("❌ 缓存读取结果异常: {:?}", other),
    }

    let report = cache.invalidate_tag("property:test").await?;
    info!("✅ 标签失效成功: deleted={}", report.deleted);

    let pattern = cache.invalidate_by_pattern("valuation:*").await?;
    info!("✅ 模式扫描完成: matched={}, pages={}", pattern.matched, pattern.scanned_pages);

    store.delete(&["counter".to_string()]).await?;
    info!("🎉 Redis连接测试完成！");
    Ok(())
}
