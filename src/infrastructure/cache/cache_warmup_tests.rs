//! 缓存预热测试
//! 
//! 守卫条件、失败隔离、周期调度

#[cfg(test)]
mod cache_warmup_tests {
    use super::super::*;
    use crate::infrastructure::store::MemoryStore;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn engine() -> CacheEngine {
        CacheEngine::new(Arc::new(MemoryStore::new()), CacheEngineConfig::default())
    }

    #[tokio::test]
    async fn test_warmup_populates_cache_with_tags() {
        println!("🔥 开始预热写入测试...");
        let cache = engine();
        let tasks = vec![
            WarmupTask::new("valuation:p1", Duration::from_secs(600), || async {
                Ok::<_, anyhow::Error>(serde_json::json!({ "estimate": 250000 }))
            })
            .with_tags(tag_list(["property:p1"])),
            WarmupTask::new("valuation:p2", Duration::from_secs(600), || async {
                Ok::<_, anyhow::Error>(serde_json::json!({ "estimate": 310000 }))
            }),
        ];

        let report = cache.warm_cache(&tasks).await;
        assert_eq!(report.warmed, 2);
        assert_eq!(report.failed, 0);

        let cached: serde_json::Value = cache.get("valuation:p1").await.into_option().unwrap();
        assert_eq!(cached["estimate"], 250000);
        assert_eq!(
            cache.tag_index().keys_of("property:p1").await.unwrap(),
            vec!["valuation:p1".to_string()]
        );
        println!("  ✅ 预热写入正常");
    }

    #[tokio::test]
    async fn test_condition_false_skips_task() {
        let cache = engine();
        let factory_calls = Arc::new(AtomicU32::new(0));
        let calls = factory_calls.clone();

        let task = WarmupTask::new("guarded", Duration::from_secs(60), move || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, anyhow::Error>("value")
            }
        })
        .with_condition(|| async { false });

        let report = cache.warm_cache(&[task]).await;
        assert_eq!(report.skipped, 1);
        assert_eq!(report.warmed, 0);
        assert_eq!(factory_calls.load(Ordering::SeqCst), 0);
        assert!(cache.get::<String>("guarded").await.is_miss());
    }

    #[tokio::test]
    async fn test_failing_task_does_not_abort_others() {
        let cache = engine();
        let tasks = vec![
            WarmupTask::new("ok:1", Duration::from_secs(60), || async { Ok::<_, anyhow::Error>(1) }),
            WarmupTask::new("broken:1", Duration::from_secs(60), || async {
                Err::<i32, _>(anyhow::anyhow!("upstream down"))
            }),
            WarmupTask::new("ok:2", Duration::from_secs(60), || async { Ok::<_, anyhow::Error>(2) }),
        ];

        let report = cache.warm_cache(&tasks).await;
        assert_eq!(report.warmed, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.failed_keys, vec!["broken:1".to_string()]);
        assert_eq!(cache.get::<i32>("ok:2").await, CacheResult::Hit(2));
    }

    #[tokio::test]
    async fn test_zero_ttl_task_is_skipped() {
        let cache = engine();
        let tasks = vec![WarmupTask::new("nocache", Duration::ZERO, || async {
            Ok::<_, anyhow::Error>(1)
        })];
        let report = cache.warm_cache(&tasks).await;
        assert_eq!(report.skipped, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduler_runs_periodically() {
        let cache = engine();
        let runs = Arc::new(AtomicU32::new(0));
        let enabled = Arc::new(AtomicBool::new(true));

        let counter = runs.clone();
        let flag = enabled.clone();
        let task = WarmupTask::new("tick", Duration::from_secs(3600), move || {
            let counter = counter.clone();
            async move { Ok::<_, anyhow::Error>(counter.fetch_add(1, Ordering::SeqCst) + 1) }
        })
        .with_condition(move || {
            let flag = flag.clone();
            async move { flag.load(Ordering::SeqCst) }
        });

        let handle = spawn_warmup_scheduler(cache.clone(), vec![task], Duration::from_secs(10));

        // 第一次立即执行，之后每10秒一次
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);

        enabled.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);

        handle.abort();
        assert_eq!(cache.get::<u32>("tick").await, CacheResult::Hit(2));
    }
}
