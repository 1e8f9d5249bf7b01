//! 缓存失效策略测试
//! 
//! 覆盖单键失效、标签级联、模式失效和条件失效

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::infrastructure::store::testing::ScriptedStore;
    use crate::infrastructure::store::{MemoryStore, SharedStore};
    use serde::{Deserialize, Serialize};
    use std::sync::Arc;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Estimate {
        property_id: String,
        price: f64,
    }

    fn engine_with_store() -> (CacheEngine, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let engine = CacheEngine::new(store.clone(), CacheEngineConfig::default());
        (engine, store)
    }

    const TTL: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn test_cascade_removes_entries_sharing_a_tag() {
        let (cache, _) = engine_with_store();

        cache.set("a", &1, TTL, &tag_list(["group1"])).await.unwrap();
        cache.set("b", &2, TTL, &tag_list(["group1"])).await.unwrap();

        let report = cache.invalidate_with_cascade("a").await.unwrap();
        assert_eq!(report.deleted, 2);
        assert_eq!(report.tags, vec!["group1".to_string()]);

        assert!(cache.get::<i32>("a").await.is_miss());
        assert!(cache.get::<i32>("b").await.is_miss());

        // 第二次级联是无操作
        let again = cache.invalidate_with_cascade("a").await.unwrap();
        assert_eq!(again.deleted, 0);
    }

    #[tokio::test]
    async fn test_cascade_follows_transitive_tags_only() {
        let (cache, _) = engine_with_store();

        cache.set("a", &1, TTL, &tag_list(["t1"])).await.unwrap();
        cache.set("b", &2, TTL, &tag_list(["t1", "t2"])).await.unwrap();
        cache.set("c", &3, TTL, &tag_list(["t2"])).await.unwrap();
        cache.set("d", &4, TTL, &tag_list(["t3"])).await.unwrap();

        let report = cache.invalidate_with_cascade("a").await.unwrap();
        assert_eq!(report.deleted, 3);

        assert!(cache.get::<i32>("c").await.is_miss());
        assert_eq!(cache.get::<i32>("d").await, CacheResult::Hit(4));
        assert_eq!(cache.tag_index().keys_of("t3").await.unwrap(), vec!["d".to_string()]);
        assert!(cache.tag_index().keys_of("t1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cascade_terminates_on_cyclic_tags() {
        let (cache, _) = engine_with_store();

        cache.set("a", &1, TTL, &tag_list(["x"])).await.unwrap();
        cache.set("b", &2, TTL, &tag_list(["y"])).await.unwrap();
        assert!(cache.tag_entry("a", &tag_list(["y"])).await.unwrap());
        assert!(cache.tag_entry("b", &tag_list(["x"])).await.unwrap());

        let report = cache.invalidate_with_cascade("b").await.unwrap();
        assert_eq!(report.deleted, 2);
        assert_eq!(report.keys.len(), 2);
    }

    #[tokio::test]
    async fn test_single_invalidate_keeps_tag_index_in_sync() {
        let (cache, _) = engine_with_store();

        cache.set("a", &1, TTL, &tag_list(["g"])).await.unwrap();
        cache.set("b", &2, TTL, &tag_list(["g"])).await.unwrap();

        assert!(cache.invalidate("a").await.unwrap());
        assert!(cache.get::<i32>("a").await.is_miss());
        assert_eq!(cache.get::<i32>("b").await, CacheResult::Hit(2));
        assert_eq!(cache.tag_index().keys_of("g").await.unwrap(), vec!["b".to_string()]);
        assert!(cache.tag_index().tags_of("a").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_set_replaces_previous_tags() {
        let (cache, _) = engine_with_store();

        cache.set("a", &1, TTL, &tag_list(["old"])).await.unwrap();
        cache.set("a", &2, TTL, &tag_list(["new"])).await.unwrap();

        assert!(cache.tag_index().keys_of("old").await.unwrap().is_empty());
        assert_eq!(cache.tag_index().tags_of("a").await.unwrap(), vec!["new".to_string()]);

        // 旧标签的失效不再影响该条目
        cache.invalidate_tag("old").await.unwrap();
        assert_eq!(cache.get::<i32>("a").await, CacheResult::Hit(2));
    }

    #[tokio::test]
    async fn test_invalidate_tag() {
        let (cache, _) = engine_with_store();

        for i in 0..3 {
            cache
                .set(&format!("valuation:{}", i), &i, TTL, &tag_list(["property:p1"]))
                .await
                .unwrap();
        }
        cache.set("valuation:other", &9, TTL, &tag_list(["property:p2"])).await.unwrap();

        let report = cache.invalidate_tag("property:p1").await.unwrap();
        assert_eq!(report.deleted, 3);
        assert_eq!(cache.get::<i32>("valuation:other").await, CacheResult::Hit(9));
    }

    #[tokio::test]
    async fn test_invalidate_by_prefix_and_glob() {
        let (cache, _) = engine_with_store();

        for i in 0..5 {
            cache.set(&format!("valuation:{}", i), &i, TTL, &[]).await.unwrap();
        }
        cache.set("valuation:1:history", &1, TTL, &[]).await.unwrap();
        cache.set("user:1", &1, TTL, &[]).await.unwrap();

        let glob = cache.invalidate_by_pattern("valuation:*:history").await.unwrap();
        assert_eq!(glob.deleted, 1);
        assert!(glob.complete);

        let prefix = cache.invalidate_by_pattern("valuation:").await.unwrap();
        assert_eq!(prefix.matched, 5);
        assert_eq!(prefix.deleted, 5);
        assert_eq!(cache.get::<i32>("user:1").await, CacheResult::Hit(1));
    }

    #[tokio::test]
    async fn test_pattern_invalidation_is_bounded_by_timeout() {
        let store = Arc::new(MemoryStore::new());
        let config = CacheEngineConfig {
            scan_page_size: 1,
            scan_timeout: Duration::ZERO,
            ..CacheEngineConfig::default()
        };
        let cache = CacheEngine::new(store, config);

        for i in 0..10 {
            cache.set(&format!("bulk:{}", i), &i, TTL, &[]).await.unwrap();
        }

        let result = cache.invalidate_by_pattern("bulk:").await.unwrap();
        assert!(!result.complete);
        assert_eq!(result.scanned_pages, 1);
        assert!(result.deleted <= 1);
    }

    #[tokio::test]
    async fn test_conditional_invalidate_only_matching_values() {
        let (cache, store) = engine_with_store();

        for (id, price) in [("p1", 50.0), ("p2", 150.0), ("p3", 250.0)] {
            let estimate = Estimate {
                property_id: id.to_string(),
                price,
            };
            cache.set(&format!("valuation:{}", id), &estimate, TTL, &[]).await.unwrap();
        }
        // 无法解析的条目按谓词为false处理
        store.set("cache:entry:valuation:broken", "not-json", TTL).await.unwrap();

        let result = cache
            .conditional_invalidate::<Estimate, _>("valuation:", |e| e.price > 100.0)
            .await
            .unwrap();
        assert_eq!(result.deleted, 2);

        assert!(cache.get::<Estimate>("valuation:p1").await.is_hit());
        assert!(cache.get::<Estimate>("valuation:p2").await.is_miss());
        assert!(cache.get::<Estimate>("valuation:p3").await.is_miss());
        assert_eq!(
            store.get("cache:entry:valuation:broken").await.unwrap(),
            Some("not-json".to_string())
        );
    }

    #[tokio::test]
    async fn test_metrics_by_namespace() {
        let (cache, _) = engine_with_store();

        cache.set("valuation:1", &1, TTL, &[]).await.unwrap();
        let _ = cache.get::<i32>("valuation:1").await;
        let _ = cache.get::<i32>("valuation:1").await;
        let _ = cache.get::<i32>("valuation:2").await;
        cache.invalidate("valuation:1").await.unwrap();
        let _ = cache.get::<i32>("user:1").await;

        let metrics = cache.get_metrics("valuation").await.unwrap();
        assert_eq!(metrics["hits"], 2);
        assert_eq!(metrics["misses"], 1);
        assert_eq!(metrics["sets"], 1);
        assert_eq!(metrics["invalidations"], 1);
        assert_eq!(metrics["requests"], 3);

        let users = cache.get_metrics("user").await.unwrap();
        assert_eq!(users["misses"], 1);
        assert_eq!(users["hits"], 0);
    }

    #[tokio::test]
    async fn test_cascade_keeps_keys_tagged_during_traversal() {
        let store = Arc::new(ScriptedStore::new());
        let cache = CacheEngine::new(store.clone(), CacheEngineConfig::default());

        cache.set("valuation:a", &1, TTL, &tag_list(["property:p1"])).await.unwrap();
        cache.set("valuation:late", &2, TTL, &[]).await.unwrap();
        // 遍历读取标签成员之后，另一个写入方把新键加入同一标签
        store.add_after_read(CacheKeyBuilder::default().tag_key("property:p1"), "valuation:late");

        let report = cache.invalidate_with_cascade("valuation:a").await.unwrap();
        assert_eq!(report.deleted, 1);
        assert_eq!(
            cache.tag_index().keys_of("property:p1").await.unwrap(),
            vec!["valuation:late".to_string()]
        );

        let later = cache.invalidate_tag("property:p1").await.unwrap();
        assert_eq!(later.deleted, 1);
        assert!(cache.get::<i32>("valuation:late").await.is_miss());
    }

    #[tokio::test]
    async fn test_cascade_counts_invalidations_per_namespace() {
        let (cache, store) = engine_with_store();

        cache.set("user:1", &1, TTL, &tag_list(["shared"])).await.unwrap();
        cache.set("valuation:1", &2, TTL, &tag_list(["shared"])).await.unwrap();
        cache.set("valuation:2", &3, TTL, &tag_list(["shared"])).await.unwrap();
        // 索引仍在但条目已不存在
        store.delete(&["cache:entry:user:1".to_string()]).await.unwrap();

        let report = cache.invalidate_tag("shared").await.unwrap();
        assert_eq!(report.deleted, 2);

        let users = cache.get_metrics("user").await.unwrap();
        assert_eq!(users["invalidations"], 0);
        let valuations = cache.get_metrics("valuation").await.unwrap();
        assert_eq!(valuations["invalidations"], 2);
    }
}
