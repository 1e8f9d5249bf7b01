//! 缓存引擎
//!
//! 共享存储之上的 get/set、标签级联失效、模式失效和命中统计
//! 存储故障时缓存一律按未命中处理（fail open），并记录告警

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::future::Future;
use std::time::Duration;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{
    counters, namespace_of, CacheEngineConfig, CacheEnvelope, CacheError, CacheKeyBuilder,
    CacheResult, TagIndex,
};
use crate::infrastructure::store::{CounterOp, SharedStoreRef};
use crate::shared::metrics::CACHE_LOOKUPS;
use crate::shared::utils::normalize_pattern;

/// 级联失效结果
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CascadeReport {
    /// 实际删除的条目数量
    pub deleted: u64,
    /// 被处理过的键（包括起点）
    pub keys: Vec<String>,
    /// 被清空的标签
    pub tags: Vec<String>,
}

/// 模式失效结果
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatternInvalidation {
    pub matched: usize,
    pub deleted: u64,
    pub scanned_pages: usize,
    /// 为false表示达到扫描时限提前结束
    pub complete: bool,
}

/// 缓存引擎
#[derive(Debug, Clone)]
pub struct CacheEngine {
    store: SharedStoreRef,
    config: CacheEngineConfig,
    keys: CacheKeyBuilder,
    tag_index: TagIndex,
}

impl CacheEngine {
    pub fn new(store: SharedStoreRef, config: CacheEngineConfig) -> Self {
        let keys = CacheKeyBuilder::default();
        let tag_index = TagIndex::new(store.clone(), keys.clone());
        Self {
            store,
            config,
            keys,
            tag_index,
        }
    }

    pub fn config(&self) -> &CacheEngineConfig {
        &self.config
    }

    pub fn tag_index(&self) -> &TagIndex {
        &self.tag_index
    }

    /// 获取缓存值
    pub async fn get<T>(&self, key: &str) -> CacheResult<T>
    where
        T: DeserializeOwned,
    {
        let namespace = namespace_of(key);

        let raw = match self.store.get(&self.keys.entry_key(key)).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!("缓存存储不可用，按未命中处理: key={}, error={}", key, e);
                CACHE_LOOKUPS.with_label_values(&[namespace, "error"]).inc();
                return CacheResult::Error(e.to_string());
            }
        };

        let Some(raw) = raw else {
            self.record(namespace, counters::MISSES).await;
            debug!("缓存未命中: key={}", key);
            return CacheResult::Miss;
        };

        let envelope: CacheEnvelope = match serde_json::from_str(&raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("缓存条目反序列化失败: key={}, error={}", key, e);
                return CacheResult::Error(format!("反序列化失败: {}", e));
            }
        };

        // 存储TTL之外的第二道保护：过期条目绝不返回
        if envelope.expires_at_ms <= chrono::Utc::now().timestamp_millis() {
            self.record(namespace, counters::MISSES).await;
            debug!("缓存条目已过期: key={}", key);
            return CacheResult::Miss;
        }

        match serde_json::from_value::<T>(envelope.value) {
            Ok(value) => {
                self.record(namespace, counters::HITS).await;
                debug!("缓存命中: key={}", key);
                CacheResult::Hit(value)
            }
            Err(e) => {
                warn!("缓存值类型不匹配: key={}, error={}", key, e);
                CacheResult::Error(format!("反序列化失败: {}", e))
            }
        }
    }

    /// 设置缓存值；TTL为0时不缓存并返回false
    pub async fn set<T>(&self, key: &str, value: &T, ttl: Duration, tags: &[String]) -> Result<bool, CacheError>
    where
        T: Serialize + ?Sized,
    {
        if ttl.is_zero() {
            debug!("TTL为0，跳过缓存: key={}", key);
            return Ok(false);
        }

        let value = serde_json::to_value(value).map_err(|e| CacheError::Serialization(e.to_string()))?;
        let envelope = CacheEnvelope {
            value,
            expires_at_ms: chrono::Utc::now().timestamp_millis() + ttl.as_millis() as i64,
        };
        let serialized =
            serde_json::to_string(&envelope).map_err(|e| CacheError::Serialization(e.to_string()))?;

        // 先写索引再写条目：索引写入失败时不会留下无法按标签失效的条目
        let entry_key = self.keys.entry_key(key);
        if let Err(e) = self.tag_index.replace(key, &dedup(tags), ttl).await {
            warn!("标签索引写入失败，移除旧条目: key={}, error={}", key, e);
            if let Err(cleanup) = self.store.delete(&[entry_key]).await {
                warn!("旧条目移除失败: key={}, error={}", key, cleanup);
            }
            return Err(e.into());
        }
        self.store.set(&entry_key, &serialized, ttl).await?;
        self.record(namespace_of(key), counters::SETS).await;

        debug!("缓存已设置: key={}, ttl={:?}, tags={:?}", key, ttl, tags);
        Ok(true)
    }

    /// 读取缓存，未命中时调用工厂函数生成值并写回
    ///
    /// TTL为0时直接透传到工厂函数；缓存写入失败只记录告警，不影响返回值
    pub async fn get_or_set<T, E, F, Fut>(&self, key: &str, ttl: Duration, tags: &[String], factory: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if ttl.is_zero() {
            return factory().await;
        }

        if let CacheResult::Hit(value) = self.get::<T>(key).await {
            return Ok(value);
        }

        let value = factory().await?;
        if let Err(e) = self.set(key, &value, ttl, tags).await {
            warn!("缓存回写失败: key={}, error={}", key, e);
        }
        Ok(value)
    }

    /// 给已存在的条目追加标签；条目不存在时返回false
    pub async fn tag_entry(&self, key: &str, tags: &[String]) -> Result<bool, CacheError> {
        let Some(raw) = self.store.get(&self.keys.entry_key(key)).await? else {
            debug!("打标签的条目不存在: key={}", key);
            return Ok(false);
        };

        let ttl = serde_json::from_str::<CacheEnvelope>(&raw)
            .ok()
            .map(|envelope| envelope.expires_at_ms - chrono::Utc::now().timestamp_millis())
            .filter(|remaining| *remaining > 0)
            .map(|remaining| Duration::from_millis(remaining as u64))
            .unwrap_or(self.config.default_ttl);

        self.tag_index.attach(key, &dedup(tags), ttl).await?;
        Ok(true)
    }

    /// 删除单个条目；不存在的键是无操作
    pub async fn invalidate(&self, key: &str) -> Result<bool, CacheError> {
        let deleted = self.invalidate_many(&[key.to_string()]).await?;
        Ok(deleted > 0)
    }

    /// 删除条目，并级联删除与其共享任意标签的全部条目
    ///
    /// 标签图通过已访问集合去重，即使存在环也会终止
    pub async fn invalidate_with_cascade(&self, key: &str) -> Result<CascadeReport, CacheError> {
        self.cascade(VecDeque::from([key.to_string()]), Vec::new()).await
    }

    /// 以标签为起点的级联失效
    pub async fn invalidate_tag(&self, tag: &str) -> Result<CascadeReport, CacheError> {
        self.cascade(VecDeque::new(), vec![tag.to_string()]).await
    }

    async fn cascade(&self, mut pending_keys: VecDeque<String>, mut pending_tags: Vec<String>) -> Result<CascadeReport, CacheError> {
        let mut visited_keys: Vec<String> = Vec::new();
        let mut seen_keys: HashSet<String> = HashSet::new();
        let mut visited_tags: Vec<String> = Vec::new();
        let mut seen_tags: HashSet<String> = HashSet::new();

        loop {
            while let Some(tag) = pending_tags.pop() {
                if !seen_tags.insert(tag.clone()) {
                    continue;
                }
                for member in self.tag_index.keys_of(&tag).await? {
                    if !seen_keys.contains(&member) {
                        pending_keys.push_back(member);
                    }
                }
                visited_tags.push(tag);
            }

            let Some(key) = pending_keys.pop_front() else {
                break;
            };
            if !seen_keys.insert(key.clone()) {
                continue;
            }

            for tag in self.tag_index.tags_of(&key).await? {
                if !seen_tags.contains(&tag) {
                    pending_tags.push(tag);
                }
            }
            visited_keys.push(key);
        }

        let deleted = self.delete_entries(&visited_keys).await?;

        let key_tag_sets: Vec<String> = visited_keys.iter().map(|k| self.keys.key_tags_key(k)).collect();
        self.store.delete(&key_tag_sets).await?;

        // 只移除访问过的成员，遍历期间并发加入标签的新键保留在索引中
        if !visited_keys.is_empty() {
            for tag in &visited_tags {
                self.store.set_remove(&self.keys.tag_key(tag), &visited_keys).await?;
            }
        }

        if deleted > 0 {
            info!(
                "级联失效完成: keys={}, tags={}, deleted={}",
                visited_keys.len(),
                visited_tags.len(),
                deleted
            );
        }

        Ok(CascadeReport {
            deleted,
            keys: visited_keys,
            tags: visited_tags,
        })
    }

    /// 按前缀或glob模式删除条目
    ///
    /// 扫描分页进行，超过 `scan_timeout` 后停止并返回 `complete=false`
    pub async fn invalidate_by_pattern(&self, pattern: &str) -> Result<PatternInvalidation, CacheError> {
        let (matched, scanned_pages, complete) = self.scan_entries(pattern).await?;
        let deleted = self.invalidate_many(&matched).await?;

        info!(
            "模式失效完成: pattern={}, matched={}, deleted={}, complete={}",
            pattern,
            matched.len(),
            deleted,
            complete
        );

        Ok(PatternInvalidation {
            matched: matched.len(),
            deleted,
            scanned_pages,
            complete,
        })
    }

    /// 按模式匹配后再由谓词决定是否删除
    ///
    /// 无法反序列化的条目视为谓词为false，保留并记录告警
    pub async fn conditional_invalidate<T, P>(&self, pattern: &str, predicate: P) -> Result<PatternInvalidation, CacheError>
    where
        T: DeserializeOwned,
        P: Fn(&T) -> bool,
    {
        let (candidates, scanned_pages, complete) = self.scan_entries(pattern).await?;

        let mut matched = Vec::new();
        for key in candidates {
            let Some(raw) = self.store.get(&self.keys.entry_key(&key)).await? else {
                continue;
            };

            let decoded = serde_json::from_str::<CacheEnvelope>(&raw)
                .and_then(|envelope| serde_json::from_value::<T>(envelope.value));
            match decoded {
                Ok(value) if predicate(&value) => matched.push(key),
                Ok(_) => {}
                Err(e) => {
                    warn!("条件失效跳过无法解析的条目: key={}, error={}", key, e);
                }
            }
        }

        let deleted = self.invalidate_many(&matched).await?;
        info!(
            "条件失效完成: pattern={}, matched={}, deleted={}",
            pattern,
            matched.len(),
            deleted
        );

        Ok(PatternInvalidation {
            matched: matched.len(),
            deleted,
            scanned_pages,
            complete,
        })
    }

    /// 获取命名空间的命中统计（扁平计数表）
    pub async fn get_metrics(&self, namespace: &str) -> Result<BTreeMap<String, u64>, CacheError> {
        let mut metrics = BTreeMap::new();
        for counter in counters::ALL {
            let raw = self.store.get(&self.keys.metrics_key(namespace, counter)).await?;
            let value = raw.and_then(|v| v.parse::<u64>().ok()).unwrap_or(0);
            metrics.insert(counter.to_string(), value);
        }

        let requests = metrics[counters::HITS] + metrics[counters::MISSES];
        metrics.insert("requests".to_string(), requests);
        Ok(metrics)
    }

    /// 扫描匹配的条目，返回 (逻辑键, 扫描页数, 是否完整)
    async fn scan_entries(&self, pattern: &str) -> Result<(Vec<String>, usize, bool), CacheError> {
        let scan_pattern = self.keys.entry_key(&normalize_pattern(pattern));
        let deadline = Instant::now() + self.config.scan_timeout;

        let mut cursor = 0u64;
        let mut pages = 0usize;
        let mut found: Vec<String> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        loop {
            let page = self
                .store
                .scan(cursor, &scan_pattern, self.config.scan_page_size)
                .await?;
            pages += 1;

            // SCAN 可能重复返回同一个键
            for full_key in page.keys {
                if let Some(key) = self.keys.logical_key(&full_key) {
                    if seen.insert(key.to_string()) {
                        found.push(key.to_string());
                    }
                }
            }

            cursor = page.cursor;
            if cursor == 0 {
                return Ok((found, pages, true));
            }
            if Instant::now() >= deadline {
                warn!(
                    "模式扫描达到时限，提前结束: pattern={}, pages={}, found={}",
                    pattern,
                    pages,
                    found.len()
                );
                return Ok((found, pages, false));
            }
        }
    }

    /// 批量删除条目并同步维护标签索引
    async fn invalidate_many(&self, keys: &[String]) -> Result<u64, CacheError> {
        if keys.is_empty() {
            return Ok(0);
        }

        let mut by_tag: HashMap<String, Vec<String>> = HashMap::new();
        for key in keys {
            for tag in self.tag_index.tags_of(key).await? {
                by_tag.entry(tag).or_default().push(key.clone());
            }
        }

        let deleted = self.delete_entries(keys).await?;

        let tag_sets: Vec<String> = keys.iter().map(|k| self.keys.key_tags_key(k)).collect();
        self.store.delete(&tag_sets).await?;

        for (tag, members) in by_tag {
            self.store.set_remove(&self.keys.tag_key(&tag), &members).await?;
        }

        debug!("缓存失效: keys={}, deleted={}", keys.len(), deleted);
        Ok(deleted)
    }

    /// 按命名空间分组删除条目，失效计数按各组实际删除数量记录
    async fn delete_entries(&self, keys: &[String]) -> Result<u64, CacheError> {
        let mut by_namespace: BTreeMap<&str, Vec<String>> = BTreeMap::new();
        for key in keys {
            by_namespace
                .entry(namespace_of(key))
                .or_default()
                .push(self.keys.entry_key(key));
        }

        let mut total = 0;
        for (namespace, entry_keys) in by_namespace {
            let deleted = self.store.delete(&entry_keys).await?;
            if deleted > 0 {
                self.record_by(namespace, counters::INVALIDATIONS, deleted as i64).await;
            }
            total += deleted;
        }
        Ok(total)
    }

    async fn record(&self, namespace: &str, counter: &str) {
        if counter == counters::HITS || counter == counters::MISSES {
            CACHE_LOOKUPS.with_label_values(&[namespace, counter]).inc();
        }
        self.record_by(namespace, counter, 1).await;
    }

    /// 统计写入失败不影响缓存操作本身
    async fn record_by(&self, namespace: &str, counter: &str, delta: i64) {
        let op = CounterOp::new(self.keys.metrics_key(namespace, counter), delta, self.config.metrics_ttl);
        if let Err(e) = self.store.increment(&[op]).await {
            debug!("缓存统计写入失败: namespace={}, counter={}, error={}", namespace, counter, e);
        }
    }
}

fn dedup(tags: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    tags.iter()
        .filter(|tag| seen.insert(tag.as_str()))
        .cloned()
        .collect()
}

/// 便捷构造标签列表
pub fn tag_list<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    items.into_iter().map(Into::into).collect()
}
