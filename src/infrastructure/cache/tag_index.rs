//! 标签倒排索引
//!
//! 键 -> 标签 与 标签 -> 键 两个映射同时维护

use std::collections::HashSet;
use std::time::Duration;

use tracing::debug;

use super::CacheKeyBuilder;
use crate::infrastructure::store::{SharedStoreRef, StoreResult};

#[derive(Debug, Clone)]
pub struct TagIndex {
    store: SharedStoreRef,
    keys: CacheKeyBuilder,
}

impl TagIndex {
    pub fn new(store: SharedStoreRef, keys: CacheKeyBuilder) -> Self {
        Self { store, keys }
    }

    /// 条目携带的标签
    pub async fn tags_of(&self, key: &str) -> StoreResult<Vec<String>> {
        self.store.set_members(&self.keys.key_tags_key(key)).await
    }

    /// 标签下的全部键
    pub async fn keys_of(&self, tag: &str) -> StoreResult<Vec<String>> {
        self.store.set_members(&self.keys.tag_key(tag)).await
    }

    /// 追加标签
    pub async fn attach(&self, key: &str, tags: &[String], ttl: Duration) -> StoreResult<()> {
        if tags.is_empty() {
            return Ok(());
        }

        self.store
            .set_add(&self.keys.key_tags_key(key), tags, ttl)
            .await?;

        let member = [key.to_string()];
        for tag in tags {
            self.store.set_add(&self.keys.tag_key(tag), &member, ttl).await?;
        }

        debug!("标签索引更新: key={}, tags={:?}", key, tags);
        Ok(())
    }

    /// 用新标签列表替换条目的标签，解除不再携带的旧标签
    pub async fn replace(&self, key: &str, tags: &[String], ttl: Duration) -> StoreResult<()> {
        let previous = self.tags_of(key).await?;
        if previous.is_empty() && tags.is_empty() {
            return Ok(());
        }

        let wanted: HashSet<&String> = tags.iter().collect();
        let stale: Vec<String> = previous
            .into_iter()
            .filter(|tag| !wanted.contains(tag))
            .collect();

        if !stale.is_empty() {
            self.store
                .set_remove(&self.keys.key_tags_key(key), &stale)
                .await?;
            self.detach(key, &stale).await?;
        }

        self.attach(key, tags, ttl).await
    }

    /// 把键从指定标签的成员集合中移除
    pub async fn detach(&self, key: &str, tags: &[String]) -> StoreResult<()> {
        let member = [key.to_string()];
        for tag in tags {
            self.store.set_remove(&self.keys.tag_key(tag), &member).await?;
        }
        Ok(())
    }
}
