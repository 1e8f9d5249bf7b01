//! 测试辅助：模拟存储故障与并发写入

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{CounterOp, CounterState, MemoryStore, ScanPage, SharedStore, StoreError, StoreResult};

/// 所有操作都返回连接错误的存储
#[derive(Debug, Default)]
pub struct UnavailableStore;

fn down<T>() -> StoreResult<T> {
    Err(StoreError::Connection("connection refused".to_string()))
}

#[async_trait]
impl SharedStore for UnavailableStore {
    async fn ping(&self) -> StoreResult<()> { down() }
    async fn get(&self, _key: &str) -> StoreResult<Option<String>> { down() }
    async fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> StoreResult<()> { down() }
    async fn delete(&self, _keys: &[String]) -> StoreResult<u64> { down() }
    async fn increment(&self, _ops: &[CounterOp]) -> StoreResult<Vec<CounterState>> { down() }
    async fn set_add(&self, _key: &str, _members: &[String], _ttl: Duration) -> StoreResult<()> { down() }
    async fn set_remove(&self, _key: &str, _members: &[String]) -> StoreResult<()> { down() }
    async fn set_members(&self, _key: &str) -> StoreResult<Vec<String>> { down() }
    async fn scan(&self, _cursor: u64, _pattern: &str, _count: usize) -> StoreResult<ScanPage> { down() }
}

/// 包装内存存储，按需注入故障或模拟并发写入
#[derive(Debug, Default)]
pub struct ScriptedStore {
    pub inner: MemoryStore,
    fail_set_add: AtomicBool,
    add_after_read: Mutex<Option<(String, String)>>,
}

impl ScriptedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 之后的 `set_add` 全部返回命令错误
    pub fn fail_set_add(&self, fail: bool) {
        self.fail_set_add.store(fail, Ordering::SeqCst);
    }

    /// 下一次读取集合 `key` 之后把 `member` 加入该集合，模拟读写之间的并发写入
    pub fn add_after_read(&self, key: impl Into<String>, member: impl Into<String>) {
        if let Ok(mut slot) = self.add_after_read.lock() {
            *slot = Some((key.into(), member.into()));
        }
    }
}

#[async_trait]
impl SharedStore for ScriptedStore {
    async fn ping(&self) -> StoreResult<()> {
        self.inner.ping().await
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, keys: &[String]) -> StoreResult<u64> {
        self.inner.delete(keys).await
    }

    async fn increment(&self, ops: &[CounterOp]) -> StoreResult<Vec<CounterState>> {
        self.inner.increment(ops).await
    }

    async fn set_add(&self, key: &str, members: &[String], ttl: Duration) -> StoreResult<()> {
        if self.fail_set_add.load(Ordering::SeqCst) {
            return Err(StoreError::Command("SADD rejected".to_string()));
        }
        self.inner.set_add(key, members, ttl).await
    }

    async fn set_remove(&self, key: &str, members: &[String]) -> StoreResult<()> {
        self.inner.set_remove(key, members).await
    }

    async fn set_members(&self, key: &str) -> StoreResult<Vec<String>> {
        let members = self.inner.set_members(key).await?;
        let injected = match self.add_after_read.lock() {
            Ok(mut slot) if slot.as_ref().map(|(k, _)| k == key).unwrap_or(false) => slot.take(),
            _ => None,
        };
        if let Some((_, member)) = injected {
            self.inner.set_add(key, &[member], Duration::from_secs(60)).await?;
        }
        Ok(members)
    }

    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> StoreResult<ScanPage> {
        self.inner.scan(cursor, pattern, count).await
    }
}
