//! 内存共享存储实现
//!
//! 语义与Redis实现保持一致（TTL、原子递增、集合、分页扫描），
//! 用于单进程开发和测试。过期基于 tokio 时钟，测试中可以暂停/推进时间。
//! 过期键在再次访问时清除，`spawn_sweeper` 负责清除不再被访问的键

use std::collections::{BTreeMap, HashSet};
use std::ops::Bound::{Excluded, Unbounded};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use super::{CounterOp, CounterState, ScanPage, SharedStore, StoreError, StoreResult};
use crate::shared::constants::store as store_constants;
use crate::shared::utils::glob_match;

#[derive(Debug, Clone)]
enum StoredValue {
    Text(String),
    Set(HashSet<String>),
}

#[derive(Debug, Clone)]
struct StoredEntry {
    value: StoredValue,
    expires_at: Option<Instant>,
}

impl StoredEntry {
    fn is_expired(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(at) if now >= at)
    }

    fn remaining(&self, now: Instant) -> Option<Duration> {
        self.expires_at.map(|at| at.saturating_duration_since(now))
    }
}

/// 内存存储
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    // 有序键，扫描游标记录上一页最后一个键
    entries: Arc<RwLock<BTreeMap<String, StoredEntry>>>,
    cursors: Arc<Mutex<BTreeMap<u64, String>>>,
    last_cursor: Arc<AtomicU64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前未过期的键数量
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        let entries = self.entries.read().await;
        entries.values().filter(|e| !e.is_expired(now)).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// 键的剩余TTL（测试与诊断用）
    pub async fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        entries
            .get(key)
            .filter(|e| !e.is_expired(now))
            .and_then(|e| e.remaining(now))
    }

    /// 清除全部已过期的键，返回清除数量
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }

    /// 启动后台清理任务
    pub fn spawn_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            info!("🧹 内存存储过期清理已启动: interval={:?}", interval);
            loop {
                ticker.tick().await;
                let purged = store.purge_expired().await;
                if purged > 0 {
                    debug!("内存存储清除过期键: count={}", purged);
                }
            }
        })
    }

    /// 包括已过期但尚未清除的键
    #[cfg(test)]
    async fn stored_len(&self) -> usize {
        self.entries.read().await.len()
    }

    fn open_cursor(&self, last_key: String) -> u64 {
        let id = self.last_cursor.fetch_add(1, Ordering::Relaxed) + 1;
        if let Ok(mut cursors) = self.cursors.lock() {
            cursors.insert(id, last_key);
            // 被放弃的扫描不会归还游标
            while cursors.len() > store_constants::MAX_OPEN_SCAN_CURSORS {
                cursors.pop_first();
            }
        }
        id
    }

    fn take_cursor(&self, id: u64) -> Option<String> {
        self.cursors.lock().ok().and_then(|mut cursors| cursors.remove(&id))
    }

    fn purge_if_expired(entries: &mut BTreeMap<String, StoredEntry>, key: &str, now: Instant) {
        if entries.get(key).map(|e| e.is_expired(now)).unwrap_or(false) {
            entries.remove(key);
        }
    }
}

#[async_trait]
impl SharedStore for MemoryStore {
    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        match entries.get(key) {
            Some(entry) if !entry.is_expired(now) => match &entry.value {
                StoredValue::Text(value) => Ok(Some(value.clone())),
                StoredValue::Set(_) => Err(StoreError::WrongType(key.to_string())),
            },
            _ => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        let mut entries = self.entries.write().await;
        entries.insert(
            key.to_string(),
            StoredEntry {
                value: StoredValue::Text(value.to_string()),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        debug!("内存存储SET: key={}, ttl={:?}", key, ttl);
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> StoreResult<u64> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let mut deleted = 0;
        for key in keys {
            if let Some(entry) = entries.remove(key) {
                if !entry.is_expired(now) {
                    deleted += 1;
                }
            }
        }
        Ok(deleted)
    }

    async fn increment(&self, ops: &[CounterOp]) -> StoreResult<Vec<CounterState>> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;

        // 先校验全部键的类型，保证批量操作要么全部生效要么全部失败
        for op in ops {
            Self::purge_if_expired(&mut entries, &op.key, now);
            if let Some(entry) = entries.get(&op.key) {
                match &entry.value {
                    StoredValue::Text(text) if text.parse::<i64>().is_ok() => {}
                    _ => return Err(StoreError::WrongType(op.key.clone())),
                }
            }
        }

        let mut states = Vec::with_capacity(ops.len());
        for op in ops {
            let entry = entries.entry(op.key.clone()).or_insert_with(|| StoredEntry {
                value: StoredValue::Text("0".to_string()),
                expires_at: None,
            });

            let current = match &entry.value {
                StoredValue::Text(text) => text.parse::<i64>().unwrap_or(0),
                StoredValue::Set(_) => 0,
            };
            let value = current + op.delta;
            entry.value = StoredValue::Text(value.to_string());
            if entry.expires_at.is_none() {
                entry.expires_at = Some(now + op.ttl);
            }

            states.push(CounterState {
                value,
                ttl_remaining: entry.remaining(now).unwrap_or(op.ttl),
            });
        }

        Ok(states)
    }

    async fn set_add(&self, key: &str, members: &[String], ttl: Duration) -> StoreResult<()> {
        if members.is_empty() {
            return Ok(());
        }

        let now = Instant::now();
        let mut entries = self.entries.write().await;
        Self::purge_if_expired(&mut entries, key, now);

        let entry = entries.entry(key.to_string()).or_insert_with(|| StoredEntry {
            value: StoredValue::Set(HashSet::new()),
            expires_at: None,
        });

        match &mut entry.value {
            StoredValue::Set(set) => set.extend(members.iter().cloned()),
            StoredValue::Text(_) => return Err(StoreError::WrongType(key.to_string())),
        }

        let candidate = now + ttl;
        entry.expires_at = Some(match entry.expires_at {
            Some(current) if current > candidate => current,
            _ => candidate,
        });
        Ok(())
    }

    async fn set_remove(&self, key: &str, members: &[String]) -> StoreResult<()> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        Self::purge_if_expired(&mut entries, key, now);

        let emptied = match entries.get_mut(key) {
            Some(StoredEntry { value: StoredValue::Set(set), .. }) => {
                for member in members {
                    set.remove(member);
                }
                set.is_empty()
            }
            Some(_) => return Err(StoreError::WrongType(key.to_string())),
            None => false,
        };

        // 与Redis一致：空集合即不存在
        if emptied {
            entries.remove(key);
        }
        Ok(())
    }

    async fn set_members(&self, key: &str) -> StoreResult<Vec<String>> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        match entries.get(key) {
            Some(entry) if !entry.is_expired(now) => match &entry.value {
                StoredValue::Set(set) => {
                    let mut members: Vec<String> = set.iter().cloned().collect();
                    members.sort();
                    Ok(members)
                }
                StoredValue::Text(_) => Err(StoreError::WrongType(key.to_string())),
            },
            _ => Ok(Vec::new()),
        }
    }

    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> StoreResult<ScanPage> {
        let after = match cursor {
            0 => None,
            id => Some(
                self.take_cursor(id)
                    .ok_or_else(|| StoreError::Command(format!("无效的扫描游标: {}", id)))?,
            ),
        };

        let now = Instant::now();
        let count = count.max(1);
        let entries = self.entries.read().await;
        let mut range = match &after {
            Some(last) => entries.range::<String, _>((Excluded(last), Unbounded)),
            None => entries.range::<String, _>(..),
        };

        let window: Vec<(&String, &StoredEntry)> = range.by_ref().take(count).collect();
        let has_more = range.next().is_some();
        let last_key = window.last().map(|(key, _)| (*key).clone());

        let keys = window
            .into_iter()
            .filter(|(key, entry)| !entry.is_expired(now) && glob_match(pattern, key))
            .map(|(key, _)| key.clone())
            .collect();
        drop(entries);

        let cursor = match last_key {
            Some(last) if has_more => self.open_cursor(last),
            _ => 0,
        };
        Ok(ScanPage { cursor, keys })
    }
}
