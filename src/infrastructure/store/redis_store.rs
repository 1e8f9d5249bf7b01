//! Redis共享存储实现
//!
//! 所有工作进程通过同一个Redis实例共享缓存、限流和配额状态
//! 多键递增与集合TTL延长使用Lua脚本，保证单次往返内原子完成

use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use redis::aio::ConnectionManager;
use tracing::{debug, error, info};

use super::{CounterOp, CounterState, ScanPage, SharedStore, StoreError, StoreResult};

/// INCRBY + 首次设置过期时间，返回 [value1, pttl1, value2, pttl2, ...]
static INCREMENT_SCRIPT: Lazy<redis::Script> = Lazy::new(|| {
    redis::Script::new(
        r#"
local out = {}
for i, key in ipairs(KEYS) do
  local delta = tonumber(ARGV[i * 2 - 1])
  local ttl = tonumber(ARGV[i * 2])
  local value = redis.call('INCRBY', key, delta)
  local remaining = redis.call('PTTL', key)
  if remaining < 0 then
    redis.call('PEXPIRE', key, ttl)
    remaining = ttl
  end
  table.insert(out, value)
  table.insert(out, remaining)
end
return out
"#,
    )
});

/// SADD + 把集合TTL延长到 max(当前, ttl)
static SET_ADD_SCRIPT: Lazy<redis::Script> = Lazy::new(|| {
    redis::Script::new(
        r#"
redis.call('SADD', KEYS[1], unpack(ARGV, 2))
local ttl = tonumber(ARGV[1])
local current = redis.call('PTTL', KEYS[1])
if current < ttl then
  redis.call('PEXPIRE', KEYS[1], ttl)
end
return 1
"#,
    )
});

/// Redis存储客户端封装
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
    key_prefix: String,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("key_prefix", &self.key_prefix)
            .finish()
    }
}

impl RedisStore {
    /// 建立连接（ConnectionManager 断线后自动重连）
    pub async fn connect(redis_url: &str, key_prefix: String) -> StoreResult<Self> {
        let client = redis::Client::open(redis_url)?;
        let connection = ConnectionManager::new(client).await?;

        info!("Redis共享存储已连接: prefix={}", key_prefix);
        Ok(Self {
            connection,
            key_prefix,
        })
    }

    /// 构建完整的存储键
    fn build_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    fn strip_key<'a>(&self, full_key: &'a str) -> &'a str {
        full_key.strip_prefix(&self.key_prefix).unwrap_or(full_key)
    }

    fn ttl_millis(ttl: Duration) -> u64 {
        (ttl.as_millis() as u64).max(1)
    }
}

#[async_trait]
impl SharedStore for RedisStore {
    async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.connection.clone();
        redis::cmd("PING").query_async::<_, String>(&mut conn).await?;
        debug!("Redis PING成功");
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.connection.clone();
        let value = redis::cmd("GET")
            .arg(self.build_key(key))
            .query_async::<_, Option<String>>(&mut conn)
            .await
            .map_err(|e| {
                error!("Redis GET操作失败: key={}, error={}", key, e);
                StoreError::from(e)
            })?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        let mut conn = self.connection.clone();
        redis::cmd("SET")
            .arg(self.build_key(key))
            .arg(value)
            .arg("PX")
            .arg(Self::ttl_millis(ttl))
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| {
                error!("Redis SET操作失败: key={}, error={}", key, e);
                StoreError::from(e)
            })?;
        debug!("Redis SET成功: key={}, ttl={:?}", key, ttl);
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> StoreResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }

        let full_keys: Vec<String> = keys.iter().map(|k| self.build_key(k)).collect();
        let mut conn = self.connection.clone();
        let deleted = redis::cmd("DEL")
            .arg(&full_keys)
            .query_async::<_, u64>(&mut conn)
            .await
            .map_err(|e| {
                error!("Redis DEL操作失败: keys={}, error={}", keys.len(), e);
                StoreError::from(e)
            })?;
        Ok(deleted)
    }

    async fn increment(&self, ops: &[CounterOp]) -> StoreResult<Vec<CounterState>> {
        if ops.is_empty() {
            return Ok(Vec::new());
        }

        let mut invocation = INCREMENT_SCRIPT.prepare_invoke();
        for op in ops {
            invocation
                .key(self.build_key(&op.key))
                .arg(op.delta)
                .arg(Self::ttl_millis(op.ttl));
        }

        let mut conn = self.connection.clone();
        let raw: Vec<i64> = invocation.invoke_async(&mut conn).await.map_err(|e| {
            error!("Redis INCR脚本失败: ops={}, error={}", ops.len(), e);
            StoreError::from(e)
        })?;

        if raw.len() != ops.len() * 2 {
            return Err(StoreError::Command(format!(
                "INCR脚本返回长度异常: expected={}, actual={}",
                ops.len() * 2,
                raw.len()
            )));
        }

        Ok(raw
            .chunks(2)
            .map(|pair| CounterState {
                value: pair[0],
                ttl_remaining: Duration::from_millis(pair[1].max(0) as u64),
            })
            .collect())
    }

    async fn set_add(&self, key: &str, members: &[String], ttl: Duration) -> StoreResult<()> {
        if members.is_empty() {
            return Ok(());
        }

        let mut invocation = SET_ADD_SCRIPT.prepare_invoke();
        invocation.key(self.build_key(key)).arg(Self::ttl_millis(ttl));
        for member in members {
            invocation.arg(member);
        }

        let mut conn = self.connection.clone();
        invocation
            .invoke_async::<_, i64>(&mut conn)
            .await
            .map_err(|e| {
                error!("Redis SADD脚本失败: key={}, error={}", key, e);
                StoreError::from(e)
            })?;
        Ok(())
    }

    async fn set_remove(&self, key: &str, members: &[String]) -> StoreResult<()> {
        if members.is_empty() {
            return Ok(());
        }

        let mut conn = self.connection.clone();
        redis::cmd("SREM")
            .arg(self.build_key(key))
            .arg(members)
            .query_async::<_, i64>(&mut conn)
            .await?;
        Ok(())
    }

    async fn set_members(&self, key: &str) -> StoreResult<Vec<String>> {
        let mut conn = self.connection.clone();
        let members = redis::cmd("SMEMBERS")
            .arg(self.build_key(key))
            .query_async::<_, Vec<String>>(&mut conn)
            .await?;
        Ok(members)
    }

    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> StoreResult<ScanPage> {
        let mut conn = self.connection.clone();
        let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(self.build_key(pattern))
            .arg("COUNT")
            .arg(count)
            .query_async(&mut conn)
            .await
            .map_err(|e| {
                error!("Redis SCAN操作失败: pattern={}, error={}", pattern, e);
                StoreError::from(e)
            })?;

        Ok(ScanPage {
            cursor: next,
            keys: keys.iter().map(|k| self.strip_key(k).to_string()).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore] // 需要Redis实例才能运行
    async fn test_redis_store_operations() {
        let store = RedisStore::connect("redis://localhost:6379", "test:".to_string())
            .await
            .expect("Failed to connect Redis store");

        store.ping().await.expect("Redis ping failed");

        store.set("store_key", "value", Duration::from_secs(30)).await.expect("set failed");
        assert_eq!(store.get("store_key").await.unwrap(), Some("value".to_string()));

        let counters = store
            .increment(&[CounterOp::new("store_counter", 1, Duration::from_secs(30))])
            .await
            .expect("increment failed");
        assert!(counters[0].value >= 1);
        assert!(counters[0].ttl_remaining <= Duration::from_secs(30));

        let deleted = store
            .delete(&["store_key".to_string(), "store_counter".to_string()])
            .await
            .expect("delete failed");
        assert_eq!(deleted, 2);
    }
}
