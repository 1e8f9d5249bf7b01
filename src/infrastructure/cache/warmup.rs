//! 缓存预热
//!
//! 每个预热任务先评估守卫条件，再调用值工厂写入缓存；
//! 任务之间互相独立，单个任务失败只记录日志，不影响其余任务

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{join_all, BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::CacheEngine;

pub type ValueFactory = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<serde_json::Value>> + Send + Sync>;
pub type WarmupCondition = Arc<dyn Fn() -> BoxFuture<'static, bool> + Send + Sync>;

/// 预热任务（可重复执行）
#[derive(Clone)]
pub struct WarmupTask {
    pub key: String,
    pub ttl: Duration,
    pub tags: Vec<String>,
    pub condition: Option<WarmupCondition>,
    pub factory: ValueFactory,
}

impl std::fmt::Debug for WarmupTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WarmupTask")
            .field("key", &self.key)
            .field("ttl", &self.ttl)
            .field("tags", &self.tags)
            .field("conditional", &self.condition.is_some())
            .finish()
    }
}

impl WarmupTask {
    pub fn new<F, Fut, V>(key: impl Into<String>, ttl: Duration, factory: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<V>> + Send + 'static,
        V: Serialize + Send + 'static,
    {
        Self {
            key: key.into(),
            ttl,
            tags: Vec::new(),
            condition: None,
            factory: Arc::new(move || {
                let fut = factory();
                async move {
                    let value = fut.await?;
                    Ok::<_, anyhow::Error>(serde_json::to_value(value)?)
                }
                .boxed()
            }),
        }
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// 守卫条件，返回false时跳过本次预热
    pub fn with_condition<C, Fut>(mut self, condition: C) -> Self
    where
        C: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        self.condition = Some(Arc::new(move || condition().boxed()));
        self
    }
}

/// 预热结果统计
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarmupReport {
    pub warmed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub failed_keys: Vec<String>,
}

enum TaskOutcome {
    Warmed,
    Skipped,
    Failed(String),
}

impl CacheEngine {
    /// 并发执行全部预热任务
    pub async fn warm_cache(&self, tasks: &[WarmupTask]) -> WarmupReport {
        let outcomes = join_all(tasks.iter().map(|task| self.run_warmup_task(task))).await;

        let mut report = WarmupReport::default();
        for outcome in outcomes {
            match outcome {
                TaskOutcome::Warmed => report.warmed += 1,
                TaskOutcome::Skipped => report.skipped += 1,
                TaskOutcome::Failed(key) => {
                    report.failed += 1;
                    report.failed_keys.push(key);
                }
            }
        }

        info!(
            "缓存预热完成: warmed={}, skipped={}, failed={}",
            report.warmed, report.skipped, report.failed
        );
        report
    }

    async fn run_warmup_task(&self, task: &WarmupTask) -> TaskOutcome {
        if let Some(condition) = &task.condition {
            if !condition().await {
                debug!("预热条件不满足，跳过: key={}", task.key);
                return TaskOutcome::Skipped;
            }
        }

        let value = match (task.factory)().await {
            Ok(value) => value,
            Err(e) => {
                warn!("预热值生成失败: key={}, error={}", task.key, e);
                return TaskOutcome::Failed(task.key.clone());
            }
        };

        match self.set(&task.key, &value, task.ttl, &task.tags).await {
            Ok(true) => TaskOutcome::Warmed,
            Ok(false) => TaskOutcome::Skipped,
            Err(e) => {
                warn!("预热写入缓存失败: key={}, error={}", task.key, e);
                TaskOutcome::Failed(task.key.clone())
            }
        }
    }
}

/// 启动周期性预热；丢弃前调用 `abort()` 停止
pub fn spawn_warmup_scheduler(engine: CacheEngine, tasks: Vec<WarmupTask>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        info!("🔥 缓存预热调度已启动: tasks={}, interval={:?}", tasks.len(), interval);
        loop {
            ticker.tick().await;
            let report = engine.warm_cache(&tasks).await;
            if report.failed > 0 {
                warn!("⚠️ 本轮预热存在失败任务: {:?}", report.failed_keys);
            }
        }
    })
}
