//! 配额核算服务
//!
//! 日/月计数器按墙钟周期分键存放在共享存储中，周期切换不依赖首次访问时间

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::Serialize;
use tracing::{debug, error, warn};

use crate::infrastructure::store::{CounterOp, SharedStoreRef, StoreResult};
use crate::shared::clock::SharedClock;
use crate::shared::constants::quota as quota_constants;
use crate::shared::types::{ApiKeyId, OwnerId};

/// 单个调用方的配额上限
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QuotaLimits {
    pub daily: u64,
    pub monthly: u64,
}

impl Default for QuotaLimits {
    fn default() -> Self {
        Self {
            daily: quota_constants::DEFAULT_DAILY_LIMIT,
            monthly: quota_constants::DEFAULT_MONTHLY_LIMIT,
        }
    }
}

/// 当前周期的用量快照
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QuotaSnapshot {
    pub daily_limit: u64,
    pub current_daily_usage: u64,
    pub monthly_limit: u64,
    pub current_monthly_usage: u64,
}

impl QuotaSnapshot {
    pub fn daily_remaining(&self) -> u64 {
        self.daily_limit.saturating_sub(self.current_daily_usage)
    }

    pub fn monthly_remaining(&self) -> u64 {
        self.monthly_limit.saturating_sub(self.current_monthly_usage)
    }

    /// 已达上限时返回拒绝原因
    pub fn exceeded_reason(&self) -> Option<String> {
        if self.current_daily_usage >= self.daily_limit {
            Some(format!("Daily quota exceeded ({}/{})", self.current_daily_usage, self.daily_limit))
        } else if self.current_monthly_usage >= self.monthly_limit {
            Some(format!(
                "Monthly quota exceeded ({}/{})",
                self.current_monthly_usage, self.monthly_limit
            ))
        } else {
            None
        }
    }
}

/// 配额检查结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuotaCheck {
    pub has_quota: bool,
    pub reason: Option<String>,
    /// 存储不可用时为空
    pub quota: Option<QuotaSnapshot>,
}

/// 一次用量记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsageRecord {
    pub quota: QuotaSnapshot,
    /// 计入本次后超出了日或月上限
    pub exceeded: bool,
    /// 计数所在的日期，回滚时使用同一周期
    pub day: NaiveDate,
}

/// 配额服务
#[derive(Debug, Clone)]
pub struct QuotaService {
    store: SharedStoreRef,
    clock: SharedClock,
}

impl QuotaService {
    pub fn new(store: SharedStoreRef, clock: SharedClock) -> Self {
        Self { store, clock }
    }

    /// 检查调用方是否还有可用配额；存储不可用时拒绝
    pub async fn has_available_quota(&self, principal: ApiKeyId, limits: &QuotaLimits) -> QuotaCheck {
        let day = self.clock.now().date_naive();

        match self.read_usage(principal, day).await {
            Ok((daily, monthly)) => {
                let snapshot = QuotaSnapshot {
                    daily_limit: limits.daily,
                    current_daily_usage: daily,
                    monthly_limit: limits.monthly,
                    current_monthly_usage: monthly,
                };
                let reason = snapshot.exceeded_reason();
                if let Some(reason) = &reason {
                    warn!("⚠️ 配额不足: principal={}, reason={}", principal, reason);
                }
                QuotaCheck {
                    has_quota: reason.is_none(),
                    reason,
                    quota: Some(snapshot),
                }
            }
            Err(e) => {
                error!("❌ 配额存储不可用，拒绝请求: principal={}, error={}", principal, e);
                QuotaCheck {
                    has_quota: false,
                    reason: Some("quota store unavailable".to_string()),
                    quota: None,
                }
            }
        }
    }

    /// 记录一次用量：日、月、租户聚合计数器在一次原子调用中递增
    pub async fn record_usage(
        &self,
        principal: ApiKeyId,
        owner: OwnerId,
        limits: &QuotaLimits,
    ) -> StoreResult<UsageRecord> {
        let now = self.clock.now();
        let day = now.date_naive();
        let states = self.store.increment(&self.usage_ops(principal, owner, day, now, 1)).await?;

        let value_at = |index: usize| states.get(index).map(|s| s.value.max(0) as u64).unwrap_or(0);
        let snapshot = QuotaSnapshot {
            daily_limit: limits.daily,
            current_daily_usage: value_at(0),
            monthly_limit: limits.monthly,
            current_monthly_usage: value_at(1),
        };
        let exceeded = snapshot.current_daily_usage > limits.daily
            || snapshot.current_monthly_usage > limits.monthly;

        debug!(
            "配额用量已记录: principal={}, owner={}, daily={}/{}, monthly={}/{}",
            principal,
            owner,
            snapshot.current_daily_usage,
            limits.daily,
            snapshot.current_monthly_usage,
            limits.monthly
        );

        Ok(UsageRecord {
            quota: snapshot,
            exceeded,
            day,
        })
    }

    /// 撤销一次用量（并发越界时使用）
    pub async fn rollback_usage(&self, principal: ApiKeyId, owner: OwnerId, record: &UsageRecord) -> StoreResult<()> {
        let now = self.clock.now();
        self.store
            .increment(&self.usage_ops(principal, owner, record.day, now, -1))
            .await?;
        debug!("配额用量已回滚: principal={}, day={}", principal, record.day);
        Ok(())
    }

    /// 租户当日的聚合用量
    pub async fn owner_daily_usage(&self, owner: OwnerId) -> StoreResult<u64> {
        let day = self.clock.now().date_naive();
        let raw = self.store.get(&owner_daily_key(owner, day)).await?;
        Ok(parse_counter(raw))
    }

    async fn read_usage(&self, principal: ApiKeyId, day: NaiveDate) -> StoreResult<(u64, u64)> {
        let daily = self.store.get(&daily_key(principal, day)).await?;
        let monthly = self.store.get(&monthly_key(principal, day)).await?;
        Ok((parse_counter(daily), parse_counter(monthly)))
    }

    fn usage_ops(
        &self,
        principal: ApiKeyId,
        owner: OwnerId,
        day: NaiveDate,
        now: DateTime<Utc>,
        delta: i64,
    ) -> Vec<CounterOp> {
        let day_ttl = ttl_until(next_day(day), now);
        let month_ttl = ttl_until(next_month(day), now);
        vec![
            CounterOp::new(daily_key(principal, day), delta, day_ttl),
            CounterOp::new(monthly_key(principal, day), delta, month_ttl),
            CounterOp::new(owner_daily_key(owner, day), delta, day_ttl),
        ]
    }
}

/// 全局配额服务实例
pub type SharedQuotaService = Arc<QuotaService>;

fn daily_key(principal: ApiKeyId, day: NaiveDate) -> String {
    format!("quota:{}:daily:{}", principal, day.format("%Y-%m-%d"))
}

fn monthly_key(principal: ApiKeyId, day: NaiveDate) -> String {
    format!("quota:{}:monthly:{}", principal, day.format("%Y-%m"))
}

fn owner_daily_key(owner: OwnerId, day: NaiveDate) -> String {
    format!("quota:owner:{}:daily:{}", owner, day.format("%Y-%m-%d"))
}

fn parse_counter(raw: Option<String>) -> u64 {
    raw.and_then(|v| v.parse::<i64>().ok())
        .map(|v| v.max(0) as u64)
        .unwrap_or(0)
}

fn next_day(day: NaiveDate) -> NaiveDate {
    day.succ_opt().unwrap_or(day)
}

fn next_month(day: NaiveDate) -> NaiveDate {
    let (year, month) = if day.month() == 12 {
        (day.year() + 1, 1)
    } else {
        (day.year(), day.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(day)
}

/// 距周期结束的时间再加一天余量
fn ttl_until(period_end: NaiveDate, now: DateTime<Utc>) -> Duration {
    let remaining = period_end
        .and_hms_opt(0, 0, 0)
        .map(|end| (end.and_utc() - now).num_seconds().max(0))
        .unwrap_or(0);
    let seconds = remaining + quota_constants::PERIOD_SLACK_SECONDS;
    Duration::from_secs(seconds as u64)
}
