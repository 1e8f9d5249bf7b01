//! 估值领域模型

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::shared::types::PropertyId;

/// 单个上游提供方的报价
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderQuote {
    pub provider: String,
    pub estimate: f64,
    #[serde(default)]
    pub currency: Option<String>,
}

/// 报价区间
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValuationRange {
    pub low: f64,
    pub high: f64,
}

/// 合并后的估值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Valuation {
    pub property_id: PropertyId,
    /// 各提供方报价的平均值
    pub estimate: f64,
    pub range: ValuationRange,
    pub providers: Vec<String>,
    pub computed_at: DateTime<Utc>,
    /// 来自最近一次成功结果，而非实时合并
    #[serde(default)]
    pub stale: bool,
}

impl Valuation {
    /// 合并报价；没有报价时返回None
    pub fn combine(property_id: &str, quotes: &[ProviderQuote], computed_at: DateTime<Utc>) -> Option<Self> {
        if quotes.is_empty() {
            return None;
        }

        let sum: f64 = quotes.iter().map(|q| q.estimate).sum();
        let low = quotes.iter().map(|q| q.estimate).fold(f64::INFINITY, f64::min);
        let high = quotes.iter().map(|q| q.estimate).fold(f64::NEG_INFINITY, f64::max);

        Some(Self {
            property_id: property_id.to_string(),
            estimate: sum / quotes.len() as f64,
            range: ValuationRange { low, high },
            providers: quotes.iter().map(|q| q.provider.clone()).collect(),
            computed_at,
            stale: false,
        })
    }
}
