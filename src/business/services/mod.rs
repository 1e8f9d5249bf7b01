//! 业务服务模块
//! 
//! 限流、配额、弹性调用与估值合并

pub mod rate_limit_service;
pub mod quota_service;
pub mod resilience;
pub mod valuation_service;

pub use rate_limit_service::{
    RateLimitConfig, RateLimitDecision, RateLimitInfo, RateLimitService, SharedRateLimitService,
};
pub use quota_service::{
    QuotaCheck, QuotaLimits, QuotaService, QuotaSnapshot, SharedQuotaService, UsageRecord,
};
pub use resilience::{
    CircuitBreakerConfig, CircuitBreakerRegistry, CircuitBreakerState, CircuitSnapshot,
    ResilienceError, ResilienceOptions, ResilienceWrapper,
};
pub use valuation_service::{
    HttpValuationProvider, ProviderError, SharedValuationProvider, ValuationProvider,
    ValuationService,
};
