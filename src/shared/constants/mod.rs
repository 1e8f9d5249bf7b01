//! 常量定义模块

/// 缓存相关常量
pub mod cache {
    pub const DEFAULT_TTL_SECONDS: u64 = 300; // 5分钟
    pub const SCAN_PAGE_SIZE: usize = 100;
    pub const SCAN_TIMEOUT_MS: u64 = 2000;
    pub const METRICS_TTL_SECONDS: u64 = 86400 * 7; // 7天
    pub const WARMUP_INTERVAL_SECONDS: u64 = 600;
}

/// 共享存储相关常量
pub mod store {
    /// 进程内存储清理过期键的间隔
    pub const MEMORY_SWEEP_INTERVAL_SECONDS: u64 = 60;
    /// 进程内存储同时保留的扫描游标数量
    pub const MAX_OPEN_SCAN_CURSORS: usize = 1024;
}

/// 速率限制相关常量
pub mod rate_limit {
    pub const API_MAX_REQUESTS: u32 = 100;
    pub const API_WINDOW_SECONDS: u64 = 60;
    pub const LOGIN_MAX_REQUESTS: u32 = 5;
    pub const LOGIN_WINDOW_SECONDS: u64 = 900; // 15分钟
}

/// 配额相关常量
pub mod quota {
    pub const DEFAULT_DAILY_LIMIT: u64 = 1000;
    pub const DEFAULT_MONTHLY_LIMIT: u64 = 20000;
    /// 计数器在周期结束后额外保留的时间
    pub const PERIOD_SLACK_SECONDS: i64 = 86400;
}

/// 熔断与重试相关常量
pub mod resilience {
    pub const DEFAULT_RETRIES: u32 = 3;
    pub const BASE_DELAY_MS: u64 = 200;
    pub const ATTEMPT_TIMEOUT_MS: u64 = 3000;
    pub const ERROR_THRESHOLD_PERCENTAGE: f64 = 50.0;
    pub const VOLUME_THRESHOLD: u32 = 5;
    pub const ROLLING_WINDOW_SECONDS: u64 = 10;
    pub const RESET_TIMEOUT_SECONDS: u64 = 30;
    /// 合并调用在提供方重试预算之外的余量
    pub const COMBINE_MARGIN_MS: u64 = 500;
}

/// 估值相关常量
pub mod valuation {
    pub const CACHE_TTL_SECONDS: u64 = 3600;
    pub const LAST_KNOWN_TTL_SECONDS: u64 = 86400 * 30; // 30天
    pub const PROVIDER_TIMEOUT_SECONDS: u64 = 10;
}

/// HTTP相关常量
pub mod http {
    pub const MAX_CREDENTIAL_BODY_BYTES: usize = 1024 * 1024; // 1MB
    pub const API_KEY_HEADER: &str = "x-api-key";
    pub const API_KEY_QUERY_PARAMS: &[&str] = &["api_key", "apiKey"];
    pub const API_KEY_BODY_FIELDS: &[&str] = &["apiKey", "api_key"];
}
