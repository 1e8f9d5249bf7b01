//! 共享模块
//! 
//! 包含跨层共享的类型、错误处理、时钟、指标、工具函数等

pub mod error;
pub mod types;
pub mod utils;
pub mod constants;
pub mod clock;
pub mod metrics;

// 重新导出常用类型
pub use error::{AppError, AppResult};
pub use clock::{Clock, SharedClock, SystemClock, ManualClock};
pub use types::{ApiResponse, ApiKeyId, OwnerId, PropertyId};
