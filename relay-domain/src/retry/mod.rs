//! 重试子系统（retry）
//!
//! - `RetryPolicy`：不可变的重试参数，经校验后通过 `Arc` 共享；
//! - `RetryContext`：单条消息在重试周期内的可变状态；
//! - `BackoffStrategy`：由尝试序号计算下一次等待时长；
//! - `RetryStrategy`：按分类结果驱动重试循环，退避期间可被取消。
//!
pub mod backoff;
pub mod context;
pub mod error;
pub mod policy;
pub mod strategy;

pub use backoff::{BackoffStrategy, ExponentialBackoff};
pub use context::RetryContext;
pub use error::{MaxRetriesExceeded, RetryError};
pub use policy::RetryPolicy;
pub use strategy::RetryStrategy;
