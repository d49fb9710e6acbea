//! 熔断（circuit_breaker）
//!
//! 按下游服务名懒创建熔断器，基于计数滑动窗口统计失败率：
//! - CLOSED：正常放行，失败率达到阈值且样本数足够时转 OPEN；
//! - OPEN：拒绝调用（`CallNotPermitted`），等待期满后下一次获取转 HALF_OPEN；
//! - HALF_OPEN：放行有限次试探调用，全部成功转 CLOSED，任一失败回到 OPEN。
//!
mod breaker;
mod config;
mod service;

pub use breaker::{CallNotPermitted, CircuitBreaker, CircuitBreakerMetrics, CircuitState};
pub use config::CircuitBreakerConfig;
pub use service::CircuitBreakerService;
