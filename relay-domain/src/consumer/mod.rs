//! 消费编排（consumer）
//!
//! - `EventHandler`：业务处理器，需自身保持幂等；
//! - `EventConsumer`：单条消息的状态机（幂等检查 → 重试处理 → 确认 / 死信 / 重投）；
//! - `EventProcessingStats`：处理计数与失败率；
//! - `ConsumerEngine`：订阅消息源，按主题分区驱动消费循环，提供关闭与等待的 `EngineHandle`。
//!
mod engine;
mod event_consumer;
mod handler;
mod stats;

pub use engine::{ConsumerEngine, ConsumerEngineConfig, EngineHandle};
pub use event_consumer::{ConsumerError, Disposition, EventConsumer, MessageConsumer};
pub use handler::EventHandler;
pub use stats::{EventProcessingStats, StatsSnapshot};
