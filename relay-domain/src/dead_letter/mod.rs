//! 死信（dead_letter）
//!
//! 对重试耗尽或不可重试的消息，连同完整失败上下文旁路投递到死信主题，
//! 并支持按消息 ID 检索与重放回原主题。死信投递自身的失败只记录日志，不向上传播。
//!
mod message;
mod sink;

pub use message::{DlqMessage, DlqStats};
pub use sink::{
    ATTEMPT_NUMBER_HEADER, BrokerDeadLetterSink, DEFAULT_DLQ_INDEX_CAPACITY, DEFAULT_DLQ_TOPIC_SUFFIX, DeadLetterSink,
    EXCEPTION_CLASS_HEADER, ORIGINAL_TOPIC_HEADER, REPROCESSED_HEADER,
};
