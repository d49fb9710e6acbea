use crate::message::InboundMessage;
use chrono::{DateTime, Utc};

/// 单条消息的重试上下文
///
/// 首次投递时创建，终态处理（确认/死信/重投）后丢弃；
/// `attempt_count` 从 0 开始，每次尝试前由 `RetryStrategy` 递增。
#[derive(Debug, Clone)]
pub struct RetryContext {
    event_id: String,
    correlation_id: Option<String>,
    topic: String,
    partition: i32,
    offset: i64,
    attempt_count: u32,
    first_attempt_time: DateTime<Utc>,
    last_attempt_time: DateTime<Utc>,
    last_error_message: Option<String>,
    original_payload: Vec<u8>,
}

impl RetryContext {
    pub fn new(
        event_id: impl Into<String>,
        correlation_id: Option<String>,
        message: &InboundMessage,
    ) -> Self {
        let now = Utc::now();
        Self {
            event_id: event_id.into(),
            correlation_id,
            topic: message.topic().to_string(),
            partition: message.partition(),
            offset: message.offset(),
            attempt_count: 0,
            first_attempt_time: now,
            last_attempt_time: now,
            last_error_message: None,
            original_payload: message.payload().to_vec(),
        }
    }

    /// 记录一次新的尝试
    pub fn increment_attempt(&mut self) {
        self.attempt_count += 1;
        self.last_attempt_time = Utc::now();
    }

    pub fn record_error(&mut self, message: impl Into<String>) {
        self.last_error_message = Some(message.into());
    }

    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn partition(&self) -> i32 {
        self.partition
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    pub fn first_attempt_time(&self) -> DateTime<Utc> {
        self.first_attempt_time
    }

    pub fn last_attempt_time(&self) -> DateTime<Utc> {
        self.last_attempt_time
    }

    pub fn last_error_message(&self) -> Option<&str> {
        self.last_error_message.as_deref()
    }

    pub fn original_payload(&self) -> &[u8] {
        &self.original_payload
    }
}
