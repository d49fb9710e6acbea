use bon::Builder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 死信消息：一次写入，不再修改
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Builder)]
pub struct DlqMessage {
    #[builder(into)]
    pub message_id: String,
    #[builder(into)]
    pub original_topic: String,
    pub partition: i32,
    pub offset: i64,
    /// 已执行的尝试次数
    pub attempt_number: u32,
    pub first_attempt_time: DateTime<Utc>,
    pub last_attempt_time: DateTime<Utc>,
    /// 失败种类名，无法识别时为 `unknown`
    #[builder(into)]
    pub failure_class: String,
    #[builder(into)]
    pub failure_message: String,
    /// 完整错误链文本
    #[builder(into)]
    pub stack_trace: String,
    #[builder(into)]
    pub correlation_id: Option<String>,
    pub original_payload: Vec<u8>,
    #[builder(default = Utc::now())]
    pub enqueued_at: DateTime<Utc>,
}

/// 死信统计
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DlqStats {
    pub total_messages: u64,
    pub send_failures: u64,
    pub reprocessed_successfully: u64,
    pub reprocessed_failed: u64,
    /// 自启动以来平均每秒进入死信的消息数
    pub messages_per_second: f64,
}
