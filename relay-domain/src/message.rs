//! 入站消息（InboundMessage）与事件标识（Identifiable）
//!
//! 入站消息即中间件投递的原始信封：主题、分区、位点、可选键、头部与字节载荷。
//! 事件载荷需实现 `Identifiable` 以提供稳定的事件 ID 与关联 ID，
//! 缺失时由载荷内容派生基于名称的 UUID 作为兜底。
//!
use bon::Builder;
use std::collections::HashMap;
use uuid::Uuid;

/// 关联 ID 头部名称
pub const CORRELATION_ID_HEADER: &str = "correlation-id";

/// 内容哈希兜底 ID 的命名空间（固定值，保证跨进程稳定）
const CONTENT_ID_NAMESPACE: Uuid = Uuid::from_u128(0x6d2a_57c4_9b1e_4f0a_8c3d_2e7f_1a9b_5c60);

#[derive(Debug, Clone, Builder, PartialEq, Eq)]
pub struct InboundMessage {
    /// 来源主题
    #[builder(into)]
    topic: String,
    /// 分区号
    partition: i32,
    /// 分区内位点（单调递增）
    offset: i64,
    /// 消息键
    #[builder(into)]
    key: Option<String>,
    /// 消息头部
    #[builder(default)]
    headers: HashMap<String, String>,
    /// 原始载荷
    #[builder(into)]
    payload: Vec<u8>,
}

impl InboundMessage {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn partition(&self) -> i32 {
        self.partition
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// 头部携带的关联 ID
    pub fn correlation_id(&self) -> Option<&str> {
        self.header(CORRELATION_ID_HEADER)
    }
}

/// 可识别的事件载荷
///
/// - `event_id`：幂等判定所用的稳定 ID，返回 `None` 时回退到内容哈希；
/// - `correlation_id`：链路追踪用关联 ID，缺失时回退到消息头部；
/// - `event_type`：日志与指标使用的事件类型名。
pub trait Identifiable {
    fn event_id(&self) -> Option<&str>;

    fn correlation_id(&self) -> Option<&str> {
        None
    }

    fn event_type(&self) -> &str {
        short_type_name::<Self>()
    }
}

/// 将 `String` / `Option<String>` 字段统一视为可选字符串，供宏生成的访问器使用
pub trait AsOptionalStr {
    fn as_optional_str(&self) -> Option<&str>;
}

impl AsOptionalStr for String {
    fn as_optional_str(&self) -> Option<&str> {
        if self.is_empty() { None } else { Some(self.as_str()) }
    }
}

impl AsOptionalStr for Option<String> {
    fn as_optional_str(&self) -> Option<&str> {
        self.as_deref().filter(|s| !s.is_empty())
    }
}

impl AsOptionalStr for &str {
    fn as_optional_str(&self) -> Option<&str> {
        if self.is_empty() { None } else { Some(*self) }
    }
}

/// 由载荷内容派生的稳定事件 ID
pub fn content_event_id(payload: &[u8]) -> String {
    Uuid::new_v5(&CONTENT_ID_NAMESPACE, payload).to_string()
}

fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}
