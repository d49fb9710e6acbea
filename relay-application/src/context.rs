use crate::command::{Command, DEFAULT_INITIATOR};
use crate::query::Query;
use uuid::Uuid;

/// 应用层上下文（Application Context）
///
/// 由总线在每次分发时生成，承载一次调用的横切信息：
/// - `request_id`：本次调用的唯一 ID；
/// - `correlation_id`：链路追踪用关联 ID，取自命令/查询本身；
/// - `initiator`：发起者身份，查询固定为系统身份。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppContext {
    pub request_id: String,
    pub correlation_id: Option<String>,
    pub initiator: String,
}

impl Default for AppContext {
    fn default() -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            correlation_id: None,
            initiator: DEFAULT_INITIATOR.to_string(),
        }
    }
}

impl AppContext {
    pub fn for_command<C: Command>(cmd: &C) -> Self {
        Self {
            correlation_id: cmd.correlation_id().map(str::to_string),
            initiator: cmd.initiator().to_string(),
            ..Self::default()
        }
    }

    pub fn for_query<Q: Query>(query: &Q) -> Self {
        Self {
            correlation_id: query.correlation_id().map(str::to_string),
            ..Self::default()
        }
    }
}
