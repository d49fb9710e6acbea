use crate::error::AppError;
use serde::Serialize;
use uuid::Uuid;

/// 缓存键派生所用的命名空间（固定值，保证跨进程稳定）
const CACHE_KEY_NAMESPACE: Uuid = Uuid::from_u128(0x0b7e_3c51_a2d4_4f86_9e1a_6c3f_58d2_e47b);

/// 应用层查询（Query）
///
/// 表达只读意图，不改变领域状态。
/// - 结果类型为 `Output`；
/// - 与 [`Command`](crate::command::Command) 相对，`Query` 应避免副作用；
/// - 查询需可序列化，用于派生确定性的缓存键。
pub trait Query: Serialize + Send + Sync + 'static {
    /// 查询的稳定名称（建议常量字符串，不随重构变化）
    const NAME: &'static str;

    type Output: Send + 'static;

    fn correlation_id(&self) -> Option<&str> {
        None
    }
}

/// 由查询类型与内容派生的确定性缓存键：`<NAME>:<uuid-v5>`
///
/// 内容相同的两个查询得到相同的键；含 `HashMap` 等无序字段时不保证稳定。
pub fn cache_key<Q: Query>(query: &Q) -> Result<String, AppError> {
    let bytes = serde_json::to_vec(query)?;
    Ok(format!(
        "{}:{}",
        Q::NAME,
        Uuid::new_v5(&CACHE_KEY_NAMESPACE, &bytes)
    ))
}
