use crate::{error::AppError, query::Query, query_handler::QueryHandler, result::QueryResult};
use async_trait::async_trait;
use std::sync::Arc;

/// 查询总线（Query Bus）
///
/// - 负责根据查询的具体类型路由到唯一的处理器；
/// - 处理器错误转换为 `QueryResult::Failure`；
/// - 额外提供确定性的缓存键，供边界处叠加读穿缓存。
#[async_trait]
pub trait QueryBus: Send + Sync {
    fn register<Q, H>(&self, handler: Arc<H>) -> Result<(), AppError>
    where
        Q: Query,
        H: QueryHandler<Q> + 'static;

    async fn execute<Q>(&self, query: Q) -> QueryResult<Q::Output>
    where
        Q: Query;

    fn cache_key<Q>(&self, query: &Q) -> Result<String, AppError>
    where
        Q: Query,
    {
        crate::query::cache_key(query)
    }
}
