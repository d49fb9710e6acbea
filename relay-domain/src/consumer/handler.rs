use async_trait::async_trait;

/// 事件处理器：处理一种反序列化后的事件载荷
///
/// 同一事件可能被投递多次（至少一次语义），实现需保证幂等。
#[async_trait]
pub trait EventHandler<E>: Send + Sync {
    /// 处理器名称（用于日志与指标）
    fn handler_name(&self) -> &str;

    /// 处理事件；失败时返回的错误将交由错误分类决定是否重试
    async fn handle(&self, event: &E) -> anyhow::Result<()>;
}
