use crate::{
    command::Command, command_handler::CommandHandler, error::AppError, result::CommandResult,
};
use async_trait::async_trait;
use std::sync::Arc;

/// 命令总线（Command Bus）
///
/// - 每种命令类型恰好一个处理器，重复注册在注册时即失败；
/// - `execute` 从不向调用方传播处理器错误，统一转换为 `CommandResult::Failure`；
/// - 该 trait 带有泛型方法，通常以具体实现类型注入使用。
#[async_trait]
pub trait CommandBus: Send + Sync {
    fn register<C, H>(&self, handler: Arc<H>) -> Result<(), AppError>
    where
        C: Command,
        H: CommandHandler<C> + 'static;

    /// 校验 → 路由 → 执行
    async fn execute<C>(&self, cmd: C) -> CommandResult<C::Output>
    where
        C: Command;
}
