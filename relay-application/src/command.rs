use crate::error::AppError;

// 宏生成的访问器通过此路径引用
pub use relay_domain::message::AsOptionalStr;

/// 未显式指定发起者时使用的身份
pub const DEFAULT_INITIATOR: &str = "SYSTEM";

/// 应用层命令（Command）
///
/// 表达“意图”的写操作请求，通常会修改领域状态。
/// - 每个命令声明自身的 `Output` 类型，由唯一的处理器产出；
/// - `validate` 在分发前调用，失败时处理器不会被执行；
/// - 建议保持语义化的“动宾结构”命名，如 `CreateUser`、`CloseOrder`。
///
/// 关联常量：
/// - `NAME`：命令的稳定名称，用于日志、指标与路由。避免依赖 `type_name::<T>()`。
pub trait Command: Send + Sync + 'static {
    /// 命令的稳定名称（建议常量字符串，不随重构变化）
    const NAME: &'static str;

    /// 执行成功时的返回值类型
    type Output: Send + 'static;

    /// 链路追踪用关联 ID
    fn correlation_id(&self) -> Option<&str> {
        None
    }

    /// 发起者身份
    fn initiator(&self) -> &str {
        DEFAULT_INITIATOR
    }

    /// 分发前的输入校验
    fn validate(&self) -> Result<(), AppError> {
        Ok(())
    }
}
