use crate::{
    command::Command, command_bus::CommandBus, command_handler::CommandHandler,
    context::AppContext, error::AppError, result::CommandResult,
};
use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures_util::FutureExt;
use relay_domain::metrics::{self, Metrics, NoopMetrics};
use std::any::{Any, TypeId, type_name};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;

pub(crate) type BoxAnySend = Box<dyn Any + Send>;

type CmdHandlerFuture<'a> = Pin<Box<dyn Future<Output = Result<BoxAnySend, AppError>> + Send + 'a>>;

type CmdHandlerFn =
    Arc<dyn for<'a> Fn(BoxAnySend, &'a AppContext) -> CmdHandlerFuture<'a> + Send + Sync>;

/// 基于内存的 CommandBus 实现
/// - 通过 TypeId 注册不同 Command 对应的 Handler，同一类型只允许注册一次
/// - 运行时以类型擦除（Any）方式进行调度，处理器 panic 被捕获为失败结果
pub struct InMemoryCommandBus {
    handlers: DashMap<TypeId, (&'static str, CmdHandlerFn)>,
    metrics: Arc<dyn Metrics>,
}

impl Default for InMemoryCommandBus {
    fn default() -> Self {
        Self::with_metrics(Arc::new(NoopMetrics))
    }
}

impl InMemoryCommandBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_metrics(metrics: Arc<dyn Metrics>) -> Self {
        Self {
            handlers: DashMap::new(),
            metrics,
        }
    }

    /// 在 tokio 运行时上执行同一路径，返回任务句柄
    pub fn execute_async<C>(self: &Arc<Self>, cmd: C) -> JoinHandle<CommandResult<C::Output>>
    where
        C: Command,
    {
        let bus = Arc::clone(self);
        tokio::spawn(async move { bus.execute(cmd).await })
    }

    /// 已注册的命令名（排序）
    pub fn registered_commands(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.handlers.iter().map(|e| e.value().0).collect();
        names.sort_unstable();
        names
    }

    async fn run<C>(&self, ctx: &AppContext, cmd: C) -> Result<C::Output, AppError>
    where
        C: Command,
    {
        cmd.validate().map_err(|err| match err {
            AppError::Validation(_) => err,
            other => AppError::Validation(other.to_string()),
        })?;

        let Some(f) = self
            .handlers
            .get(&TypeId::of::<C>())
            .map(|h| h.value().1.clone())
        else {
            return Err(AppError::HandlerNotFound(C::NAME));
        };

        let out = AssertUnwindSafe((f)(Box::new(cmd), ctx))
            .catch_unwind()
            .await
            .map_err(|payload| AppError::Panicked(panic_message(payload.as_ref())))??;

        out.downcast::<C::Output>()
            .map(|v| *v)
            .map_err(|_| AppError::TypeMismatch {
                expected: type_name::<C::Output>(),
                found: "unknown",
            })
    }
}

#[async_trait]
impl CommandBus for InMemoryCommandBus {
    fn register<C, H>(&self, handler: Arc<H>) -> Result<(), AppError>
    where
        C: Command,
        H: CommandHandler<C> + 'static,
    {
        let f = erase_handler(move |boxed_cmd, ctx| {
            let handler = handler.clone();

            Box::pin(async move {
                // 键与闭包同一泛型 C，正常情况下 downcast 不会失败
                match boxed_cmd.downcast::<C>() {
                    Ok(cmd) => handler
                        .handle(ctx, *cmd)
                        .await
                        .map(|out| Box::new(out) as BoxAnySend),
                    Err(_) => Err(AppError::TypeMismatch {
                        expected: C::NAME,
                        found: "unknown",
                    }),
                }
            })
        });

        match self.handlers.entry(TypeId::of::<C>()) {
            Entry::Occupied(_) => Err(AppError::DuplicateHandler {
                kind: "command",
                name: C::NAME,
            }),
            Entry::Vacant(slot) => {
                slot.insert((C::NAME, f));
                tracing::info!(command = C::NAME, "registered command handler");
                Ok(())
            }
        }
    }

    async fn execute<C>(&self, cmd: C) -> CommandResult<C::Output>
    where
        C: Command,
    {
        let started = Instant::now();
        let ctx = AppContext::for_command(&cmd);
        tracing::info!(
            command = C::NAME,
            request_id = %ctx.request_id,
            correlation_id = ?ctx.correlation_id,
            initiator = %ctx.initiator,
            "executing command"
        );

        let result = self.run(&ctx, cmd).await;
        let elapsed = started.elapsed();
        let tags = [
            ("command_type", C::NAME),
            ("success", if result.is_ok() { "true" } else { "false" }),
        ];
        self.metrics
            .record_duration(metrics::COMMAND_EXECUTION, &tags, elapsed);
        self.metrics.increment_counter(metrics::COMMAND_COUNT, &tags);

        match &result {
            Ok(_) => tracing::info!(
                command = C::NAME,
                elapsed_ms = elapsed.as_millis() as u64,
                "command executed"
            ),
            Err(err) => tracing::error!(
                command = C::NAME,
                code = err.code(),
                error = %err,
                elapsed_ms = elapsed.as_millis() as u64,
                "failed to execute command"
            ),
        }
        result.into()
    }
}

fn erase_handler<F>(f: F) -> CmdHandlerFn
where
    F: for<'a> Fn(BoxAnySend, &'a AppContext) -> CmdHandlerFuture<'a> + Send + Sync + 'static,
{
    Arc::new(f)
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
