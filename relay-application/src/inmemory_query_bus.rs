use crate::inmemory_command_bus::{BoxAnySend, panic_message};
use crate::{
    context::AppContext, error::AppError, query::Query, query_bus::QueryBus,
    query_handler::QueryHandler, result::QueryResult,
};
use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures_util::FutureExt;
use relay_domain::metrics::{self, Metrics, NoopMetrics};
use std::any::{TypeId, type_name};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;

type QueryHandlerFuture<'a> =
    Pin<Box<dyn Future<Output = Result<BoxAnySend, AppError>> + Send + 'a>>;

type QueryHandlerFn =
    Arc<dyn for<'a> Fn(BoxAnySend, &'a AppContext) -> QueryHandlerFuture<'a> + Send + Sync>;

/// 基于内存的 QueryBus 实现
/// - 通过 TypeId 注册不同 Query 对应的 Handler
/// - 以类型擦除方式调度，并在调用端进行结果还原
pub struct InMemoryQueryBus {
    handlers: DashMap<TypeId, (&'static str, QueryHandlerFn)>,
    metrics: Arc<dyn Metrics>,
}

impl Default for InMemoryQueryBus {
    fn default() -> Self {
        Self::with_metrics(Arc::new(NoopMetrics))
    }
}

impl InMemoryQueryBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_metrics(metrics: Arc<dyn Metrics>) -> Self {
        Self {
            handlers: DashMap::new(),
            metrics,
        }
    }

    pub fn execute_async<Q>(self: &Arc<Self>, query: Q) -> JoinHandle<QueryResult<Q::Output>>
    where
        Q: Query,
    {
        let bus = Arc::clone(self);
        tokio::spawn(async move { bus.execute(query).await })
    }

    /// 获取已注册的查询类型名列表（只读视图）
    pub fn registered_queries(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.handlers.iter().map(|e| e.value().0).collect();
        names.sort_unstable();
        names
    }

    async fn run<Q>(&self, ctx: &AppContext, query: Q) -> Result<Q::Output, AppError>
    where
        Q: Query,
    {
        let Some(f) = self
            .handlers
            .get(&TypeId::of::<Q>())
            .map(|h| h.value().1.clone())
        else {
            return Err(AppError::HandlerNotFound(Q::NAME));
        };

        let out = AssertUnwindSafe((f)(Box::new(query), ctx))
            .catch_unwind()
            .await
            .map_err(|payload| AppError::Panicked(panic_message(payload.as_ref())))??;

        out.downcast::<Q::Output>()
            .map(|v| *v)
            .map_err(|_| AppError::TypeMismatch {
                expected: type_name::<Q::Output>(),
                found: "unknown",
            })
    }
}

#[async_trait]
impl QueryBus for InMemoryQueryBus {
    fn register<Q, H>(&self, handler: Arc<H>) -> Result<(), AppError>
    where
        Q: Query,
        H: QueryHandler<Q> + 'static,
    {
        let f = erase_handler(move |boxed_q, ctx| {
            let handler = handler.clone();

            Box::pin(async move {
                match boxed_q.downcast::<Q>() {
                    Ok(q) => handler
                        .handle(ctx, *q)
                        .await
                        .map(|out| Box::new(out) as BoxAnySend),
                    Err(_) => Err(AppError::TypeMismatch {
                        expected: type_name::<Q>(),
                        found: "unknown",
                    }),
                }
            })
        });

        match self.handlers.entry(TypeId::of::<Q>()) {
            Entry::Occupied(_) => Err(AppError::DuplicateHandler {
                kind: "query",
                name: Q::NAME,
            }),
            Entry::Vacant(slot) => {
                slot.insert((Q::NAME, f));
                tracing::info!(query = Q::NAME, "registered query handler");
                Ok(())
            }
        }
    }

    async fn execute<Q>(&self, query: Q) -> QueryResult<Q::Output>
    where
        Q: Query,
    {
        let started = Instant::now();
        let ctx = AppContext::for_query(&query);
        tracing::debug!(
            query = Q::NAME,
            request_id = %ctx.request_id,
            cache_key = %self.cache_key(&query).unwrap_or_default(),
            "executing query"
        );

        let result = self.run(&ctx, query).await;
        let elapsed = started.elapsed();
        let tags = [
            ("query_type", Q::NAME),
            ("success", if result.is_ok() { "true" } else { "false" }),
        ];
        self.metrics
            .record_duration(metrics::QUERY_EXECUTION, &tags, elapsed);
        self.metrics.increment_counter(metrics::QUERY_COUNT, &tags);

        match &result {
            Ok(_) => tracing::debug!(
                query = Q::NAME,
                elapsed_ms = elapsed.as_millis() as u64,
                "query executed"
            ),
            Err(err) => tracing::error!(
                query = Q::NAME,
                code = err.code(),
                error = %err,
                elapsed_ms = elapsed.as_millis() as u64,
                "failed to execute query"
            ),
        }
        result.into()
    }
}

fn erase_handler<F>(f: F) -> QueryHandlerFn
where
    F: for<'a> Fn(BoxAnySend, &'a AppContext) -> QueryHandlerFuture<'a> + Send + Sync + 'static,
{
    Arc::new(f)
}
