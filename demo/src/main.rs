use async_trait::async_trait;
use relay_application::command_bus::CommandBus;
use relay_application::command_handler::CommandHandler;
use relay_application::context::AppContext;
use relay_application::error::AppError;
use relay_application::query_bus::QueryBus;
use relay_application::query_handler::QueryHandler;
use relay_application::{InMemoryCommandBus, InMemoryQueryBus};
use relay_domain::broker::InMemoryBroker;
use relay_domain::circuit_breaker::CircuitBreakerService;
use relay_domain::classify::HandlerError;
use relay_domain::config::{RelayConfig, load_config};
use relay_domain::consumer::{ConsumerEngine, EventConsumer, EventHandler};
use relay_domain::dead_letter::{BrokerDeadLetterSink, DeadLetterSink};
use relay_domain::metrics::{InMemoryMetrics, Metrics, NoopMetrics, PrefixedMetrics};
use relay_domain::retry::{RetryPolicy, RetryStrategy};
use relay_macros::{command, identifiable, query};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const ORDERS_TOPIC: &str = "orders";

#[identifiable(id = order_id, correlation_id = correlation_id, event_type = "order.placed")]
#[derive(Debug, Clone, Serialize, Deserialize)]
struct OrderPlaced {
    order_id: String,
    sku: String,
    quantity: u32,
    correlation_id: Option<String>,
}

/// 库存：首次预留超时一次，未知 SKU 直接失败
#[derive(Default)]
struct Inventory {
    stock: Mutex<HashMap<String, u32>>,
    reserved: Mutex<HashMap<String, String>>,
    warmed_up: AtomicBool,
}

impl Inventory {
    fn restock(&self, sku: &str, quantity: u32) {
        let mut stock = self.stock.lock().unwrap_or_else(|e| e.into_inner());
        *stock.entry(sku.to_string()).or_default() += quantity;
    }

    fn reserve(&self, order_id: &str, sku: &str, quantity: u32) -> anyhow::Result<()> {
        if !self.warmed_up.swap(true, Ordering::SeqCst) {
            return Err(HandlerError::timeout("inventory service did not answer in time").into());
        }

        let mut stock = self.stock.lock().unwrap_or_else(|e| e.into_inner());
        let Some(available) = stock.get_mut(sku) else {
            return Err(HandlerError::not_found(format!("unknown sku {sku}")).into());
        };
        if *available < quantity {
            return Err(HandlerError::validation(format!("only {available} of {sku} left")).into());
        }
        *available -= quantity;
        self.reserved
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(order_id.to_string(), sku.to_string());
        Ok(())
    }

    fn status(&self, order_id: &str) -> Option<String> {
        self.reserved
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(order_id)
            .map(|sku| format!("reserved {sku}"))
    }
}

struct ReserveStock {
    inventory: Arc<Inventory>,
    breakers: Arc<CircuitBreakerService>,
}

#[async_trait]
impl EventHandler<OrderPlaced> for ReserveStock {
    fn handler_name(&self) -> &str {
        "reserve-stock"
    }

    async fn handle(&self, event: &OrderPlaced) -> anyhow::Result<()> {
        self.breakers.call("inventory", || {
            self.inventory
                .reserve(&event.order_id, &event.sku, event.quantity)
        })
    }
}

#[command(output = String, correlation_id = correlation_id, validate = check_place_order)]
struct PlaceOrder {
    sku: String,
    quantity: u32,
    correlation_id: Option<String>,
}

fn check_place_order(cmd: &PlaceOrder) -> Result<(), AppError> {
    if cmd.sku.trim().is_empty() {
        return Err(AppError::validation("sku must not be empty"));
    }
    if cmd.quantity == 0 {
        return Err(AppError::validation("quantity must be positive"));
    }
    Ok(())
}

struct PlaceOrderHandler {
    broker: Arc<InMemoryBroker>,
}

#[async_trait]
impl CommandHandler<PlaceOrder> for PlaceOrderHandler {
    async fn handle(&self, ctx: &AppContext, cmd: PlaceOrder) -> Result<String, AppError> {
        let event = OrderPlaced {
            order_id: uuid::Uuid::new_v4().to_string(),
            sku: cmd.sku,
            quantity: cmd.quantity,
            correlation_id: ctx.correlation_id.clone(),
        };
        self.broker
            .publish(
                ORDERS_TOPIC,
                Some(event.order_id.as_str()),
                HashMap::new(),
                serde_json::to_vec(&event)?,
            )
            .await
            .map_err(anyhow::Error::from)?;
        Ok(event.order_id)
    }
}

#[query(output = Option<String>)]
struct OrderStatus {
    order_id: String,
}

struct OrderStatusHandler {
    inventory: Arc<Inventory>,
}

#[async_trait]
impl QueryHandler<OrderStatus> for OrderStatusHandler {
    async fn handle(&self, _ctx: &AppContext, q: OrderStatus) -> Result<Option<String>, AppError> {
        Ok(self.inventory.status(&q.order_id))
    }
}

async fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    cond()
}

fn load() -> anyhow::Result<RelayConfig> {
    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("RELAY_CONFIG").ok())
        .map(PathBuf::from);
    match path {
        Some(path) => Ok(load_config(&path)?),
        None => Ok(RelayConfig::default()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("relay_domain=info".parse()?))
        .init();

    let config = load()?;
    let recorder = Arc::new(InMemoryMetrics::new());
    let metrics: Arc<dyn Metrics> = if config.monitoring.enabled {
        Arc::new(PrefixedMetrics::new(
            config.monitoring.metrics_prefix.clone(),
            recorder.clone(),
        ))
    } else {
        Arc::new(NoopMetrics)
    };

    let broker = Arc::new(InMemoryBroker::new(2));
    let (breaker_defaults, overrides) = config.circuit_breakers()?;
    let breakers = Arc::new(
        CircuitBreakerService::builder()
            .default_config(breaker_defaults)
            .overrides(overrides)
            .classifier(Arc::new(config.classifier()))
            .metrics(metrics.clone())
            .build(),
    );
    let dead_letter = Arc::new(
        BrokerDeadLetterSink::builder()
            .producer(broker.clone())
            .topic_suffix(config.retry.dlq_topic_suffix.clone())
            .index_capacity(config.retry.dlq_index_capacity)
            .classifier(Arc::new(config.classifier()))
            .build(),
    );

    let inventory = Arc::new(Inventory::default());
    inventory.restock("sku-1", 10);

    let consumer = Arc::new(
        EventConsumer::<OrderPlaced>::builder()
            .handler(Arc::new(ReserveStock {
                inventory: inventory.clone(),
                breakers: breakers.clone(),
            }))
            .retry(
                RetryStrategy::builder()
                    .classifier(Arc::new(config.classifier()))
                    .metrics(metrics.clone())
                    .build(),
            )
            .policy(Arc::new(RetryPolicy::try_from(&config.retry)?))
            .dead_letter(dead_letter.clone())
            .metrics(metrics.clone())
            .build(),
    );
    let engine = Arc::new(
        ConsumerEngine::builder()
            .source(broker.clone())
            .consumer(consumer.clone())
            .topics(vec![ORDERS_TOPIC.to_string()])
            .config(config.engine())
            .build(),
    );
    let handle = engine.start();

    let commands = InMemoryCommandBus::with_metrics(metrics.clone());
    commands.register::<PlaceOrder, _>(Arc::new(PlaceOrderHandler {
        broker: broker.clone(),
    }))?;
    let queries = InMemoryQueryBus::with_metrics(metrics.clone());
    queries.register::<OrderStatus, _>(Arc::new(OrderStatusHandler {
        inventory: inventory.clone(),
    }))?;

    let requests = [("sku-1", 2), ("sku-1", 3), ("sku-404", 1), ("sku-1", 0)];
    let mut placed = Vec::new();
    for (i, (sku, quantity)) in requests.into_iter().enumerate() {
        let result = commands
            .execute(PlaceOrder {
                sku: sku.to_string(),
                quantity,
                correlation_id: Some(format!("checkout-{i}")),
            })
            .await;
        match result.into_value() {
            Some(order_id) => placed.push(order_id),
            None => tracing::warn!(sku, quantity, "order rejected"),
        }
    }

    let settled = wait_until(|| {
        let s = consumer.stats().snapshot();
        s.processed + s.dead_lettered == placed.len() as u64
    })
    .await;
    if !settled {
        tracing::warn!("orders did not settle in time");
    }

    for order_id in &placed {
        let status = queries
            .execute(OrderStatus {
                order_id: order_id.clone(),
            })
            .await;
        tracing::info!(order_id = %order_id, status = ?status.value(), "order status");
    }

    // 补货后重放死信
    inventory.restock("sku-404", 5);
    for order_id in &placed {
        if let Some(dlq) = dead_letter.retrieve(order_id).await {
            tracing::info!(
                order_id = %order_id,
                failure_class = %dlq.failure_class,
                attempts = dlq.attempt_number,
                "replaying dead letter"
            );
            dead_letter.reprocess(order_id).await?;
        }
    }
    wait_until(|| consumer.stats().snapshot().processed == placed.len() as u64).await;

    let stats = consumer.stats().snapshot();
    tracing::info!(
        processed = stats.processed,
        failed = stats.failed,
        dead_lettered = stats.dead_lettered,
        failure_rate = stats.failure_rate(),
        "consumer stats"
    );
    tracing::info!(stats = ?dead_letter.stats(), "dead letter stats");
    tracing::info!(
        state = %breakers.state("inventory"),
        metrics = ?breakers.metrics("inventory"),
        "inventory circuit"
    );
    tracing::info!(series = ?recorder.names(), "metrics recorded");

    handle.shutdown();
    handle.join().await;
    Ok(())
}
