use anyhow::Result as AnyResult;
use relay_domain::broker::InMemoryBroker;
use relay_domain::circuit_breaker::{CircuitBreakerConfig, CircuitBreakerService, CircuitState};
use relay_domain::classify::HandlerError;
use relay_domain::consumer::{ConsumerEngine, ConsumerEngineConfig, EventConsumer, EventHandler};
use relay_domain::dead_letter::{BrokerDeadLetterSink, DeadLetterSink, DlqMessage};
use relay_domain::metrics::{self, InMemoryMetrics};
use relay_domain::retry::RetryPolicy;
use relay_macros::identifiable;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[identifiable(id = shipment_id, event_type = "shipment.dispatched")]
#[derive(Debug, Clone, Deserialize)]
struct ShipmentDispatched {
    shipment_id: String,
    carrier: String,
}

/// 首次处理每个 shipment 时超时，之后成功
#[derive(Default)]
struct FlakyCarrier {
    seen: Mutex<HashSet<String>>,
    handled: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

#[async_trait::async_trait]
impl EventHandler<ShipmentDispatched> for FlakyCarrier {
    fn handler_name(&self) -> &str {
        "flaky-carrier"
    }

    async fn handle(&self, event: &ShipmentDispatched) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let first_time = self.seen.lock().unwrap().insert(event.shipment_id.clone());
        if first_time {
            return Err(HandlerError::timeout(format!("{} did not answer", event.carrier)).into());
        }
        self.handled.lock().unwrap().push(event.shipment_id.clone());
        Ok(())
    }
}

async fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}

fn shipment(id: &str) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({ "shipment_id": id, "carrier": "acme" })).unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn engine_redelivers_until_processed_when_dead_letter_disabled() -> AnyResult<()> {
    let broker = Arc::new(InMemoryBroker::new(2));
    let handler = Arc::new(FlakyCarrier::default());
    let recorder = Arc::new(InMemoryMetrics::new());

    let consumer = Arc::new(
        EventConsumer::<ShipmentDispatched>::builder()
            .handler(handler.clone())
            .policy(Arc::new(
                RetryPolicy::builder()
                    .max_attempts(1)
                    .enable_dlq(false)
                    .build()?,
            ))
            .dead_letter(Arc::new(
                BrokerDeadLetterSink::builder()
                    .producer(broker.clone())
                    .build(),
            ))
            .metrics(recorder.clone())
            .shutdown(CancellationToken::new())
            .build(),
    );

    let engine = Arc::new(
        ConsumerEngine::builder()
            .source(broker.clone())
            .consumer(consumer.clone())
            .topics(vec!["shipments".to_string()])
            .config(ConsumerEngineConfig {
                redelivery_delay: Duration::from_millis(20),
                partition_buffer: 8,
            })
            .build(),
    );
    let handle = engine.start();

    for id in ["s-1", "s-2", "s-3", "s-4"] {
        broker
            .publish("shipments", Some(id), HashMap::new(), shipment(id))
            .await?;
    }

    let committed = || -> i64 {
        (0..2)
            .filter_map(|p| broker.committed_offset("shipments", p))
            .sum()
    };
    let all_handled =
        wait_until(|| handler.handled.lock().unwrap().len() == 4 && committed() == 4).await;
    assert!(all_handled, "every shipment should eventually be handled");
    assert_eq!(handler.calls.load(Ordering::SeqCst), 8);
    assert!(broker.records("shipments.dlq").is_empty());

    let snapshot = consumer.stats().snapshot();
    assert_eq!(snapshot.processed, 4);
    assert_eq!(snapshot.failed, 4);
    assert_eq!(snapshot.dead_lettered, 0);
    assert_eq!(
        recorder.counter_total(metrics::EVENTS_CONSUMED),
        8,
        "each redelivery is consumed again"
    );

    handle.shutdown();
    assert!(handle.is_shutdown());
    tokio::time::timeout(Duration::from_secs(2), handle.join()).await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn open_circuit_fails_fast_and_routes_to_dead_letter() -> AnyResult<()> {
    #[identifiable(id = shipment_id)]
    #[derive(Debug, Deserialize)]
    struct LabelRequested {
        shipment_id: String,
    }

    struct LabelPrinter {
        breakers: Arc<CircuitBreakerService>,
        downstream_calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl EventHandler<LabelRequested> for LabelPrinter {
        fn handler_name(&self) -> &str {
            "label-printer"
        }

        async fn handle(&self, _event: &LabelRequested) -> anyhow::Result<()> {
            self.breakers
                .call_async("printer", async {
                    self.downstream_calls.fetch_add(1, Ordering::SeqCst);
                    Err(HandlerError::network("printer offline").into())
                })
                .await
        }
    }

    let broker = Arc::new(InMemoryBroker::default());
    let breakers = Arc::new(
        CircuitBreakerService::builder()
            .default_config(
                CircuitBreakerConfig::builder()
                    .sliding_window_size(2)
                    .minimum_number_of_calls(2)
                    .wait_duration_in_open_state(Duration::from_secs(60))
                    .build(),
            )
            .build(),
    );
    let handler = Arc::new(LabelPrinter {
        breakers: breakers.clone(),
        downstream_calls: AtomicUsize::new(0),
    });
    let sink = Arc::new(
        BrokerDeadLetterSink::builder()
            .producer(broker.clone())
            .build(),
    );
    let consumer = EventConsumer::<LabelRequested>::builder()
        .handler(handler.clone())
        .policy(Arc::new(
            RetryPolicy::builder()
                .max_attempts(3)
                .initial_backoff(Duration::from_millis(1))
                .max_backoff(Duration::from_millis(5))
                .build()?,
        ))
        .dead_letter(sink.clone())
        .build();

    let engine = Arc::new(
        ConsumerEngine::builder()
            .source(broker.clone())
            .consumer(Arc::new(consumer))
            .topics(vec!["labels".to_string()])
            .build(),
    );
    let handle = engine.start();

    broker
        .publish(
            "labels",
            None,
            HashMap::new(),
            serde_json::to_vec(&serde_json::json!({ "shipment_id": "s-9" }))?,
        )
        .await?;

    assert!(wait_until(|| sink.stats().total_messages == 1).await);
    assert_eq!(breakers.state("printer"), CircuitState::Open);
    // 第三次尝试被熔断拒绝，未触达下游
    assert_eq!(handler.downstream_calls.load(Ordering::SeqCst), 2);

    let dlq: DlqMessage = serde_json::from_slice(broker.records("labels.dlq")[0].payload())?;
    assert_eq!(dlq.attempt_number, 3);
    assert_eq!(dlq.failure_class, "circuit_open");
    let breaker_metrics = breakers.metrics("printer").expect("breaker registered");
    assert_eq!(breaker_metrics.not_permitted_calls, 1);

    handle.shutdown();
    handle.join().await;
    Ok(())
}
