use super::{EventHandler, EventProcessingStats};
use crate::broker::Acknowledgment;
use crate::dead_letter::DeadLetterSink;
use crate::error::RelayError;
use crate::idempotency::{IdempotencyStore, InMemoryIdempotencyStore};
use crate::message::{Identifiable, InboundMessage, content_event_id};
use crate::metrics::{self, Metrics, NoopMetrics};
use crate::retry::{RetryContext, RetryError, RetryPolicy, RetryStrategy};
use async_trait::async_trait;
use bon::Builder;
use serde::de::DeserializeOwned;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// 单条消息的终态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// 处理成功并确认
    Processed,
    /// 已处理过，直接确认
    Skipped,
    /// 已投递死信并确认
    DeadLettered,
    /// 死信关闭时的永久失败：记录错误后确认丢弃
    Discarded,
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Disposition::Processed => "processed",
            Disposition::Skipped => "skipped",
            Disposition::DeadLettered => "dead_lettered",
            Disposition::Discarded => "discarded",
        };
        f.write_str(s)
    }
}

/// 未确认的结果：消息应由中间件重新投递
#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("event {event_id} left unacknowledged for redelivery: {error:#}")]
    Redelivery {
        event_id: String,
        error: anyhow::Error,
    },

    #[error("processing of event {event_id} interrupted by shutdown")]
    Interrupted { event_id: String },

    #[error("acknowledgment failed: {0}")]
    Acknowledgment(#[from] RelayError),
}

/// 类型擦除后的消费入口，供 `ConsumerEngine` 驱动
#[async_trait]
pub trait MessageConsumer: Send + Sync {
    fn name(&self) -> &str;

    /// 共享的关闭令牌：取消后中断退避等待
    fn shutdown_token(&self) -> &CancellationToken;

    async fn consume(
        &self,
        message: &InboundMessage,
        ack: &dyn Acknowledgment,
    ) -> Result<Disposition, ConsumerError>;
}

/// 事件消费者：幂等检查 → 重试处理 → 确认 / 死信 / 重投 → 指标
#[derive(Builder)]
pub struct EventConsumer<E> {
    handler: Arc<dyn EventHandler<E>>,
    #[builder(default)]
    retry: RetryStrategy,
    #[builder(default = Arc::new(RetryPolicy::default()))]
    policy: Arc<RetryPolicy>,
    dead_letter: Arc<dyn DeadLetterSink>,
    #[builder(default = Arc::new(InMemoryIdempotencyStore::new()) as Arc<dyn IdempotencyStore>)]
    idempotency: Arc<dyn IdempotencyStore>,
    #[builder(default = Arc::new(NoopMetrics) as Arc<dyn Metrics>)]
    metrics: Arc<dyn Metrics>,
    #[builder(default)]
    stats: Arc<EventProcessingStats>,
    #[builder(default)]
    shutdown: CancellationToken,
}

impl<E> EventConsumer<E>
where
    E: Identifiable + DeserializeOwned + Send + Sync + 'static,
{
    pub fn stats(&self) -> &Arc<EventProcessingStats> {
        &self.stats
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// 处理一条投递
    pub async fn handle(
        &self,
        message: &InboundMessage,
        ack: &dyn Acknowledgment,
    ) -> Result<Disposition, ConsumerError> {
        let started = Instant::now();

        let event: E = match serde_json::from_slice(message.payload()) {
            Ok(event) => event,
            Err(err) => return self.reject_undecodable(message, ack, err, started).await,
        };

        let event_id = event
            .event_id()
            .map(str::to_string)
            .unwrap_or_else(|| content_event_id(message.payload()));
        let correlation_id = event
            .correlation_id()
            .or_else(|| message.correlation_id())
            .map(str::to_string);
        let event_type = event.event_type().to_string();
        let tags = [
            ("topic", message.topic()),
            ("event_type", event_type.as_str()),
        ];

        tracing::info!(
            event_type = %event_type,
            topic = %message.topic(),
            partition = message.partition(),
            offset = message.offset(),
            event_id = %event_id,
            "received event"
        );
        self.metrics.increment_counter(metrics::EVENTS_CONSUMED, &tags);

        match self.idempotency.is_processed(&event_id).await {
            Ok(true) => {
                tracing::debug!(event_id = %event_id, "event already processed, skipping");
                self.stats.record_skipped();
                self.metrics.increment_counter(metrics::EVENTS_SKIPPED, &tags);
                ack.acknowledge().await?;
                return Ok(Disposition::Skipped);
            }
            Ok(false) => {}
            Err(err) => {
                tracing::warn!(event_id = %event_id, error = %err, "idempotency check failed, processing anyway");
            }
        }

        let mut ctx = RetryContext::new(event_id.clone(), correlation_id, message);
        let handler = self.handler.as_ref();
        let event = &event;
        let outcome = self
            .retry
            .execute(
                move || handler.handle(event),
                &self.policy,
                &mut ctx,
                &self.shutdown,
            )
            .await;

        let disposition = match outcome {
            Ok(()) => {
                if let Err(err) = self.idempotency.mark_processed(&event_id).await {
                    tracing::warn!(event_id = %event_id, error = %err, "failed to mark event processed");
                }
                self.stats.record_processed();
                ack.acknowledge().await?;
                tracing::info!(
                    event_id = %event_id,
                    handler = %handler.handler_name(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "event processed successfully"
                );
                Disposition::Processed
            }
            Err(RetryError::Cancelled { attempts, .. }) => {
                tracing::info!(
                    event_id = %event_id,
                    attempts,
                    "shutdown during retry, leaving message unacknowledged"
                );
                return Err(ConsumerError::Interrupted { event_id });
            }
            Err(retry_err) => {
                let exhausted = retry_err.is_exhausted();
                let attempts = retry_err.attempts();
                let error = retry_err
                    .into_error()
                    .unwrap_or_else(|| anyhow::anyhow!("retry ended without an error"));

                tracing::error!(
                    event_id = %event_id,
                    attempts,
                    error = %format!("{error:#}"),
                    "failed to process event"
                );
                self.stats.record_failed();
                self.metrics.increment_counter(metrics::EVENTS_FAILED, &tags);

                match self.settle_failure(&ctx, &error, exhausted, ack, &tags).await? {
                    Some(disposition) => disposition,
                    None => {
                        self.record_elapsed(&tags, started);
                        return Err(ConsumerError::Redelivery { event_id, error });
                    }
                }
            }
        };

        self.record_elapsed(&tags, started);
        Ok(disposition)
    }

    /// 失败终态：死信并确认、丢弃并确认，或返回 `None` 交由中间件重投
    async fn settle_failure(
        &self,
        ctx: &RetryContext,
        error: &anyhow::Error,
        exhausted: bool,
        ack: &dyn Acknowledgment,
        tags: &[(&str, &str)],
    ) -> Result<Option<Disposition>, ConsumerError> {
        if self.policy.enable_dlq() {
            tracing::error!(event_id = %ctx.event_id(), attempts = ctx.attempt_count(), "routing event to dead letter");
            self.dead_letter.send(ctx, error).await;
            self.stats.record_dead_lettered();
            self.metrics.increment_counter(metrics::DLQ_MESSAGES, tags);
            ack.acknowledge().await?;
            return Ok(Some(Disposition::DeadLettered));
        }

        if exhausted {
            tracing::warn!(
                event_id = %ctx.event_id(),
                "retries exhausted with dead letter disabled, propagating for redelivery"
            );
            return Ok(None);
        }

        tracing::error!(
            event_id = %ctx.event_id(),
            error = %format!("{error:#}"),
            "permanent failure with dead letter disabled, discarding event"
        );
        ack.acknowledge().await?;
        Ok(Some(Disposition::Discarded))
    }

    /// 载荷无法反序列化：视为永久失败，不调用处理器
    async fn reject_undecodable(
        &self,
        message: &InboundMessage,
        ack: &dyn Acknowledgment,
        err: serde_json::Error,
        started: Instant,
    ) -> Result<Disposition, ConsumerError> {
        let event_id = content_event_id(message.payload());
        let tags = [("topic", message.topic()), ("event_type", "undecodable")];
        tracing::error!(
            topic = %message.topic(),
            partition = message.partition(),
            offset = message.offset(),
            event_id = %event_id,
            error = %err,
            "failed to deserialize event payload"
        );
        self.metrics.increment_counter(metrics::EVENTS_CONSUMED, &tags);
        self.metrics.increment_counter(metrics::EVENTS_FAILED, &tags);
        self.stats.record_failed();

        let mut ctx = RetryContext::new(
            event_id,
            message.correlation_id().map(str::to_string),
            message,
        );
        ctx.increment_attempt();
        let error = anyhow::Error::new(err).context("payload deserialization failed");
        ctx.record_error(format!("{error:#}"));

        let disposition = self
            .settle_failure(&ctx, &error, false, ack, &tags)
            .await?
            .unwrap_or(Disposition::Discarded);
        self.record_elapsed(&tags, started);
        Ok(disposition)
    }

    fn record_elapsed(&self, tags: &[(&str, &str)], started: Instant) {
        self.metrics
            .record_duration(metrics::EVENTS_PROCESSING_TIME, tags, started.elapsed());
    }
}

#[async_trait]
impl<E> MessageConsumer for EventConsumer<E>
where
    E: Identifiable + DeserializeOwned + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        self.handler.handler_name()
    }

    fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    async fn consume(
        &self,
        message: &InboundMessage,
        ack: &dyn Acknowledgment,
    ) -> Result<Disposition, ConsumerError> {
        self.handle(message, ack).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{InMemoryBroker, MessageSource};
    use crate::classify::HandlerError;
    use crate::dead_letter::BrokerDeadLetterSink;
    use crate::error::RelayResult;
    use crate::metrics::InMemoryMetrics;
    use serde::Deserialize;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::time::Duration;

    #[derive(Debug, Deserialize)]
    struct OrderPlaced {
        id: Option<String>,
    }

    impl Identifiable for OrderPlaced {
        fn event_id(&self) -> Option<&str> {
            self.id.as_deref()
        }
    }

    struct CountingHandler {
        calls: AtomicU32,
        fail_times: u32,
    }

    #[async_trait]
    impl EventHandler<OrderPlaced> for CountingHandler {
        fn handler_name(&self) -> &str {
            "counting"
        }

        async fn handle(&self, _event: &OrderPlaced) -> anyhow::Result<()> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_times {
                return Err(HandlerError::timeout("downstream").into());
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingAck {
        acked: AtomicBool,
    }

    #[async_trait]
    impl Acknowledgment for RecordingAck {
        async fn acknowledge(&self) -> RelayResult<()> {
            self.acked.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn nack(&self, _delay: Duration) -> RelayResult<()> {
            Ok(())
        }
    }

    fn message(payload: &[u8]) -> InboundMessage {
        InboundMessage::builder()
            .topic("orders")
            .partition(0)
            .offset(0)
            .payload(payload.to_vec())
            .build()
    }

    fn policy(enable_dlq: bool) -> Arc<RetryPolicy> {
        Arc::new(
            RetryPolicy::builder()
                .max_attempts(2)
                .initial_backoff(Duration::from_millis(10))
                .jitter_factor(0.0)
                .enable_dlq(enable_dlq)
                .build()
                .unwrap(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_event_is_skipped() {
        let handler = Arc::new(CountingHandler {
            calls: AtomicU32::new(0),
            fail_times: 0,
        });
        let broker = Arc::new(InMemoryBroker::default());
        let consumer = EventConsumer::<OrderPlaced>::builder()
            .handler(handler.clone())
            .dead_letter(Arc::new(BrokerDeadLetterSink::builder().producer(broker).build()))
            .build();

        let msg = message(br#"{"id":"o-1"}"#);
        let ack = RecordingAck::default();
        assert_eq!(consumer.handle(&msg, &ack).await.unwrap(), Disposition::Processed);
        let ack = RecordingAck::default();
        assert_eq!(consumer.handle(&msg, &ack).await.unwrap(), Disposition::Skipped);
        assert!(ack.acked.load(Ordering::SeqCst));
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert_eq!(consumer.stats().snapshot().skipped, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_id_falls_back_to_content_hash() {
        let handler = Arc::new(CountingHandler {
            calls: AtomicU32::new(0),
            fail_times: 0,
        });
        let broker = Arc::new(InMemoryBroker::default());
        let idempotency = Arc::new(InMemoryIdempotencyStore::new());
        let consumer = EventConsumer::<OrderPlaced>::builder()
            .handler(handler)
            .dead_letter(Arc::new(BrokerDeadLetterSink::builder().producer(broker).build()))
            .idempotency(idempotency.clone())
            .build();

        let payload = br#"{"id":null}"#;
        consumer
            .handle(&message(payload), &RecordingAck::default())
            .await
            .unwrap();
        assert!(idempotency.processed_at(&content_event_id(payload)).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn dlq_disabled_exhausted_failure_is_not_acknowledged() {
        let handler = Arc::new(CountingHandler {
            calls: AtomicU32::new(0),
            fail_times: u32::MAX,
        });
        let broker = Arc::new(InMemoryBroker::default());
        let consumer = EventConsumer::<OrderPlaced>::builder()
            .handler(handler.clone())
            .policy(policy(false))
            .dead_letter(Arc::new(
                BrokerDeadLetterSink::builder().producer(broker.clone()).build(),
            ))
            .build();

        let ack = RecordingAck::default();
        let err = consumer
            .handle(&message(br#"{"id":"o-2"}"#), &ack)
            .await
            .unwrap_err();
        assert!(matches!(err, ConsumerError::Redelivery { .. }));
        assert!(!ack.acked.load(Ordering::SeqCst));
        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
        assert!(broker.records("orders.dlq").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn dlq_disabled_undecodable_payload_is_discarded() {
        let handler = Arc::new(CountingHandler {
            calls: AtomicU32::new(0),
            fail_times: 0,
        });
        let broker = Arc::new(InMemoryBroker::default());
        let consumer = EventConsumer::<OrderPlaced>::builder()
            .handler(handler.clone())
            .policy(policy(false))
            .dead_letter(Arc::new(
                BrokerDeadLetterSink::builder().producer(broker.clone()).build(),
            ))
            .build();

        let ack = RecordingAck::default();
        let disposition = consumer.handle(&message(b"not json"), &ack).await.unwrap();
        assert_eq!(disposition, Disposition::Discarded);
        assert!(ack.acked.load(Ordering::SeqCst));
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn metrics_are_tagged_by_topic_and_event_type() {
        let handler = Arc::new(CountingHandler {
            calls: AtomicU32::new(0),
            fail_times: 0,
        });
        let broker = Arc::new(InMemoryBroker::default());
        let recorder = Arc::new(InMemoryMetrics::new());
        let consumer = EventConsumer::<OrderPlaced>::builder()
            .handler(handler)
            .dead_letter(Arc::new(BrokerDeadLetterSink::builder().producer(broker).build()))
            .metrics(recorder.clone())
            .build();

        consumer
            .handle(&message(br#"{"id":"o-3"}"#), &RecordingAck::default())
            .await
            .unwrap();

        let tags = [("topic", "orders"), ("event_type", "OrderPlaced")];
        assert_eq!(recorder.counter(metrics::EVENTS_CONSUMED, &tags), 1);
        assert_eq!(recorder.timer_count(metrics::EVENTS_PROCESSING_TIME, &tags), 1);
        assert_eq!(recorder.counter(metrics::EVENTS_FAILED, &tags), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn works_against_broker_deliveries() {
        use futures_util::StreamExt;

        let handler = Arc::new(CountingHandler {
            calls: AtomicU32::new(0),
            fail_times: 0,
        });
        let broker = Arc::new(InMemoryBroker::default());
        let consumer = EventConsumer::<OrderPlaced>::builder()
            .handler(handler)
            .dead_letter(Arc::new(
                BrokerDeadLetterSink::builder().producer(broker.clone()).build(),
            ))
            .build();

        let mut stream = broker.subscribe(&["orders".to_string()]).await.unwrap();
        broker
            .publish("orders", None, Default::default(), br#"{"id":"o-4"}"#.to_vec())
            .await
            .unwrap();
        let delivery = stream.next().await.unwrap();
        consumer
            .consume(&delivery.message, delivery.ack.as_ref())
            .await
            .unwrap();
        assert_eq!(broker.committed_offset("orders", 0), Some(1));
    }
}
