use super::{DlqMessage, DlqStats};
use crate::broker::{MessageProducer, ProducedRecord};
use crate::classify::{DefaultErrorClassifier, ErrorClassifier};
use crate::error::{RelayError, RelayResult};
use crate::message::CORRELATION_ID_HEADER;
use crate::retry::RetryContext;
use async_trait::async_trait;
use bon::Builder;
use dashmap::DashMap;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

pub const DEFAULT_DLQ_TOPIC_SUFFIX: &str = ".dlq";
pub const ORIGINAL_TOPIC_HEADER: &str = "original-topic";
pub const EXCEPTION_CLASS_HEADER: &str = "exception-class";
pub const ATTEMPT_NUMBER_HEADER: &str = "attempt-number";
pub const REPROCESSED_HEADER: &str = "dlq-reprocessed";
pub const DEFAULT_DLQ_INDEX_CAPACITY: usize = 10_000;

#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    /// 投递到死信；自身失败只记录日志
    async fn send(&self, ctx: &RetryContext, error: &anyhow::Error);

    async fn retrieve(&self, message_id: &str) -> Option<DlqMessage>;

    /// 将死信中的原始载荷重新发布到原主题
    async fn reprocess(&self, message_id: &str) -> RelayResult<()>;

    fn stats(&self) -> DlqStats;
}

/// 经由 `MessageProducer` 投递到 `<topic><suffix>` 的死信实现
#[derive(Builder)]
pub struct BrokerDeadLetterSink {
    producer: Arc<dyn MessageProducer>,
    #[builder(into, default = DEFAULT_DLQ_TOPIC_SUFFIX.to_string())]
    topic_suffix: String,
    #[builder(default = Arc::new(DefaultErrorClassifier::new()) as Arc<dyn ErrorClassifier>)]
    classifier: Arc<dyn ErrorClassifier>,
    /// 索引保留的最多条目数，超出时淘汰最早进入的
    #[builder(default = DEFAULT_DLQ_INDEX_CAPACITY)]
    index_capacity: usize,
    #[builder(skip)]
    index: DashMap<String, DlqMessage>,
    /// 索引键的进入顺序
    #[builder(skip)]
    index_order: Mutex<VecDeque<String>>,
    #[builder(skip)]
    total_messages: AtomicU64,
    #[builder(skip)]
    send_failures: AtomicU64,
    #[builder(skip)]
    reprocessed_successfully: AtomicU64,
    #[builder(skip)]
    reprocessed_failed: AtomicU64,
    #[builder(skip = Instant::now())]
    started_at: Instant,
}

impl BrokerDeadLetterSink {
    pub fn dlq_topic(&self, original_topic: &str) -> String {
        format!("{original_topic}{}", self.topic_suffix)
    }

    fn build_message(&self, ctx: &RetryContext, error: &anyhow::Error) -> DlqMessage {
        let failure_class = self
            .classifier
            .kind(error)
            .map(|k| k.as_str())
            .unwrap_or("unknown");

        DlqMessage::builder()
            .message_id(ctx.event_id())
            .original_topic(ctx.topic())
            .partition(ctx.partition())
            .offset(ctx.offset())
            .attempt_number(ctx.attempt_count())
            .first_attempt_time(ctx.first_attempt_time())
            .last_attempt_time(ctx.last_attempt_time())
            .failure_class(failure_class)
            .failure_message(format!("{error:#}"))
            .stack_trace(format!("{error:?}"))
            .maybe_correlation_id(ctx.correlation_id().map(str::to_string))
            .original_payload(ctx.original_payload().to_vec())
            .build()
    }

    /// 当前索引中的条目数
    pub fn indexed(&self) -> usize {
        self.index.len()
    }

    fn remember(&self, dlq: DlqMessage) {
        let mut order = self.index_order.lock().unwrap_or_else(|e| e.into_inner());
        let id = dlq.message_id.clone();
        if self.index.insert(id.clone(), dlq).is_some() {
            order.retain(|k| *k != id);
        }
        order.push_back(id);

        while order.len() > self.index_capacity.max(1) {
            if let Some(oldest) = order.pop_front() {
                self.index.remove(&oldest);
                tracing::debug!(message_id = %oldest, "evicted dead letter from index");
            }
        }
    }

    fn forget(&self, message_id: &str) {
        let mut order = self.index_order.lock().unwrap_or_else(|e| e.into_inner());
        order.retain(|k| k != message_id);
        self.index.remove(message_id);
    }

    async fn publish(&self, dlq: &DlqMessage) -> RelayResult<String> {
        let topic = self.dlq_topic(&dlq.original_topic);
        let mut headers = HashMap::from([
            (ORIGINAL_TOPIC_HEADER.to_string(), dlq.original_topic.clone()),
            (EXCEPTION_CLASS_HEADER.to_string(), dlq.failure_class.clone()),
            (ATTEMPT_NUMBER_HEADER.to_string(), dlq.attempt_number.to_string()),
        ]);
        if let Some(cid) = &dlq.correlation_id {
            headers.insert(CORRELATION_ID_HEADER.to_string(), cid.clone());
        }

        let record = ProducedRecord::builder()
            .topic(topic.clone())
            .key(dlq.message_id.clone())
            .headers(headers)
            .payload(serde_json::to_vec(dlq)?)
            .build();
        self.producer.send(record).await?;
        Ok(topic)
    }
}

#[async_trait]
impl DeadLetterSink for BrokerDeadLetterSink {
    async fn send(&self, ctx: &RetryContext, error: &anyhow::Error) {
        let dlq = self.build_message(ctx, error);
        tracing::info!(
            message_id = %dlq.message_id,
            topic = %dlq.original_topic,
            attempts = dlq.attempt_number,
            failure_class = %dlq.failure_class,
            "sending message to dead letter topic"
        );

        match self.publish(&dlq).await {
            Ok(topic) => {
                self.total_messages.fetch_add(1, Ordering::Relaxed);
                tracing::info!(message_id = %dlq.message_id, dlq_topic = %topic, "message sent to dead letter topic");
                self.remember(dlq);
            }
            Err(err) => {
                self.send_failures.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    message_id = %dlq.message_id,
                    topic = %dlq.original_topic,
                    error = %err,
                    "failed to send message to dead letter topic"
                );
            }
        }
    }

    async fn retrieve(&self, message_id: &str) -> Option<DlqMessage> {
        tracing::debug!(message_id, "retrieving message from dead letter index");
        self.index.get(message_id).map(|m| m.clone())
    }

    async fn reprocess(&self, message_id: &str) -> RelayResult<()> {
        tracing::info!(message_id, "reprocessing message from dead letter");
        let dlq = self
            .retrieve(message_id)
            .await
            .ok_or_else(|| RelayError::NotFound {
                reason: format!("dead letter message {message_id}"),
            })?;

        let mut headers = HashMap::from([(REPROCESSED_HEADER.to_string(), "true".to_string())]);
        if let Some(cid) = &dlq.correlation_id {
            headers.insert(CORRELATION_ID_HEADER.to_string(), cid.clone());
        }
        let record = ProducedRecord::builder()
            .topic(dlq.original_topic.clone())
            .partition(dlq.partition)
            .key(dlq.message_id.clone())
            .headers(headers)
            .payload(dlq.original_payload.clone())
            .build();

        match self.producer.send(record).await {
            Ok(()) => {
                self.reprocessed_successfully.fetch_add(1, Ordering::Relaxed);
                self.forget(message_id);
                tracing::info!(message_id, topic = %dlq.original_topic, "dead letter message republished");
                Ok(())
            }
            Err(err) => {
                self.reprocessed_failed.fetch_add(1, Ordering::Relaxed);
                tracing::error!(message_id, error = %err, "dead letter reprocess failed");
                Err(RelayError::DeadLetter {
                    reason: format!("reprocess {message_id}: {err}"),
                })
            }
        }
    }

    fn stats(&self) -> DlqStats {
        let total = self.total_messages.load(Ordering::Relaxed);
        let elapsed = self.started_at.elapsed().as_secs_f64();
        DlqStats {
            total_messages: total,
            send_failures: self.send_failures.load(Ordering::Relaxed),
            reprocessed_successfully: self.reprocessed_successfully.load(Ordering::Relaxed),
            reprocessed_failed: self.reprocessed_failed.load(Ordering::Relaxed),
            messages_per_second: if elapsed > 0.0 {
                total as f64 / elapsed
            } else {
                0.0
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::InMemoryBroker;
    use crate::classify::HandlerError;
    use crate::message::InboundMessage;

    fn ctx(payload: &[u8]) -> RetryContext {
        let msg = InboundMessage::builder()
            .topic("orders")
            .partition(0)
            .offset(3)
            .payload(payload.to_vec())
            .build();
        let mut ctx = RetryContext::new("e-1", Some("cor-1".into()), &msg);
        ctx.increment_attempt();
        ctx.increment_attempt();
        ctx
    }

    #[tokio::test]
    async fn send_publishes_to_suffixed_topic_with_headers() {
        let broker = Arc::new(InMemoryBroker::default());
        let sink = BrokerDeadLetterSink::builder().producer(broker.clone()).build();
        let err = anyhow::Error::new(HandlerError::timeout("db")).context("handling order");

        sink.send(&ctx(b"\x00\xffraw"), &err).await;

        let records = broker.records("orders.dlq");
        assert_eq!(records.len(), 1);
        let rec = &records[0];
        assert_eq!(rec.key(), Some("e-1"));
        assert_eq!(rec.header(ORIGINAL_TOPIC_HEADER), Some("orders"));
        assert_eq!(rec.header(EXCEPTION_CLASS_HEADER), Some("timeout"));
        assert_eq!(rec.header(ATTEMPT_NUMBER_HEADER), Some("2"));

        let decoded: DlqMessage = serde_json::from_slice(rec.payload()).unwrap();
        assert_eq!(decoded.original_payload, b"\x00\xffraw");
        assert_eq!(decoded.correlation_id.as_deref(), Some("cor-1"));
        assert_eq!(decoded.offset, 3);
        assert!(decoded.stack_trace.contains("db"));
        assert!(decoded.failure_message.starts_with("handling order: "));
        assert!(decoded.failure_message.contains("db"));
        assert_eq!(sink.stats().total_messages, 1);
        assert_eq!(sink.retrieve("e-1").await, Some(decoded));
    }

    #[tokio::test]
    async fn send_failure_is_swallowed_and_counted() {
        let broker = Arc::new(InMemoryBroker::default());
        broker.fail_topic("orders.dlq", "unavailable");
        let sink = BrokerDeadLetterSink::builder()
            .producer(broker.clone())
            .build();

        sink.send(&ctx(b"{}"), &anyhow::anyhow!("boom")).await;

        let stats = sink.stats();
        assert_eq!(stats.total_messages, 0);
        assert_eq!(stats.send_failures, 1);
        assert!(sink.retrieve("e-1").await.is_none());
    }

    #[tokio::test]
    async fn reprocess_republishes_original_payload() {
        let broker = Arc::new(InMemoryBroker::default());
        let sink = BrokerDeadLetterSink::builder()
            .producer(broker.clone())
            .topic_suffix("-dead")
            .build();
        sink.send(&ctx(br#"{"id":"e-1"}"#), &anyhow::anyhow!("boom"))
            .await;
        assert_eq!(broker.records("orders-dead").len(), 1);

        sink.reprocess("e-1").await.unwrap();
        assert!(sink.retrieve("e-1").await.is_none());
        assert_eq!(sink.indexed(), 0);
        let replayed = broker.records("orders");
        assert_eq!(replayed.len(), 1);
        assert_eq!(replayed[0].payload(), br#"{"id":"e-1"}"#);
        assert_eq!(replayed[0].header(REPROCESSED_HEADER), Some("true"));
        assert_eq!(replayed[0].correlation_id(), Some("cor-1"));
        assert_eq!(sink.stats().reprocessed_successfully, 1);

        assert!(matches!(
            sink.reprocess("missing").await,
            Err(RelayError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn reprocess_failure_is_counted() {
        let broker = Arc::new(InMemoryBroker::default());
        let sink = BrokerDeadLetterSink::builder().producer(broker.clone()).build();
        sink.send(&ctx(b"{}"), &anyhow::anyhow!("boom")).await;
        broker.fail_topic("orders", "down");

        assert!(sink.reprocess("e-1").await.is_err());
        assert_eq!(sink.stats().reprocessed_failed, 1);
        assert!(sink.retrieve("e-1").await.is_some());
    }

    fn ctx_for(event_id: &str) -> RetryContext {
        let msg = InboundMessage::builder()
            .topic("orders")
            .partition(0)
            .offset(0)
            .payload(b"{}".to_vec())
            .build();
        let mut ctx = RetryContext::new(event_id, None, &msg);
        ctx.increment_attempt();
        ctx
    }

    #[tokio::test]
    async fn index_evicts_oldest_beyond_capacity() {
        let broker = Arc::new(InMemoryBroker::default());
        let sink = BrokerDeadLetterSink::builder()
            .producer(broker.clone())
            .index_capacity(2)
            .build();

        for id in ["e-1", "e-2", "e-3"] {
            sink.send(&ctx_for(id), &anyhow::anyhow!("boom")).await;
        }
        assert_eq!(sink.indexed(), 2);
        assert!(sink.retrieve("e-1").await.is_none());
        assert!(sink.retrieve("e-3").await.is_some());

        // 重复投递刷新位置，不占用额外容量
        sink.send(&ctx_for("e-2"), &anyhow::anyhow!("again")).await;
        sink.send(&ctx_for("e-4"), &anyhow::anyhow!("boom")).await;
        assert_eq!(sink.indexed(), 2);
        assert!(sink.retrieve("e-3").await.is_none());
        assert!(sink.retrieve("e-2").await.is_some());
        assert_eq!(broker.records("orders.dlq").len(), 5);
        assert_eq!(sink.stats().total_messages, 5);
    }
}
