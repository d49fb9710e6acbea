//! 消费引擎（ConsumerEngine）
//!
//! 统一编排“订阅 → 按分区分发 → 逐条消费”的长驻任务：
//! - 订阅消息源的投递流；
//! - 每个（主题，分区）一个工作任务，分区内串行以保持位点顺序；
//! - 需重投的消息按配置延迟 `nack`；
//! - 提供关闭与等待的 `EngineHandle`，关闭会中断进行中的退避等待。
//!
use super::{ConsumerError, MessageConsumer};
use crate::broker::{Delivery, MessageSource};
use bon::Builder;
use futures_util::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Builder)]
pub struct ConsumerEngine {
    source: Arc<dyn MessageSource>,
    consumer: Arc<dyn MessageConsumer>,
    topics: Vec<String>,
    #[builder(default)]
    config: ConsumerEngineConfig,
}

impl ConsumerEngine {
    /// 启动消费引擎，返回可用于关闭/等待的句柄
    pub fn start(self: Arc<Self>) -> EngineHandle {
        let token = self.consumer.shutdown_token().clone();
        let dispatcher = tokio::spawn(Self::dispatch_loop(self.clone(), token.clone()));

        EngineHandle {
            token,
            tasks: vec![dispatcher],
        }
    }

    async fn dispatch_loop(self: Arc<Self>, token: CancellationToken) {
        let mut stream = match self.source.subscribe(&self.topics).await {
            Ok(stream) => stream,
            Err(err) => {
                tracing::error!(topics = ?self.topics, error = %err, "failed to subscribe");
                return;
            }
        };
        tracing::info!(consumer = %self.consumer.name(), topics = ?self.topics, "consumer engine started");

        let mut workers: HashMap<(String, i32), (mpsc::Sender<Delivery>, JoinHandle<()>)> =
            HashMap::new();

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    break;
                }
                maybe_delivery = stream.next() => {
                    let Some(delivery) = maybe_delivery else {
                        break;
                    };
                    let key = (
                        delivery.message.topic().to_string(),
                        delivery.message.partition(),
                    );
                    let (tx, _) = workers
                        .entry(key)
                        .or_insert_with_key(|(topic, partition)| self.spawn_worker(topic, *partition, token.clone()));
                    if tx.send(delivery).await.is_err() {
                        tracing::warn!("partition worker stopped, dropping delivery");
                    }
                }
            }
        }

        let handles: Vec<JoinHandle<()>> = workers.into_values().map(|(_, handle)| handle).collect();
        for handle in handles {
            let _ = handle.await;
        }
        tracing::info!(consumer = %self.consumer.name(), "consumer engine stopped");
    }

    fn spawn_worker(
        &self,
        topic: &str,
        partition: i32,
        token: CancellationToken,
    ) -> (mpsc::Sender<Delivery>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(self.config.partition_buffer.max(1));
        tracing::debug!(topic, partition, "starting partition worker");
        let handle = tokio::spawn(Self::partition_loop(
            self.consumer.clone(),
            rx,
            token,
            self.config.redelivery_delay,
        ));
        (tx, handle)
    }

    async fn partition_loop(
        consumer: Arc<dyn MessageConsumer>,
        mut rx: mpsc::Receiver<Delivery>,
        token: CancellationToken,
        redelivery_delay: Duration,
    ) {
        loop {
            let delivery = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                next = rx.recv() => match next {
                    Some(delivery) => delivery,
                    None => break,
                },
            };

            match consumer
                .consume(&delivery.message, delivery.ack.as_ref())
                .await
            {
                Ok(disposition) => {
                    tracing::debug!(
                        topic = %delivery.message.topic(),
                        partition = delivery.message.partition(),
                        offset = delivery.message.offset(),
                        %disposition,
                        "delivery settled"
                    );
                }
                Err(ConsumerError::Redelivery { event_id, .. }) => {
                    tracing::warn!(event_id = %event_id, delay_ms = redelivery_delay.as_millis() as u64, "scheduling redelivery");
                    if let Err(err) = delivery.ack.nack(redelivery_delay).await {
                        tracing::error!(event_id = %event_id, error = %err, "failed to request redelivery");
                    }
                }
                Err(ConsumerError::Interrupted { event_id }) => {
                    tracing::info!(event_id = %event_id, "partition worker interrupted");
                    break;
                }
                Err(err) => {
                    tracing::error!(error = %err, "delivery could not be settled");
                }
            }
        }
    }
}

/// 消费引擎配置
#[derive(Clone, Copy, Debug)]
pub struct ConsumerEngineConfig {
    /// 未确认消息重新投递前的等待
    pub redelivery_delay: Duration,
    /// 每个分区工作任务的缓冲容量
    pub partition_buffer: usize,
}

impl Default for ConsumerEngineConfig {
    fn default() -> Self {
        Self {
            redelivery_delay: Duration::from_secs(1),
            partition_buffer: 64,
        }
    }
}

/// 引擎运行句柄：用于优雅关闭与等待任务结束
pub struct EngineHandle {
    token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl EngineHandle {
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn join(mut self) {
        let tasks = std::mem::take(&mut self.tasks);

        for t in tasks {
            let _ = t.await;
        }
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{Acknowledgment, InMemoryBroker};
    use crate::consumer::Disposition;
    use crate::message::InboundMessage;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        token: CancellationToken,
        offsets: Mutex<Vec<(i32, i64)>>,
    }

    #[async_trait]
    impl MessageConsumer for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        fn shutdown_token(&self) -> &CancellationToken {
            &self.token
        }

        async fn consume(
            &self,
            message: &InboundMessage,
            ack: &dyn Acknowledgment,
        ) -> Result<Disposition, ConsumerError> {
            self.offsets
                .lock()
                .unwrap()
                .push((message.partition(), message.offset()));
            ack.acknowledge().await?;
            Ok(Disposition::Processed)
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn partition_order_is_preserved_and_shutdown_stops_engine() {
        let broker = Arc::new(InMemoryBroker::new(3));
        let recorder = Arc::new(Recorder::default());
        let engine = Arc::new(
            ConsumerEngine::builder()
                .source(broker.clone())
                .consumer(recorder.clone())
                .topics(vec!["orders".to_string()])
                .build(),
        );
        let handle = engine.start();

        for i in 0..30 {
            let key = format!("k-{}", i % 5);
            broker
                .publish("orders", Some(key.as_str()), Default::default(), vec![i as u8])
                .await
                .unwrap();
        }

        for _ in 0..200 {
            if recorder.offsets.lock().unwrap().len() == 30 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let offsets = recorder.offsets.lock().unwrap().clone();
        assert_eq!(offsets.len(), 30);
        for partition in 0..3 {
            let seen: Vec<i64> = offsets
                .iter()
                .filter(|(p, _)| *p == partition)
                .map(|(_, o)| *o)
                .collect();
            let mut sorted = seen.clone();
            sorted.sort_unstable();
            assert_eq!(seen, sorted, "partition {partition} delivered out of order");
        }

        handle.shutdown();
        assert!(recorder.token.is_cancelled());
        tokio::time::timeout(Duration::from_secs(1), handle.join())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn dropping_handle_cancels_consumer_token() {
        let broker = Arc::new(InMemoryBroker::default());
        let recorder = Arc::new(Recorder::default());
        let engine = Arc::new(
            ConsumerEngine::builder()
                .source(broker)
                .consumer(recorder.clone())
                .topics(vec!["orders".to_string()])
                .build(),
        );

        drop(engine.start());
        assert!(recorder.token.is_cancelled());
    }
}
