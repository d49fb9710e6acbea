//! 消息中间件协议（broker）
//!
//! 定义消费与生产两侧的最小接口，不绑定具体传输：
//! - `MessageSource`：订阅主题，返回 `'static` 投递流，便于在 `tokio::spawn` 中消费；
//! - `Acknowledgment`：确认（提交位点）或延迟重投；
//! - `MessageProducer`：发布记录（死信、重放均经由此接口）。
//!
//! `InMemoryBroker` 为进程内实现，按主题/分区维护日志与已提交位点，
//! 支持故障注入，典型用途：测试、示例与本地开发。
//!
use crate::error::{RelayError, RelayResult};
use crate::message::InboundMessage;
use async_trait::async_trait;
use bon::Builder;
use dashmap::DashMap;
use futures_core::stream::BoxStream;
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// 待发布的记录
#[derive(Debug, Clone, Builder, PartialEq, Eq)]
pub struct ProducedRecord {
    #[builder(into)]
    pub topic: String,
    /// 指定分区；缺省时按键哈希选择
    pub partition: Option<i32>,
    #[builder(into)]
    pub key: Option<String>,
    #[builder(default)]
    pub headers: HashMap<String, String>,
    #[builder(into)]
    pub payload: Vec<u8>,
}

#[async_trait]
pub trait MessageProducer: Send + Sync {
    async fn send(&self, record: ProducedRecord) -> RelayResult<()>;
}

/// 单条投递的确认句柄
#[async_trait]
pub trait Acknowledgment: Send + Sync {
    /// 确认并提交位点
    async fn acknowledge(&self) -> RelayResult<()>;

    /// 不确认，延迟后重新投递同一条消息
    async fn nack(&self, delay: Duration) -> RelayResult<()>;
}

/// 一次投递：消息 + 确认句柄
#[derive(Clone)]
pub struct Delivery {
    pub message: InboundMessage,
    pub ack: Arc<dyn Acknowledgment>,
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("message", &self.message)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait MessageSource: Send + Sync {
    async fn subscribe(&self, topics: &[String]) -> RelayResult<BoxStream<'static, Delivery>>;
}

type Subscriber = (HashSet<String>, mpsc::UnboundedSender<Delivery>);

/// 分区提交进度：只有连续确认的位点才推进 `next`
#[derive(Debug, Default)]
struct CommitState {
    next: i64,
    /// 已确认但前面仍有空洞的位点
    pending: BTreeSet<i64>,
}

impl CommitState {
    fn ack(&mut self, offset: i64) {
        if offset < self.next {
            return;
        }
        self.pending.insert(offset);
        while self.pending.remove(&self.next) {
            self.next += 1;
        }
    }
}

#[derive(Default)]
struct Shared {
    partitions: i32,
    logs: DashMap<(String, i32), Vec<InboundMessage>>,
    committed: DashMap<(String, i32), CommitState>,
    subscribers: Mutex<Vec<Subscriber>>,
    failing: DashMap<String, String>,
}

impl Shared {
    fn dispatch(self: &Arc<Self>, message: InboundMessage) {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        subscribers.retain(|(_, tx)| !tx.is_closed());

        for (topics, tx) in subscribers.iter() {
            if !topics.contains(message.topic()) {
                continue;
            }
            let ack = InMemoryAck {
                shared: Arc::downgrade(self),
                message: message.clone(),
            };
            let _ = tx.send(Delivery {
                message: message.clone(),
                ack: Arc::new(ack),
            });
        }
    }

    fn select_partition(&self, record: &ProducedRecord) -> i32 {
        if let Some(p) = record.partition {
            return p;
        }
        match &record.key {
            Some(key) if self.partitions > 1 => {
                let mut hasher = DefaultHasher::new();
                key.hash(&mut hasher);
                (hasher.finish() % self.partitions as u64) as i32
            }
            _ => 0,
        }
    }
}

/// 进程内消息中间件
#[derive(Clone)]
pub struct InMemoryBroker {
    shared: Arc<Shared>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new(1)
    }
}

impl InMemoryBroker {
    /// `partitions` 为每个主题的分区数（至少 1）
    pub fn new(partitions: i32) -> Self {
        Self {
            shared: Arc::new(Shared {
                partitions: partitions.max(1),
                ..Default::default()
            }),
        }
    }

    /// 便捷发布
    pub async fn publish(
        &self,
        topic: &str,
        key: Option<&str>,
        headers: HashMap<String, String>,
        payload: impl Into<Vec<u8>>,
    ) -> RelayResult<()> {
        let record = ProducedRecord::builder()
            .topic(topic)
            .maybe_key(key.map(str::to_string))
            .headers(headers)
            .payload(payload)
            .build();
        self.send(record).await
    }

    /// 主题下全部分区的记录（按分区、位点排序）
    pub fn records(&self, topic: &str) -> Vec<InboundMessage> {
        let mut out: Vec<InboundMessage> = self
            .shared
            .logs
            .iter()
            .filter(|e| e.key().0 == topic)
            .flat_map(|e| e.value().clone())
            .collect();
        out.sort_by_key(|m| (m.partition(), m.offset()));
        out
    }

    /// 已提交位点（下一条待消费的位点）；乱序确认不会越过尚未确认的位点
    pub fn committed_offset(&self, topic: &str, partition: i32) -> Option<i64> {
        self.shared
            .committed
            .get(&(topic.to_string(), partition))
            .map(|state| state.next)
            .filter(|next| *next > 0)
    }

    /// 故障注入：之后向该主题的发布均失败
    pub fn fail_topic(&self, topic: &str, reason: impl Into<String>) {
        self.shared.failing.insert(topic.to_string(), reason.into());
    }

    pub fn heal_topic(&self, topic: &str) {
        self.shared.failing.remove(topic);
    }
}

#[async_trait]
impl MessageProducer for InMemoryBroker {
    async fn send(&self, record: ProducedRecord) -> RelayResult<()> {
        if let Some(reason) = self.shared.failing.get(&record.topic) {
            return Err(RelayError::broker(format!(
                "publish to {} failed: {}",
                record.topic,
                reason.value()
            )));
        }

        let partition = self.shared.select_partition(&record);
        let message = {
            let mut log = self
                .shared
                .logs
                .entry((record.topic.clone(), partition))
                .or_default();
            let offset = log.len() as i64;
            let message = InboundMessage::builder()
                .topic(record.topic)
                .partition(partition)
                .offset(offset)
                .maybe_key(record.key)
                .headers(record.headers)
                .payload(record.payload)
                .build();
            log.push(message.clone());
            message
        };

        self.shared.dispatch(message);
        Ok(())
    }
}

#[async_trait]
impl MessageSource for InMemoryBroker {
    async fn subscribe(&self, topics: &[String]) -> RelayResult<BoxStream<'static, Delivery>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let topics: HashSet<String> = topics.iter().cloned().collect();

        // 先回放尚未提交的记录，再接收新消息
        let mut backlog: Vec<InboundMessage> = self
            .shared
            .logs
            .iter()
            .filter(|e| topics.contains(&e.key().0))
            .flat_map(|e| {
                let from = self.committed_offset(&e.key().0, e.key().1).unwrap_or(0);
                e.value()
                    .iter()
                    .filter(|m| m.offset() >= from)
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect();
        backlog.sort_by_key(|m| (m.partition(), m.offset()));

        for message in backlog {
            let ack = InMemoryAck {
                shared: Arc::downgrade(&self.shared),
                message: message.clone(),
            };
            let _ = tx.send(Delivery {
                message,
                ack: Arc::new(ack),
            });
        }

        self.shared
            .subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((topics, tx));

        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }
}

struct InMemoryAck {
    shared: Weak<Shared>,
    message: InboundMessage,
}

#[async_trait]
impl Acknowledgment for InMemoryAck {
    async fn acknowledge(&self) -> RelayResult<()> {
        let shared = self
            .shared
            .upgrade()
            .ok_or_else(|| RelayError::broker("broker dropped"))?;
        let key = (self.message.topic().to_string(), self.message.partition());
        shared
            .committed
            .entry(key)
            .or_default()
            .ack(self.message.offset());
        Ok(())
    }

    async fn nack(&self, delay: Duration) -> RelayResult<()> {
        let shared = self
            .shared
            .upgrade()
            .ok_or_else(|| RelayError::broker("broker dropped"))?;
        let message = self.message.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            shared.dispatch(message);
        });
        Ok(())
    }
}
