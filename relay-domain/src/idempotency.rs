//! 幂等存储（IdempotencyStore）
//!
//! 记录已成功处理的事件 ID，用于在重复投递时跳过处理。
//! 标记在处理成功之后写入，因此并发重复投递仍可能各处理一次，
//! 处理器自身需保持幂等。
//!
use crate::error::RelayResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    async fn is_processed(&self, event_id: &str) -> RelayResult<bool>;

    /// 插入已处理标记；已存在时返回 `false`
    async fn mark_processed(&self, event_id: &str) -> RelayResult<bool>;
}

/// 进程内幂等存储
#[derive(Debug, Default)]
pub struct InMemoryIdempotencyStore {
    processed: DashMap<String, DateTime<Utc>>,
}

impl InMemoryIdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn processed_at(&self, event_id: &str) -> Option<DateTime<Utc>> {
        self.processed.get(event_id).map(|v| *v)
    }

    pub fn len(&self) -> usize {
        self.processed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processed.is_empty()
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn is_processed(&self, event_id: &str) -> RelayResult<bool> {
        Ok(self.processed.contains_key(event_id))
    }

    async fn mark_processed(&self, event_id: &str) -> RelayResult<bool> {
        match self.processed.entry(event_id.to_string()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(v) => {
                v.insert(Utc::now());
                Ok(true)
            }
        }
    }
}
