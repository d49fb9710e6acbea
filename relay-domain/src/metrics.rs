//! 指标协议（Metrics）
//!
//! 只定义计数、耗时与仪表三类最小接口，由上层注入具体后端；
//! 内置 `NoopMetrics`（关闭监控时使用）、`InMemoryMetrics`（测试与演示）
//! 以及为指标名统一加前缀的 `PrefixedMetrics`。
//!
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;

pub const EVENTS_CONSUMED: &str = "events.consumed";
pub const EVENTS_FAILED: &str = "events.failed";
pub const EVENTS_SKIPPED: &str = "events.skipped";
pub const EVENTS_PROCESSING_TIME: &str = "events.processing.time";
pub const RETRY_ATTEMPTS: &str = "retry.attempts";
pub const DLQ_MESSAGES: &str = "dlq.messages";
pub const CIRCUIT_BREAKER_STATE: &str = "circuit_breaker.state";
pub const CIRCUIT_BREAKER_NOT_PERMITTED: &str = "circuit_breaker.not_permitted";
pub const COMMAND_EXECUTION: &str = "command.execution";
pub const COMMAND_COUNT: &str = "command.count";
pub const QUERY_EXECUTION: &str = "query.execution";
pub const QUERY_COUNT: &str = "query.count";

/// 默认指标前缀
pub const DEFAULT_METRICS_PREFIX: &str = "relay";

pub type Tags<'a> = &'a [(&'a str, &'a str)];

pub trait Metrics: Send + Sync {
    fn increment_counter(&self, name: &str, tags: Tags<'_>);

    fn record_duration(&self, name: &str, tags: Tags<'_>, elapsed: Duration);

    fn set_gauge(&self, name: &str, tags: Tags<'_>, value: f64);
}

/// 丢弃所有指标
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl Metrics for NoopMetrics {
    fn increment_counter(&self, _name: &str, _tags: Tags<'_>) {}

    fn record_duration(&self, _name: &str, _tags: Tags<'_>, _elapsed: Duration) {}

    fn set_gauge(&self, _name: &str, _tags: Tags<'_>, _value: f64) {}
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SeriesKey {
    name: String,
    tags: Vec<(String, String)>,
}

impl SeriesKey {
    fn new(name: &str, tags: Tags<'_>) -> Self {
        let mut tags: Vec<(String, String)> = tags
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        tags.sort();
        Self {
            name: name.to_string(),
            tags,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct TimerStat {
    count: u64,
    total: Duration,
}

/// 进程内指标记录，按（名称，排序后的标签）聚合
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    counters: DashMap<SeriesKey, u64>,
    timers: DashMap<SeriesKey, TimerStat>,
    gauges: DashMap<SeriesKey, f64>,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counter(&self, name: &str, tags: Tags<'_>) -> u64 {
        self.counters
            .get(&SeriesKey::new(name, tags))
            .map(|v| *v)
            .unwrap_or(0)
    }

    /// 名称下所有标签组合的计数之和
    pub fn counter_total(&self, name: &str) -> u64 {
        self.counters
            .iter()
            .filter(|e| e.key().name == name)
            .map(|e| *e.value())
            .sum()
    }

    pub fn timer_count(&self, name: &str, tags: Tags<'_>) -> u64 {
        self.timers
            .get(&SeriesKey::new(name, tags))
            .map(|v| v.count)
            .unwrap_or(0)
    }

    pub fn timer_total(&self, name: &str, tags: Tags<'_>) -> Duration {
        self.timers
            .get(&SeriesKey::new(name, tags))
            .map(|v| v.total)
            .unwrap_or_default()
    }

    pub fn gauge(&self, name: &str, tags: Tags<'_>) -> Option<f64> {
        self.gauges.get(&SeriesKey::new(name, tags)).map(|v| *v)
    }

    /// 已记录的指标名（去重、排序）
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .counters
            .iter()
            .map(|e| e.key().name.clone())
            .chain(self.timers.iter().map(|e| e.key().name.clone()))
            .chain(self.gauges.iter().map(|e| e.key().name.clone()))
            .collect();
        names.sort();
        names.dedup();
        names
    }
}

impl Metrics for InMemoryMetrics {
    fn increment_counter(&self, name: &str, tags: Tags<'_>) {
        *self.counters.entry(SeriesKey::new(name, tags)).or_insert(0) += 1;
    }

    fn record_duration(&self, name: &str, tags: Tags<'_>, elapsed: Duration) {
        let mut stat = self.timers.entry(SeriesKey::new(name, tags)).or_default();
        stat.count += 1;
        stat.total += elapsed;
    }

    fn set_gauge(&self, name: &str, tags: Tags<'_>, value: f64) {
        self.gauges.insert(SeriesKey::new(name, tags), value);
    }
}

/// 为所有指标名加上 `<prefix>.` 前缀后转发
pub struct PrefixedMetrics {
    prefix: String,
    inner: Arc<dyn Metrics>,
}

impl PrefixedMetrics {
    pub fn new(prefix: impl Into<String>, inner: Arc<dyn Metrics>) -> Self {
        Self {
            prefix: prefix.into(),
            inner,
        }
    }

    fn full_name(&self, name: &str) -> String {
        if self.prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}.{}", self.prefix, name)
        }
    }
}

impl Metrics for PrefixedMetrics {
    fn increment_counter(&self, name: &str, tags: Tags<'_>) {
        self.inner.increment_counter(&self.full_name(name), tags);
    }

    fn record_duration(&self, name: &str, tags: Tags<'_>, elapsed: Duration) {
        self.inner
            .record_duration(&self.full_name(name), tags, elapsed);
    }

    fn set_gauge(&self, name: &str, tags: Tags<'_>, value: f64) {
        self.inner.set_gauge(&self.full_name(name), tags, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_are_keyed_by_sorted_tags() {
        let m = InMemoryMetrics::new();
        m.increment_counter(EVENTS_CONSUMED, &[("topic", "orders"), ("status", "success")]);
        m.increment_counter(EVENTS_CONSUMED, &[("status", "success"), ("topic", "orders")]);
        m.increment_counter(EVENTS_CONSUMED, &[("topic", "payments")]);

        assert_eq!(
            m.counter(EVENTS_CONSUMED, &[("topic", "orders"), ("status", "success")]),
            2
        );
        assert_eq!(m.counter_total(EVENTS_CONSUMED), 3);
        assert_eq!(m.counter(EVENTS_FAILED, &[]), 0);
    }

    #[test]
    fn timers_and_gauges() {
        let m = InMemoryMetrics::new();
        m.record_duration(COMMAND_EXECUTION, &[], Duration::from_millis(5));
        m.record_duration(COMMAND_EXECUTION, &[], Duration::from_millis(7));
        m.set_gauge(CIRCUIT_BREAKER_STATE, &[("service", "db")], 1.0);

        assert_eq!(m.timer_count(COMMAND_EXECUTION, &[]), 2);
        assert_eq!(m.timer_total(COMMAND_EXECUTION, &[]), Duration::from_millis(12));
        assert_eq!(m.gauge(CIRCUIT_BREAKER_STATE, &[("service", "db")]), Some(1.0));
    }

    #[test]
    fn prefixed_metrics_rename_series() {
        let inner = Arc::new(InMemoryMetrics::new());
        let m = PrefixedMetrics::new(DEFAULT_METRICS_PREFIX, inner.clone());
        m.increment_counter(DLQ_MESSAGES, &[]);
        assert_eq!(inner.counter("relay.dlq.messages", &[]), 1);
        assert_eq!(inner.names(), vec!["relay.dlq.messages".to_string()]);
    }
}
