//! 配置（RelayConfig）
//!
//! 从 TOML 加载重试、熔断、消费与监控参数；所有字段均有默认值，
//! 缺省的节或键按默认处理。加载后经 `TryFrom` 转换为经校验的运行时配置。
//!
//! ```toml
//! [retry]
//! max_attempts = 5
//! initial_backoff_ms = 200
//! non_retryable = ["validation", "duplicate"]
//!
//! [circuit_breaker]
//! wait_duration_in_open_state_ms = 5000
//!
//! # 只覆盖阈值，其余键沿用 [circuit_breaker]
//! [circuit_breaker.services.payments]
//! failure_rate_threshold = 25.0
//! ```
//!
use crate::circuit_breaker::CircuitBreakerConfig;
use crate::classify::{DefaultErrorClassifier, ErrorKind};
use crate::consumer::ConsumerEngineConfig;
use crate::dead_letter::{DEFAULT_DLQ_INDEX_CAPACITY, DEFAULT_DLQ_TOPIC_SUFFIX};
use crate::error::{RelayError, RelayResult};
use crate::metrics::DEFAULT_METRICS_PREFIX;
use crate::retry::RetryPolicy;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RelayConfig {
    pub retry: RetrySection,
    pub circuit_breaker: CircuitBreakerSection,
    pub consumer: ConsumerSection,
    pub monitoring: MonitoringSection,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrySection {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter_factor: f64,
    pub enable_dlq: bool,
    pub dlq_topic_suffix: String,
    /// 死信索引保留的最多条目数
    pub dlq_index_capacity: usize,
    pub retryable: Vec<ErrorKind>,
    pub non_retryable: Vec<ErrorKind>,
    /// 无法识别的错误是否按可重试处理
    pub unknown_is_retryable: bool,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 300_000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
            enable_dlq: true,
            dlq_topic_suffix: DEFAULT_DLQ_TOPIC_SUFFIX.to_string(),
            dlq_index_capacity: DEFAULT_DLQ_INDEX_CAPACITY,
            retryable: Vec::new(),
            non_retryable: Vec::new(),
            unknown_is_retryable: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BreakerSettings {
    pub failure_rate_threshold: f64,
    pub sliding_window_size: usize,
    pub minimum_number_of_calls: usize,
    pub wait_duration_in_open_state_ms: u64,
    pub permitted_calls_in_half_open: u32,
    pub ignored: Vec<ErrorKind>,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        let defaults = CircuitBreakerConfig::default();
        Self {
            failure_rate_threshold: defaults.failure_rate_threshold,
            sliding_window_size: defaults.sliding_window_size,
            minimum_number_of_calls: defaults.minimum_number_of_calls,
            wait_duration_in_open_state_ms: defaults.wait_duration_in_open_state.as_millis()
                as u64,
            permitted_calls_in_half_open: defaults.permitted_calls_in_half_open,
            ignored: defaults.ignored_kinds,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerSection {
    #[serde(flatten)]
    pub defaults: BreakerSettings,
    /// 按服务名覆盖；未给出的键沿用本节的值
    pub services: HashMap<String, BreakerOverride>,
}

/// 单个服务的熔断覆盖项
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BreakerOverride {
    pub failure_rate_threshold: Option<f64>,
    pub sliding_window_size: Option<usize>,
    pub minimum_number_of_calls: Option<usize>,
    pub wait_duration_in_open_state_ms: Option<u64>,
    pub permitted_calls_in_half_open: Option<u32>,
    pub ignored: Option<Vec<ErrorKind>>,
}

impl BreakerOverride {
    /// 覆盖到基础配置之上
    pub fn apply(&self, base: &BreakerSettings) -> BreakerSettings {
        BreakerSettings {
            failure_rate_threshold: self
                .failure_rate_threshold
                .unwrap_or(base.failure_rate_threshold),
            sliding_window_size: self.sliding_window_size.unwrap_or(base.sliding_window_size),
            minimum_number_of_calls: self
                .minimum_number_of_calls
                .unwrap_or(base.minimum_number_of_calls),
            wait_duration_in_open_state_ms: self
                .wait_duration_in_open_state_ms
                .unwrap_or(base.wait_duration_in_open_state_ms),
            permitted_calls_in_half_open: self
                .permitted_calls_in_half_open
                .unwrap_or(base.permitted_calls_in_half_open),
            ignored: self.ignored.clone().unwrap_or_else(|| base.ignored.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConsumerSection {
    pub redelivery_delay_ms: u64,
    pub partition_buffer: usize,
}

impl Default for ConsumerSection {
    fn default() -> Self {
        let defaults = ConsumerEngineConfig::default();
        Self {
            redelivery_delay_ms: defaults.redelivery_delay.as_millis() as u64,
            partition_buffer: defaults.partition_buffer,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MonitoringSection {
    pub enabled: bool,
    pub metrics_prefix: String,
}

impl Default for MonitoringSection {
    fn default() -> Self {
        Self {
            enabled: true,
            metrics_prefix: DEFAULT_METRICS_PREFIX.to_string(),
        }
    }
}

impl RelayConfig {
    pub fn from_toml_str(content: &str) -> RelayResult<Self> {
        Ok(toml::from_str(content)?)
    }

    /// 默认熔断配置与按服务覆盖
    pub fn circuit_breakers(
        &self,
    ) -> RelayResult<(CircuitBreakerConfig, HashMap<String, CircuitBreakerConfig>)> {
        let defaults = CircuitBreakerConfig::try_from(&self.circuit_breaker.defaults)?;
        let overrides = self
            .circuit_breaker
            .services
            .iter()
            .map(|(name, patch)| {
                CircuitBreakerConfig::try_from(&patch.apply(&self.circuit_breaker.defaults))
                    .map(|c| (name.clone(), c))
                    .map_err(|e| RelayError::config(format!("circuit_breaker.services.{name}: {e}")))
            })
            .collect::<RelayResult<HashMap<_, _>>>()?;
        Ok((defaults, overrides))
    }

    /// 按配置构造的默认错误分类器
    pub fn classifier(&self) -> DefaultErrorClassifier {
        DefaultErrorClassifier::new().unknown_is_retryable(self.retry.unknown_is_retryable)
    }

    pub fn engine(&self) -> ConsumerEngineConfig {
        ConsumerEngineConfig {
            redelivery_delay: Duration::from_millis(self.consumer.redelivery_delay_ms),
            partition_buffer: self.consumer.partition_buffer,
        }
    }
}

/// 加载并解析 TOML 配置文件
pub fn load_config(path: &Path) -> RelayResult<RelayConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        RelayError::config(format!("failed to read config file {}: {e}", path.display()))
    })?;
    RelayConfig::from_toml_str(&content).map_err(|e| {
        RelayError::config(format!("failed to parse config file {}: {e}", path.display()))
    })
}

impl TryFrom<&RetrySection> for RetryPolicy {
    type Error = RelayError;

    fn try_from(s: &RetrySection) -> Result<Self, Self::Error> {
        RetryPolicy::builder()
            .max_attempts(s.max_attempts)
            .initial_backoff(Duration::from_millis(s.initial_backoff_ms))
            .max_backoff(Duration::from_millis(s.max_backoff_ms))
            .backoff_multiplier(s.backoff_multiplier)
            .jitter_factor(s.jitter_factor)
            .retryable(s.retryable.clone())
            .non_retryable(s.non_retryable.clone())
            .enable_dlq(s.enable_dlq)
            .build()
    }
}

impl TryFrom<&BreakerSettings> for CircuitBreakerConfig {
    type Error = RelayError;

    fn try_from(s: &BreakerSettings) -> Result<Self, Self::Error> {
        let config = CircuitBreakerConfig::builder()
            .failure_rate_threshold(s.failure_rate_threshold)
            .sliding_window_size(s.sliding_window_size)
            .minimum_number_of_calls(s.minimum_number_of_calls)
            .wait_duration_in_open_state(Duration::from_millis(s.wait_duration_in_open_state_ms))
            .permitted_calls_in_half_open(s.permitted_calls_in_half_open)
            .ignored_kinds(s.ignored.clone())
            .build();
        config.validate()?;
        Ok(config)
    }
}
