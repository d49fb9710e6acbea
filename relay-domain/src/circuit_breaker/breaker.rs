use super::CircuitBreakerConfig;
use crate::metrics::{self, Metrics};
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    /// 仪表值：0 关闭，1 打开，2 半开
    pub fn gauge_value(&self) -> f64 {
        match self {
            CircuitState::Closed => 0.0,
            CircuitState::Open => 1.0,
            CircuitState::HalfOpen => 2.0,
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        };
        f.write_str(s)
    }
}

/// 熔断打开时拒绝调用
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("call not permitted: circuit open for service {service}")]
pub struct CallNotPermitted {
    pub service: String,
}

/// 熔断器指标快照
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CircuitBreakerMetrics {
    pub state: CircuitState,
    /// 窗口内失败率（百分比）；样本不足最少调用数时为 `None`
    pub failure_rate: Option<f64>,
    pub successful_calls: usize,
    pub failed_calls: usize,
    pub buffered_calls: usize,
    pub not_permitted_calls: u64,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    /// true 表示失败
    window: VecDeque<bool>,
    opened_at: Option<Instant>,
    half_open_issued: u32,
    half_open_successes: u32,
    not_permitted: u64,
}

impl Inner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            window: VecDeque::new(),
            opened_at: None,
            half_open_issued: 0,
            half_open_successes: 0,
            not_permitted: 0,
        }
    }

    fn failed(&self) -> usize {
        self.window.iter().filter(|f| **f).count()
    }

    fn failure_rate(&self, min_calls: usize) -> Option<f64> {
        if self.window.is_empty() || self.window.len() < min_calls {
            return None;
        }
        Some(self.failed() as f64 * 100.0 / self.window.len() as f64)
    }
}

/// 单个下游服务的熔断器
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    metrics: Arc<dyn Metrics>,
    inner: Mutex<Inner>,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

impl CircuitBreaker {
    pub fn new(
        name: impl Into<String>,
        config: CircuitBreakerConfig,
        metrics: Arc<dyn Metrics>,
    ) -> Self {
        let breaker = Self {
            name: name.into(),
            config,
            metrics,
            inner: Mutex::new(Inner::new()),
        };
        breaker.report_state(CircuitState::Closed);
        breaker
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// 获取一次调用许可
    pub fn try_acquire(&self) -> Result<(), CallNotPermitted> {
        let mut inner = self.lock();

        if inner.state == CircuitState::Open {
            let waited = inner
                .opened_at
                .is_some_and(|at| at.elapsed() >= self.config.wait_duration_in_open_state);
            if waited {
                self.transition(&mut inner, CircuitState::HalfOpen);
            }
        }

        let permitted = match inner.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen
                if inner.half_open_issued < self.config.permitted_calls_in_half_open =>
            {
                inner.half_open_issued += 1;
                true
            }
            _ => {
                inner.not_permitted += 1;
                false
            }
        };
        drop(inner);

        if permitted {
            return Ok(());
        }
        self.metrics.increment_counter(
            metrics::CIRCUIT_BREAKER_NOT_PERMITTED,
            &[("service", self.name.as_str())],
        );
        tracing::warn!(service = %self.name, "circuit breaker rejected call");
        Err(CallNotPermitted {
            service: self.name.clone(),
        })
    }

    pub fn on_success(&self) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => self.record(&mut inner, false),
            CircuitState::HalfOpen => {
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.config.permitted_calls_in_half_open {
                    self.transition(&mut inner, CircuitState::Closed);
                }
            }
            CircuitState::Open => {}
        }
    }

    pub fn on_failure(&self) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => self.record(&mut inner, true),
            CircuitState::HalfOpen => self.transition(&mut inner, CircuitState::Open),
            CircuitState::Open => {}
        }
    }

    /// 被忽略的错误：不计入窗口，释放半开许可
    pub fn on_ignored(&self) {
        let mut inner = self.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.half_open_issued = inner.half_open_issued.saturating_sub(1);
        }
    }

    /// 强制回到 CLOSED 并清空统计
    pub fn reset(&self) {
        let mut inner = self.lock();
        let from = inner.state;
        *inner = Inner::new();
        drop(inner);
        tracing::info!(service = %self.name, from = %from, "circuit breaker reset");
        self.report_state(CircuitState::Closed);
    }

    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let inner = self.lock();
        let failed = inner.failed();
        CircuitBreakerMetrics {
            state: inner.state,
            failure_rate: inner.failure_rate(self.config.effective_minimum_calls()),
            successful_calls: inner.window.len() - failed,
            failed_calls: failed,
            buffered_calls: inner.window.len(),
            not_permitted_calls: inner.not_permitted,
        }
    }

    /// CLOSED 状态下记录一次结果，样本足够且失败率达到阈值时打开
    fn record(&self, inner: &mut Inner, failed: bool) {
        inner.window.push_back(failed);
        while inner.window.len() > self.config.sliding_window_size {
            inner.window.pop_front();
        }

        let min_calls = self.config.effective_minimum_calls();
        if let Some(rate) = inner.failure_rate(min_calls) {
            if rate >= self.config.failure_rate_threshold {
                tracing::warn!(
                    service = %self.name,
                    failure_rate = rate,
                    threshold = self.config.failure_rate_threshold,
                    "failure rate threshold reached"
                );
                self.transition(inner, CircuitState::Open);
            }
        }
    }

    fn transition(&self, inner: &mut Inner, to: CircuitState) {
        let from = inner.state;
        if from == to {
            return;
        }
        inner.state = to;
        inner.half_open_issued = 0;
        inner.half_open_successes = 0;
        match to {
            CircuitState::Open => inner.opened_at = Some(Instant::now()),
            CircuitState::Closed => {
                inner.opened_at = None;
                inner.window.clear();
            }
            CircuitState::HalfOpen => {}
        }
        tracing::info!(service = %self.name, from = %from, to = %to, "circuit breaker state transition");
        self.report_state(to);
    }

    fn report_state(&self, state: CircuitState) {
        self.metrics.set_gauge(
            metrics::CIRCUIT_BREAKER_STATE,
            &[("service", self.name.as_str())],
            state.gauge_value(),
        );
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
