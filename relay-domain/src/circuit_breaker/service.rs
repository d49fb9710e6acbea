use super::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics, CircuitState};
use crate::classify::{DefaultErrorClassifier, ErrorClassifier};
use crate::metrics::{Metrics, NoopMetrics};
use bon::Builder;
use dashmap::DashMap;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

/// 熔断器注册表：按服务名懒创建，未知服务视为 CLOSED
#[derive(Builder)]
pub struct CircuitBreakerService {
    #[builder(skip)]
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    #[builder(default)]
    default_config: CircuitBreakerConfig,
    /// 按服务名覆盖的配置
    #[builder(default)]
    overrides: HashMap<String, CircuitBreakerConfig>,
    #[builder(default = Arc::new(DefaultErrorClassifier::new()) as Arc<dyn ErrorClassifier>)]
    classifier: Arc<dyn ErrorClassifier>,
    #[builder(default = Arc::new(NoopMetrics) as Arc<dyn Metrics>)]
    metrics: Arc<dyn Metrics>,
}

impl Default for CircuitBreakerService {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl CircuitBreakerService {
    /// 经熔断保护执行同步调用
    pub fn call<T, F>(&self, service: &str, f: F) -> anyhow::Result<T>
    where
        F: FnOnce() -> anyhow::Result<T>,
    {
        let breaker = self.breaker(service);
        breaker.try_acquire()?;
        let result = f();
        self.record(&breaker, &result);
        result
    }

    /// 经熔断保护执行异步调用；熔断打开时 future 不会被轮询
    pub async fn call_async<T, Fut>(&self, service: &str, fut: Fut) -> anyhow::Result<T>
    where
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let breaker = self.breaker(service);
        breaker.try_acquire()?;
        let result = fut.await;
        self.record(&breaker, &result);
        result
    }

    pub fn state(&self, service: &str) -> CircuitState {
        self.breakers
            .get(service)
            .map(|b| b.state())
            .unwrap_or(CircuitState::Closed)
    }

    /// 重置指定服务；未注册的服务无操作
    pub fn reset(&self, service: &str) {
        if let Some(b) = self.breakers.get(service) {
            b.reset();
        }
    }

    pub fn metrics(&self, service: &str) -> Option<CircuitBreakerMetrics> {
        self.breakers.get(service).map(|b| b.metrics())
    }

    /// 已创建熔断器的服务名（排序）
    pub fn services(&self) -> Vec<String> {
        let mut names: Vec<String> = self.breakers.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// 获取（必要时创建）服务对应的熔断器
    pub fn breaker(&self, service: &str) -> Arc<CircuitBreaker> {
        if let Some(b) = self.breakers.get(service) {
            return b.clone();
        }
        self.breakers
            .entry(service.to_string())
            .or_insert_with(|| {
                let config = self
                    .overrides
                    .get(service)
                    .cloned()
                    .unwrap_or_else(|| self.default_config.clone());
                tracing::debug!(service, "creating circuit breaker");
                Arc::new(CircuitBreaker::new(service, config, self.metrics.clone()))
            })
            .clone()
    }

    fn record<T>(&self, breaker: &CircuitBreaker, result: &anyhow::Result<T>) {
        match result {
            Ok(_) => breaker.on_success(),
            Err(err) => {
                let ignored = self
                    .classifier
                    .kind(err)
                    .is_some_and(|k| breaker.config().ignored_kinds.contains(&k));
                if ignored {
                    tracing::debug!(service = %breaker.name(), error = %err, "ignored error for circuit breaker");
                    breaker.on_ignored();
                } else {
                    breaker.on_failure();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::CallNotPermitted;
    use crate::classify::HandlerError;
    use std::io;
    use std::time::Duration;

    fn service() -> CircuitBreakerService {
        CircuitBreakerService::builder()
            .default_config(
                CircuitBreakerConfig::builder()
                    .sliding_window_size(4)
                    .minimum_number_of_calls(2)
                    .wait_duration_in_open_state(Duration::from_millis(20))
                    .permitted_calls_in_half_open(1)
                    .build(),
            )
            .build()
    }

    #[test]
    fn unknown_service_is_closed() {
        let s = service();
        assert_eq!(s.state("never-called"), CircuitState::Closed);
        assert!(s.metrics("never-called").is_none());
        s.reset("never-called");
    }

    #[test]
    fn failures_open_the_circuit_and_short_circuit_calls() {
        let s = service();
        for _ in 0..2 {
            let _ = s.call("db", || Err::<(), _>(HandlerError::timeout("db").into()));
        }
        assert_eq!(s.state("db"), CircuitState::Open);

        let mut invoked = false;
        let err = s
            .call("db", || {
                invoked = true;
                Ok(())
            })
            .unwrap_err();
        assert!(!invoked);
        assert!(err.downcast_ref::<CallNotPermitted>().is_some());
        assert_eq!(s.state("other"), CircuitState::Closed);
    }

    #[test]
    fn ignored_kinds_do_not_count() {
        let s = service();
        for _ in 0..5 {
            let _ = s.call("db", || {
                Err::<(), _>(io::Error::from(io::ErrorKind::ConnectionRefused).into())
            });
        }
        assert_eq!(s.state("db"), CircuitState::Closed);
        assert_eq!(s.metrics("db").unwrap().buffered_calls, 0);
    }

    #[test]
    fn per_service_override_applies() {
        let s = CircuitBreakerService::builder()
            .overrides(HashMap::from([(
                "payments".to_string(),
                CircuitBreakerConfig::builder()
                    .sliding_window_size(1)
                    .minimum_number_of_calls(1)
                    .build(),
            )]))
            .build();
        let _ = s.call("payments", || Err::<(), _>(anyhow::anyhow!("boom")));
        let _ = s.call("orders", || Err::<(), _>(anyhow::anyhow!("boom")));
        assert_eq!(s.state("payments"), CircuitState::Open);
        assert_eq!(s.state("orders"), CircuitState::Closed);
        assert_eq!(s.services(), vec!["orders".to_string(), "payments".to_string()]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn async_calls_recover_through_half_open() {
        let s = service();
        for _ in 0..2 {
            let _ = s
                .call_async("db", async { Err::<(), _>(HandlerError::timeout("db").into()) })
                .await;
        }
        assert_eq!(s.state("db"), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(30)).await;
        let v = s.call_async("db", async { Ok(5) }).await.unwrap();
        assert_eq!(v, 5);
        assert_eq!(s.state("db"), CircuitState::Closed);
    }

    #[test]
    fn reset_closes_open_circuit() {
        let s = service();
        for _ in 0..2 {
            let _ = s.call("db", || Err::<(), _>(anyhow::anyhow!("boom")));
        }
        assert_eq!(s.state("db"), CircuitState::Open);
        s.reset("db");
        assert_eq!(s.state("db"), CircuitState::Closed);
    }
}
