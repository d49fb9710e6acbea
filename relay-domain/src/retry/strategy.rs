//! 重试执行器（RetryStrategy）
//!
//! 按“尝试 → 分类 → 退避 → 再尝试”的循环执行异步处理：
//! - 每次尝试前递增上下文的尝试计数；
//! - 不可重试错误立即返回 `RetryError::NonRetryable`；
//! - 次数耗尽返回 `RetryError::Exhausted`，错误链附带 `MaxRetriesExceeded`；
//! - 退避为定时器等待，与取消令牌竞争，被取消时返回 `RetryError::Cancelled`。
//!
use super::{
    BackoffStrategy, ExponentialBackoff, MaxRetriesExceeded, RetryContext, RetryError, RetryPolicy,
};
use crate::classify::{DefaultErrorClassifier, ErrorClassifier};
use crate::metrics::{self, Metrics, NoopMetrics};
use bon::Builder;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Builder, Clone)]
pub struct RetryStrategy {
    #[builder(default = Arc::new(ExponentialBackoff::new()) as Arc<dyn BackoffStrategy>)]
    backoff: Arc<dyn BackoffStrategy>,
    #[builder(default = Arc::new(DefaultErrorClassifier::new()) as Arc<dyn ErrorClassifier>)]
    classifier: Arc<dyn ErrorClassifier>,
    #[builder(default = Arc::new(NoopMetrics) as Arc<dyn Metrics>)]
    metrics: Arc<dyn Metrics>,
}

impl Default for RetryStrategy {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl RetryStrategy {
    pub fn classifier(&self) -> &Arc<dyn ErrorClassifier> {
        &self.classifier
    }

    /// 执行带重试的异步处理
    pub async fn execute<T, F, Fut>(
        &self,
        mut work: F,
        policy: &RetryPolicy,
        ctx: &mut RetryContext,
        cancel: &CancellationToken,
    ) -> Result<T, RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        loop {
            ctx.increment_attempt();
            let attempt = ctx.attempt_count();
            tracing::debug!(
                event_id = %ctx.event_id(),
                attempt,
                max_attempts = policy.max_attempts(),
                "processing event"
            );

            let error = match work().await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!(
                            event_id = %ctx.event_id(),
                            attempt,
                            "event processed successfully after retry"
                        );
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            ctx.record_error(format!("{error:#}"));

            if !self.classifier.is_retryable(&error, policy) {
                tracing::warn!(
                    event_id = %ctx.event_id(),
                    attempt,
                    error = %error,
                    "non-retryable error, giving up"
                );
                return Err(RetryError::NonRetryable { attempt, error });
            }

            if attempt >= policy.max_attempts() {
                tracing::error!(
                    event_id = %ctx.event_id(),
                    attempts = attempt,
                    error = %error,
                    "max retries exceeded"
                );
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    error: error.context(MaxRetriesExceeded { attempts: attempt }),
                });
            }

            let delay = self.backoff.next_delay(attempt, policy);
            tracing::warn!(
                event_id = %ctx.event_id(),
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "attempt failed, retrying after backoff"
            );
            self.metrics
                .increment_counter(metrics::RETRY_ATTEMPTS, &[("topic", ctx.topic())]);

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::warn!(
                        event_id = %ctx.event_id(),
                        attempts = attempt,
                        "retry interrupted by shutdown"
                    );
                    return Err(RetryError::Cancelled {
                        attempts: attempt,
                        last_error: Some(error),
                    });
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
