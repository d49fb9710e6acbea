use crate::classify::ErrorKind;
use crate::error::{RelayError, RelayResult};
use bon::Builder;
use std::time::Duration;

/// 熔断器配置
#[derive(Debug, Clone, PartialEq, Builder)]
pub struct CircuitBreakerConfig {
    /// 失败率阈值（百分比，达到即打开）
    #[builder(default = 50.0)]
    pub failure_rate_threshold: f64,
    /// 计数滑动窗口大小
    #[builder(default = 10)]
    pub sliding_window_size: usize,
    /// 计算失败率前所需的最少调用数
    #[builder(default = 5)]
    pub minimum_number_of_calls: usize,
    /// OPEN 状态的等待时长
    #[builder(default = Duration::from_secs(30))]
    pub wait_duration_in_open_state: Duration,
    /// HALF_OPEN 状态允许的试探调用数
    #[builder(default = 3)]
    pub permitted_calls_in_half_open: u32,
    /// 既不计成功也不计失败的错误种类
    #[builder(default = vec![ErrorKind::ConnectionRefused])]
    pub ignored_kinds: Vec<ErrorKind>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl CircuitBreakerConfig {
    pub fn validate(&self) -> RelayResult<()> {
        if !(self.failure_rate_threshold > 0.0 && self.failure_rate_threshold <= 100.0) {
            return Err(RelayError::config(format!(
                "failure_rate_threshold must be within (0, 100], got {}",
                self.failure_rate_threshold
            )));
        }
        if self.sliding_window_size == 0 {
            return Err(RelayError::config("sliding_window_size must be at least 1"));
        }
        if self.minimum_number_of_calls == 0 {
            return Err(RelayError::config(
                "minimum_number_of_calls must be at least 1",
            ));
        }
        if self.permitted_calls_in_half_open == 0 {
            return Err(RelayError::config(
                "permitted_calls_in_half_open must be at least 1",
            ));
        }
        Ok(())
    }

    /// 窗口内实际生效的最少调用数
    pub(crate) fn effective_minimum_calls(&self) -> usize {
        self.minimum_number_of_calls.min(self.sliding_window_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = CircuitBreakerConfig::default();
        assert_eq!(c.failure_rate_threshold, 50.0);
        assert_eq!(c.sliding_window_size, 10);
        assert_eq!(c.minimum_number_of_calls, 5);
        assert_eq!(c.wait_duration_in_open_state, Duration::from_secs(30));
        assert_eq!(c.permitted_calls_in_half_open, 3);
        assert_eq!(c.ignored_kinds, vec![ErrorKind::ConnectionRefused]);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn validation_rejects_degenerate_values() {
        assert!(
            CircuitBreakerConfig::builder()
                .failure_rate_threshold(0.0)
                .build()
                .validate()
                .is_err()
        );
        assert!(
            CircuitBreakerConfig::builder()
                .sliding_window_size(0)
                .build()
                .validate()
                .is_err()
        );
        assert!(
            CircuitBreakerConfig::builder()
                .permitted_calls_in_half_open(0)
                .build()
                .validate()
                .is_err()
        );
    }
}
