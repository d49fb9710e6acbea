use crate::classify::ErrorKind;
use crate::error::{RelayError, RelayResult};
use bon::bon;
use std::time::Duration;

/// 重试策略
///
/// 构建时校验：`max_attempts >= 1`、`backoff_multiplier >= 1.0`、
/// `jitter_factor ∈ [0, 1]`、`initial_backoff <= max_backoff`。
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
    backoff_multiplier: f64,
    jitter_factor: f64,
    retryable: Vec<ErrorKind>,
    non_retryable: Vec<ErrorKind>,
    enable_dlq: bool,
}

#[bon]
impl RetryPolicy {
    #[builder]
    pub fn new(
        #[builder(default = 3)] max_attempts: u32,
        #[builder(default = Duration::from_secs(1))] initial_backoff: Duration,
        #[builder(default = Duration::from_secs(300))] max_backoff: Duration,
        #[builder(default = 2.0)] backoff_multiplier: f64,
        #[builder(default = 0.1)] jitter_factor: f64,
        #[builder(default)] retryable: Vec<ErrorKind>,
        #[builder(default)] non_retryable: Vec<ErrorKind>,
        #[builder(default = true)] enable_dlq: bool,
    ) -> RelayResult<Self> {
        if max_attempts < 1 {
            return Err(RelayError::invalid_policy("max_attempts must be at least 1"));
        }
        if backoff_multiplier.is_nan() || backoff_multiplier < 1.0 {
            return Err(RelayError::invalid_policy(format!(
                "backoff_multiplier must be >= 1.0, got {backoff_multiplier}"
            )));
        }
        if !(0.0..=1.0).contains(&jitter_factor) {
            return Err(RelayError::invalid_policy(format!(
                "jitter_factor must be within [0, 1], got {jitter_factor}"
            )));
        }
        if initial_backoff > max_backoff {
            return Err(RelayError::invalid_policy(
                "initial_backoff must not exceed max_backoff",
            ));
        }

        Ok(Self {
            max_attempts,
            initial_backoff,
            max_backoff,
            backoff_multiplier,
            jitter_factor,
            retryable,
            non_retryable,
            enable_dlq,
        })
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(300),
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
            retryable: Vec::new(),
            non_retryable: Vec::new(),
            enable_dlq: true,
        }
    }
}

impl RetryPolicy {
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn initial_backoff(&self) -> Duration {
        self.initial_backoff
    }

    pub fn max_backoff(&self) -> Duration {
        self.max_backoff
    }

    pub fn backoff_multiplier(&self) -> f64 {
        self.backoff_multiplier
    }

    pub fn jitter_factor(&self) -> f64 {
        self.jitter_factor
    }

    pub fn retryable(&self) -> &[ErrorKind] {
        &self.retryable
    }

    pub fn non_retryable(&self) -> &[ErrorKind] {
        &self.non_retryable
    }

    pub fn enable_dlq(&self) -> bool {
        self.enable_dlq
    }
}
