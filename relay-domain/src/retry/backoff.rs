use super::RetryPolicy;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Mutex;
use std::time::Duration;

/// 退避策略：由尝试序号（从 1 开始）计算下一次等待时长
pub trait BackoffStrategy: Send + Sync {
    fn next_delay(&self, attempt: u32, policy: &RetryPolicy) -> Duration;
}

/// 指数退避 + 乘性抖动
///
/// `d = min(initial * multiplier^(attempt-1), max)`，
/// 再乘以 `[1-j, 1+j]` 上均匀采样的系数；`attempt == 0` 时返回零。
#[derive(Debug)]
pub struct ExponentialBackoff {
    rng: Mutex<StdRng>,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new()
    }
}

impl ExponentialBackoff {
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }

    /// 固定种子，抖动序列可复现
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// 不含抖动的基础时长（秒）
    fn base_secs(attempt: u32, policy: &RetryPolicy) -> f64 {
        let initial = policy.initial_backoff().as_secs_f64();
        let max = policy.max_backoff().as_secs_f64();
        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let raw = initial * policy.backoff_multiplier().powi(exponent);
        if raw.is_finite() { raw.min(max) } else { max }
    }
}

impl BackoffStrategy for ExponentialBackoff {
    fn next_delay(&self, attempt: u32, policy: &RetryPolicy) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base = Self::base_secs(attempt, policy);
        let jitter = policy.jitter_factor();
        let secs = if jitter > 0.0 {
            let factor = match self.rng.lock() {
                Ok(mut rng) => rng.random_range((1.0 - jitter)..=(1.0 + jitter)),
                Err(poisoned) => poisoned
                    .into_inner()
                    .random_range((1.0 - jitter)..=(1.0 + jitter)),
            };
            base * factor
        } else {
            base
        };

        Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(Duration::MAX)
    }
}
