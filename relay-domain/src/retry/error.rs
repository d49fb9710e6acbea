use thiserror::Error;

/// 重试次数耗尽，作为最后一次错误的上下文包装
#[derive(Debug, Clone, Copy, Error)]
#[error("max retries exceeded after {attempts} attempts")]
pub struct MaxRetriesExceeded {
    pub attempts: u32,
}

/// 重试执行的终态错误
#[derive(Debug, Error)]
pub enum RetryError {
    /// 分类为不可重试，立即终止
    #[error("non-retryable failure on attempt {attempt}: {error:#}")]
    NonRetryable { attempt: u32, error: anyhow::Error },

    /// 可重试但次数耗尽；`error` 已附带 `MaxRetriesExceeded` 上下文
    #[error("{error:#}")]
    Exhausted { attempts: u32, error: anyhow::Error },

    /// 退避等待期间被取消
    #[error("retry cancelled after {attempts} attempts")]
    Cancelled {
        attempts: u32,
        last_error: Option<anyhow::Error>,
    },
}

impl RetryError {
    /// 已执行的尝试次数
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::NonRetryable { attempt, .. } => *attempt,
            RetryError::Exhausted { attempts, .. } | RetryError::Cancelled { attempts, .. } => {
                *attempts
            }
        }
    }

    /// 导致终止的处理错误
    pub fn error(&self) -> Option<&anyhow::Error> {
        match self {
            RetryError::NonRetryable { error, .. } | RetryError::Exhausted { error, .. } => {
                Some(error)
            }
            RetryError::Cancelled { last_error, .. } => last_error.as_ref(),
        }
    }

    pub fn into_error(self) -> Option<anyhow::Error> {
        match self {
            RetryError::NonRetryable { error, .. } | RetryError::Exhausted { error, .. } => {
                Some(error)
            }
            RetryError::Cancelled { last_error, .. } => last_error,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, RetryError::Exhausted { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, RetryError::Cancelled { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausted_error_keeps_root_cause_in_chain() {
        let err = anyhow::anyhow!("db timeout").context(MaxRetriesExceeded { attempts: 3 });
        let retry = RetryError::Exhausted {
            attempts: 3,
            error: err,
        };
        let text = retry.to_string();
        assert!(text.contains("max retries exceeded after 3 attempts"));
        assert!(text.contains("db timeout"));
        assert_eq!(retry.attempts(), 3);
        assert!(
            retry
                .error()
                .and_then(|e| e.downcast_ref::<MaxRetriesExceeded>())
                .is_some()
        );
    }
}
