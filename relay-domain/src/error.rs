//! 基础库统一错误定义
//!
//! 聚焦配置、序列化、中间件交互与死信等最小必要集合，
//! 处理器自身的业务失败见 [`crate::classify::HandlerError`]。
//!
use thiserror::Error;

/// 统一错误类型（基础库最小必要集）
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum RelayError {
    // --- 序列化 ---
    #[error("serialization error: {source}")]
    Serde {
        #[from]
        source: serde_json::Error,
    },

    // --- 配置 ---
    #[error("invalid config: {reason}")]
    Config { reason: String },
    #[error("invalid retry policy: {reason}")]
    InvalidPolicy { reason: String },

    // --- 中间件/死信 ---
    #[error("broker error: {reason}")]
    Broker { reason: String },
    #[error("dead letter error: {reason}")]
    DeadLetter { reason: String },
    #[error("idempotency store error: {reason}")]
    Idempotency { reason: String },

    // --- 通用 ---
    #[error("not found: {reason}")]
    NotFound { reason: String },
}

impl RelayError {
    pub fn broker(reason: impl Into<String>) -> Self {
        RelayError::Broker {
            reason: reason.into(),
        }
    }

    pub fn config(reason: impl Into<String>) -> Self {
        RelayError::Config {
            reason: reason.into(),
        }
    }

    pub fn invalid_policy(reason: impl Into<String>) -> Self {
        RelayError::InvalidPolicy {
            reason: reason.into(),
        }
    }
}

/// 统一 Result 类型别名
pub type RelayResult<T> = Result<T, RelayError>;

impl From<toml::de::Error> for RelayError {
    fn from(err: toml::de::Error) -> Self {
        RelayError::Config {
            reason: err.to_string(),
        }
    }
}
