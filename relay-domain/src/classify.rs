//! 错误分类（ErrorClassifier）
//!
//! 将处理失败映射为 {TRANSIENT, PERMANENT, UNKNOWN}，并结合重试策略判定是否可重试。
//! 判定优先级：
//! 1. 策略的显式不可重试名单命中 → 不可重试；
//! 2. 策略定义了显式可重试名单 → 是否命中决定结果；
//! 3. 结构化分类：沿错误链识别已知错误类型，再退化为消息关键字匹配；
//!    均无法识别时归为 UNKNOWN，默认按可重试处理（宁可重试，不静默丢弃）。
//!
use crate::circuit_breaker::CallNotPermitted;
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// 错误大类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    /// 暂时性错误，重试可能恢复
    Transient,
    /// 永久性错误，重试不会成功
    Permanent,
    /// 未能识别
    Unknown,
}

/// 可识别的错误种类，用于策略名单与熔断忽略名单
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Network,
    Timeout,
    ConnectionRefused,
    StorageUnavailable,
    CircuitOpen,
    Validation,
    Deserialization,
    IllegalArgument,
    IllegalState,
    NotFound,
    Duplicate,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Network => "network",
            ErrorKind::Timeout => "timeout",
            ErrorKind::ConnectionRefused => "connection_refused",
            ErrorKind::StorageUnavailable => "storage_unavailable",
            ErrorKind::CircuitOpen => "circuit_open",
            ErrorKind::Validation => "validation",
            ErrorKind::Deserialization => "deserialization",
            ErrorKind::IllegalArgument => "illegal_argument",
            ErrorKind::IllegalState => "illegal_state",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Duplicate => "duplicate",
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            ErrorKind::Network
            | ErrorKind::Timeout
            | ErrorKind::ConnectionRefused
            | ErrorKind::StorageUnavailable
            | ErrorKind::CircuitOpen => ErrorCategory::Transient,
            ErrorKind::Validation
            | ErrorKind::Deserialization
            | ErrorKind::IllegalArgument
            | ErrorKind::IllegalState
            | ErrorKind::NotFound
            | ErrorKind::Duplicate => ErrorCategory::Permanent,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ErrorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let kind = match s {
            "network" => ErrorKind::Network,
            "timeout" => ErrorKind::Timeout,
            "connection_refused" => ErrorKind::ConnectionRefused,
            "storage_unavailable" => ErrorKind::StorageUnavailable,
            "circuit_open" => ErrorKind::CircuitOpen,
            "validation" => ErrorKind::Validation,
            "deserialization" => ErrorKind::Deserialization,
            "illegal_argument" => ErrorKind::IllegalArgument,
            "illegal_state" => ErrorKind::IllegalState,
            "not_found" => ErrorKind::NotFound,
            "duplicate" => ErrorKind::Duplicate,
            other => return Err(format!("unknown error kind: {other}")),
        };
        Ok(kind)
    }
}

/// 处理器显式声明种类的错误
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct HandlerError {
    kind: ErrorKind,
    message: String,
}

impl HandlerError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, message)
    }

    pub fn storage_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::StorageUnavailable, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn duplicate(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Duplicate, message)
    }
}

/// 错误分类器
pub trait ErrorClassifier: Send + Sync {
    /// 识别错误种类（沿错误链取第一个可识别的种类）
    fn kind(&self, error: &anyhow::Error) -> Option<ErrorKind>;

    /// 结构化分类
    fn classify(&self, error: &anyhow::Error) -> ErrorCategory;

    /// 结合策略名单判定是否可重试
    fn is_retryable(&self, error: &anyhow::Error, policy: &RetryPolicy) -> bool;
}

/// 默认分类器
#[derive(Debug, Clone)]
pub struct DefaultErrorClassifier {
    unknown_is_retryable: bool,
}

impl Default for DefaultErrorClassifier {
    fn default() -> Self {
        Self {
            unknown_is_retryable: true,
        }
    }
}

const TRANSIENT_HINTS: [&str; 5] = ["timeout", "connection", "unavailable", "temporarily", "retry"];
const PERMANENT_HINTS: [&str; 5] = ["validation", "invalid", "malformed", "not found", "duplicate"];

impl DefaultErrorClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// 调整 UNKNOWN 的处理方式；关闭后未识别错误将直接进入死信
    pub fn unknown_is_retryable(mut self, retryable: bool) -> Self {
        self.unknown_is_retryable = retryable;
        self
    }

    fn kind_of_source(source: &(dyn std::error::Error + 'static)) -> Option<ErrorKind> {
        if let Some(e) = source.downcast_ref::<HandlerError>() {
            return Some(e.kind());
        }
        if let Some(e) = source.downcast_ref::<std::io::Error>() {
            return io_kind(e.kind());
        }
        if source.downcast_ref::<serde_json::Error>().is_some() {
            return Some(ErrorKind::Deserialization);
        }
        if source.downcast_ref::<tokio::time::error::Elapsed>().is_some() {
            return Some(ErrorKind::Timeout);
        }
        if source.downcast_ref::<CallNotPermitted>().is_some() {
            return Some(ErrorKind::CircuitOpen);
        }
        None
    }

    fn category_from_message(error: &anyhow::Error) -> ErrorCategory {
        let message = format!("{error:#}").to_lowercase();
        if TRANSIENT_HINTS.iter().any(|h| message.contains(h)) {
            ErrorCategory::Transient
        } else if PERMANENT_HINTS.iter().any(|h| message.contains(h)) {
            ErrorCategory::Permanent
        } else {
            ErrorCategory::Unknown
        }
    }
}

impl ErrorClassifier for DefaultErrorClassifier {
    fn kind(&self, error: &anyhow::Error) -> Option<ErrorKind> {
        error.chain().find_map(Self::kind_of_source)
    }

    fn classify(&self, error: &anyhow::Error) -> ErrorCategory {
        match self.kind(error) {
            Some(kind) => kind.category(),
            None => Self::category_from_message(error),
        }
    }

    fn is_retryable(&self, error: &anyhow::Error, policy: &RetryPolicy) -> bool {
        let kind = self.kind(error);

        if let Some(kind) = kind {
            if policy.non_retryable().contains(&kind) {
                tracing::debug!(kind = %kind, "error kind is explicitly non-retryable");
                return false;
            }
        }

        if !policy.retryable().is_empty() {
            let retryable = kind.is_some_and(|k| policy.retryable().contains(&k));
            tracing::debug!(kind = ?kind, retryable, "checked explicit retryable list");
            return retryable;
        }

        let category = self.classify(error);
        let retryable = match category {
            ErrorCategory::Transient => true,
            ErrorCategory::Permanent => false,
            ErrorCategory::Unknown => {
                tracing::warn!(error = %error, "unknown error category, retryable={}", self.unknown_is_retryable);
                self.unknown_is_retryable
            }
        };
        tracing::debug!(?category, retryable, "error classified");
        retryable
    }
}

fn io_kind(kind: std::io::ErrorKind) -> Option<ErrorKind> {
    use std::io::ErrorKind as Io;
    match kind {
        Io::TimedOut | Io::WouldBlock => Some(ErrorKind::Timeout),
        Io::ConnectionRefused => Some(ErrorKind::ConnectionRefused),
        Io::ConnectionReset
        | Io::ConnectionAborted
        | Io::NotConnected
        | Io::BrokenPipe
        | Io::AddrNotAvailable
        | Io::UnexpectedEof
        | Io::Interrupted => Some(ErrorKind::Network),
        Io::NotFound => Some(ErrorKind::NotFound),
        Io::AlreadyExists => Some(ErrorKind::Duplicate),
        Io::InvalidInput => Some(ErrorKind::IllegalArgument),
        Io::InvalidData => Some(ErrorKind::Deserialization),
        _ => None,
    }
}
