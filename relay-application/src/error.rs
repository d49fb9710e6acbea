#[non_exhaustive]
#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("validation: {0}")]
    Validation(String),

    #[error("handler not found: {0}")]
    HandlerNotFound(&'static str),

    #[error("handler already registered: {kind}={name}")]
    DuplicateHandler {
        kind: &'static str,
        name: &'static str,
    },

    #[error("type mismatch: expected={expected}, found={found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error("serialization: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("handler failed: {0:#}")]
    Handler(#[from] anyhow::Error),

    #[error("handler panicked: {0}")]
    Panicked(String),
}

impl AppError {
    pub fn validation(reason: impl Into<String>) -> Self {
        AppError::Validation(reason.into())
    }

    /// 失败结果中携带的稳定错误码
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "VALIDATION_FAILED",
            AppError::HandlerNotFound(_) => "HANDLER_NOT_FOUND",
            AppError::DuplicateHandler { .. } => "DUPLICATE_HANDLER",
            AppError::TypeMismatch { .. } => "TYPE_MISMATCH",
            AppError::Serde(_) => "SERIALIZATION_FAILED",
            AppError::Handler(_) => "HANDLER_FAILED",
            AppError::Panicked(_) => "HANDLER_PANICKED",
        }
    }
}
