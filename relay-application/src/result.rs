//! 分发结果（CommandResult / QueryResult）
//!
//! 成功时携带返回值，失败时携带错误消息与稳定错误码，二者互斥；
//! 调用方通过 `is_success` 判断而非捕获错误。
//!
use crate::error::AppError;

macro_rules! dispatch_result {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub enum $name<R> {
            Success(R),
            Failure { message: String, code: String },
        }

        impl<R> $name<R> {
            pub fn failure(message: impl Into<String>, code: impl Into<String>) -> Self {
                $name::Failure {
                    message: message.into(),
                    code: code.into(),
                }
            }

            pub fn is_success(&self) -> bool {
                matches!(self, $name::Success(_))
            }

            pub fn is_failure(&self) -> bool {
                !self.is_success()
            }

            pub fn value(&self) -> Option<&R> {
                match self {
                    $name::Success(v) => Some(v),
                    $name::Failure { .. } => None,
                }
            }

            pub fn into_value(self) -> Option<R> {
                match self {
                    $name::Success(v) => Some(v),
                    $name::Failure { .. } => None,
                }
            }

            pub fn error_message(&self) -> Option<&str> {
                match self {
                    $name::Success(_) => None,
                    $name::Failure { message, .. } => Some(message),
                }
            }

            pub fn error_code(&self) -> Option<&str> {
                match self {
                    $name::Success(_) => None,
                    $name::Failure { code, .. } => Some(code),
                }
            }

            pub fn map<U>(self, f: impl FnOnce(R) -> U) -> $name<U> {
                match self {
                    $name::Success(v) => $name::Success(f(v)),
                    $name::Failure { message, code } => $name::Failure { message, code },
                }
            }
        }

        impl<R> From<Result<R, AppError>> for $name<R> {
            fn from(result: Result<R, AppError>) -> Self {
                match result {
                    Ok(v) => $name::Success(v),
                    Err(err) => $name::failure(err.to_string(), err.code()),
                }
            }
        }
    };
}

dispatch_result!(
    /// 命令执行结果
    CommandResult
);

dispatch_result!(
    /// 查询执行结果
    QueryResult
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_carries_message_and_code_only() {
        let r: CommandResult<u32> = Err(AppError::HandlerNotFound("CreateUser")).into();
        assert!(r.is_failure());
        assert_eq!(r.value(), None);
        assert_eq!(r.error_code(), Some("HANDLER_NOT_FOUND"));
        assert_eq!(r.error_message(), Some("handler not found: CreateUser"));
    }

    #[test]
    fn success_maps_value() {
        let r: QueryResult<u32> = Ok(2).into();
        assert_eq!(r.clone().map(|v| v * 10), QueryResult::Success(20));
        assert_eq!(r.error_code(), None);
        assert_eq!(r.into_value(), Some(2));
    }
}
