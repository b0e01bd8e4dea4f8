//! Errors - エラー型と分類
//!
//! メッセージ単位のエラーはすべて consumer 内で ack/reject の判断に変換され、
//! `subscribe()` の呼び出し元には返りません。
//!
//! # 分類
//! - **Permanent**: decode / validation / handler not found（再試行しても直らない）
//! - **Handler**: ビジネスロジックの失敗（panic / timeout を含む）
//! - **Infrastructure**: broker との通信エラー

use std::time::Duration;

use thiserror::Error;

use crate::ports::TransportError;

/// ErrorKind は実行エラーの運用分類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Permanent,
    Handler,
    Infrastructure,
}

#[derive(Debug, Error)]
pub enum CourierError {
    #[error("decode failed: {0}")]
    Decode(String),

    #[error("validate struct failed: {0}")]
    Validation(String),

    #[error("handler not found for task_name={0}")]
    HandlerNotFound(String),

    #[error("{0}")]
    Handler(String),

    #[error("handler panicked: {0}")]
    HandlerPanicked(String),

    #[error("handler timed out after {0:?}")]
    HandlerTimeout(Duration),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl CourierError {
    /// Convenience constructor for handler (business logic) failures.
    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Decode(_) | Self::Validation(_) | Self::HandlerNotFound(_) => {
                ErrorKind::Permanent
            }
            Self::Handler(_) | Self::HandlerPanicked(_) | Self::HandlerTimeout(_) => {
                ErrorKind::Handler
            }
            Self::Transport(_) => ErrorKind::Infrastructure,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::decode(CourierError::Decode("bad json".into()), ErrorKind::Permanent)]
    #[case::validation(CourierError::Validation("empty".into()), ErrorKind::Permanent)]
    #[case::not_found(CourierError::HandlerNotFound("ping".into()), ErrorKind::Permanent)]
    #[case::handler(CourierError::handler("boom"), ErrorKind::Handler)]
    #[case::timeout(CourierError::HandlerTimeout(Duration::from_secs(1)), ErrorKind::Handler)]
    #[case::transport(CourierError::Transport(TransportError::Closed), ErrorKind::Infrastructure)]
    fn errors_are_classified(#[case] err: CourierError, #[case] expected: ErrorKind) {
        assert_eq!(err.kind(), expected);
    }

    #[test]
    fn handler_error_displays_message_verbatim() {
        assert_eq!(CourierError::handler("boom").to_string(), "boom");
        assert_eq!(
            CourierError::HandlerNotFound("x".into()).to_string(),
            "handler not found for task_name=x"
        );
    }
}
