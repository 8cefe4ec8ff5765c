use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use std::sync::Arc;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors are `Clone` so that a failed index build can be cached and replayed
/// to every later query against the same file.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// Coordinate or context misuse by the caller.
    #[error("out of range: {0}")]
    OutOfRange(String),

    /// User-typed coordinate text that could not be interpreted. The message is
    /// meant to be displayed as is.
    #[error("{0}")]
    InvalidRange(String),

    #[error("corrupt index: {0}")]
    CorruptIndex(String),

    #[error("corrupt file: {0}")]
    CorruptFile(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// A local path that escapes the data directory.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("io error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(Arc::new(err))
    }
}

impl Error {
    /// Whether the failure is a stable fact about the remote resource, as
    /// opposed to something worth retrying.
    pub fn is_persistent(&self) -> bool {
        matches!(
            self,
            Error::CorruptIndex(_) | Error::CorruptFile(_) | Error::UnsupportedFormat(_)
        )
    }

    fn error_type(&self) -> &'static str {
        match self {
            Error::OutOfRange(_) => "OutOfRange",
            Error::InvalidRange(_) => "InvalidRange",
            Error::CorruptIndex(_) => "CorruptIndex",
            Error::CorruptFile(_) => "CorruptFile",
            Error::Network(_) => "NetworkError",
            Error::NotFound(_) => "NotFound",
            Error::PermissionDenied(_) => "PermissionDenied",
            Error::InvalidInput(_) => "InvalidInput",
            Error::UnsupportedFormat(_) => "UnsupportedFormat",
            Error::Io(_) | Error::Internal(_) => "InternalError",
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Error::OutOfRange(_) => StatusCode::BAD_REQUEST,
            Error::InvalidRange(_) => StatusCode::BAD_REQUEST,
            Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Error::UnsupportedFormat(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::PermissionDenied(_) => StatusCode::FORBIDDEN,
            Error::CorruptIndex(_) | Error::CorruptFile(_) | Error::Network(_) => {
                StatusCode::BAD_GATEWAY
            }
            Error::Io(_) | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub kind: &'static str,
    pub message: String,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: ErrorBody {
                kind: self.error_type(),
                message: self.to_string(),
            },
        };
        (self.status_code(), axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_range_message_is_verbatim() {
        let err = Error::InvalidRange("Start must be before end".to_string());
        assert_eq!(err.to_string(), "Start must be before end");
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_persistent_failures() {
        assert!(Error::CorruptIndex("bad magic".into()).is_persistent());
        assert!(!Error::Network("timeout".into()).is_persistent());
    }
}
