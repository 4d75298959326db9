//! Client-facing error types.
//!
//! Storage errors are collapsed into two codes before they leave the
//! service: a missing post is the caller's mistake, anything else is opaque.
//! The underlying error is logged, never returned.

use std::fmt;

use crudstore_core::{CrudError, StorageError};
use serde::{Deserialize, Serialize};
use tracing::error;

// ============================================================================
// ERROR CODE ENUM
// ============================================================================

/// Error codes returned to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// The request named something that does not exist or was malformed
    InvalidArgument,

    /// Anything the caller cannot act on
    Internal,
}

impl ErrorCode {
    /// Get a default message for this error code.
    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorCode::InvalidArgument => "Invalid argument",
            ErrorCode::Internal => "Internal server error",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ============================================================================
// SERVICE ERROR
// ============================================================================

/// Structured error returned by [`PostService`](crate::PostService).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{code}: {message}")]
pub struct ServiceError {
    pub code: ErrorCode,
    pub message: String,
}

impl ServiceError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Create an error with the code's default message.
    pub fn from_code(code: ErrorCode) -> Self {
        Self::new(code, code.default_message())
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidArgument, message)
    }

    pub fn internal() -> Self {
        Self::from_code(ErrorCode::Internal)
    }
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound { .. } => Self::invalid_argument("Post does not exist"),
            other => {
                error!(error = %other, "Storage operation failed");
                Self::internal()
            }
        }
    }
}

impl From<CrudError> for ServiceError {
    fn from(err: CrudError) -> Self {
        match err {
            CrudError::Storage(e) => e.into(),
            other => {
                error!(error = %other, "Operation failed");
                Self::internal()
            }
        }
    }
}

/// Result type for service operations.
pub type ServiceResult<T> = Result<T, ServiceError>;
