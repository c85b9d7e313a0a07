//! Cart engine error types.

use serde::Serialize;
use thiserror::Error;

use cartwright_core::{LineValueError, SessionIdError};

/// Errors that can occur during cart operations.
///
/// Every variant means "nothing was applied": operations are all-or-nothing,
/// so callers never have to reason about partial effects.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CartError {
    /// Missing or invalid product/variant, or a non-positive quantity.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Missing cart or line item, or a line item owned by another cart.
    #[error("not found: {0}")]
    NotFound(String),

    /// A concurrent writer altered a row during an upsert or merge.
    #[error("write conflict: {0}")]
    Conflict(String),

    /// Transaction or connection failure; safe to retry.
    #[error("storage temporarily unavailable: {0}")]
    Transient(String),

    /// Unexpected storage failure or corrupted data.
    #[error("storage error: {0}")]
    Storage(String),
}

/// Client-visible error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    TransientStorage,
    Storage,
}

impl CartError {
    /// The category of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Transient(_) => ErrorKind::TransientStorage,
            Self::Storage(_) => ErrorKind::Storage,
        }
    }

    /// Whether repeating the same call may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict(_) | Self::Transient(_))
    }
}

impl From<LineValueError> for CartError {
    fn from(err: LineValueError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<SessionIdError> for CartError {
    fn from(err: SessionIdError) -> Self {
        Self::Validation(err.to_string())
    }
}

/// Result type alias for `CartError`.
pub type Result<T> = std::result::Result<T, CartError>;
