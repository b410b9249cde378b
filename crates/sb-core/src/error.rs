//! # AppError
//!
//! Centralized error handling for Sigmaboard.
//! Maps domain-specific failures to actionable error types.

use thiserror::Error;

/// The primary error type for all sb-core operations.
#[derive(Error, Debug)]
pub enum AppError {
    /// Resource not found (e.g., Post, Comment, User)
    #[error("{0} not found with ID {1}")]
    NotFound(String, String),

    /// Validation failure (e.g., empty post, disallowed file type, oversized upload)
    #[error("validation error: {0}")]
    ValidationError(String),

    /// Permission failure (e.g., deleting someone else's post, bad anti-forgery token)
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Vote request named something other than a post or a comment
    #[error("invalid item type: {0}")]
    InvalidItemType(String),

    /// Vote request carried a missing or non-integer item id
    #[error("invalid item id")]
    InvalidItemId,

    /// Vote request carried a direction other than up/down
    #[error("invalid vote type: {0}")]
    InvalidVoteType(String),

    /// The caller has no valid alias for this request
    #[error("no valid identity for this session")]
    NoIdentity,

    /// Alias generation gave up after the configured number of attempts
    #[error("could not allocate an alias after {0} attempts")]
    IdentityExhausted(u32),

    /// Resource already exists (e.g., alias primary-key collision)
    #[error("conflict: {0}")]
    Conflict(String),

    /// Infrastructure failure (e.g., database down, disk full)
    #[error("internal service error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn not_found(kind: &str, id: impl ToString) -> Self {
        Self::NotFound(kind.to_string(), id.to_string())
    }

    /// True for failures caused by the server rather than the caller.
    pub fn is_server_error(&self) -> bool {
        matches!(self, Self::Internal(_) | Self::IdentityExhausted(_))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

/// A specialized Result type for Sigmaboard logic.
pub type Result<T> = std::result::Result<T, AppError>;
