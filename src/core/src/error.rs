//! Error types shared across the authorization core

use thiserror::Error;

/// Domain errors for the authorization core
///
/// Storage backends translate raw constraint violations (uniqueness,
/// foreign key, not-null) into these kinds rather than leaking driver
/// errors to callers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// A row with the same natural key already exists
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// A reference points at a missing or deleted row
    #[error("invalid reference: {0}")]
    InvalidReference(String),

    /// A required field was empty or absent
    #[error("missing required field: {0}")]
    MissingRequiredField(&'static str),

    /// Input failed domain validation
    #[error("validation failed: {0}")]
    ValidationFailed(String),

    /// Entity not found
    #[error("not found: {0}")]
    NotFound(String),
}

/// Result type for core domain operations
pub type Result<T> = std::result::Result<T, CoreError>;
