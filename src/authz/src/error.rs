//! Error types for the authorization core

use atrium_core::{CoreError, InvitationId, UserId};
use thiserror::Error;

/// Authorization core errors
#[derive(Debug, Error)]
pub enum AuthzError {
    /// Domain-rule violation from the core model or a storage constraint
    #[error(transparent)]
    Domain(#[from] CoreError),

    /// Invalid input
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The caller is not permitted to perform the action
    ///
    /// Carries no detail on purpose: whether the principal was not a
    /// member or simply held no matching permission is logged internally
    /// but never surfaced to callers.
    #[error("permission denied")]
    PermissionDenied,

    /// The invitation can no longer be accepted
    #[error("invitation expired: {0}")]
    InvitationExpired(InvitationId),

    /// Self-provisioning failed; the account has no organizational context
    /// and needs operator intervention
    #[error("provisioning failed for principal {principal}: {reason}")]
    ProvisioningFailed {
        /// Account that could not be provisioned
        principal: UserId,
        /// What went wrong in the self-signup branch
        reason: String,
    },

    /// Database error
    #[error("database error: {0}")]
    Database(String),
}

/// Result type for authorization operations
pub type Result<T> = std::result::Result<T, AuthzError>;
