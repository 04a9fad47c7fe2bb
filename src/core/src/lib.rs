//! # Atrium Core
//!
//! Shared identifiers, domain model, and error handling for the Atrium
//! authorization platform. Every crate that stores or evaluates
//! organization, role, and membership data agrees on the types defined
//! here, which keeps the storage and engine layers free of circular
//! dependencies.

pub mod error;
pub mod types;

// Re-export commonly used types
pub use error::{CoreError, Result};
pub use types::{
    AssignmentId, EntityTypeId, InvitationId, MembershipId, OrgId, PermissionId, RoleId, TeamId,
    UserId, WorkspaceId,
};
