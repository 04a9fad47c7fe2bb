//! Domain model for the authorization core
//!
//! Organizations are the tenant root; workspaces, memberships, teams,
//! role assignments, and invitations all hang off exactly one
//! organization. Roles bundle permissions and are either system-wide or
//! private to one organization.

pub mod assignment;
pub mod invitation;
pub mod org;
pub mod principal;
pub mod role;

pub use assignment::RoleAssignment;
pub use invitation::{Invitation, InvitationStatus};
pub use org::{OrgMembership, Organization, Workspace};
pub use principal::{PrincipalRef, Team, TeamMembership};
pub use role::{ActionKind, Permission, PermissionScope, ResourceKind, Role, RoleScope};

use uuid::Uuid;

/// Unique organization identifier
pub type OrgId = Uuid;

/// Unique workspace identifier
pub type WorkspaceId = Uuid;

/// Unique user identifier
pub type UserId = Uuid;

/// Unique team identifier
pub type TeamId = Uuid;

/// Unique role identifier
pub type RoleId = Uuid;

/// Unique permission identifier
pub type PermissionId = Uuid;

/// Unique role assignment identifier
pub type AssignmentId = Uuid;

/// Unique organization membership identifier
pub type MembershipId = Uuid;

/// Unique invitation identifier
pub type InvitationId = Uuid;

/// Unique entity-type identifier
pub type EntityTypeId = Uuid;
