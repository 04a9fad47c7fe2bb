//! Storage contracts for the authorization core
//!
//! Each trait covers one concern so backends can be tested in isolation,
//! but the engine and services consume them through the combined
//! [`AuthzStore`] supertrait and a single backend is injected as
//! `Arc<dyn AuthzStore>`.

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::InMemoryStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresStore;

use crate::error::Result;
use async_trait::async_trait;
use atrium_core::types::{
    Invitation, OrgMembership, Organization, Permission, PrincipalRef, Role, RoleAssignment, Team,
    TeamMembership, Workspace,
};
use atrium_core::{
    AssignmentId, InvitationId, MembershipId, OrgId, PermissionId, RoleId, TeamId, UserId,
    WorkspaceId,
};
use chrono::{DateTime, Utc};

/// Organization and workspace persistence
#[async_trait]
pub trait OrganizationStore: Send + Sync {
    /// Insert a new organization
    async fn insert_organization(&self, org: Organization) -> Result<OrgId>;

    /// Fetch an organization; returns deleted rows too so callers can
    /// distinguish "gone" from "never existed"
    async fn get_organization(&self, id: OrgId) -> Result<Option<Organization>>;

    /// Soft-delete the organization and cascade to its workspaces, teams,
    /// memberships, and assignments
    async fn delete_organization(&self, id: OrgId) -> Result<()>;

    /// Insert a new workspace; rejects a name already taken in the same
    /// organization, compared case-insensitively
    async fn insert_workspace(&self, workspace: Workspace) -> Result<WorkspaceId>;

    /// Fetch a workspace
    async fn get_workspace(&self, id: WorkspaceId) -> Result<Option<Workspace>>;

    /// Non-deleted workspaces of an organization
    async fn workspaces_in_org(&self, org_id: OrgId) -> Result<Vec<Workspace>>;
}

/// Role and permission persistence
#[async_trait]
pub trait RoleStore: Send + Sync {
    /// Insert a new role
    async fn insert_role(&self, role: Role) -> Result<RoleId>;

    /// Fetch a role
    async fn get_role(&self, id: RoleId) -> Result<Option<Role>>;

    /// Find a non-deleted role by name (case-insensitive), restricted to
    /// roles visible inside `org_id`: the organization's own roles first,
    /// then system-wide ones. `None` searches system-wide roles only.
    async fn find_role_by_name(&self, name: &str, org_id: Option<OrgId>) -> Result<Option<Role>>;

    /// Soft-delete a role, hiding it and its permissions from evaluation
    async fn delete_role(&self, id: RoleId) -> Result<()>;

    /// Insert a permission owned by an existing role
    async fn insert_permission(&self, permission: Permission) -> Result<PermissionId>;

    /// All permissions of a role, including those of soft-deleted roles
    /// (history is preserved; evaluation filters deleted roles itself)
    async fn permissions_for_role(&self, role_id: RoleId) -> Result<Vec<Permission>>;
}

/// Role assignment persistence
#[async_trait]
pub trait AssignmentStore: Send + Sync {
    /// Insert an assignment unless its (principal, organization,
    /// workspace, role) tuple already exists; returns the surviving row's
    /// id either way. A previously revoked tuple is reinstated.
    async fn upsert_assignment(&self, assignment: RoleAssignment) -> Result<AssignmentId>;

    /// Soft-delete an assignment
    async fn revoke_assignment(&self, id: AssignmentId) -> Result<()>;

    /// Non-deleted assignments held by any of `principals` in `org_id`
    async fn assignments_for(
        &self,
        principals: &[PrincipalRef],
        org_id: OrgId,
    ) -> Result<Vec<RoleAssignment>>;

    /// Soft-delete every assignment a given invitation produced; returns
    /// the number of rows revoked
    async fn revoke_assignments_from_invitation(&self, invitation_id: InvitationId)
        -> Result<u64>;
}

/// Organization membership persistence
#[async_trait]
pub trait MembershipStore: Send + Sync {
    /// The narrow membership gate: true iff a non-deleted membership row
    /// exists. Deliberately non-recursive; implementations must never
    /// consult roles or assignments here.
    async fn is_member(&self, user_id: UserId, org_id: OrgId) -> Result<bool>;

    /// Insert a membership; rejects a duplicate (user, organization) pair
    async fn insert_membership(&self, membership: OrgMembership) -> Result<MembershipId>;

    /// Non-deleted memberships of a user, oldest first
    async fn memberships_for_user(&self, user_id: UserId) -> Result<Vec<OrgMembership>>;
}

/// Team persistence
#[async_trait]
pub trait TeamStore: Send + Sync {
    /// Insert a new team
    async fn insert_team(&self, team: Team) -> Result<TeamId>;

    /// Fetch a team
    async fn get_team(&self, id: TeamId) -> Result<Option<Team>>;

    /// Add a user to a team
    async fn insert_team_member(&self, membership: TeamMembership) -> Result<()>;

    /// Ids of the non-deleted teams `user_id` belongs to inside `org_id`
    async fn teams_for_user(&self, user_id: UserId, org_id: OrgId) -> Result<Vec<TeamId>>;
}

/// Invitation persistence
#[async_trait]
pub trait InvitationStore: Send + Sync {
    /// Insert a new invitation
    async fn insert_invitation(&self, invitation: Invitation) -> Result<InvitationId>;

    /// Fetch an invitation
    async fn get_invitation(&self, id: InvitationId) -> Result<Option<Invitation>>;

    /// Most recent non-deleted, non-accepted, non-expired invitation for
    /// `email` (case-insensitive), by creation time descending
    async fn latest_pending_for_email(
        &self,
        email: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Invitation>>;

    /// Record acceptance; the status becomes terminal
    async fn mark_accepted(&self, id: InvitationId, at: DateTime<Utc>) -> Result<()>;

    /// Lazy status transition for an invitation read past its expiry
    async fn mark_expired(&self, id: InvitationId, at: DateTime<Utc>) -> Result<()>;

    /// Soft-delete an invitation
    async fn delete_invitation(&self, id: InvitationId) -> Result<()>;
}

/// Row set produced by one provisioning branch
///
/// Built by the provisioning state machine and applied atomically by the
/// store: either every row commits or none do.
#[derive(Debug, Clone)]
pub struct ProvisionPlan {
    /// New personal organization; present on the self-signup branch only
    pub organization: Option<Organization>,

    /// The account's first workspace
    pub workspace: Workspace,

    /// The account's organization membership
    pub membership: OrgMembership,

    /// Initial role grants
    pub assignments: Vec<RoleAssignment>,

    /// Invitation to mark accepted; present on the invited branch only
    pub accept_invitation: Option<(InvitationId, DateTime<Utc>)>,
}

/// Atomic application of one provisioning branch
#[async_trait]
pub trait ProvisionStore: Send + Sync {
    /// Apply every row in the plan inside a single transactional
    /// boundary. Plans that create a personal organization are rejected
    /// with `AlreadyExists` when the account already holds any membership,
    /// which is the storage-level half of the provisioning idempotency
    /// guard.
    async fn apply_provision(&self, plan: ProvisionPlan) -> Result<()>;
}

/// Combined persistence surface consumed by the engine and services
pub trait AuthzStore:
    OrganizationStore
    + RoleStore
    + AssignmentStore
    + MembershipStore
    + TeamStore
    + InvitationStore
    + ProvisionStore
{
}

impl<T> AuthzStore for T where
    T: OrganizationStore
        + RoleStore
        + AssignmentStore
        + MembershipStore
        + TeamStore
        + InvitationStore
        + ProvisionStore
{
}
