//! Role assignments: grants of a role to a principal within an organization

use super::{AssignmentId, InvitationId, OrgId, PrincipalRef, RoleId, WorkspaceId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Natural key of an assignment
///
/// A given (principal, organization, workspace, role) tuple may exist at
/// most once; `None` workspace values compare equal to each other, so an
/// organization-wide grant cannot be duplicated either.
pub type AssignmentKey = (PrincipalRef, OrgId, Option<WorkspaceId>, RoleId);

/// Grant of a role to a principal within an organization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleAssignment {
    /// Assignment identifier
    pub id: AssignmentId,

    /// Principal holding the role
    pub principal: PrincipalRef,

    /// Organization the grant applies in
    pub org_id: OrgId,

    /// `None` applies the grant organization-wide (every workspace);
    /// `Some` narrows it to one workspace
    pub workspace_id: Option<WorkspaceId>,

    /// Granted role
    pub role_id: RoleId,

    /// Invitation that produced this grant, when provisioning an invited
    /// account; revoking the invitation revokes these rows
    #[serde(skip_serializing_if = "Option::is_none")]
    pub granted_by_invitation: Option<InvitationId>,

    pub created_at: DateTime<Utc>,

    /// Soft-delete marker
    pub deleted_at: Option<DateTime<Utc>>,
}

impl RoleAssignment {
    /// Create a new assignment of `role_id` to `principal` in `org_id`
    pub fn new(
        principal: PrincipalRef,
        org_id: OrgId,
        workspace_id: Option<WorkspaceId>,
        role_id: RoleId,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            principal,
            org_id,
            workspace_id,
            role_id,
            granted_by_invitation: None,
            created_at: Utc::now(),
            deleted_at: None,
        }
    }

    /// Record the invitation that produced this grant
    pub fn granted_by(mut self, invitation_id: InvitationId) -> Self {
        self.granted_by_invitation = Some(invitation_id);
        self
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// The uniqueness key for this assignment
    pub fn key(&self) -> AssignmentKey {
        (self.principal, self.org_id, self.workspace_id, self.role_id)
    }

    /// Whether this assignment applies to a query against `workspace_id`
    ///
    /// An organization-wide assignment applies to every workspace (and to
    /// queries with no workspace); a workspace-scoped assignment applies
    /// only when the query names that exact workspace.
    pub fn applies_to(&self, workspace_id: Option<WorkspaceId>) -> bool {
        match self.workspace_id {
            None => true,
            Some(scoped) => workspace_id == Some(scoped),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_org_wide_assignment_applies_everywhere() {
        let assignment = RoleAssignment::new(
            PrincipalRef::User(Uuid::new_v4()),
            Uuid::new_v4(),
            None,
            Uuid::new_v4(),
        );

        assert!(assignment.applies_to(None));
        assert!(assignment.applies_to(Some(Uuid::new_v4())));
    }

    #[test]
    fn test_workspace_assignment_applies_only_to_that_workspace() {
        let workspace = Uuid::new_v4();
        let assignment = RoleAssignment::new(
            PrincipalRef::User(Uuid::new_v4()),
            Uuid::new_v4(),
            Some(workspace),
            Uuid::new_v4(),
        );

        assert!(assignment.applies_to(Some(workspace)));
        assert!(!assignment.applies_to(Some(Uuid::new_v4())));
        assert!(!assignment.applies_to(None));
    }

    #[test]
    fn test_assignment_key_treats_none_workspaces_as_equal() {
        let principal = PrincipalRef::User(Uuid::new_v4());
        let org = Uuid::new_v4();
        let role = Uuid::new_v4();

        let first = RoleAssignment::new(principal, org, None, role);
        let second = RoleAssignment::new(principal, org, None, role);
        assert_eq!(first.key(), second.key());
        assert_ne!(first.id, second.id);
    }
}
