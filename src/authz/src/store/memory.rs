//! In-memory storage backend
//!
//! Backs the engine in tests and single-process deployments. All state
//! lives behind one `RwLock`; provisioning plans are validated first and
//! then applied under a single write guard, which makes each branch
//! atomic without a separate transaction layer.

use super::{
    AssignmentStore, InvitationStore, MembershipStore, OrganizationStore, ProvisionPlan,
    ProvisionStore, RoleStore, TeamStore,
};
use crate::error::{AuthzError, Result};
use async_trait::async_trait;
use atrium_core::types::assignment::AssignmentKey;
use atrium_core::types::{
    Invitation, OrgMembership, Organization, Permission, PrincipalRef, Role, RoleAssignment,
    RoleScope, Team, TeamMembership, Workspace,
};
use atrium_core::{
    AssignmentId, CoreError, InvitationId, MembershipId, OrgId, PermissionId, RoleId, TeamId,
    UserId, WorkspaceId,
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// All rows, indexed by primary key plus the two hot-path natural keys
/// (membership by (user, org), assignment by its uniqueness tuple)
#[derive(Debug, Default)]
struct State {
    organizations: HashMap<OrgId, Organization>,
    workspaces: HashMap<WorkspaceId, Workspace>,
    memberships: HashMap<MembershipId, OrgMembership>,
    membership_index: HashMap<(UserId, OrgId), MembershipId>,
    teams: HashMap<TeamId, Team>,
    team_members: HashMap<(TeamId, UserId), TeamMembership>,
    roles: HashMap<RoleId, Role>,
    permissions: HashMap<PermissionId, Permission>,
    assignments: HashMap<AssignmentId, RoleAssignment>,
    assignment_index: HashMap<AssignmentKey, AssignmentId>,
    invitations: HashMap<InvitationId, Invitation>,
}

impl State {
    fn org_active(&self, id: OrgId) -> bool {
        self.organizations
            .get(&id)
            .map(|org| !org.is_deleted())
            .unwrap_or(false)
    }

    fn workspace_name_taken(&self, org_id: OrgId, normalized: &str) -> bool {
        self.workspaces.values().any(|workspace| {
            workspace.org_id == org_id
                && !workspace.is_deleted()
                && workspace.normalized_name() == normalized
        })
    }

    fn active_membership_id(&self, user_id: UserId, org_id: OrgId) -> Option<MembershipId> {
        let id = self.membership_index.get(&(user_id, org_id))?;
        let row = self.memberships.get(id)?;
        if row.is_deleted() {
            None
        } else {
            Some(*id)
        }
    }

    fn has_any_membership(&self, user_id: UserId) -> bool {
        self.memberships
            .values()
            .any(|row| row.user_id == user_id && !row.is_deleted())
    }

    /// Insert or reinstate an assignment row; the caller has already
    /// validated its references
    fn upsert_assignment_row(&mut self, assignment: RoleAssignment) -> AssignmentId {
        let key = assignment.key();
        if let Some(existing_id) = self.assignment_index.get(&key).copied() {
            if let Some(row) = self.assignments.get_mut(&existing_id) {
                if row.is_deleted() {
                    row.deleted_at = None;
                    row.granted_by_invitation = assignment.granted_by_invitation;
                }
                return existing_id;
            }
        }
        let id = assignment.id;
        self.assignment_index.insert(key, id);
        self.assignments.insert(id, assignment);
        id
    }

    /// Check a provisioning plan against current state without mutating it
    fn validate_plan(&self, plan: &ProvisionPlan, now: DateTime<Utc>) -> Result<()> {
        let target_org = match &plan.organization {
            Some(org) => {
                org.validate()?;
                if plan.workspace.org_id != org.id || plan.membership.org_id != org.id {
                    return Err(AuthzError::InvalidInput(
                        "provision plan rows span organizations".to_string(),
                    ));
                }
                if self.has_any_membership(plan.membership.user_id) {
                    return Err(CoreError::AlreadyExists(format!(
                        "principal {} already provisioned",
                        plan.membership.user_id
                    ))
                    .into());
                }
                org.id
            }
            None => {
                let org_id = plan.workspace.org_id;
                if !self.org_active(org_id) {
                    return Err(CoreError::InvalidReference(format!(
                        "organization {org_id} does not exist"
                    ))
                    .into());
                }
                if plan.membership.org_id != org_id {
                    return Err(AuthzError::InvalidInput(
                        "provision plan rows span organizations".to_string(),
                    ));
                }
                org_id
            }
        };

        plan.workspace.validate()?;
        if plan.organization.is_none()
            && self.workspace_name_taken(target_org, &plan.workspace.normalized_name())
        {
            return Err(CoreError::AlreadyExists(format!(
                "workspace name '{}' already taken in organization {target_org}",
                plan.workspace.name
            ))
            .into());
        }

        if self
            .active_membership_id(plan.membership.user_id, target_org)
            .is_some()
        {
            return Err(CoreError::AlreadyExists(format!(
                "user {} is already a member of organization {target_org}",
                plan.membership.user_id
            ))
            .into());
        }

        for assignment in &plan.assignments {
            if assignment.org_id != target_org {
                return Err(AuthzError::InvalidInput(
                    "provision plan rows span organizations".to_string(),
                ));
            }
            let role = self
                .roles
                .get(&assignment.role_id)
                .filter(|role| !role.is_deleted())
                .ok_or_else(|| {
                    CoreError::InvalidReference(format!("role {} does not exist", assignment.role_id))
                })?;
            if !role.scope.visible_to(target_org) {
                return Err(CoreError::InvalidReference(format!(
                    "role {} is not visible to organization {target_org}",
                    role.id
                ))
                .into());
            }
        }

        if let Some((invitation_id, _)) = plan.accept_invitation {
            let invitation = self
                .invitations
                .get(&invitation_id)
                .filter(|invitation| !invitation.is_deleted())
                .ok_or_else(|| {
                    CoreError::InvalidReference(format!(
                        "invitation {invitation_id} does not exist"
                    ))
                })?;
            if !invitation.is_pending_at(now) {
                return Err(CoreError::ValidationFailed(format!(
                    "invitation {invitation_id} is no longer pending"
                ))
                .into());
            }
        }

        Ok(())
    }
}

/// In-memory storage backend
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrganizationStore for InMemoryStore {
    async fn insert_organization(&self, org: Organization) -> Result<OrgId> {
        org.validate()?;
        let mut state = self.state.write().await;
        if state.organizations.contains_key(&org.id) {
            return Err(CoreError::AlreadyExists(format!("organization {}", org.id)).into());
        }
        let id = org.id;
        state.organizations.insert(id, org);
        Ok(id)
    }

    async fn get_organization(&self, id: OrgId) -> Result<Option<Organization>> {
        let state = self.state.read().await;
        Ok(state.organizations.get(&id).cloned())
    }

    async fn delete_organization(&self, id: OrgId) -> Result<()> {
        let mut state = self.state.write().await;
        let now = Utc::now();
        let org = state
            .organizations
            .get_mut(&id)
            .ok_or_else(|| CoreError::NotFound(format!("organization {id}")))?;
        if org.deleted_at.is_some() {
            return Ok(());
        }
        org.deleted_at = Some(now);
        org.updated_at = now;

        // Cascade: workspaces, teams, memberships, and assignments never
        // outlive their organization
        for workspace in state.workspaces.values_mut() {
            if workspace.org_id == id && workspace.deleted_at.is_none() {
                workspace.deleted_at = Some(now);
            }
        }
        for team in state.teams.values_mut() {
            if team.org_id == id && team.deleted_at.is_none() {
                team.deleted_at = Some(now);
            }
        }
        for membership in state.memberships.values_mut() {
            if membership.org_id == id && membership.deleted_at.is_none() {
                membership.deleted_at = Some(now);
            }
        }
        for assignment in state.assignments.values_mut() {
            if assignment.org_id == id && assignment.deleted_at.is_none() {
                assignment.deleted_at = Some(now);
            }
        }
        Ok(())
    }

    async fn insert_workspace(&self, workspace: Workspace) -> Result<WorkspaceId> {
        workspace.validate()?;
        let mut state = self.state.write().await;
        if !state.org_active(workspace.org_id) {
            return Err(CoreError::InvalidReference(format!(
                "organization {} does not exist",
                workspace.org_id
            ))
            .into());
        }
        if state.workspace_name_taken(workspace.org_id, &workspace.normalized_name()) {
            return Err(CoreError::AlreadyExists(format!(
                "workspace name '{}' already taken in organization {}",
                workspace.name, workspace.org_id
            ))
            .into());
        }
        let id = workspace.id;
        state.workspaces.insert(id, workspace);
        Ok(id)
    }

    async fn get_workspace(&self, id: WorkspaceId) -> Result<Option<Workspace>> {
        let state = self.state.read().await;
        Ok(state.workspaces.get(&id).cloned())
    }

    async fn workspaces_in_org(&self, org_id: OrgId) -> Result<Vec<Workspace>> {
        let state = self.state.read().await;
        let mut workspaces: Vec<Workspace> = state
            .workspaces
            .values()
            .filter(|workspace| workspace.org_id == org_id && !workspace.is_deleted())
            .cloned()
            .collect();
        workspaces.sort_by_key(|workspace| workspace.created_at);
        Ok(workspaces)
    }
}

#[async_trait]
impl RoleStore for InMemoryStore {
    async fn insert_role(&self, role: Role) -> Result<RoleId> {
        role.validate()?;
        let mut state = self.state.write().await;
        if let RoleScope::Organization(org_id) = role.scope {
            if !state.org_active(org_id) {
                return Err(CoreError::InvalidReference(format!(
                    "organization {org_id} does not exist"
                ))
                .into());
            }
        }
        if state.roles.contains_key(&role.id) {
            return Err(CoreError::AlreadyExists(format!("role {}", role.id)).into());
        }
        let id = role.id;
        state.roles.insert(id, role);
        Ok(id)
    }

    async fn get_role(&self, id: RoleId) -> Result<Option<Role>> {
        let state = self.state.read().await;
        Ok(state.roles.get(&id).cloned())
    }

    async fn find_role_by_name(&self, name: &str, org_id: Option<OrgId>) -> Result<Option<Role>> {
        let state = self.state.read().await;
        let candidates: Vec<&Role> = state
            .roles
            .values()
            .filter(|role| !role.is_deleted() && role.name.eq_ignore_ascii_case(name))
            .collect();

        // Organization-scoped roles shadow system-wide ones of the same name
        if let Some(org_id) = org_id {
            if let Some(role) = candidates
                .iter()
                .find(|role| matches!(role.scope, RoleScope::Organization(owner) if owner == org_id))
            {
                return Ok(Some((*role).clone()));
            }
        }
        Ok(candidates
            .iter()
            .find(|role| matches!(role.scope, RoleScope::Global))
            .map(|role| (*role).clone()))
    }

    async fn delete_role(&self, id: RoleId) -> Result<()> {
        let mut state = self.state.write().await;
        let now = Utc::now();
        let role = state
            .roles
            .get_mut(&id)
            .ok_or_else(|| CoreError::NotFound(format!("role {id}")))?;
        if role.deleted_at.is_none() {
            role.deleted_at = Some(now);
            role.updated_at = now;
        }
        Ok(())
    }

    async fn insert_permission(&self, permission: Permission) -> Result<PermissionId> {
        let mut state = self.state.write().await;
        if !state
            .roles
            .get(&permission.role_id)
            .map(|role| !role.is_deleted())
            .unwrap_or(false)
        {
            return Err(CoreError::InvalidReference(format!(
                "role {} does not exist",
                permission.role_id
            ))
            .into());
        }
        let id = permission.id;
        state.permissions.insert(id, permission);
        Ok(id)
    }

    async fn permissions_for_role(&self, role_id: RoleId) -> Result<Vec<Permission>> {
        let state = self.state.read().await;
        Ok(state
            .permissions
            .values()
            .filter(|permission| permission.role_id == role_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl AssignmentStore for InMemoryStore {
    async fn upsert_assignment(&self, assignment: RoleAssignment) -> Result<AssignmentId> {
        let mut state = self.state.write().await;
        if !state.org_active(assignment.org_id) {
            return Err(CoreError::InvalidReference(format!(
                "organization {} does not exist",
                assignment.org_id
            ))
            .into());
        }
        if !state
            .roles
            .get(&assignment.role_id)
            .map(|role| !role.is_deleted())
            .unwrap_or(false)
        {
            return Err(CoreError::InvalidReference(format!(
                "role {} does not exist",
                assignment.role_id
            ))
            .into());
        }
        Ok(state.upsert_assignment_row(assignment))
    }

    async fn revoke_assignment(&self, id: AssignmentId) -> Result<()> {
        let mut state = self.state.write().await;
        let assignment = state
            .assignments
            .get_mut(&id)
            .ok_or_else(|| CoreError::NotFound(format!("assignment {id}")))?;
        if assignment.deleted_at.is_none() {
            assignment.deleted_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn assignments_for(
        &self,
        principals: &[PrincipalRef],
        org_id: OrgId,
    ) -> Result<Vec<RoleAssignment>> {
        let state = self.state.read().await;
        Ok(state
            .assignments
            .values()
            .filter(|assignment| {
                assignment.org_id == org_id
                    && !assignment.is_deleted()
                    && principals.contains(&assignment.principal)
            })
            .cloned()
            .collect())
    }

    async fn revoke_assignments_from_invitation(
        &self,
        invitation_id: InvitationId,
    ) -> Result<u64> {
        let mut state = self.state.write().await;
        let now = Utc::now();
        let mut revoked = 0;
        for assignment in state.assignments.values_mut() {
            if assignment.granted_by_invitation == Some(invitation_id)
                && assignment.deleted_at.is_none()
            {
                assignment.deleted_at = Some(now);
                revoked += 1;
            }
        }
        Ok(revoked)
    }
}

#[async_trait]
impl MembershipStore for InMemoryStore {
    async fn is_member(&self, user_id: UserId, org_id: OrgId) -> Result<bool> {
        let state = self.state.read().await;
        Ok(state.active_membership_id(user_id, org_id).is_some())
    }

    async fn insert_membership(&self, membership: OrgMembership) -> Result<MembershipId> {
        let mut state = self.state.write().await;
        if !state.org_active(membership.org_id) {
            return Err(CoreError::InvalidReference(format!(
                "organization {} does not exist",
                membership.org_id
            ))
            .into());
        }
        if state
            .active_membership_id(membership.user_id, membership.org_id)
            .is_some()
        {
            return Err(CoreError::AlreadyExists(format!(
                "user {} is already a member of organization {}",
                membership.user_id, membership.org_id
            ))
            .into());
        }
        let id = membership.id;
        state
            .membership_index
            .insert((membership.user_id, membership.org_id), id);
        state.memberships.insert(id, membership);
        Ok(id)
    }

    async fn memberships_for_user(&self, user_id: UserId) -> Result<Vec<OrgMembership>> {
        let state = self.state.read().await;
        let mut memberships: Vec<OrgMembership> = state
            .memberships
            .values()
            .filter(|membership| membership.user_id == user_id && !membership.is_deleted())
            .cloned()
            .collect();
        memberships.sort_by_key(|membership| membership.created_at);
        Ok(memberships)
    }
}

#[async_trait]
impl TeamStore for InMemoryStore {
    async fn insert_team(&self, team: Team) -> Result<TeamId> {
        team.validate()?;
        let mut state = self.state.write().await;
        if !state.org_active(team.org_id) {
            return Err(CoreError::InvalidReference(format!(
                "organization {} does not exist",
                team.org_id
            ))
            .into());
        }
        let id = team.id;
        state.teams.insert(id, team);
        Ok(id)
    }

    async fn get_team(&self, id: TeamId) -> Result<Option<Team>> {
        let state = self.state.read().await;
        Ok(state.teams.get(&id).cloned())
    }

    async fn insert_team_member(&self, membership: TeamMembership) -> Result<()> {
        let mut state = self.state.write().await;
        let team = state
            .teams
            .get(&membership.team_id)
            .filter(|team| !team.is_deleted())
            .ok_or_else(|| {
                CoreError::InvalidReference(format!("team {} does not exist", membership.team_id))
            })?;
        // Team membership is scoped to the team's organization
        if state
            .active_membership_id(membership.user_id, team.org_id)
            .is_none()
        {
            return Err(CoreError::InvalidReference(format!(
                "user {} is not a member of organization {}",
                membership.user_id, team.org_id
            ))
            .into());
        }
        state
            .team_members
            .insert((membership.team_id, membership.user_id), membership);
        Ok(())
    }

    async fn teams_for_user(&self, user_id: UserId, org_id: OrgId) -> Result<Vec<TeamId>> {
        let state = self.state.read().await;
        Ok(state
            .team_members
            .values()
            .filter(|membership| membership.user_id == user_id)
            .filter_map(|membership| {
                let team = state.teams.get(&membership.team_id)?;
                (team.org_id == org_id && !team.is_deleted()).then_some(team.id)
            })
            .collect())
    }
}

#[async_trait]
impl InvitationStore for InMemoryStore {
    async fn insert_invitation(&self, invitation: Invitation) -> Result<InvitationId> {
        invitation.validate()?;
        let mut state = self.state.write().await;
        if !state.org_active(invitation.org_id) {
            return Err(CoreError::InvalidReference(format!(
                "organization {} does not exist",
                invitation.org_id
            ))
            .into());
        }
        let id = invitation.id;
        state.invitations.insert(id, invitation);
        Ok(id)
    }

    async fn get_invitation(&self, id: InvitationId) -> Result<Option<Invitation>> {
        let state = self.state.read().await;
        Ok(state.invitations.get(&id).cloned())
    }

    async fn latest_pending_for_email(
        &self,
        email: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Invitation>> {
        let state = self.state.read().await;
        Ok(state
            .invitations
            .values()
            .filter(|invitation| {
                invitation.email.eq_ignore_ascii_case(email) && invitation.is_pending_at(now)
            })
            .max_by_key(|invitation| invitation.created_at)
            .cloned())
    }

    async fn mark_accepted(&self, id: InvitationId, at: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.write().await;
        let invitation = state
            .invitations
            .get_mut(&id)
            .filter(|invitation| !invitation.is_deleted())
            .ok_or_else(|| CoreError::NotFound(format!("invitation {id}")))?;
        if invitation.accepted_at.is_some() {
            return Ok(());
        }
        if !invitation.is_pending_at(at) {
            return Err(CoreError::ValidationFailed(format!(
                "invitation {id} is no longer pending"
            ))
            .into());
        }
        invitation.accepted_at = Some(at);
        Ok(())
    }

    async fn mark_expired(&self, id: InvitationId, at: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.write().await;
        let invitation = state
            .invitations
            .get_mut(&id)
            .ok_or_else(|| CoreError::NotFound(format!("invitation {id}")))?;
        if invitation.expired_at.is_none() && invitation.accepted_at.is_none() {
            invitation.expired_at = Some(at);
        }
        Ok(())
    }

    async fn delete_invitation(&self, id: InvitationId) -> Result<()> {
        let mut state = self.state.write().await;
        let invitation = state
            .invitations
            .get_mut(&id)
            .ok_or_else(|| CoreError::NotFound(format!("invitation {id}")))?;
        if invitation.deleted_at.is_none() {
            invitation.deleted_at = Some(Utc::now());
        }
        Ok(())
    }
}

#[async_trait]
impl ProvisionStore for InMemoryStore {
    async fn apply_provision(&self, plan: ProvisionPlan) -> Result<()> {
        let mut state = self.state.write().await;
        let now = Utc::now();

        // Validate against current state before touching it; holding the
        // write guard across both phases makes the branch atomic
        state.validate_plan(&plan, now)?;

        if let Some(org) = plan.organization {
            state.organizations.insert(org.id, org);
        }
        state.workspaces.insert(plan.workspace.id, plan.workspace);
        state.membership_index.insert(
            (plan.membership.user_id, plan.membership.org_id),
            plan.membership.id,
        );
        state
            .memberships
            .insert(plan.membership.id, plan.membership);
        for assignment in plan.assignments {
            state.upsert_assignment_row(assignment);
        }
        if let Some((invitation_id, accepted_at)) = plan.accept_invitation {
            if let Some(invitation) = state.invitations.get_mut(&invitation_id) {
                invitation.accepted_at = Some(accepted_at);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    async fn store_with_org() -> (InMemoryStore, OrgId) {
        let store = InMemoryStore::new();
        let org = Organization::new("acme", Uuid::new_v4());
        let org_id = store.insert_organization(org).await.unwrap();
        (store, org_id)
    }

    #[tokio::test]
    async fn test_workspace_name_unique_per_org_case_insensitive() {
        let (store, org_id) = store_with_org().await;

        store
            .insert_workspace(Workspace::new(org_id, "Design"))
            .await
            .unwrap();

        let duplicate = store
            .insert_workspace(Workspace::new(org_id, "design"))
            .await;
        assert!(matches!(
            duplicate,
            Err(AuthzError::Domain(CoreError::AlreadyExists(_)))
        ));

        // Same name in another organization is fine
        let other = Organization::new("other", Uuid::new_v4());
        let other_id = store.insert_organization(other).await.unwrap();
        assert!(store
            .insert_workspace(Workspace::new(other_id, "Design"))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_upsert_assignment_is_idempotent() {
        let (store, org_id) = store_with_org().await;
        let role_id = store
            .insert_role(Role::new("editor", RoleScope::Global))
            .await
            .unwrap();
        let principal = PrincipalRef::User(Uuid::new_v4());

        let first = store
            .upsert_assignment(RoleAssignment::new(principal, org_id, None, role_id))
            .await
            .unwrap();
        let second = store
            .upsert_assignment(RoleAssignment::new(principal, org_id, None, role_id))
            .await
            .unwrap();

        assert_eq!(first, second);
        let rows = store
            .assignments_for(&[principal], org_id)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn test_revoked_assignment_is_reinstated_on_regrant() {
        let (store, org_id) = store_with_org().await;
        let role_id = store
            .insert_role(Role::new("editor", RoleScope::Global))
            .await
            .unwrap();
        let principal = PrincipalRef::User(Uuid::new_v4());

        let id = store
            .upsert_assignment(RoleAssignment::new(principal, org_id, None, role_id))
            .await
            .unwrap();
        store.revoke_assignment(id).await.unwrap();
        assert!(store
            .assignments_for(&[principal], org_id)
            .await
            .unwrap()
            .is_empty());

        let regranted = store
            .upsert_assignment(RoleAssignment::new(principal, org_id, None, role_id))
            .await
            .unwrap();
        assert_eq!(regranted, id);
        assert_eq!(
            store
                .assignments_for(&[principal], org_id)
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_delete_organization_cascades() {
        let (store, org_id) = store_with_org().await;
        let user_id = Uuid::new_v4();
        let role_id = store
            .insert_role(Role::new("editor", RoleScope::Global))
            .await
            .unwrap();
        store
            .insert_workspace(Workspace::new(org_id, "main"))
            .await
            .unwrap();
        store
            .insert_membership(OrgMembership::new(org_id, user_id))
            .await
            .unwrap();
        let principal = PrincipalRef::User(user_id);
        store
            .upsert_assignment(RoleAssignment::new(principal, org_id, None, role_id))
            .await
            .unwrap();

        store.delete_organization(org_id).await.unwrap();

        assert!(!store.is_member(user_id, org_id).await.unwrap());
        assert!(store.workspaces_in_org(org_id).await.unwrap().is_empty());
        assert!(store
            .assignments_for(&[principal], org_id)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_latest_pending_for_email_orders_by_creation() {
        let (store, org_id) = store_with_org().await;
        let inviter = Uuid::new_v4();
        let now = Utc::now();

        let mut older = Invitation::new(
            "alice@example.com",
            org_id,
            None,
            inviter,
            now + chrono::Duration::days(7),
        );
        older.created_at = now - chrono::Duration::hours(2);
        let newer = Invitation::new(
            "Alice@Example.com",
            org_id,
            None,
            inviter,
            now + chrono::Duration::days(7),
        );
        let newer_id = newer.id;

        store.insert_invitation(older).await.unwrap();
        store.insert_invitation(newer).await.unwrap();

        let latest = store
            .latest_pending_for_email("alice@example.com", now)
            .await
            .unwrap()
            .map(|invitation| invitation.id);
        assert_eq!(latest, Some(newer_id));
    }

    #[tokio::test]
    async fn test_expired_invitation_not_selected_as_candidate() {
        let (store, org_id) = store_with_org().await;
        let now = Utc::now();
        let stale = Invitation::new(
            "bob@example.com",
            org_id,
            None,
            Uuid::new_v4(),
            now - chrono::Duration::minutes(1),
        );
        store.insert_invitation(stale).await.unwrap();

        assert!(store
            .latest_pending_for_email("bob@example.com", now)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_failed_plan_commits_nothing() {
        let (store, org_id) = store_with_org().await;
        let user_id = Uuid::new_v4();

        let workspace = Workspace::new(org_id, "bob-workspace");
        let membership = OrgMembership::new(org_id, user_id);
        // References a role that does not exist, so the plan must fail
        let assignment = RoleAssignment::new(
            PrincipalRef::User(user_id),
            org_id,
            None,
            Uuid::new_v4(),
        );

        let plan = ProvisionPlan {
            organization: None,
            workspace: workspace.clone(),
            membership,
            assignments: vec![assignment],
            accept_invitation: None,
        };

        assert!(store.apply_provision(plan).await.is_err());
        assert!(!store.is_member(user_id, org_id).await.unwrap());
        assert!(store.get_workspace(workspace.id).await.unwrap().is_none());
    }
}
