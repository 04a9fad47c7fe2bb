//! Administrative role assignment management
//!
//! Grants and revocations outside the provisioning flow go through this
//! service; it validates references before writing and preserves the
//! store's idempotent-grant contract.

use crate::error::Result;
use crate::store::AuthzStore;
use atrium_core::types::{PrincipalRef, RoleAssignment};
use atrium_core::{AssignmentId, CoreError, OrgId, RoleId, WorkspaceId};
use std::sync::Arc;
use tracing::info;

/// Administrative grant/revoke surface over the assignment store
#[derive(Clone)]
pub struct AssignmentService {
    store: Arc<dyn AuthzStore>,
}

impl AssignmentService {
    /// Create a service over the given store
    pub fn new(store: Arc<dyn AuthzStore>) -> Self {
        Self { store }
    }

    /// Grant `role_id` to `principal` in `org_id`, optionally narrowed to
    /// one workspace
    ///
    /// Granting an already-existing (principal, organization, workspace,
    /// role) tuple is a no-op, not an error; the surviving assignment id
    /// is returned either way.
    pub async fn grant_role(
        &self,
        principal: PrincipalRef,
        org_id: OrgId,
        workspace_id: Option<WorkspaceId>,
        role_id: RoleId,
    ) -> Result<AssignmentId> {
        let role = self
            .store
            .get_role(role_id)
            .await?
            .filter(|role| !role.is_deleted())
            .ok_or_else(|| CoreError::InvalidReference(format!("role {role_id} does not exist")))?;
        if !role.scope.visible_to(org_id) {
            return Err(CoreError::InvalidReference(format!(
                "role {role_id} is not visible to organization {org_id}"
            ))
            .into());
        }

        if let Some(workspace_id) = workspace_id {
            let workspace = self
                .store
                .get_workspace(workspace_id)
                .await?
                .filter(|workspace| !workspace.is_deleted())
                .ok_or_else(|| {
                    CoreError::InvalidReference(format!("workspace {workspace_id} does not exist"))
                })?;
            if workspace.org_id != org_id {
                return Err(CoreError::InvalidReference(format!(
                    "workspace {workspace_id} does not belong to organization {org_id}"
                ))
                .into());
            }
        }

        let assignment = RoleAssignment::new(principal, org_id, workspace_id, role_id);
        let id = self.store.upsert_assignment(assignment).await?;
        info!(assignment_id = %id, role_id = %role_id, org_id = %org_id, "Role granted");
        Ok(id)
    }

    /// Soft-delete an assignment
    pub async fn revoke_role(&self, assignment_id: AssignmentId) -> Result<()> {
        self.store.revoke_assignment(assignment_id).await?;
        info!(assignment_id = %assignment_id, "Role revoked");
        Ok(())
    }

    /// Non-deleted assignments held by `principal` in `org_id`
    pub async fn list_assignments(
        &self,
        principal: PrincipalRef,
        org_id: OrgId,
    ) -> Result<Vec<RoleAssignment>> {
        self.store.assignments_for(&[principal], org_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AuthzError;
    use crate::store::{InMemoryStore, OrganizationStore, RoleStore};
    use atrium_core::types::{Organization, Role, RoleScope, Workspace};
    use uuid::Uuid;

    async fn setup() -> (Arc<InMemoryStore>, AssignmentService, OrgId, RoleId) {
        let store = Arc::new(InMemoryStore::new());
        let org_id = store
            .insert_organization(Organization::new("acme", Uuid::new_v4()))
            .await
            .unwrap();
        let role_id = store
            .insert_role(Role::new("editor", RoleScope::Global))
            .await
            .unwrap();
        let service = AssignmentService::new(store.clone());
        (store, service, org_id, role_id)
    }

    #[tokio::test]
    async fn test_duplicate_grant_is_noop() {
        let (_store, service, org_id, role_id) = setup().await;
        let principal = PrincipalRef::User(Uuid::new_v4());

        let first = service
            .grant_role(principal, org_id, None, role_id)
            .await
            .unwrap();
        let second = service
            .grant_role(principal, org_id, None, role_id)
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(
            service.list_assignments(principal, org_id).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_grant_rejects_foreign_workspace() {
        let (store, service, org_id, role_id) = setup().await;
        let other_org = store
            .insert_organization(Organization::new("other", Uuid::new_v4()))
            .await
            .unwrap();
        let foreign_workspace = store
            .insert_workspace(Workspace::new(other_org, "main"))
            .await
            .unwrap();

        let result = service
            .grant_role(
                PrincipalRef::User(Uuid::new_v4()),
                org_id,
                Some(foreign_workspace),
                role_id,
            )
            .await;
        assert!(matches!(
            result,
            Err(AuthzError::Domain(CoreError::InvalidReference(_)))
        ));
    }

    #[tokio::test]
    async fn test_grant_rejects_org_private_role_elsewhere() {
        let (store, service, org_id, _role_id) = setup().await;
        let other_org = store
            .insert_organization(Organization::new("other", Uuid::new_v4()))
            .await
            .unwrap();
        let private_role = store
            .insert_role(Role::new("auditor", RoleScope::Organization(other_org)))
            .await
            .unwrap();

        let result = service
            .grant_role(PrincipalRef::User(Uuid::new_v4()), org_id, None, private_role)
            .await;
        assert!(matches!(
            result,
            Err(AuthzError::Domain(CoreError::InvalidReference(_)))
        ));
    }
}
