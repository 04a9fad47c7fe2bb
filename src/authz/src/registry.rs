//! Role and permission registry
//!
//! Stores role definitions and the permissions each role grants.
//! System-wide roles are usable in every organization; organization-scoped
//! roles are private to the one that defined them.

use crate::error::Result;
use crate::store::AuthzStore;
use atrium_core::types::{ActionKind, Permission, PermissionScope, ResourceKind, Role, RoleScope};
use atrium_core::{PermissionId, RoleId};
use std::sync::Arc;
use tracing::{debug, info};

/// Name of the builtin organization-owner role
pub const OWNER_ROLE: &str = "owner";

/// Name of the builtin default member role
pub const MEMBER_ROLE: &str = "member";

/// Name of the builtin workspace-owner role
pub const WORKSPACE_OWNER_ROLE: &str = "workspace-owner";

/// Ids of the system roles provisioning grants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuiltinRoles {
    /// Organization-wide owner
    pub owner: RoleId,
    /// Default member granted to invited accounts without an explicit role
    pub member: RoleId,
    /// Owner of a single workspace
    pub workspace_owner: RoleId,
}

/// Registry of roles and their permission bundles
#[derive(Clone)]
pub struct RoleRegistry {
    store: Arc<dyn AuthzStore>,
}

impl RoleRegistry {
    /// Create a registry over the given store
    pub fn new(store: Arc<dyn AuthzStore>) -> Self {
        Self { store }
    }

    /// Create a new role
    ///
    /// Rejects empty names. `RoleScope::Global` makes the role visible to
    /// every organization; `RoleScope::Organization` keeps it private.
    pub async fn create_role(
        &self,
        name: impl Into<String>,
        description: Option<String>,
        scope: RoleScope,
    ) -> Result<RoleId> {
        let mut role = Role::new(name, scope);
        if let Some(description) = description {
            role = role.with_description(description);
        }
        role.validate()?;

        let id = self.store.insert_role(role).await?;
        info!(role_id = %id, "Role created");
        Ok(id)
    }

    /// Attach a permission to a role
    ///
    /// The scope selector carries its entity-type reference structurally,
    /// so an entity-type-specific permission cannot be registered without
    /// one and no other mode can carry one.
    pub async fn define_permission(
        &self,
        role_id: RoleId,
        resource: ResourceKind,
        action: ActionKind,
        scope: PermissionScope,
    ) -> Result<PermissionId> {
        let permission = Permission::new(role_id, resource, action, scope);
        let id = self.store.insert_permission(permission).await?;
        debug!(role_id = %role_id, permission_id = %id, "Permission defined");
        Ok(id)
    }

    /// All permissions of a role, history included
    pub async fn list_permissions(&self, role_id: RoleId) -> Result<Vec<Permission>> {
        self.store.permissions_for_role(role_id).await
    }

    /// Soft-delete a role, hiding it and its permissions from evaluation
    /// without removing history
    pub async fn delete_role(&self, role_id: RoleId) -> Result<()> {
        self.store.delete_role(role_id).await?;
        info!(role_id = %role_id, "Role soft-deleted");
        Ok(())
    }

    /// Ensure the builtin system roles exist, creating any that are
    /// missing. Idempotent; provisioning calls this before granting.
    pub async fn ensure_builtin_roles(&self) -> Result<BuiltinRoles> {
        let owner = self
            .find_or_create(OWNER_ROLE, "Full control of an organization", |role_id| {
                Self::owner_permissions(role_id)
            })
            .await?;
        let member = self
            .find_or_create(MEMBER_ROLE, "Read access across an organization", |role_id| {
                Self::member_permissions(role_id)
            })
            .await?;
        let workspace_owner = self
            .find_or_create(
                WORKSPACE_OWNER_ROLE,
                "Full control of a single workspace",
                |role_id| Self::workspace_owner_permissions(role_id),
            )
            .await?;

        Ok(BuiltinRoles {
            owner,
            member,
            workspace_owner,
        })
    }

    async fn find_or_create(
        &self,
        name: &str,
        description: &str,
        permissions: impl Fn(RoleId) -> Vec<Permission>,
    ) -> Result<RoleId> {
        if let Some(role) = self.store.find_role_by_name(name, None).await? {
            return Ok(role.id);
        }

        let role_id = self
            .create_role(name, Some(description.to_string()), RoleScope::Global)
            .await?;
        for permission in permissions(role_id) {
            self.store.insert_permission(permission).await?;
        }
        info!(role = name, role_id = %role_id, "Builtin role seeded");
        Ok(role_id)
    }

    fn owner_permissions(role_id: RoleId) -> Vec<Permission> {
        use ActionKind::*;
        use PermissionScope::OrganizationWide;
        use ResourceKind::*;

        let mut permissions = Vec::new();
        for action in [Read, Update, Delete, ManageMembers, ManageTeams, ManageRoles] {
            permissions.push(Permission::new(role_id, Organization, action, OrganizationWide));
        }
        for action in [Read, Create, Update, Delete] {
            permissions.push(Permission::new(role_id, Workspace, action, OrganizationWide));
            permissions.push(Permission::new(role_id, Entity, action, OrganizationWide));
        }
        permissions.push(Permission::new(role_id, Workflow, Execute, OrganizationWide));
        permissions
    }

    fn member_permissions(role_id: RoleId) -> Vec<Permission> {
        use ActionKind::Read;
        use PermissionScope::OrganizationWide;
        use ResourceKind::*;

        [Organization, Workspace, Entity]
            .into_iter()
            .map(|resource| Permission::new(role_id, resource, Read, OrganizationWide))
            .collect()
    }

    fn workspace_owner_permissions(role_id: RoleId) -> Vec<Permission> {
        use ActionKind::*;
        use PermissionScope::WorkspaceWide;
        use ResourceKind::*;

        let mut permissions = vec![
            Permission::new(role_id, Workspace, Read, WorkspaceWide),
            Permission::new(role_id, Workspace, Update, WorkspaceWide),
            Permission::new(role_id, Workspace, ManageMembers, WorkspaceWide),
        ];
        for action in [Read, Create, Update, Delete] {
            permissions.push(Permission::new(role_id, Entity, action, WorkspaceWide));
        }
        permissions.push(Permission::new(role_id, Workflow, Execute, WorkspaceWide));
        permissions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AuthzError;
    use crate::store::{InMemoryStore, OrganizationStore};
    use atrium_core::types::Organization;
    use atrium_core::CoreError;
    use uuid::Uuid;

    fn registry() -> RoleRegistry {
        RoleRegistry::new(Arc::new(InMemoryStore::new()))
    }

    #[tokio::test]
    async fn test_create_role_rejects_empty_name() {
        let registry = registry();
        let result = registry.create_role("   ", None, RoleScope::Global).await;
        assert!(matches!(
            result,
            Err(AuthzError::Domain(CoreError::MissingRequiredField(
                "role.name"
            )))
        ));
    }

    #[tokio::test]
    async fn test_org_scoped_role_requires_live_org() {
        let store = Arc::new(InMemoryStore::new());
        let registry = RoleRegistry::new(store.clone());

        let missing = registry
            .create_role("auditor", None, RoleScope::Organization(Uuid::new_v4()))
            .await;
        assert!(matches!(
            missing,
            Err(AuthzError::Domain(CoreError::InvalidReference(_)))
        ));

        let org_id = store
            .insert_organization(Organization::new("acme", Uuid::new_v4()))
            .await
            .unwrap();
        assert!(registry
            .create_role("auditor", None, RoleScope::Organization(org_id))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_ensure_builtin_roles_is_idempotent() {
        let registry = registry();

        let first = registry.ensure_builtin_roles().await.unwrap();
        let second = registry.ensure_builtin_roles().await.unwrap();
        assert_eq!(first, second);

        let owner_permissions = registry.list_permissions(first.owner).await.unwrap();
        assert!(!owner_permissions.is_empty());
        // Seeding twice must not duplicate the permission bundle
        let after = registry.list_permissions(first.owner).await.unwrap();
        assert_eq!(owner_permissions.len(), after.len());
    }

    #[tokio::test]
    async fn test_define_permission_requires_existing_role() {
        let registry = registry();
        let result = registry
            .define_permission(
                Uuid::new_v4(),
                ResourceKind::Entity,
                ActionKind::Read,
                PermissionScope::OrganizationWide,
            )
            .await;
        assert!(matches!(
            result,
            Err(AuthzError::Domain(CoreError::InvalidReference(_)))
        ));
    }
}
