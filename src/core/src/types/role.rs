//! Roles and the permissions they bundle

use super::{EntityTypeId, OrgId, PermissionId, RoleId, WorkspaceId};
use crate::error::{CoreError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Visibility of a role
///
/// System-wide roles are usable in every organization; organization-scoped
/// roles are private to the one that defined them. Modeled as a tagged
/// union rather than a nullable foreign key so the two cases cannot be
/// confused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "scope", content = "org_id", rename_all = "snake_case")]
pub enum RoleScope {
    /// Usable in any organization
    Global,
    /// Private to one organization
    Organization(OrgId),
}

impl RoleScope {
    /// Whether a role with this scope is usable inside `org_id`
    pub fn visible_to(&self, org_id: OrgId) -> bool {
        match self {
            Self::Global => true,
            Self::Organization(owner) => *owner == org_id,
        }
    }
}

/// Category of object a permission protects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Organization,
    Workspace,
    Entity,
    EntityType,
    Workflow,
}

/// Action a permission grants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Read,
    Create,
    Update,
    Delete,
    ManageMembers,
    ManageTeams,
    ManageRoles,
    Execute,
}

/// Scope selector of a single permission
///
/// Exactly one of the four modes applies to a permission row; the
/// variants make the entity-type reference rule structural (an
/// entity-type-specific permission always carries its reference, the
/// other modes never do). Across all permissions of a role the modes
/// combine with logical OR during evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "mode", content = "entity_type_id", rename_all = "snake_case")]
pub enum PermissionScope {
    /// Matches anywhere in the organization
    OrganizationWide,
    /// Matches only when the query names a workspace
    WorkspaceWide,
    /// Matches only the referenced entity type
    EntityType(EntityTypeId),
    /// Fallback with no scope qualifier
    Unscoped,
}

/// Named permission bundle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    /// Role identifier
    pub id: RoleId,

    /// Display name, non-empty
    pub name: String,

    /// Optional human-readable description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// System-wide or private to one organization
    pub scope: RoleScope,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Soft-delete marker; a deleted role and its permissions are hidden
    /// from evaluation without removing history
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Role {
    /// Create a new role
    pub fn new(name: impl Into<String>, scope: RoleScope) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: None,
            scope,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    /// Add a description to the role
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Validate domain rules for this role
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(CoreError::MissingRequiredField("role.name"));
        }
        Ok(())
    }
}

/// A (resource kind, action, scope) triple owned by a role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    /// Permission identifier
    pub id: PermissionId,

    /// Owning role
    pub role_id: RoleId,

    /// Category of object being protected
    pub resource: ResourceKind,

    /// Action being granted
    pub action: ActionKind,

    /// Exactly one scope mode
    pub scope: PermissionScope,
}

impl Permission {
    /// Create a new permission owned by `role_id`
    pub fn new(
        role_id: RoleId,
        resource: ResourceKind,
        action: ActionKind,
        scope: PermissionScope,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            role_id,
            resource,
            action,
            scope,
        }
    }

    /// Whether this permission satisfies a query
    ///
    /// Resource kind and action must match exactly. The scope then decides:
    /// organization-wide always matches, workspace-wide requires the query
    /// to name a workspace, entity-type-specific requires the queried
    /// entity type to equal the reference, and unscoped matches
    /// unconditionally as a fallback.
    pub fn matches(
        &self,
        resource: ResourceKind,
        action: ActionKind,
        workspace_id: Option<WorkspaceId>,
        entity_type_id: Option<EntityTypeId>,
    ) -> bool {
        if self.resource != resource || self.action != action {
            return false;
        }

        match self.scope {
            PermissionScope::OrganizationWide => true,
            PermissionScope::WorkspaceWide => workspace_id.is_some(),
            PermissionScope::EntityType(reference) => entity_type_id == Some(reference),
            PermissionScope::Unscoped => true,
        }
    }
}
