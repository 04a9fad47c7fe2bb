//! Evaluation request and internal decision outcome types

use atrium_core::types::{ActionKind, PrincipalRef, ResourceKind};
use atrium_core::{EntityTypeId, OrgId, PermissionId, RoleId, WorkspaceId};
use serde::{Deserialize, Serialize};

/// A single permission query
///
/// The authenticated principal is passed explicitly rather than read from
/// ambient session state, which keeps the engine testable and free of
/// hidden dependencies. `None` means the caller has no authenticated
/// identity and is always denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluateRequest {
    /// Principal making the request; `None` for anonymous callers
    pub principal: Option<PrincipalRef>,

    /// Action being performed
    pub action: ActionKind,

    /// Category of object being accessed
    pub resource: ResourceKind,

    /// Organization the resource lives in
    pub org_id: OrgId,

    /// Workspace qualifier of the query, when the access is
    /// workspace-scoped
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<WorkspaceId>,

    /// Entity-type qualifier of the query, when the access targets a
    /// typed entity
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_type_id: Option<EntityTypeId>,
}

impl EvaluateRequest {
    /// Create a request for an authenticated principal
    pub fn new(
        principal: PrincipalRef,
        action: ActionKind,
        resource: ResourceKind,
        org_id: OrgId,
    ) -> Self {
        Self {
            principal: Some(principal),
            action,
            resource,
            org_id,
            workspace_id: None,
            entity_type_id: None,
        }
    }

    /// Create a request with no authenticated identity
    pub fn anonymous(action: ActionKind, resource: ResourceKind, org_id: OrgId) -> Self {
        Self {
            principal: None,
            action,
            resource,
            org_id,
            workspace_id: None,
            entity_type_id: None,
        }
    }

    /// Narrow the query to one workspace
    pub fn with_workspace(mut self, workspace_id: WorkspaceId) -> Self {
        self.workspace_id = Some(workspace_id);
        self
    }

    /// Qualify the query with an entity type
    pub fn with_entity_type(mut self, entity_type_id: EntityTypeId) -> Self {
        self.entity_type_id = Some(entity_type_id);
        self
    }
}

/// Why an evaluation came out the way it did
///
/// Diagnostics only: the two deny reasons are logged but must never be
/// distinguishable to callers, who only ever see the boolean.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DecisionOutcome {
    /// No authenticated identity was supplied
    Unauthenticated,
    /// The principal is not a member of the organization; assignments
    /// were never consulted
    NotAMember,
    /// The principal is a member but holds no matching permission
    NoMatchingPermission,
    /// A permission matched
    Allowed {
        role_id: RoleId,
        permission_id: PermissionId,
    },
}

impl DecisionOutcome {
    pub(crate) fn is_allowed(self) -> bool {
        matches!(self, Self::Allowed { .. })
    }
}
