//! Enforcement boundary adapter
//!
//! The thin interface the storage layer and administrative tooling call
//! before touching protected resources. It wraps the evaluation engine
//! and maps "not permitted" onto an error without leaking whether the
//! principal was not a member or simply held no matching permission.

use crate::engine::{EvaluateRequest, EvaluationEngine};
use crate::error::{AuthzError, Result};
use atrium_core::types::{ActionKind, PrincipalRef, ResourceKind};
use atrium_core::{OrgId, WorkspaceId};
use std::sync::Arc;

/// Gate in front of protected reads and writes
#[derive(Clone)]
pub struct Enforcer {
    engine: Arc<EvaluationEngine>,
}

impl Enforcer {
    /// Create an enforcer over the given engine
    pub fn new(engine: Arc<EvaluationEngine>) -> Self {
        Self { engine }
    }

    /// Evaluate the request and fail with [`AuthzError::PermissionDenied`]
    /// unless it is allowed
    pub async fn require(&self, request: &EvaluateRequest) -> Result<()> {
        if self.engine.evaluate(request).await? {
            Ok(())
        } else {
            Err(AuthzError::PermissionDenied)
        }
    }

    /// Guard a read of a resource kind
    pub async fn guard_read(
        &self,
        principal: Option<PrincipalRef>,
        resource: ResourceKind,
        org_id: OrgId,
        workspace_id: Option<WorkspaceId>,
    ) -> Result<()> {
        self.guard(principal, ActionKind::Read, resource, org_id, workspace_id)
            .await
    }

    /// Guard an update of a resource kind
    pub async fn guard_write(
        &self,
        principal: Option<PrincipalRef>,
        resource: ResourceKind,
        org_id: OrgId,
        workspace_id: Option<WorkspaceId>,
    ) -> Result<()> {
        self.guard(principal, ActionKind::Update, resource, org_id, workspace_id)
            .await
    }

    async fn guard(
        &self,
        principal: Option<PrincipalRef>,
        action: ActionKind,
        resource: ResourceKind,
        org_id: OrgId,
        workspace_id: Option<WorkspaceId>,
    ) -> Result<()> {
        let request = EvaluateRequest {
            principal,
            action,
            resource,
            org_id,
            workspace_id,
            entity_type_id: None,
        };
        self.require(&request).await
    }
}
