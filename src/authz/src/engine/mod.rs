//! Permission evaluation engine
//!
//! The decision function consumed on every access check. Composes the
//! membership validator, the assignment store, and the role registry into
//! a single read-only pipeline:
//!
//! ```text
//! Request → membership gate → principal set → assignments → permissions → bool
//! ```
//!
//! The engine is pure and side-effect-free; any number of concurrent
//! `evaluate` calls may run in parallel with no shared mutable state
//! beyond the underlying store's own guarantees.

pub mod decision;

pub use decision::EvaluateRequest;

use crate::error::Result;
use crate::membership::MembershipValidator;
use crate::store::AuthzStore;
use atrium_core::types::PrincipalRef;
use atrium_core::RoleId;
use decision::DecisionOutcome;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Evaluates permission queries against membership, assignment, and
/// role/permission records
#[derive(Clone)]
pub struct EvaluationEngine {
    store: Arc<dyn AuthzStore>,
    membership: MembershipValidator,
}

impl EvaluationEngine {
    /// Create an engine over the given store
    pub fn new(store: Arc<dyn AuthzStore>) -> Self {
        let membership = MembershipValidator::new(store.clone());
        Self { store, membership }
    }

    /// Decide whether the principal may perform the action
    ///
    /// A `false` result is not an error condition; it is the expected way
    /// of signaling "not permitted". The internal reason for a denial is
    /// logged at debug level and never surfaced.
    pub async fn evaluate(&self, request: &EvaluateRequest) -> Result<bool> {
        let outcome = self.decide(request).await?;
        match outcome {
            DecisionOutcome::Allowed {
                role_id,
                permission_id,
            } => debug!(
                org_id = %request.org_id,
                action = ?request.action,
                resource = ?request.resource,
                role_id = %role_id,
                permission_id = %permission_id,
                "Permission granted"
            ),
            reason => debug!(
                org_id = %request.org_id,
                action = ?request.action,
                resource = ?request.resource,
                reason = ?reason,
                "Permission denied"
            ),
        }
        Ok(outcome.is_allowed())
    }

    /// Cheap membership check, exposed for collaborators that only need
    /// the gate and not a full evaluation
    pub async fn is_member(
        &self,
        user_id: atrium_core::UserId,
        org_id: atrium_core::OrgId,
    ) -> Result<bool> {
        self.membership.is_member(user_id, org_id).await
    }

    async fn decide(&self, request: &EvaluateRequest) -> Result<DecisionOutcome> {
        // Step 1: no authenticated identity, no access
        let Some(principal) = request.principal else {
            return Ok(DecisionOutcome::Unauthenticated);
        };

        // Step 2: membership is a hard gate, independent of any
        // assignment that might otherwise appear to match
        if !self
            .membership
            .principal_belongs_to(principal, request.org_id)
            .await?
        {
            return Ok(DecisionOutcome::NotAMember);
        }

        // Step 3: the principal acts as itself plus every team it belongs
        // to in this organization
        let principals = self.effective_principals(principal, request.org_id).await?;

        // Step 4: assignments restricted to the organization, either
        // organization-wide or matching the queried workspace exactly
        let assignments = self
            .store
            .assignments_for(&principals, request.org_id)
            .await?;
        let role_ids: Vec<RoleId> = {
            let mut seen = HashSet::new();
            assignments
                .iter()
                .filter(|assignment| assignment.applies_to(request.workspace_id))
                .filter_map(|assignment| seen.insert(assignment.role_id).then_some(assignment.role_id))
                .collect()
        };

        // Step 5: a role's permissions compose with OR; the first match
        // decides
        for role_id in role_ids {
            let Some(role) = self.store.get_role(role_id).await? else {
                continue;
            };
            // Soft-deleted roles are hidden from evaluation
            if role.is_deleted() {
                continue;
            }
            for permission in self.store.permissions_for_role(role.id).await? {
                if permission.matches(
                    request.resource,
                    request.action,
                    request.workspace_id,
                    request.entity_type_id,
                ) {
                    return Ok(DecisionOutcome::Allowed {
                        role_id: role.id,
                        permission_id: permission.id,
                    });
                }
            }
        }

        Ok(DecisionOutcome::NoMatchingPermission)
    }

    async fn effective_principals(
        &self,
        principal: PrincipalRef,
        org_id: atrium_core::OrgId,
    ) -> Result<Vec<PrincipalRef>> {
        let mut principals = vec![principal];
        if let PrincipalRef::User(user_id) = principal {
            for team_id in self.store.teams_for_user(user_id, org_id).await? {
                principals.push(PrincipalRef::Team(team_id));
            }
        }
        Ok(principals)
    }
}
