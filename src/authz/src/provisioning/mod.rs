//! Account provisioning state machine
//!
//! Runs once per new account (or invitation acceptance) to establish the
//! principal's first organizational context: either attach it to the
//! organization it was invited into, or create a personal organization
//! and workspace for self-registered accounts. Each branch is written as
//! a single [`crate::store::ProvisionPlan`] and applied atomically; a
//! failed invited branch commits nothing and falls back to
//! self-provisioning, while a failed self branch is fatal.

pub mod state;

pub use state::{ProvisionOutcome, ProvisionedContext, ProvisioningState};

use crate::error::{AuthzError, Result};
use crate::registry::RoleRegistry;
use crate::store::{AuthzStore, ProvisionPlan};
use atrium_core::types::{
    Invitation, OrgMembership, Organization, PrincipalRef, RoleAssignment, Workspace,
};
use atrium_core::{OrgId, UserId};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Drives the provisioning state machine
pub struct Provisioner {
    store: Arc<dyn AuthzStore>,
    registry: RoleRegistry,
    /// Accounts currently being provisioned; reconciles duplicate
    /// trigger deliveries without caller-side locking
    inflight: DashMap<UserId, ()>,
}

impl Provisioner {
    /// Create a provisioner over the given store
    pub fn new(store: Arc<dyn AuthzStore>) -> Self {
        let registry = RoleRegistry::new(store.clone());
        Self {
            store,
            registry,
            inflight: DashMap::new(),
        }
    }

    /// Establish the account's first organizational context
    ///
    /// Invoked once per account-creation event. Re-invoking for an
    /// already-provisioned account is a no-op returning the existing
    /// context; a concurrent duplicate trigger for the same account is
    /// rejected.
    pub async fn provision_on_account_created(
        &self,
        principal_id: UserId,
        email: &str,
    ) -> Result<ProvisionedContext> {
        let _guard = InflightGuard::acquire(&self.inflight, principal_id)?;

        // Idempotency: an existing membership means a previous invocation
        // already ran to completion
        if let Some(context) = self.existing_context(principal_id, email).await? {
            info!(principal = %principal_id, org_id = %context.org_id, "Account already provisioned");
            return Ok(context);
        }

        debug!(principal = %principal_id, state = ?ProvisioningState::NewAccount, "Provisioning started");
        let now = Utc::now();
        let builtin = self.registry.ensure_builtin_roles().await?;

        // Latest pending invitation wins when several exist for the email
        if let Some(invitation) = self.store.latest_pending_for_email(email, now).await? {
            debug!(
                principal = %principal_id,
                invitation_id = %invitation.id,
                state = ?ProvisioningState::InvitedProvisioning,
                "Pending invitation found"
            );
            match self
                .provision_invited(principal_id, email, &invitation, builtin, now)
                .await
            {
                Ok(context) => {
                    info!(
                        principal = %principal_id,
                        org_id = %context.org_id,
                        state = ?ProvisioningState::Provisioned,
                        "Invited provisioning complete"
                    );
                    return Ok(context);
                }
                Err(err) => {
                    // The invited branch committed nothing; fall through
                    // to self-provisioning rather than failing account
                    // creation
                    warn!(
                        principal = %principal_id,
                        invitation_id = %invitation.id,
                        error = %err,
                        "Invited provisioning failed, falling back to self-signup"
                    );
                }
            }
        }

        self.provision_self(principal_id, email, builtin.owner, now)
            .await
    }

    /// Attach the account to the organization that invited it
    async fn provision_invited(
        &self,
        principal_id: UserId,
        email: &str,
        invitation: &Invitation,
        builtin: crate::registry::BuiltinRoles,
        now: DateTime<Utc>,
    ) -> Result<ProvisionedContext> {
        let org = self
            .store
            .get_organization(invitation.org_id)
            .await?
            .filter(|org| !org.is_deleted())
            .ok_or_else(|| {
                atrium_core::CoreError::InvalidReference(format!(
                    "invited organization {} does not exist",
                    invitation.org_id
                ))
            })?;

        // The invitation's role, or the builtin member role when it
        // names none
        let org_role = match invitation.role_id {
            Some(role_id) => self
                .store
                .get_role(role_id)
                .await?
                .filter(|role| !role.is_deleted() && role.scope.visible_to(org.id))
                .map(|role| role.id)
                .ok_or_else(|| {
                    atrium_core::CoreError::InvalidReference(format!(
                        "invitation role {role_id} does not exist"
                    ))
                })?,
            None => builtin.member,
        };

        let principal = PrincipalRef::User(principal_id);
        let workspace = Workspace::new(org.id, workspace_name_for_email(email));
        let workspace_id = workspace.id;
        let plan = ProvisionPlan {
            organization: None,
            membership: OrgMembership::new(org.id, principal_id),
            assignments: vec![
                RoleAssignment::new(principal, org.id, None, org_role).granted_by(invitation.id),
                RoleAssignment::new(principal, org.id, Some(workspace_id), builtin.workspace_owner)
                    .granted_by(invitation.id),
            ],
            workspace,
            accept_invitation: Some((invitation.id, now)),
        };
        self.store.apply_provision(plan).await?;

        Ok(ProvisionedContext {
            org_id: org.id,
            workspace_id,
            outcome: ProvisionOutcome::Invited,
        })
    }

    /// Create a personal organization and workspace for the account
    ///
    /// Failure here is fatal: an account with no organizational context
    /// is unusable, so the error propagates instead of being swallowed.
    async fn provision_self(
        &self,
        principal_id: UserId,
        email: &str,
        owner_role: atrium_core::RoleId,
        now: DateTime<Utc>,
    ) -> Result<ProvisionedContext> {
        debug!(principal = %principal_id, state = ?ProvisioningState::SelfProvisioning, "Creating personal organization");

        let principal = PrincipalRef::User(principal_id);
        let org = Organization::new(personal_org_name(email), principal_id);
        let org_id = org.id;
        let workspace = Workspace::new(org_id, workspace_name_for_email(email));
        let workspace_id = workspace.id;
        let plan = ProvisionPlan {
            organization: Some(org),
            membership: OrgMembership::new(org_id, principal_id),
            assignments: vec![
                RoleAssignment::new(principal, org_id, None, owner_role),
                RoleAssignment::new(principal, org_id, Some(workspace_id), owner_role),
            ],
            workspace,
            accept_invitation: None,
        };

        if let Err(err) = self.store.apply_provision(plan).await {
            warn!(
                principal = %principal_id,
                state = ?ProvisioningState::Failed,
                error = %err,
                "Self-provisioning failed; account has no organizational context"
            );
            return Err(AuthzError::ProvisioningFailed {
                principal: principal_id,
                reason: err.to_string(),
            });
        }

        info!(
            principal = %principal_id,
            org_id = %org_id,
            state = ?ProvisioningState::Provisioned,
            "Self-provisioning complete"
        );
        Ok(ProvisionedContext {
            org_id,
            workspace_id,
            outcome: ProvisionOutcome::SelfSignup,
        })
    }

    /// Resolve the context a previous invocation established, if any
    async fn existing_context(
        &self,
        principal_id: UserId,
        email: &str,
    ) -> Result<Option<ProvisionedContext>> {
        let memberships = self.store.memberships_for_user(principal_id).await?;
        let Some(membership) = memberships.first() else {
            return Ok(None);
        };

        let workspace_id = self
            .find_provisioned_workspace(membership.org_id, email)
            .await?;
        Ok(Some(ProvisionedContext {
            org_id: membership.org_id,
            workspace_id,
            outcome: ProvisionOutcome::AlreadyProvisioned,
        }))
    }

    /// Both branches name the first workspace deterministically from the
    /// email, so look it up by that name and fall back to the oldest
    /// workspace if it was renamed since
    async fn find_provisioned_workspace(
        &self,
        org_id: OrgId,
        email: &str,
    ) -> Result<atrium_core::WorkspaceId> {
        let expected = workspace_name_for_email(email).to_lowercase();
        let workspaces = self.store.workspaces_in_org(org_id).await?;
        workspaces
            .iter()
            .find(|workspace| workspace.normalized_name() == expected)
            .or_else(|| workspaces.first())
            .map(|workspace| workspace.id)
            .ok_or_else(|| {
                atrium_core::CoreError::NotFound(format!(
                    "no workspace in provisioned organization {org_id}"
                ))
                .into()
            })
    }
}

/// Deterministic workspace name for a new account
fn workspace_name_for_email(email: &str) -> String {
    format!("{}'s workspace", email_local_part(email))
}

/// Deterministic personal organization name for a new account
fn personal_org_name(email: &str) -> String {
    format!("{}'s organization", email_local_part(email))
}

fn email_local_part(email: &str) -> &str {
    let local = email.split('@').next().unwrap_or(email).trim();
    if local.is_empty() {
        "account"
    } else {
        local
    }
}

/// Removes the principal from the in-flight set when provisioning ends,
/// however it ends
struct InflightGuard<'a> {
    inflight: &'a DashMap<UserId, ()>,
    principal: UserId,
}

impl<'a> InflightGuard<'a> {
    fn acquire(inflight: &'a DashMap<UserId, ()>, principal: UserId) -> Result<Self> {
        match inflight.entry(principal) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(AuthzError::ProvisioningFailed {
                    principal,
                    reason: "provisioning already in progress".to_string(),
                })
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(());
                Ok(Self {
                    inflight,
                    principal,
                })
            }
        }
    }
}

impl Drop for InflightGuard<'_> {
    fn drop(&mut self) {
        self.inflight.remove(&self.principal);
    }
}
