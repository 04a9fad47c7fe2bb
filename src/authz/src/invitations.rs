//! Invitation ledger operations
//!
//! Invitations are the single source of truth for "this account was
//! invited": provisioning consults the ledger and nothing else. Status is
//! always derived from the acceptance and expiry fields; an invitation
//! read past its expiry is marked expired lazily at that point, never by
//! a background sweep.

use crate::error::{AuthzError, Result};
use crate::store::AuthzStore;
use atrium_core::types::{Invitation, InvitationStatus};
use atrium_core::{CoreError, InvitationId, OrgId, RoleId, UserId};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info};

/// Default invitation lifetime when the sender does not choose one
const DEFAULT_EXPIRY_DAYS: i64 = 7;

/// Creates, accepts, and revokes invitations
#[derive(Clone)]
pub struct InvitationService {
    store: Arc<dyn AuthzStore>,
}

impl InvitationService {
    /// Create a service over the given store
    pub fn new(store: Arc<dyn AuthzStore>) -> Self {
        Self { store }
    }

    /// Create a pending invitation for `email` into `org_id`
    ///
    /// Applies the default 7-day expiry when none is supplied. The role
    /// is optional; provisioning falls back to the builtin member role.
    pub async fn send_invitation(
        &self,
        email: impl Into<String>,
        org_id: OrgId,
        role_id: Option<RoleId>,
        invited_by: UserId,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<InvitationId> {
        let expires_at =
            expires_at.unwrap_or_else(|| Utc::now() + Duration::days(DEFAULT_EXPIRY_DAYS));

        if let Some(role_id) = role_id {
            let role = self
                .store
                .get_role(role_id)
                .await?
                .filter(|role| !role.is_deleted())
                .ok_or_else(|| {
                    CoreError::InvalidReference(format!("role {role_id} does not exist"))
                })?;
            if !role.scope.visible_to(org_id) {
                return Err(CoreError::InvalidReference(format!(
                    "role {role_id} is not visible to organization {org_id}"
                ))
                .into());
            }
        }

        let invitation = Invitation::new(email, org_id, role_id, invited_by, expires_at);
        let id = self.store.insert_invitation(invitation).await?;
        info!(invitation_id = %id, org_id = %org_id, "Invitation sent");
        Ok(id)
    }

    /// Accept an invitation
    ///
    /// Idempotent: re-accepting an already-accepted invitation succeeds
    /// without side effects. Accepting past expiry fails and marks the
    /// row expired in passing.
    pub async fn accept_invitation(&self, id: InvitationId) -> Result<()> {
        let now = Utc::now();
        let invitation = self.fetch(id).await?;

        match invitation.status_at(now) {
            InvitationStatus::Accepted => {
                debug!(invitation_id = %id, "Invitation already accepted");
                Ok(())
            }
            InvitationStatus::Expired => {
                if invitation.expired_at.is_none() {
                    self.store.mark_expired(id, now).await?;
                }
                Err(AuthzError::InvitationExpired(id))
            }
            InvitationStatus::Pending => {
                self.store.mark_accepted(id, now).await?;
                info!(invitation_id = %id, "Invitation accepted");
                Ok(())
            }
        }
    }

    /// Delete an invitation and revoke every assignment it granted in
    /// that organization
    pub async fn revoke_invitation(&self, id: InvitationId, org_id: OrgId) -> Result<()> {
        let invitation = self.fetch(id).await?;
        if invitation.org_id != org_id {
            return Err(CoreError::InvalidReference(format!(
                "invitation {id} does not belong to organization {org_id}"
            ))
            .into());
        }

        self.store.delete_invitation(id).await?;
        let revoked = self.store.revoke_assignments_from_invitation(id).await?;
        info!(invitation_id = %id, revoked, "Invitation revoked");
        Ok(())
    }

    /// Fetch an invitation, treating soft-deleted rows as absent
    async fn fetch(&self, id: InvitationId) -> Result<Invitation> {
        self.store
            .get_invitation(id)
            .await?
            .filter(|invitation| !invitation.is_deleted())
            .ok_or_else(|| CoreError::NotFound(format!("invitation {id}")).into())
    }
}
