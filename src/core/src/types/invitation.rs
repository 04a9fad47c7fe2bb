//! Invitations: pending offers of organization membership

use super::{InvitationId, OrgId, RoleId, UserId};
use crate::error::{CoreError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Derived status of an invitation
///
/// Never stored directly; always computed from the acceptance and expiry
/// fields. `Accepted` and `Expired` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvitationStatus {
    Pending,
    Accepted,
    Expired,
}

/// Pending offer of organization membership (and optionally a role) to an
/// email address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invitation {
    /// Invitation identifier
    pub id: InvitationId,

    /// Invited email address
    pub email: String,

    /// Organization the invitee would join
    pub org_id: OrgId,

    /// Role to grant on acceptance; a default member role applies when
    /// absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role_id: Option<RoleId>,

    /// User that sent the invitation
    pub invited_by: UserId,

    pub created_at: DateTime<Utc>,

    /// Point after which the invitation can no longer be accepted
    pub expires_at: DateTime<Utc>,

    /// Set when the invitation was accepted; terminal
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accepted_at: Option<DateTime<Utc>>,

    /// Set lazily the first time the invitation is read past its expiry;
    /// the derived status does not depend on it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expired_at: Option<DateTime<Utc>>,

    /// Soft-delete marker
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Invitation {
    /// Create a new invitation for `email` into `org_id`
    pub fn new(
        email: impl Into<String>,
        org_id: OrgId,
        role_id: Option<RoleId>,
        invited_by: UserId,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            email: email.into(),
            org_id,
            role_id,
            invited_by,
            created_at: Utc::now(),
            expires_at,
            accepted_at: None,
            expired_at: None,
            deleted_at: None,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Derived status at `now`
    ///
    /// Acceptance wins over expiry because acceptance past expiry is
    /// rejected before it is ever recorded.
    pub fn status_at(&self, now: DateTime<Utc>) -> InvitationStatus {
        if self.accepted_at.is_some() {
            InvitationStatus::Accepted
        } else if self.expired_at.is_some() || now >= self.expires_at {
            InvitationStatus::Expired
        } else {
            InvitationStatus::Pending
        }
    }

    /// Whether the invitation can still be accepted at `now`
    pub fn is_pending_at(&self, now: DateTime<Utc>) -> bool {
        !self.is_deleted() && self.status_at(now) == InvitationStatus::Pending
    }

    /// Validate domain rules for this invitation
    pub fn validate(&self) -> Result<()> {
        if self.email.trim().is_empty() {
            return Err(CoreError::MissingRequiredField("invitation.email"));
        }
        let Some((local, domain)) = self.email.split_once('@') else {
            return Err(CoreError::ValidationFailed(format!(
                "invalid invitation email: {}",
                self.email
            )));
        };
        if local.is_empty() || domain.is_empty() {
            return Err(CoreError::ValidationFailed(format!(
                "invalid invitation email: {}",
                self.email
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn invitation(expires_at: DateTime<Utc>) -> Invitation {
        Invitation::new(
            "alice@example.com",
            Uuid::new_v4(),
            None,
            Uuid::new_v4(),
            expires_at,
        )
    }

    #[test]
    fn test_status_pending_before_expiry() {
        let now = Utc::now();
        let invitation = invitation(now + Duration::days(7));
        assert_eq!(invitation.status_at(now), InvitationStatus::Pending);
        assert!(invitation.is_pending_at(now));
    }

    #[test]
    fn test_status_expired_after_expiry_without_marking() {
        let now = Utc::now();
        let invitation = invitation(now - Duration::hours(1));
        assert_eq!(invitation.status_at(now), InvitationStatus::Expired);
        assert!(!invitation.is_pending_at(now));
    }

    #[test]
    fn test_status_accepted_is_terminal() {
        let now = Utc::now();
        let mut invitation = invitation(now + Duration::days(7));
        invitation.accepted_at = Some(now);
        assert_eq!(invitation.status_at(now), InvitationStatus::Accepted);
        assert_eq!(
            invitation.status_at(now + Duration::days(30)),
            InvitationStatus::Accepted
        );
    }

    #[test]
    fn test_email_validation() {
        let now = Utc::now();
        let mut invitation = invitation(now + Duration::days(7));
        assert!(invitation.validate().is_ok());

        invitation.email = "not-an-email".to_string();
        assert!(invitation.validate().is_err());

        invitation.email = "@example.com".to_string();
        assert!(invitation.validate().is_err());

        invitation.email = String::new();
        assert!(matches!(
            invitation.validate(),
            Err(CoreError::MissingRequiredField("invitation.email"))
        ));
    }
}
