//! Organization, workspace, and membership entities

use super::{MembershipId, OrgId, UserId, WorkspaceId};
use crate::error::{CoreError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Tenant root. Every workspace, membership, team, role assignment, and
/// invitation belongs to exactly one organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    /// Organization identifier
    pub id: OrgId,

    /// Display name
    pub name: String,

    /// User that created the organization
    pub created_by: UserId,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Soft-delete marker; a deleted organization is invisible everywhere
    /// and its workspaces, memberships, and assignments go with it
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Organization {
    /// Create a new organization owned by `created_by`
    pub fn new(name: impl Into<String>, created_by: UserId) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            created_by,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Validate domain rules for this organization
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(CoreError::MissingRequiredField("organization.name"));
        }
        Ok(())
    }
}

/// Workspace inside an organization
///
/// Workspace names are unique per organization, case-insensitively; the
/// [`Workspace::normalized_name`] key is what stores index on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workspace {
    /// Workspace identifier
    pub id: WorkspaceId,

    /// Owning organization
    pub org_id: OrgId,

    /// Display name, unique per organization ignoring case
    pub name: String,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Soft-delete marker
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Workspace {
    /// Create a new workspace in `org_id`
    pub fn new(org_id: OrgId, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            org_id,
            name: name.into(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Case-insensitive uniqueness key within the owning organization
    pub fn normalized_name(&self) -> String {
        self.name.trim().to_lowercase()
    }

    /// Validate domain rules for this workspace
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(CoreError::MissingRequiredField("workspace.name"));
        }
        Ok(())
    }
}

/// Membership of a user in an organization
///
/// Required before any role assignment in that organization is honored;
/// the evaluation engine checks this row before it consults assignments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrgMembership {
    /// Membership identifier
    pub id: MembershipId,

    /// Organization the user belongs to
    pub org_id: OrgId,

    /// Member user
    pub user_id: UserId,

    pub created_at: DateTime<Utc>,

    /// Soft-delete marker; a deleted membership closes the gate again
    pub deleted_at: Option<DateTime<Utc>>,
}

impl OrgMembership {
    /// Create a new membership of `user_id` in `org_id`
    pub fn new(org_id: OrgId, user_id: UserId) -> Self {
        Self {
            id: Uuid::new_v4(),
            org_id,
            user_id,
            created_at: Utc::now(),
            deleted_at: None,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_organization_validation() {
        let owner = Uuid::new_v4();

        let org = Organization::new("Acme", owner);
        assert!(org.validate().is_ok());
        assert!(!org.is_deleted());

        let empty = Organization::new("   ", owner);
        assert!(matches!(
            empty.validate(),
            Err(CoreError::MissingRequiredField("organization.name"))
        ));
    }

    #[test]
    fn test_workspace_normalized_name() {
        let workspace = Workspace::new(Uuid::new_v4(), "  Design Team  ");
        assert_eq!(workspace.normalized_name(), "design team");
    }

    #[test]
    fn test_workspace_empty_name() {
        let workspace = Workspace::new(Uuid::new_v4(), "");
        assert!(workspace.validate().is_err());
    }

    #[test]
    fn test_membership_creation() {
        let membership = OrgMembership::new(Uuid::new_v4(), Uuid::new_v4());
        assert!(!membership.is_deleted());
    }
}
