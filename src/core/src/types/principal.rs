//! Principals: the entities that can hold role assignments

use super::{OrgId, TeamId, UserId};
use crate::error::{CoreError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An entity that can hold role assignments: a user or a team
///
/// Teams are first-class principals for assignment purposes; the
/// evaluation engine expands a user into itself plus every team it
/// belongs to before looking up assignments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum PrincipalRef {
    /// A single user
    User(UserId),
    /// A team of users, scoped to one organization
    Team(TeamId),
}

impl PrincipalRef {
    /// The user id, if this principal is a user
    pub fn as_user(&self) -> Option<UserId> {
        match self {
            Self::User(id) => Some(*id),
            Self::Team(_) => None,
        }
    }

    /// The team id, if this principal is a team
    pub fn as_team(&self) -> Option<TeamId> {
        match self {
            Self::Team(id) => Some(*id),
            Self::User(_) => None,
        }
    }
}

/// Named collection of users, scoped to one organization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    /// Team identifier
    pub id: TeamId,

    /// Organization the team belongs to
    pub org_id: OrgId,

    /// Display name
    pub name: String,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Soft-delete marker
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Team {
    /// Create a new team in `org_id`
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

    /// Validate domain rules for this team
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(CoreError::MissingRequiredField("team.name"));
        }
        Ok(())
    }
}

/// Membership of a user in a team
///
/// Scoped to the team's organization; a team never spans tenants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamMembership {
    /// Team the user belongs to
    pub team_id: TeamId,

    /// Member user
    pub user_id: UserId,

    pub created_at: DateTime<Utc>,
}

impl TeamMembership {
    /// Create a new team membership
    pub fn new(team_id: TeamId, user_id: UserId) -> Self {
        Self {
            team_id,
            user_id,
            created_at: Utc::now(),
        }
    }
}
