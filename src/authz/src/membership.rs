//! Membership validation
//!
//! The membership check is the first gate in every permission evaluation
//! and every organization-visibility decision. It is deliberately a
//! separate, cheap, non-recursive lookup: expressing "who may see
//! organization X" against the permission tables the check itself filters
//! would recurse without bound, so the engine calls this narrow
//! capability instead of re-entering enforcement.

use crate::error::Result;
use crate::store::AuthzStore;
use atrium_core::types::PrincipalRef;
use atrium_core::{OrgId, UserId};
use std::sync::Arc;

/// Confirms a principal is a recognized member of an organization
#[derive(Clone)]
pub struct MembershipValidator {
    store: Arc<dyn AuthzStore>,
}

impl MembershipValidator {
    /// Create a validator over the given store
    pub fn new(store: Arc<dyn AuthzStore>) -> Self {
        Self { store }
    }

    /// True iff a non-deleted membership row ties `user_id` to `org_id`
    pub async fn is_member(&self, user_id: UserId, org_id: OrgId) -> Result<bool> {
        self.store.is_member(user_id, org_id).await
    }

    /// Membership gate for any principal kind
    ///
    /// Users pass through the membership table; a team passes iff it is a
    /// non-deleted team of the queried organization (teams are org-scoped,
    /// so membership rows do not apply to them).
    pub async fn principal_belongs_to(
        &self,
        principal: PrincipalRef,
        org_id: OrgId,
    ) -> Result<bool> {
        match principal {
            PrincipalRef::User(user_id) => self.is_member(user_id, org_id).await,
            PrincipalRef::Team(team_id) => {
                let team = self.store.get_team(team_id).await?;
                Ok(team
                    .map(|team| team.org_id == org_id && !team.is_deleted())
                    .unwrap_or(false))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryStore, MembershipStore, OrganizationStore, TeamStore};
    use atrium_core::types::{OrgMembership, Organization, Team};
    use uuid::Uuid;

    #[tokio::test]
    async fn test_is_member_requires_live_row() {
        let store = Arc::new(InMemoryStore::new());
        let org_id = store
            .insert_organization(Organization::new("acme", Uuid::new_v4()))
            .await
            .unwrap();
        let user_id = Uuid::new_v4();
        let validator = MembershipValidator::new(store.clone());

        assert!(!validator.is_member(user_id, org_id).await.unwrap());

        store
            .insert_membership(OrgMembership::new(org_id, user_id))
            .await
            .unwrap();
        assert!(validator.is_member(user_id, org_id).await.unwrap());

        store.delete_organization(org_id).await.unwrap();
        assert!(!validator.is_member(user_id, org_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_team_belongs_only_to_its_org() {
        let store = Arc::new(InMemoryStore::new());
        let org_id = store
            .insert_organization(Organization::new("acme", Uuid::new_v4()))
            .await
            .unwrap();
        let other_id = store
            .insert_organization(Organization::new("other", Uuid::new_v4()))
            .await
            .unwrap();
        let team_id = store.insert_team(Team::new(org_id, "platform")).await.unwrap();
        let validator = MembershipValidator::new(store);

        let principal = PrincipalRef::Team(team_id);
        assert!(validator
            .principal_belongs_to(principal, org_id)
            .await
            .unwrap());
        assert!(!validator
            .principal_belongs_to(principal, other_id)
            .await
            .unwrap());
    }
}
