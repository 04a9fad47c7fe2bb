//! Shared fixtures for the integration suites

#![allow(dead_code)]

use atrium_authz::store::{InMemoryStore, MembershipStore, OrganizationStore};
use atrium_core::types::{OrgMembership, Organization};
use atrium_core::{OrgId, UserId};
use std::sync::Arc;
use uuid::Uuid;

/// Install a subscriber so failing tests print the engine's debug trail
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Empty store
pub fn store() -> Arc<InMemoryStore> {
    init_tracing();
    Arc::new(InMemoryStore::new())
}

/// Store with one organization
pub async fn store_with_org() -> (Arc<InMemoryStore>, OrgId) {
    let store = store();
    let org_id = store
        .insert_organization(Organization::new("acme", Uuid::new_v4()))
        .await
        .expect("insert organization");
    (store, org_id)
}

/// Store with one organization and one member
pub async fn store_with_member() -> (Arc<InMemoryStore>, OrgId, UserId) {
    let (store, org_id) = store_with_org().await;
    let user_id = Uuid::new_v4();
    store
        .insert_membership(OrgMembership::new(org_id, user_id))
        .await
        .expect("insert membership");
    (store, org_id, user_id)
}
