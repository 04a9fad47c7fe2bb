//! Provisioning state machine integration tests
//!
//! Covers both branches of the account provisioning flow, the retry
//! guard, and the invited-branch fallback.

mod common;

use atrium_authz::store::{AssignmentStore, InvitationStore, MembershipStore, OrganizationStore};
use atrium_authz::{
    EvaluateRequest, EvaluationEngine, InvitationService, ProvisionOutcome, Provisioner,
    RoleRegistry,
};
use atrium_core::types::{ActionKind, InvitationStatus, PrincipalRef, ResourceKind, RoleScope};
use std::sync::Arc;
use uuid::Uuid;

// ============================================================================
// INVITED BRANCH
// ============================================================================

#[tokio::test]
async fn invited_account_lands_in_the_inviting_org() {
    let (store, org_id) = common::store_with_org().await;
    let invitations = InvitationService::new(store.clone());
    let provisioner = Provisioner::new(store.clone());
    let registry = RoleRegistry::new(store.clone());

    let role_id = registry
        .create_role("analyst", None, RoleScope::Organization(org_id))
        .await
        .unwrap();
    let invitation_id = invitations
        .send_invitation("alice@example.com", org_id, Some(role_id), Uuid::new_v4(), None)
        .await
        .unwrap();

    let alice = Uuid::new_v4();
    let context = provisioner
        .provision_on_account_created(alice, "alice@example.com")
        .await
        .unwrap();

    assert_eq!(context.outcome, ProvisionOutcome::Invited);
    assert_eq!(context.org_id, org_id);

    // Exactly one workspace, named from the email
    let workspaces = store.workspaces_in_org(org_id).await.unwrap();
    assert_eq!(workspaces.len(), 1);
    assert_eq!(workspaces[0].name, "alice's workspace");
    assert_eq!(workspaces[0].id, context.workspace_id);

    // Exactly one membership
    assert!(store.is_member(alice, org_id).await.unwrap());
    assert_eq!(store.memberships_for_user(alice).await.unwrap().len(), 1);

    // Org-wide grant of the invitation role plus a workspace-scoped
    // workspace-owner grant
    let principal = PrincipalRef::User(alice);
    let assignments = store.assignments_for(&[principal], org_id).await.unwrap();
    assert_eq!(assignments.len(), 2);
    assert!(assignments
        .iter()
        .any(|a| a.role_id == role_id && a.workspace_id.is_none()));
    let builtin = registry.ensure_builtin_roles().await.unwrap();
    assert!(assignments
        .iter()
        .any(|a| a.role_id == builtin.workspace_owner
            && a.workspace_id == Some(context.workspace_id)));

    // The invitation is now accepted
    let invitation = store.get_invitation(invitation_id).await.unwrap().unwrap();
    assert_eq!(
        invitation.status_at(chrono::Utc::now()),
        InvitationStatus::Accepted
    );
}

#[tokio::test]
async fn invitation_without_role_grants_default_member() {
    let (store, org_id) = common::store_with_org().await;
    let invitations = InvitationService::new(store.clone());
    let provisioner = Provisioner::new(store.clone());

    invitations
        .send_invitation("alice@example.com", org_id, None, Uuid::new_v4(), None)
        .await
        .unwrap();

    let alice = Uuid::new_v4();
    let context = provisioner
        .provision_on_account_created(alice, "alice@example.com")
        .await
        .unwrap();
    assert_eq!(context.outcome, ProvisionOutcome::Invited);

    let builtin = RoleRegistry::new(store.clone())
        .ensure_builtin_roles()
        .await
        .unwrap();
    let assignments = store
        .assignments_for(&[PrincipalRef::User(alice)], org_id)
        .await
        .unwrap();
    assert!(assignments
        .iter()
        .any(|a| a.role_id == builtin.member && a.workspace_id.is_none()));
}

#[tokio::test]
async fn latest_invitation_wins_when_several_are_pending() {
    let (store, org_id) = common::store_with_org().await;
    let other_org = store
        .insert_organization(atrium_core::types::Organization::new(
            "other",
            Uuid::new_v4(),
        ))
        .await
        .unwrap();
    let invitations = InvitationService::new(store.clone());
    let provisioner = Provisioner::new(store.clone());

    // Older invitation into org_id, newer one into other_org
    let mut older = atrium_core::types::Invitation::new(
        "alice@example.com",
        org_id,
        None,
        Uuid::new_v4(),
        chrono::Utc::now() + chrono::Duration::days(7),
    );
    older.created_at = chrono::Utc::now() - chrono::Duration::hours(1);
    store.insert_invitation(older).await.unwrap();
    invitations
        .send_invitation("alice@example.com", other_org, None, Uuid::new_v4(), None)
        .await
        .unwrap();

    let context = provisioner
        .provision_on_account_created(Uuid::new_v4(), "alice@example.com")
        .await
        .unwrap();
    assert_eq!(context.org_id, other_org);
}

#[tokio::test]
async fn expired_invitation_is_never_a_candidate() {
    let (store, org_id) = common::store_with_org().await;
    let invitations = InvitationService::new(store.clone());
    let provisioner = Provisioner::new(store.clone());

    // Expired but never explicitly marked
    invitations
        .send_invitation(
            "bob@example.com",
            org_id,
            None,
            Uuid::new_v4(),
            Some(chrono::Utc::now() - chrono::Duration::minutes(1)),
        )
        .await
        .unwrap();

    let bob = Uuid::new_v4();
    let context = provisioner
        .provision_on_account_created(bob, "bob@example.com")
        .await
        .unwrap();

    // The stale invitation was ignored; bob self-provisioned
    assert_eq!(context.outcome, ProvisionOutcome::SelfSignup);
    assert_ne!(context.org_id, org_id);
    assert!(!store.is_member(bob, org_id).await.unwrap());
}

#[tokio::test]
async fn failed_invited_branch_falls_back_to_self_signup() {
    let (store, org_id) = common::store_with_org().await;
    let invitations = InvitationService::new(store.clone());
    let provisioner = Provisioner::new(store.clone());

    invitations
        .send_invitation("carol@example.com", org_id, None, Uuid::new_v4(), None)
        .await
        .unwrap();
    // The inviting organization disappears before the account arrives
    store.delete_organization(org_id).await.unwrap();

    let carol = Uuid::new_v4();
    let context = provisioner
        .provision_on_account_created(carol, "carol@example.com")
        .await
        .unwrap();

    assert_eq!(context.outcome, ProvisionOutcome::SelfSignup);
    // Nothing from the abandoned branch leaked into the dead org
    assert!(!store.is_member(carol, org_id).await.unwrap());
    assert!(store.is_member(carol, context.org_id).await.unwrap());
}

// ============================================================================
// SELF-SIGNUP BRANCH
// ============================================================================

#[tokio::test]
async fn self_signup_creates_a_personal_org_with_owner_grants() {
    let store = common::store();
    let provisioner = Provisioner::new(store.clone());
    let engine = EvaluationEngine::new(store.clone());

    let bob = Uuid::new_v4();
    let context = provisioner
        .provision_on_account_created(bob, "bob@example.com")
        .await
        .unwrap();

    assert_eq!(context.outcome, ProvisionOutcome::SelfSignup);

    let org = store
        .get_organization(context.org_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(org.name, "bob's organization");
    assert_eq!(org.created_by, bob);

    let workspaces = store.workspaces_in_org(context.org_id).await.unwrap();
    assert_eq!(workspaces.len(), 1);
    assert_eq!(workspaces[0].name, "bob's workspace");

    // Owner at org scope and at workspace scope
    let assignments = store
        .assignments_for(&[PrincipalRef::User(bob)], context.org_id)
        .await
        .unwrap();
    assert_eq!(assignments.len(), 2);
    assert!(assignments.iter().any(|a| a.workspace_id.is_none()));
    assert!(assignments
        .iter()
        .any(|a| a.workspace_id == Some(context.workspace_id)));

    // And the grants actually open the door
    let request = EvaluateRequest::new(
        PrincipalRef::User(bob),
        ActionKind::ManageMembers,
        ResourceKind::Organization,
        context.org_id,
    );
    assert!(engine.evaluate(&request).await.unwrap());
}

// ============================================================================
// RE-ENTRANCY
// ============================================================================

#[tokio::test]
async fn retried_provisioning_does_not_create_a_second_org() {
    let store = common::store();
    let provisioner = Provisioner::new(store.clone());

    let bob = Uuid::new_v4();
    let first = provisioner
        .provision_on_account_created(bob, "bob@example.com")
        .await
        .unwrap();
    let second = provisioner
        .provision_on_account_created(bob, "bob@example.com")
        .await
        .unwrap();

    assert_eq!(second.outcome, ProvisionOutcome::AlreadyProvisioned);
    assert_eq!(first.org_id, second.org_id);
    assert_eq!(first.workspace_id, second.workspace_id);
    assert_eq!(store.memberships_for_user(bob).await.unwrap().len(), 1);
}

#[tokio::test]
async fn retried_invited_provisioning_is_a_noop_too() {
    let (store, org_id) = common::store_with_org().await;
    let invitations = InvitationService::new(store.clone());
    let provisioner = Provisioner::new(store.clone());

    invitations
        .send_invitation("alice@example.com", org_id, None, Uuid::new_v4(), None)
        .await
        .unwrap();

    let alice = Uuid::new_v4();
    let first = provisioner
        .provision_on_account_created(alice, "alice@example.com")
        .await
        .unwrap();
    let second = provisioner
        .provision_on_account_created(alice, "alice@example.com")
        .await
        .unwrap();

    assert_eq!(first.org_id, second.org_id);
    assert_eq!(first.workspace_id, second.workspace_id);
    assert_eq!(second.outcome, ProvisionOutcome::AlreadyProvisioned);
    assert_eq!(store.workspaces_in_org(org_id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn concurrent_duplicate_triggers_yield_one_context() {
    let store = common::store();
    let provisioner = Arc::new(Provisioner::new(store.clone()));

    let bob = Uuid::new_v4();
    let mut handles = Vec::new();
    for _ in 0..8 {
        let provisioner = provisioner.clone();
        handles.push(tokio::spawn(async move {
            provisioner
                .provision_on_account_created(bob, "bob@example.com")
                .await
        }));
    }

    let mut succeeded = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            succeeded += 1;
        }
    }

    // At least the first trigger wins; racers are rejected by the
    // in-flight guard, never by corrupting state
    assert!(succeeded >= 1);
    assert_eq!(store.memberships_for_user(bob).await.unwrap().len(), 1);
}
