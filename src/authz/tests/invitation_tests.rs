//! Invitation lifecycle integration tests

mod common;

use atrium_authz::store::{AssignmentStore, InvitationStore, MembershipStore};
use atrium_authz::{
    AuthzError, EvaluateRequest, EvaluationEngine, InvitationService, Provisioner,
};
use atrium_core::types::{ActionKind, InvitationStatus, PrincipalRef, ResourceKind};
use uuid::Uuid;

#[tokio::test]
async fn accepting_twice_succeeds_without_side_effects() {
    let (store, org_id) = common::store_with_org().await;
    let invitations = InvitationService::new(store.clone());

    let id = invitations
        .send_invitation("alice@example.com", org_id, None, Uuid::new_v4(), None)
        .await
        .unwrap();

    invitations.accept_invitation(id).await.unwrap();
    let accepted_at = store
        .get_invitation(id)
        .await
        .unwrap()
        .unwrap()
        .accepted_at;

    invitations.accept_invitation(id).await.unwrap();
    let after = store
        .get_invitation(id)
        .await
        .unwrap()
        .unwrap()
        .accepted_at;
    assert_eq!(accepted_at, after);
}

#[tokio::test]
async fn stale_acceptance_is_rejected() {
    let (store, org_id) = common::store_with_org().await;
    let invitations = InvitationService::new(store.clone());

    let id = invitations
        .send_invitation(
            "alice@example.com",
            org_id,
            None,
            Uuid::new_v4(),
            Some(chrono::Utc::now() - chrono::Duration::seconds(30)),
        )
        .await
        .unwrap();

    let result = invitations.accept_invitation(id).await;
    assert!(matches!(result, Err(AuthzError::InvitationExpired(_))));

    let invitation = store.get_invitation(id).await.unwrap().unwrap();
    assert_eq!(
        invitation.status_at(chrono::Utc::now()),
        InvitationStatus::Expired
    );
    assert!(invitation.accepted_at.is_none());
}

#[tokio::test]
async fn revoking_an_invitation_revokes_what_it_granted() {
    let (store, org_id) = common::store_with_org().await;
    let invitations = InvitationService::new(store.clone());
    let provisioner = Provisioner::new(store.clone());
    let engine = EvaluationEngine::new(store.clone());

    let invitation_id = invitations
        .send_invitation("alice@example.com", org_id, None, Uuid::new_v4(), None)
        .await
        .unwrap();

    let alice = Uuid::new_v4();
    provisioner
        .provision_on_account_created(alice, "alice@example.com")
        .await
        .unwrap();

    let principal = PrincipalRef::User(alice);
    let request = EvaluateRequest::new(
        principal,
        ActionKind::Read,
        ResourceKind::Entity,
        org_id,
    );
    assert!(engine.evaluate(&request).await.unwrap());

    invitations
        .revoke_invitation(invitation_id, org_id)
        .await
        .unwrap();

    // Both provisioning grants are gone; membership alone opens no doors
    assert!(store
        .assignments_for(&[principal], org_id)
        .await
        .unwrap()
        .is_empty());
    assert!(store.is_member(alice, org_id).await.unwrap());
    assert!(!engine.evaluate(&request).await.unwrap());
}

#[tokio::test]
async fn revoked_invitation_is_gone_from_the_ledger() {
    let (store, org_id) = common::store_with_org().await;
    let invitations = InvitationService::new(store.clone());

    let id = invitations
        .send_invitation("alice@example.com", org_id, None, Uuid::new_v4(), None)
        .await
        .unwrap();
    invitations.revoke_invitation(id, org_id).await.unwrap();

    // Accepting a revoked invitation fails, and it is no longer a
    // provisioning candidate
    let result = invitations.accept_invitation(id).await;
    assert!(result.is_err());
    assert!(store
        .latest_pending_for_email("alice@example.com", chrono::Utc::now())
        .await
        .unwrap()
        .is_none());
}
