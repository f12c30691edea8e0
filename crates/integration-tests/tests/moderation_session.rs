//! Moderation session scenarios: claim gating, live roster, optimistic
//! toggles with rollback, and identity changes mid-flight.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use starboard_admin::backend::BackendError;
use starboard_admin::session::{
    AdminSessionController, LoadState, MutationError, MutationOutcome, SessionState,
};
use starboard_admin::store::{ModerationStore, StoreError};
use starboard_core::{UserId, UserRecord};
use starboard_integration_tests::{
    FakeBackend, FakeDocumentStore, FakeIdentity, admin_record, eventually, record,
    shown_disabled, wait_for_state, within,
};

const OPERATOR: &str = "op-alice";
const LOADED: SessionState = SessionState::Authorized(LoadState::Loaded);

struct Harness {
    identity: Arc<FakeIdentity>,
    store: Arc<FakeDocumentStore>,
    backend: Arc<FakeBackend>,
    controller: AdminSessionController,
    attached: JoinHandle<()>,
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.attached.abort();
    }
}

fn harness(records: Vec<UserRecord>) -> Harness {
    let identity = Arc::new(FakeIdentity::new());
    identity.grant_admin(OPERATOR);
    let store = Arc::new(FakeDocumentStore::with_records(records));
    let backend = Arc::new(FakeBackend::default());
    let controller = AdminSessionController::new(
        identity.clone(),
        ModerationStore::new(store.clone()),
        backend.clone(),
    );
    let attached = controller.attach();
    Harness {
        identity,
        store,
        backend,
        controller,
        attached,
    }
}

async fn signed_in_admin(records: Vec<UserRecord>) -> Harness {
    let h = harness(records);
    h.identity.sign_in(OPERATOR);
    wait_for_state(&h.controller, LOADED).await;
    h
}

fn tenants() -> Vec<UserRecord> {
    vec![record("u1", 3), record("u2", 2), admin_record("op-root", 1)]
}

fn server_error() -> BackendError {
    BackendError::Rejected {
        status: 500,
        message: "internal".to_string(),
    }
}

// ============================================================================
// Claim gating
// ============================================================================

#[tokio::test]
async fn test_admin_sees_newest_ten_records() {
    let records: Vec<UserRecord> = (0..12).map(|i| record(&format!("t{i:02}"), i)).collect();
    let h = signed_in_admin(records).await;

    let roster = h.controller.roster();
    assert_eq!(roster.len(), 10);
    assert_eq!(roster.first().unwrap().uid.as_str(), "t11");
    assert_eq!(roster.last().unwrap().uid.as_str(), "t02");
    assert_eq!(h.store.watch_count(), 1);
}

#[tokio::test]
async fn test_non_admin_is_unauthorized_and_never_subscribes() {
    let h = harness(tenants());
    h.identity.sign_in("bob");
    wait_for_state(&h.controller, SessionState::Unauthorized).await;

    assert!(h.controller.roster().is_empty());
    assert_eq!(h.store.watch_count(), 0);
}

#[tokio::test]
async fn test_every_sign_in_forces_a_claim_refresh() {
    let h = signed_in_admin(tenants()).await;
    h.identity.sign_out();
    wait_for_state(&h.controller, SessionState::Anonymous).await;
    h.identity.sign_in(OPERATOR);
    wait_for_state(&h.controller, LOADED).await;

    assert_eq!(h.identity.refresh_count(), 2);
}

#[tokio::test]
async fn test_revoked_claim_takes_effect_on_next_identity_event() {
    let h = signed_in_admin(tenants()).await;
    h.identity.revoke_admin(OPERATOR);
    h.identity.sign_in(OPERATOR);

    wait_for_state(&h.controller, SessionState::Unauthorized).await;
    assert!(h.controller.roster().is_empty());
}

// ============================================================================
// Live roster
// ============================================================================

#[tokio::test]
async fn test_snapshot_replaces_roster() {
    let h = signed_in_admin(tenants()).await;

    let mut changed = tenants();
    changed.first_mut().unwrap().disabled = true;
    h.store.publish(changed);

    eventually(|| shown_disabled(&h.controller, "u1") == Some(true)).await;
}

#[tokio::test]
async fn test_feed_failure_degrades_to_empty_roster() {
    let h = signed_in_admin(tenants()).await;
    h.store.fail(&StoreError::Feed("listener dropped".to_string()));

    wait_for_state(&h.controller, SessionState::Authorized(LoadState::Degraded)).await;
    assert!(h.controller.roster().is_empty());
    assert!(matches!(
        h.controller.toggle_disabled(&UserId::new("u1")),
        Err(MutationError::NotReady(SessionState::Authorized(LoadState::Degraded)))
    ));
}

#[tokio::test]
async fn test_sign_out_closes_subscription() {
    let h = signed_in_admin(tenants()).await;
    assert_eq!(h.store.open_feeds(), 1);

    h.identity.sign_out();
    wait_for_state(&h.controller, SessionState::Anonymous).await;
    eventually(|| h.store.open_feeds() == 0).await;
    assert!(h.controller.principal().is_none());
}

// ============================================================================
// Identity changes
// ============================================================================

#[tokio::test]
async fn test_admin_to_non_admin_drops_previous_subscription() {
    let h = signed_in_admin(tenants()).await;

    h.identity.sign_in("bob");
    wait_for_state(&h.controller, SessionState::Unauthorized).await;
    eventually(|| h.store.open_feeds() == 0).await;

    // Writes after the switch must not reach bob's session.
    h.store.publish(vec![record("late", 9)]);
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(h.controller.state(), SessionState::Unauthorized);
    assert!(h.controller.roster().is_empty());
    assert_eq!(h.controller.principal().unwrap().uid.as_str(), "bob");
}

#[tokio::test]
async fn test_slow_claim_check_for_previous_identity_is_discarded() {
    let h = harness(tenants());
    let release = h.identity.hold_refresh(OPERATOR);

    h.identity.sign_in(OPERATOR);
    wait_for_state(&h.controller, SessionState::Authenticating).await;

    h.identity.sign_in("bob");
    wait_for_state(&h.controller, SessionState::Unauthorized).await;

    release.send(()).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(h.controller.state(), SessionState::Unauthorized);
    assert_eq!(h.store.watch_count(), 0);
}

// ============================================================================
// Optimistic toggles
// ============================================================================

#[tokio::test]
async fn test_toggle_confirmed() {
    let h = signed_in_admin(tenants()).await;

    let pending = h.controller.toggle_disabled(&UserId::new("u2")).unwrap();
    assert!(pending.disabled());
    assert_eq!(shown_disabled(&h.controller, "u2"), Some(true));

    assert!(within(pending.outcome()).await.is_confirmed());
    assert_eq!(h.backend.stored("u2"), Some(true));
    assert_eq!(shown_disabled(&h.controller, "u2"), Some(true));
}

#[tokio::test]
async fn test_optimistic_disable_reverts_when_backend_fails() {
    let h = signed_in_admin(tenants()).await;
    h.backend.script(Some(server_error()));
    let release = h.backend.hold_next();

    let pending = h.controller.toggle_disabled(&UserId::new("u1")).unwrap();
    assert_eq!(shown_disabled(&h.controller, "u1"), Some(true));

    release.send(()).unwrap();
    let outcome = within(pending.outcome()).await;
    assert!(matches!(
        outcome,
        MutationOutcome::RolledBack {
            error: BackendError::Rejected { status: 500, .. }
        }
    ));
    assert_eq!(shown_disabled(&h.controller, "u1"), Some(false));
    assert_eq!(h.backend.stored("u1"), None);
}

#[tokio::test]
async fn test_rapid_double_toggle_is_serialized() {
    let h = signed_in_admin(tenants()).await;
    let release = h.backend.hold_next();
    let target = UserId::new("u1");

    let first = h.controller.toggle_disabled(&target).unwrap();
    let second = h.controller.toggle_disabled(&target).unwrap();
    assert!(first.disabled());
    assert!(!second.disabled());
    assert_eq!(shown_disabled(&h.controller, "u1"), Some(false));

    eventually(|| h.backend.calls().len() == 1).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(h.backend.calls().len(), 1, "second toggle dispatched early");

    release.send(()).unwrap();
    assert!(within(first.outcome()).await.is_confirmed());
    assert!(within(second.outcome()).await.is_confirmed());

    let sent: Vec<bool> = h.backend.calls().iter().map(|c| c.disabled).collect();
    assert_eq!(sent, [true, false]);
    assert_eq!(h.backend.max_in_flight(), 1);
    assert_eq!(h.backend.stored("u1"), Some(false));
}

#[tokio::test]
async fn test_toggles_on_different_targets_run_concurrently() {
    let h = signed_in_admin(tenants()).await;
    let hold_u1 = h.backend.hold_next();
    let hold_u2 = h.backend.hold_next();

    let first = h.controller.toggle_disabled(&UserId::new("u1")).unwrap();
    let second = h.controller.toggle_disabled(&UserId::new("u2")).unwrap();

    eventually(|| h.backend.calls().len() == 2).await;
    assert_eq!(h.backend.max_in_flight(), 2);

    hold_u1.send(()).unwrap();
    hold_u2.send(()).unwrap();
    assert!(within(first.outcome()).await.is_confirmed());
    assert!(within(second.outcome()).await.is_confirmed());
}

#[tokio::test]
async fn test_admin_target_refused_before_dispatch() {
    let h = signed_in_admin(tenants()).await;
    let before = h.controller.roster();

    assert_eq!(
        h.controller
            .toggle_disabled(&UserId::new("op-root"))
            .unwrap_err(),
        MutationError::SelfLockout(UserId::new("op-root"))
    );
    assert_eq!(h.controller.roster(), before);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(h.backend.calls().is_empty());
}

#[tokio::test]
async fn test_unknown_target_refused() {
    let h = signed_in_admin(tenants()).await;
    assert_eq!(
        h.controller.toggle_disabled(&UserId::new("ghost")).unwrap_err(),
        MutationError::UnknownTarget(UserId::new("ghost"))
    );
}

#[tokio::test]
async fn test_toggle_before_roster_loads_is_not_ready() {
    let h = harness(tenants());
    assert_eq!(
        h.controller.toggle_disabled(&UserId::new("u1")).unwrap_err(),
        MutationError::NotReady(SessionState::Anonymous)
    );
}

#[tokio::test]
async fn test_credential_failure_rolls_back_without_dispatch() {
    let h = signed_in_admin(tenants()).await;
    h.identity.fail_credentials();

    let pending = h.controller.toggle_disabled(&UserId::new("u1")).unwrap();
    let outcome = within(pending.outcome()).await;

    assert!(matches!(
        outcome,
        MutationOutcome::RolledBack {
            error: BackendError::Credential(_)
        }
    ));
    assert!(h.backend.calls().is_empty());
    assert_eq!(shown_disabled(&h.controller, "u1"), Some(false));
}

#[tokio::test]
async fn test_rollback_skipped_after_identity_change() {
    let h = signed_in_admin(tenants()).await;
    h.backend.script(Some(server_error()));
    let release = h.backend.hold_next();

    let pending = h.controller.toggle_disabled(&UserId::new("u1")).unwrap();
    eventually(|| h.backend.calls().len() == 1).await;

    h.identity.sign_in("bob");
    wait_for_state(&h.controller, SessionState::Unauthorized).await;
    release.send(()).unwrap();

    assert!(matches!(
        within(pending.outcome()).await,
        MutationOutcome::RolledBack { .. }
    ));
    assert!(h.controller.roster().is_empty());
    assert_eq!(h.controller.state(), SessionState::Unauthorized);
}
