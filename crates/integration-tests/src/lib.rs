//! Integration tests for Starboard.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p starboard-integration-tests
//! ```
//!
//! No database or network services are needed: every boundary of the admin
//! crate (identity provider, document store, privileged backend, user
//! directory) has an in-memory fake here.
//!
//! # Test Categories
//!
//! - `entitlements` - Plan table parity, resolution and coercion
//! - `moderation_session` - Session controller and optimistic toggles
//! - `backend_routes` - Privileged backend HTTP contract
//! - `secure_token` - Identity client against a local token endpoint

#![cfg_attr(not(test), forbid(unsafe_code))]
#![allow(clippy::unwrap_used, clippy::missing_panics_doc)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};

use starboard_admin::backend::{
    BackendError, PrivilegedBackend, ToggleDisabledRequest, ToggleDisabledResponse,
};
use starboard_admin::db::{RepositoryError, UserDirectory};
use starboard_admin::identity::{
    IdToken, IdentityError, IdentityProvider, Principal, TokenClaims, TokenKeys,
};
use starboard_admin::session::{AdminSessionController, SessionState};
use starboard_admin::store::{DocumentStore, ResultSetStream, RosterQuery, StoreError};
use starboard_core::{Email, SubscriptionStatus, UserId, UserRecord};

/// Signing secret shared by every fake in this crate.
pub const TEST_TOKEN_SECRET: &[u8] = b"integration-signing-secret-7f3a9c1e5b";

/// How long any wait in these tests may take before failing.
pub const WAIT: Duration = Duration::from_secs(5);

// ============================================================================
// Fixtures
// ============================================================================

/// A tenant record created `days` days after 2025-01-01.
#[must_use]
pub fn record(uid: &str, days: i64) -> UserRecord {
    UserRecord {
        uid: UserId::new(uid),
        email: Email::parse(&format!("{uid}@tenant.example")).unwrap(),
        subscription_status: SubscriptionStatus::Active,
        plan: None,
        stripe_customer_id: None,
        pos_connected: None,
        created_at: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
            + chrono::Duration::days(days),
        last_login_at: None,
        disabled: false,
        is_admin: false,
    }
}

/// An admin account record.
#[must_use]
pub fn admin_record(uid: &str, days: i64) -> UserRecord {
    UserRecord {
        is_admin: true,
        ..record(uid, days)
    }
}

#[must_use]
pub fn test_keys() -> TokenKeys {
    TokenKeys::from_secret(TEST_TOKEN_SECRET, None)
}

/// Poll `check` until it holds.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
}

/// Await `future` with the test timeout.
pub async fn within<T>(future: impl Future<Output = T>) -> T {
    tokio::time::timeout(WAIT, future).await.unwrap()
}

/// Wait until the controller reports `expected`.
pub async fn wait_for_state(controller: &AdminSessionController, expected: SessionState) {
    let mut changes = controller.changes();
    within(async {
        while controller.state() != expected {
            changes.changed().await.unwrap();
        }
    })
    .await;
}

/// `disabled` of a roster entry, or `None` if it is not shown.
#[must_use]
pub fn shown_disabled(controller: &AdminSessionController, uid: &str) -> Option<bool> {
    controller
        .roster()
        .iter()
        .find(|r| r.uid.as_str() == uid)
        .map(|r| r.disabled)
}

// ============================================================================
// Identity provider
// ============================================================================

/// Identity provider with a settable admin set.
pub struct FakeIdentity {
    keys: TokenKeys,
    admins: Mutex<HashSet<UserId>>,
    state: watch::Sender<Option<Principal>>,
    refreshes: AtomicUsize,
    held: Mutex<HashMap<UserId, oneshot::Receiver<()>>>,
    credentials_fail: AtomicBool,
}

impl Default for FakeIdentity {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeIdentity {
    #[must_use]
    pub fn new() -> Self {
        Self {
            keys: test_keys(),
            admins: Mutex::new(HashSet::new()),
            state: watch::channel(None).0,
            refreshes: AtomicUsize::new(0),
            held: Mutex::new(HashMap::new()),
            credentials_fail: AtomicBool::new(false),
        }
    }

    pub fn grant_admin(&self, uid: &str) {
        self.admins.lock().insert(UserId::new(uid));
    }

    pub fn revoke_admin(&self, uid: &str) {
        self.admins.lock().remove(&UserId::new(uid));
    }

    /// Publish a signed-in principal.
    pub fn sign_in(&self, uid: &str) {
        self.state.send_replace(Some(Principal::new(UserId::new(uid))));
    }

    pub fn sign_out(&self) {
        self.state.send_replace(None);
    }

    #[must_use]
    pub fn refresh_count(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }

    /// Hold the next claim refresh for `uid` until the returned sender fires.
    #[must_use]
    pub fn hold_refresh(&self, uid: &str) -> oneshot::Sender<()> {
        let (release, held) = oneshot::channel();
        self.held.lock().insert(UserId::new(uid), held);
        release
    }

    /// Make `fresh_token` fail from now on.
    pub fn fail_credentials(&self) {
        self.credentials_fail.store(true, Ordering::SeqCst);
    }

    fn claims(&self, principal: &Principal) -> TokenClaims {
        let admin = self.admins.lock().contains(&principal.uid);
        self.keys.claims_for(principal.uid.as_str(), Some(admin), 3600)
    }
}

#[async_trait]
impl IdentityProvider for FakeIdentity {
    fn auth_state(&self) -> watch::Receiver<Option<Principal>> {
        self.state.subscribe()
    }

    async fn refresh_claims(&self, principal: &Principal) -> Result<TokenClaims, IdentityError> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        let held = self.held.lock().remove(&principal.uid);
        if let Some(held) = held {
            let _ = held.await;
        }
        Ok(self.claims(principal))
    }

    async fn fresh_token(&self, principal: &Principal) -> Result<IdToken, IdentityError> {
        if self.credentials_fail.load(Ordering::SeqCst) {
            return Err(IdentityError::Request("token service unavailable".to_string()));
        }
        let raw = self.keys.sign(&self.claims(principal))?;
        self.keys.verify_id_token(raw)
    }
}

// ============================================================================
// Document store
// ============================================================================

type Feed = mpsc::UnboundedSender<Result<Vec<UserRecord>, StoreError>>;

/// Document store holding one collection in memory and pushing the whole
/// collection to every open watch on change.
#[derive(Default)]
pub struct FakeDocumentStore {
    records: Mutex<Vec<UserRecord>>,
    feeds: Mutex<Vec<Feed>>,
    watches: AtomicUsize,
}

impl FakeDocumentStore {
    #[must_use]
    pub fn with_records(records: Vec<UserRecord>) -> Self {
        Self {
            records: Mutex::new(records),
            ..Self::default()
        }
    }

    /// Replace the collection and notify every open watch.
    pub fn publish(&self, records: Vec<UserRecord>) {
        *self.records.lock() = records.clone();
        self.feeds
            .lock()
            .retain(|feed| feed.send(Ok(records.clone())).is_ok());
    }

    /// Break every open watch.
    pub fn fail(&self, error: &StoreError) {
        self.feeds
            .lock()
            .retain(|feed| feed.send(Err(error.clone())).is_ok());
    }

    /// Watches opened so far.
    #[must_use]
    pub fn watch_count(&self) -> usize {
        self.watches.load(Ordering::SeqCst)
    }

    /// Watches whose consumer is still alive.
    #[must_use]
    pub fn open_feeds(&self) -> usize {
        let mut feeds = self.feeds.lock();
        feeds.retain(|feed| !feed.is_closed());
        feeds.len()
    }
}

#[async_trait]
impl DocumentStore for FakeDocumentStore {
    async fn watch(&self, _query: &RosterQuery) -> Result<ResultSetStream, StoreError> {
        self.watches.fetch_add(1, Ordering::SeqCst);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _ = tx.send(Ok(self.records.lock().clone()));
        self.feeds.lock().push(tx);
        Ok(futures::stream::poll_fn(move |cx| rx.poll_recv(cx)).boxed())
    }
}

// ============================================================================
// Privileged backend
// ============================================================================

/// Backend that records calls, can be held per call, and fails on demand.
#[derive(Default)]
pub struct FakeBackend {
    calls: Mutex<Vec<ToggleDisabledRequest>>,
    stored: Mutex<HashMap<UserId, bool>>,
    failures: Mutex<VecDeque<Option<BackendError>>>,
    gates: Mutex<VecDeque<oneshot::Receiver<()>>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeBackend {
    /// Script the next call's result: `None` succeeds.
    pub fn script(&self, result: Option<BackendError>) {
        self.failures.lock().push_back(result);
    }

    /// Hold the next unheld call until the returned sender fires.
    #[must_use]
    pub fn hold_next(&self) -> oneshot::Sender<()> {
        let (release, gate) = oneshot::channel();
        self.gates.lock().push_back(gate);
        release
    }

    #[must_use]
    pub fn calls(&self) -> Vec<ToggleDisabledRequest> {
        self.calls.lock().clone()
    }

    /// Value the backend holds for `uid`, if it was ever written.
    #[must_use]
    pub fn stored(&self, uid: &str) -> Option<bool> {
        self.stored.lock().get(&UserId::new(uid)).copied()
    }

    #[must_use]
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PrivilegedBackend for FakeBackend {
    async fn toggle_disabled(
        &self,
        credential: &IdToken,
        request: &ToggleDisabledRequest,
    ) -> Result<ToggleDisabledResponse, BackendError> {
        assert!(credential.claims().is_admin(), "dispatched without admin credential");

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.calls.lock().push(request.clone());

        let gate = self.gates.lock().pop_front();
        if let Some(gate) = gate {
            let _ = gate.await;
        }

        let failure = self.failures.lock().pop_front().flatten();
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if let Some(error) = failure {
            return Err(error);
        }

        self.stored
            .lock()
            .insert(request.target_uid.clone(), request.disabled);
        Ok(ToggleDisabledResponse {
            uid: request.target_uid.clone(),
            disabled: request.disabled,
        })
    }
}

// ============================================================================
// User directory
// ============================================================================

/// In-memory [`UserDirectory`].
#[derive(Default)]
pub struct MemoryDirectory {
    records: Mutex<HashMap<UserId, UserRecord>>,
    down: AtomicBool,
}

impl MemoryDirectory {
    #[must_use]
    pub fn with_records(records: Vec<UserRecord>) -> Self {
        Self {
            records: Mutex::new(records.into_iter().map(|r| (r.uid.clone(), r)).collect()),
            down: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn disabled(&self, uid: &str) -> Option<bool> {
        self.records.lock().get(&UserId::new(uid)).map(|r| r.disabled)
    }

    #[must_use]
    pub fn is_admin(&self, uid: &str) -> Option<bool> {
        self.records.lock().get(&UserId::new(uid)).map(|r| r.is_admin)
    }

    /// Grant the admin flag out of band, as the grant tool does.
    pub fn grant_admin(&self, uid: &UserId) {
        if let Some(record) = self.records.lock().get_mut(uid) {
            record.is_admin = true;
        }
    }

    /// Make every call fail as if the database were unreachable.
    pub fn take_down(&self) {
        self.down.store(true, Ordering::SeqCst);
    }

    fn check_up(&self) -> Result<(), RepositoryError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(RepositoryError::Database(sqlx::Error::PoolClosed));
        }
        Ok(())
    }
}

#[async_trait]
impl UserDirectory for MemoryDirectory {
    async fn get(&self, uid: &UserId) -> Result<Option<UserRecord>, RepositoryError> {
        self.check_up()?;
        Ok(self.records.lock().get(uid).cloned())
    }

    async fn set_disabled(
        &self,
        uid: &UserId,
        disabled: bool,
    ) -> Result<UserRecord, RepositoryError> {
        self.check_up()?;
        let mut records = self.records.lock();
        let record = records.get_mut(uid).ok_or(RepositoryError::NotFound)?;
        if record.is_admin {
            return Err(RepositoryError::AdminTarget);
        }
        record.disabled = disabled;
        Ok(record.clone())
    }

    async fn ping(&self) -> Result<(), RepositoryError> {
        self.check_up()
    }
}
