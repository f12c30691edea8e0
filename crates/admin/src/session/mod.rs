//! Admin session controller.
//!
//! Owns the operator's session: who is signed in, whether they hold the
//! admin claim, and the live roster shown to them. Identity changes arrive
//! through [`AdminSessionController::on_auth_state_changed`]; the roster is
//! fed by a [`RosterSubscription`] opened only for verified admins.
//!
//! Every identity change bumps an epoch. Claim checks, snapshots and
//! mutation compensations carry the epoch they were started under and are
//! dropped if it no longer matches, so nothing from a previous session can
//! reach the current one.
//!
//! # Modules
//!
//! - [`mutation`] - optimistic `disabled` toggles with rollback

pub mod mutation;

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use starboard_core::{UserId, UserRecord};

use crate::backend::PrivilegedBackend;
use crate::identity::{IdentityProvider, Principal};
use crate::services::ClaimVerifier;
use crate::store::{ModerationStore, RosterEvent, RosterQuery, RosterSubscription};

pub use mutation::{MutationError, MutationOutcome, PendingMutation};

use mutation::MutationTail;

/// Progress of the roster for an authorized session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    /// Subscription open, no snapshot yet.
    Loading,
    /// At least one snapshot received.
    Loaded,
    /// The subscription failed. The roster is empty until the next
    /// identity change.
    Degraded,
}

/// Where the operator's session stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Anonymous,
    /// Signed in, admin claim not yet checked.
    Authenticating,
    /// Signed in without the admin claim.
    Unauthorized,
    Authorized(LoadState),
}

impl SessionState {
    #[must_use]
    pub const fn is_loaded(self) -> bool {
        matches!(self, Self::Authorized(LoadState::Loaded))
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Anonymous => f.write_str("anonymous"),
            Self::Authenticating => f.write_str("authenticating"),
            Self::Unauthorized => f.write_str("unauthorized"),
            Self::Authorized(LoadState::Loading) => f.write_str("authorized (loading)"),
            Self::Authorized(LoadState::Loaded) => f.write_str("authorized"),
            Self::Authorized(LoadState::Degraded) => f.write_str("authorized (roster unavailable)"),
        }
    }
}

// =============================================================================
// Shared state
// =============================================================================

/// Cancels the roster forwarder when the session lets go of it.
struct ActiveFeed {
    cancel: CancellationToken,
}

impl Drop for ActiveFeed {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct Session {
    epoch: u64,
    state: SessionState,
    principal: Option<Principal>,
    roster: Vec<UserRecord>,
    feed: Option<ActiveFeed>,
    /// Most recent mutation per target; the next toggle on that target
    /// waits for it.
    mutations: HashMap<UserId, MutationTail>,
}

impl Session {
    /// Forget everything belonging to the current epoch and start a new one.
    fn reset(&mut self) -> u64 {
        self.epoch += 1;
        self.feed = None;
        self.roster.clear();
        self.mutations.clear();
        self.epoch
    }

    fn entry_mut(&mut self, uid: &UserId) -> Option<&mut UserRecord> {
        self.roster.iter_mut().find(|record| &record.uid == uid)
    }
}

struct Shared {
    identity: Arc<dyn IdentityProvider>,
    verifier: ClaimVerifier,
    store: ModerationStore,
    backend: Arc<dyn PrivilegedBackend>,
    query: RosterQuery,
    session: Mutex<Session>,
    changes: watch::Sender<u64>,
}

impl Shared {
    /// Wake observers. The value is a change counter.
    fn notify(&self) {
        self.changes.send_modify(|version| *version = version.wrapping_add(1));
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.session.lock().epoch == epoch
    }

    /// Apply a subscription event. Returns `false` once the epoch has moved
    /// on and the forwarder should stop.
    fn apply_roster_event(&self, epoch: u64, event: RosterEvent) -> bool {
        let mut session = self.session.lock();
        if session.epoch != epoch {
            debug!(epoch, "dropping roster event from a previous session");
            return false;
        }

        match event {
            RosterEvent::Snapshot(snapshot) => {
                debug!(
                    sequence = snapshot.sequence,
                    count = snapshot.records.len(),
                    "roster snapshot"
                );
                session.roster = snapshot.records;
                session.state = SessionState::Authorized(LoadState::Loaded);
            }
            RosterEvent::Error(error) => {
                warn!(error = %error, "roster subscription failed; showing no data");
                session.roster.clear();
                session.state = SessionState::Authorized(LoadState::Degraded);
            }
        }
        drop(session);

        self.notify();
        true
    }
}

// =============================================================================
// Controller
// =============================================================================

/// Session controller for the moderation console.
///
/// Cheap to clone; clones share one session.
#[derive(Clone)]
pub struct AdminSessionController {
    shared: Arc<Shared>,
}

impl fmt::Debug for AdminSessionController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let session = self.shared.session.lock();
        f.debug_struct("AdminSessionController")
            .field("epoch", &session.epoch)
            .field("state", &session.state)
            .field("roster_len", &session.roster.len())
            .finish_non_exhaustive()
    }
}

impl AdminSessionController {
    /// Controller showing the default roster page (newest ten accounts).
    #[must_use]
    pub fn new(
        identity: Arc<dyn IdentityProvider>,
        store: ModerationStore,
        backend: Arc<dyn PrivilegedBackend>,
    ) -> Self {
        Self::with_query(identity, store, backend, RosterQuery::default())
    }

    #[must_use]
    pub fn with_query(
        identity: Arc<dyn IdentityProvider>,
        store: ModerationStore,
        backend: Arc<dyn PrivilegedBackend>,
        query: RosterQuery,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                verifier: ClaimVerifier::new(identity.clone()),
                identity,
                store,
                backend,
                query,
                session: Mutex::new(Session {
                    epoch: 0,
                    state: SessionState::Anonymous,
                    principal: None,
                    roster: Vec::new(),
                    feed: None,
                    mutations: HashMap::new(),
                }),
                changes: watch::channel(0).0,
            }),
        }
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.shared.session.lock().state
    }

    /// The roster as last shown, including optimistic edits.
    ///
    /// Empty unless the session is authorized and loaded.
    #[must_use]
    pub fn roster(&self) -> Vec<UserRecord> {
        let session = self.shared.session.lock();
        if session.state.is_loaded() {
            session.roster.clone()
        } else {
            Vec::new()
        }
    }

    #[must_use]
    pub fn principal(&self) -> Option<Principal> {
        self.shared.session.lock().principal.clone()
    }

    /// Receiver that changes whenever the state or the roster does.
    #[must_use]
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.shared.changes.subscribe()
    }

    /// Follow the identity provider's auth state.
    ///
    /// The current value is handled immediately, then every change. Claim
    /// checks run concurrently; a newer identity supersedes an older check
    /// still in flight. Abort the returned handle to detach.
    #[must_use]
    pub fn attach(&self) -> JoinHandle<()> {
        let mut auth = self.shared.identity.auth_state();
        let controller = self.clone();

        tokio::spawn(async move {
            let mut principal = auth.borrow_and_update().clone();
            loop {
                if let Some((epoch, principal)) = controller.begin_session(principal) {
                    let controller = controller.clone();
                    tokio::spawn(async move { controller.authorize(epoch, principal).await });
                }
                if auth.changed().await.is_err() {
                    debug!("identity provider closed its auth state");
                    break;
                }
                principal = auth.borrow_and_update().clone();
            }
        })
    }

    /// Handle an identity change reported by the provider.
    ///
    /// Closes the current subscription and drops the roster before anything
    /// else. A signed-in principal is then checked for the admin claim and,
    /// if it holds it, a fresh subscription is opened.
    pub async fn on_auth_state_changed(&self, principal: Option<Principal>) {
        if let Some((epoch, principal)) = self.begin_session(principal) {
            self.authorize(epoch, principal).await;
        }
    }

    /// Synchronous half of an identity change: start a new epoch.
    ///
    /// Returns the epoch and principal still needing a claim check.
    fn begin_session(&self, principal: Option<Principal>) -> Option<(u64, Principal)> {
        let mut session = self.shared.session.lock();
        let epoch = session.reset();
        session.principal.clone_from(&principal);
        session.state = if principal.is_some() {
            SessionState::Authenticating
        } else {
            SessionState::Anonymous
        };
        drop(session);

        match &principal {
            Some(p) => info!(uid = %p.uid, epoch, "operator signed in"),
            None => info!(epoch, "operator signed out"),
        }
        self.shared.notify();
        principal.map(|p| (epoch, p))
    }

    #[instrument(skip(self, principal), fields(uid = %principal.uid))]
    async fn authorize(&self, epoch: u64, principal: Principal) {
        let is_admin = match self.shared.verifier.verify_admin(Some(&principal)).await {
            Ok(is_admin) => is_admin,
            Err(e) => {
                warn!(error = %e, "claim refresh failed; treating as unauthorized");
                false
            }
        };

        let mut session = self.shared.session.lock();
        if session.epoch != epoch {
            debug!("identity changed during claim check; discarding result");
            return;
        }

        if !is_admin {
            session.state = SessionState::Unauthorized;
            drop(session);
            info!("operator lacks the admin claim");
            self.shared.notify();
            return;
        }

        session.state = SessionState::Authorized(LoadState::Loading);
        let cancel = CancellationToken::new();
        let subscription = self.shared.store.subscribe_query(self.shared.query.clone());
        tokio::spawn(forward_roster(
            Arc::downgrade(&self.shared),
            epoch,
            subscription,
            cancel.clone(),
        ));
        session.feed = Some(ActiveFeed { cancel });
        drop(session);

        info!("operator authorized; loading roster");
        self.shared.notify();
    }
}

/// Move subscription events into the session until cancelled, the epoch
/// moves on, the subscription ends, or the controller is dropped.
async fn forward_roster(
    shared: Weak<Shared>,
    epoch: u64,
    mut subscription: RosterSubscription,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            event = subscription.next() => event,
        };
        let Some(event) = event else {
            break;
        };
        let Some(shared) = shared.upgrade() else {
            break;
        };
        if !shared.apply_roster_event(epoch, event) {
            break;
        }
    }

    subscription.unsubscribe();
    debug!(epoch, "roster forwarder stopped");
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use futures::StreamExt;
    use tokio::sync::mpsc;

    use super::*;
    use crate::backend::{BackendError, ToggleDisabledRequest, ToggleDisabledResponse};
    use crate::identity::{IdToken, IdentityError, TokenClaims};
    use crate::store::{DocumentStore, ResultSetStream, StoreError};
    use starboard_core::{Email, SubscriptionStatus};

    struct Admins(Vec<&'static str>);

    #[async_trait]
    impl IdentityProvider for Admins {
        fn auth_state(&self) -> watch::Receiver<Option<Principal>> {
            watch::channel(None).1
        }

        async fn refresh_claims(&self, principal: &Principal) -> Result<TokenClaims, IdentityError> {
            Ok(TokenClaims {
                sub: principal.uid.to_string(),
                email: None,
                admin: Some(self.0.contains(&principal.uid.as_str())),
                iss: None,
                iat: 0,
                exp: i64::MAX,
            })
        }

        async fn fresh_token(&self, _principal: &Principal) -> Result<IdToken, IdentityError> {
            Err(IdentityError::SignedOut)
        }
    }

    /// Store whose every watch is fed by the test through `feeds`.
    struct ChannelStore {
        feeds: mpsc::UnboundedSender<mpsc::UnboundedSender<Result<Vec<UserRecord>, StoreError>>>,
    }

    #[async_trait]
    impl DocumentStore for ChannelStore {
        async fn watch(&self, _query: &RosterQuery) -> Result<ResultSetStream, StoreError> {
            let (tx, rx) = mpsc::unbounded_channel();
            self.feeds.send(tx).unwrap();
            Ok(receiver_stream(rx))
        }
    }

    fn receiver_stream(
        mut rx: mpsc::UnboundedReceiver<Result<Vec<UserRecord>, StoreError>>,
    ) -> ResultSetStream {
        futures::stream::poll_fn(move |cx| rx.poll_recv(cx)).boxed()
    }

    struct NoBackend;

    #[async_trait]
    impl PrivilegedBackend for NoBackend {
        async fn toggle_disabled(
            &self,
            _credential: &IdToken,
            _request: &ToggleDisabledRequest,
        ) -> Result<ToggleDisabledResponse, BackendError> {
            Err(BackendError::Transport("offline".to_string()))
        }
    }

    fn record(uid: &str) -> UserRecord {
        UserRecord {
            uid: UserId::new(uid),
            email: Email::parse(&format!("{uid}@cafe.example")).unwrap(),
            subscription_status: SubscriptionStatus::Active,
            plan: None,
            stripe_customer_id: None,
            pos_connected: None,
            created_at: Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap(),
            last_login_at: None,
            disabled: false,
            is_admin: false,
        }
    }

    fn controller(
        admins: Vec<&'static str>,
    ) -> (
        AdminSessionController,
        mpsc::UnboundedReceiver<mpsc::UnboundedSender<Result<Vec<UserRecord>, StoreError>>>,
    ) {
        let (feeds, opened) = mpsc::unbounded_channel();
        let controller = AdminSessionController::new(
            Arc::new(Admins(admins)),
            ModerationStore::new(Arc::new(ChannelStore { feeds })),
            Arc::new(NoBackend),
        );
        (controller, opened)
    }

    async fn wait_for_state(controller: &AdminSessionController, expected: SessionState) {
        let mut changes = controller.changes();
        tokio::time::timeout(Duration::from_secs(5), async {
            while controller.state() != expected {
                changes.changed().await.unwrap();
            }
        })
        .await
        .unwrap();
    }

    #[test]
    fn test_state_display() {
        assert_eq!(SessionState::Anonymous.to_string(), "anonymous");
        assert_eq!(
            SessionState::Authorized(LoadState::Degraded).to_string(),
            "authorized (roster unavailable)"
        );
        assert!(SessionState::Authorized(LoadState::Loaded).is_loaded());
        assert!(!SessionState::Authorized(LoadState::Loading).is_loaded());
    }

    #[tokio::test]
    async fn test_starts_anonymous() {
        let (controller, _opened) = controller(vec![]);
        assert_eq!(controller.state(), SessionState::Anonymous);
        assert!(controller.roster().is_empty());
        assert!(controller.principal().is_none());
    }

    #[tokio::test]
    async fn test_non_admin_is_unauthorized_without_subscription() {
        let (controller, mut opened) = controller(vec![]);
        controller
            .on_auth_state_changed(Some(Principal::new("bob".into())))
            .await;

        assert_eq!(controller.state(), SessionState::Unauthorized);
        tokio::task::yield_now().await;
        assert!(opened.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_admin_loads_roster() {
        let (controller, mut opened) = controller(vec!["alice"]);
        controller
            .on_auth_state_changed(Some(Principal::new("alice".into())))
            .await;
        assert_eq!(controller.state(), SessionState::Authorized(LoadState::Loading));
        assert!(controller.roster().is_empty());

        let feed = opened.recv().await.unwrap();
        feed.send(Ok(vec![record("u1")])).unwrap();
        wait_for_state(&controller, SessionState::Authorized(LoadState::Loaded)).await;

        assert_eq!(controller.roster(), vec![record("u1")]);
    }

    #[tokio::test]
    async fn test_feed_error_degrades() {
        let (controller, mut opened) = controller(vec!["alice"]);
        controller
            .on_auth_state_changed(Some(Principal::new("alice".into())))
            .await;

        let feed = opened.recv().await.unwrap();
        feed.send(Ok(vec![record("u1")])).unwrap();
        wait_for_state(&controller, SessionState::Authorized(LoadState::Loaded)).await;

        feed.send(Err(StoreError::Feed("connection lost".to_string())))
            .unwrap();
        wait_for_state(&controller, SessionState::Authorized(LoadState::Degraded)).await;
        assert!(controller.roster().is_empty());
    }

    #[tokio::test]
    async fn test_sign_out_closes_feed() {
        let (controller, mut opened) = controller(vec!["alice"]);
        controller
            .on_auth_state_changed(Some(Principal::new("alice".into())))
            .await;
        let feed = opened.recv().await.unwrap();

        controller.on_auth_state_changed(None).await;
        assert_eq!(controller.state(), SessionState::Anonymous);

        tokio::time::timeout(Duration::from_secs(5), feed.closed())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_toggle_requires_loaded_roster() {
        let (controller, _opened) = controller(vec![]);
        assert!(matches!(
            controller.toggle_disabled(&UserId::new("u1")),
            Err(MutationError::NotReady(SessionState::Anonymous))
        ));
    }
}
