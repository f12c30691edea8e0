//! Optimistic `disabled` toggles.
//!
//! A toggle flips the roster entry immediately, then dispatches the new value
//! to the privileged backend in the background. If the backend call fails the
//! entry is restored to the last value the backend actually holds.
//!
//! Toggles on the same target run one after another: each waits for its
//! predecessor to settle and learns the durable value it left behind. That
//! value is what a failed toggle restores, so a failure in the middle of a
//! chain never reverts past a toggle that succeeded. Only the newest toggle
//! on a target writes its restore into the roster; an older one failing
//! leaves the newer optimistic value alone.

use std::sync::{Arc, Weak};

use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use starboard_core::UserId;

use super::{AdminSessionController, SessionState, Shared};
use crate::backend::{
    BackendError, PrivilegedBackend, ToggleDisabledRequest, ToggleDisabledResponse,
};
use crate::identity::{IdentityProvider, Principal};

/// Reasons a toggle is refused before anything is dispatched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MutationError {
    #[error("roster is not ready (session is {0})")]
    NotReady(SessionState),

    #[error("{0} is not in the roster")]
    UnknownTarget(UserId),

    /// Disabling an admin could lock every operator out.
    #[error("{0} is an admin account and cannot be toggled")]
    SelfLockout(UserId),
}

/// How a dispatched toggle ended.
#[derive(Debug)]
pub enum MutationOutcome {
    /// The backend stored the new value.
    Confirmed,
    /// The backend call failed and the roster entry was restored.
    RolledBack { error: BackendError },
    /// The session changed before the toggle was dispatched.
    Cancelled,
}

impl MutationOutcome {
    #[must_use]
    pub const fn is_confirmed(&self) -> bool {
        matches!(self, Self::Confirmed)
    }
}

/// Handle to a toggle in flight.
#[derive(Debug)]
pub struct PendingMutation {
    id: Uuid,
    target: UserId,
    disabled: bool,
    outcome: oneshot::Receiver<MutationOutcome>,
}

impl PendingMutation {
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub const fn target(&self) -> &UserId {
        &self.target
    }

    /// The value written optimistically and sent to the backend.
    #[must_use]
    pub const fn disabled(&self) -> bool {
        self.disabled
    }

    /// Wait for the backend's answer.
    pub async fn outcome(self) -> MutationOutcome {
        self.outcome.await.unwrap_or(MutationOutcome::Cancelled)
    }
}

/// The newest toggle on a target, as seen by the next one.
pub(super) struct MutationTail {
    id: Uuid,
    /// Resolves with the durable value once that toggle settles.
    settled: oneshot::Receiver<bool>,
}

/// Everything a background toggle needs.
struct ToggleSaga {
    id: Uuid,
    epoch: u64,
    principal: Principal,
    target: UserId,
    /// Roster value when the toggle was made.
    prior: bool,
    desired: bool,
    identity: Arc<dyn IdentityProvider>,
    backend: Arc<dyn PrivilegedBackend>,
}

impl AdminSessionController {
    /// Flip `disabled` on a roster entry.
    ///
    /// The roster shows the new value by the time this returns; the backend
    /// call runs in the background and its result is available through
    /// [`PendingMutation::outcome`].
    ///
    /// # Errors
    ///
    /// - `MutationError::NotReady` unless the session is authorized and loaded
    /// - `MutationError::UnknownTarget` if `target` is not in the roster
    /// - `MutationError::SelfLockout` if `target` is an admin; the roster is
    ///   left untouched
    pub fn toggle_disabled(&self, target: &UserId) -> Result<PendingMutation, MutationError> {
        let mut session = self.shared.session.lock();
        let state = session.state;
        if !state.is_loaded() {
            return Err(MutationError::NotReady(state));
        }
        let Some(principal) = session.principal.clone() else {
            return Err(MutationError::NotReady(state));
        };

        let entry = session
            .entry_mut(target)
            .ok_or_else(|| MutationError::UnknownTarget(target.clone()))?;
        if !entry.is_moderatable() {
            warn!(uid = %target, "refusing to toggle an admin account");
            return Err(MutationError::SelfLockout(target.clone()));
        }
        let prior = entry.disabled;
        entry.disabled = !prior;

        let id = Uuid::new_v4();
        let (settled_tx, settled_rx) = oneshot::channel();
        let predecessor = session
            .mutations
            .insert(
                target.clone(),
                MutationTail {
                    id,
                    settled: settled_rx,
                },
            )
            .map(|tail| tail.settled);
        let epoch = session.epoch;
        drop(session);

        info!(
            uid = %target,
            disabled = !prior,
            queued = predecessor.is_some(),
            "toggle applied optimistically"
        );
        self.shared.notify();

        let (outcome_tx, outcome_rx) = oneshot::channel();
        let saga = ToggleSaga {
            id,
            epoch,
            principal,
            target: target.clone(),
            prior,
            desired: !prior,
            identity: self.shared.identity.clone(),
            backend: self.shared.backend.clone(),
        };
        tokio::spawn(saga.run(
            Arc::downgrade(&self.shared),
            predecessor,
            settled_tx,
            outcome_tx,
        ));

        Ok(PendingMutation {
            id,
            target: target.clone(),
            disabled: !prior,
            outcome: outcome_rx,
        })
    }
}

impl ToggleSaga {
    #[instrument(skip_all, fields(id = %self.id, uid = %self.target, disabled = self.desired))]
    async fn run(
        self,
        shared: Weak<Shared>,
        predecessor: Option<oneshot::Receiver<bool>>,
        settled: oneshot::Sender<bool>,
        outcome: oneshot::Sender<MutationOutcome>,
    ) {
        // Durable value before this toggle.
        let baseline = match predecessor {
            Some(previous) => previous.await.unwrap_or(self.prior),
            None => self.prior,
        };

        let current = shared
            .upgrade()
            .is_some_and(|shared| shared.is_current(self.epoch));
        if !current {
            debug!("session changed before dispatch");
            let _ = settled.send(baseline);
            let _ = outcome.send(MutationOutcome::Cancelled);
            return;
        }

        let (durable, result) = match self.dispatch().await {
            Ok(response) => {
                debug!(stored = response.disabled, "toggle confirmed");
                (response.disabled, MutationOutcome::Confirmed)
            }
            Err(error) => {
                warn!(error = %error, restored = baseline, "toggle failed; rolling back");
                (baseline, MutationOutcome::RolledBack { error })
            }
        };

        if let Some(shared) = shared.upgrade() {
            self.settle(&shared, durable, matches!(result, MutationOutcome::RolledBack { .. }));
        }
        let _ = settled.send(durable);
        let _ = outcome.send(result);
    }

    async fn dispatch(&self) -> Result<ToggleDisabledResponse, BackendError> {
        let credential = self.identity.fresh_token(&self.principal).await?;
        let request = ToggleDisabledRequest {
            target_uid: self.target.clone(),
            disabled: self.desired,
        };
        self.backend.toggle_disabled(&credential, &request).await
    }

    /// Release the target's queue slot and, on failure, restore the entry.
    fn settle(&self, shared: &Shared, durable: bool, rolled_back: bool) {
        let mut session = shared.session.lock();
        let is_newest = session
            .mutations
            .get(&self.target)
            .is_some_and(|tail| tail.id == self.id);
        if is_newest {
            session.mutations.remove(&self.target);
        }

        if !rolled_back {
            return;
        }
        if session.epoch != self.epoch {
            debug!("session changed; skipping rollback");
            return;
        }
        if !is_newest {
            debug!("newer toggle queued; leaving its value in place");
            return;
        }

        if let Some(entry) = session.entry_mut(&self.target) {
            entry.disabled = durable;
            drop(session);
            shared.notify();
        }
    }
}
