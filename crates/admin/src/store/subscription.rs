//! Roster subscriptions.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use starboard_core::UserRecord;

use super::{DocumentStore, RosterFilter, RosterOrder, RosterQuery, StoreError};

/// Events buffered between the pump and a slow consumer.
const EVENT_BUFFER: usize = 16;

/// A complete roster view. Supersedes every snapshot with a lower sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterSnapshot {
    /// Strictly increasing per subscription, across restarts.
    pub sequence: u64,
    pub records: Vec<UserRecord>,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RosterEvent {
    Snapshot(RosterSnapshot),
    /// The feed failed and has stopped. Call [`RosterSubscription::restart`]
    /// to reopen it.
    Error(StoreError),
}

/// Entry point for roster subscriptions over a document store.
#[derive(Clone)]
pub struct ModerationStore {
    upstream: Arc<dyn DocumentStore>,
}

impl std::fmt::Debug for ModerationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModerationStore").finish_non_exhaustive()
    }
}

impl ModerationStore {
    #[must_use]
    pub fn new(upstream: Arc<dyn DocumentStore>) -> Self {
        Self { upstream }
    }

    /// Create a subscription. Nothing is opened upstream until the first
    /// [`RosterSubscription::next`].
    #[must_use]
    pub fn subscribe(
        &self,
        filter: RosterFilter,
        order: RosterOrder,
        limit: usize,
    ) -> RosterSubscription {
        self.subscribe_query(RosterQuery {
            filter,
            order,
            limit,
        })
    }

    #[must_use]
    pub fn subscribe_query(&self, query: RosterQuery) -> RosterSubscription {
        RosterSubscription {
            upstream: Arc::clone(&self.upstream),
            query,
            cancel: CancellationToken::new(),
            events: None,
            sequence: Arc::new(AtomicU64::new(0)),
            unsubscribed: false,
            exhausted: false,
        }
    }
}

/// Cancellable handle to a live roster feed.
///
/// Dropping the handle cancels the feed.
pub struct RosterSubscription {
    upstream: Arc<dyn DocumentStore>,
    query: RosterQuery,
    cancel: CancellationToken,
    events: Option<mpsc::Receiver<RosterEvent>>,
    sequence: Arc<AtomicU64>,
    unsubscribed: bool,
    exhausted: bool,
}

impl std::fmt::Debug for RosterSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RosterSubscription")
            .field("query", &self.query)
            .field("started", &self.events.is_some())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl RosterSubscription {
    #[must_use]
    pub const fn query(&self) -> &RosterQuery {
        &self.query
    }

    /// Next snapshot or error. `None` once unsubscribed, or after the feed
    /// has stopped and every buffered event was delivered.
    pub async fn next(&mut self) -> Option<RosterEvent> {
        if self.unsubscribed || self.exhausted {
            return None;
        }
        if self.events.is_none() {
            self.start();
        }

        let event = self.events.as_mut()?.recv().await;
        if event.is_none() {
            self.exhausted = true;
        }
        event
    }

    /// Close the feed. Idempotent.
    pub fn unsubscribe(&mut self) {
        if !self.unsubscribed {
            debug!("roster subscription closed");
        }
        self.cancel.cancel();
        self.unsubscribed = true;
        self.events = None;
    }

    /// Cancel the current feed and reopen the same query on the next call to
    /// [`Self::next`]. Sequence numbers continue from where they were.
    pub fn restart(&mut self) {
        self.cancel.cancel();
        self.cancel = CancellationToken::new();
        self.events = None;
        self.unsubscribed = false;
        self.exhausted = false;
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.unsubscribed || self.exhausted
    }

    fn start(&mut self) {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        tokio::spawn(pump(
            Arc::clone(&self.upstream),
            self.query.clone(),
            tx,
            self.cancel.clone(),
            Arc::clone(&self.sequence),
        ));
        self.events = Some(rx);
    }
}

impl Drop for RosterSubscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Forward upstream result sets as snapshots until cancelled or the feed
/// fails. The upstream stream is dropped (closing the feed) on return.
#[instrument(skip_all, fields(order = ?query.order, limit = query.limit))]
async fn pump(
    upstream: Arc<dyn DocumentStore>,
    query: RosterQuery,
    tx: mpsc::Sender<RosterEvent>,
    cancel: CancellationToken,
    sequence: Arc<AtomicU64>,
) {
    let opened = tokio::select! {
        biased;
        () = cancel.cancelled() => return,
        opened = upstream.watch(&query) => opened,
    };
    let mut feed = match opened {
        Ok(feed) => feed,
        Err(e) => {
            warn!(error = %e, "failed to open roster feed");
            let _ = tx.send(RosterEvent::Error(e)).await;
            return;
        }
    };
    debug!("roster feed opened");

    loop {
        let item = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            item = feed.next() => item,
        };

        let (event, terminal) = match item {
            Some(Ok(records)) => (
                RosterEvent::Snapshot(RosterSnapshot {
                    sequence: sequence.fetch_add(1, Ordering::SeqCst) + 1,
                    records: query.apply(records),
                    received_at: Utc::now(),
                }),
                false,
            ),
            Some(Err(e)) => {
                warn!(error = %e, "roster feed failed");
                (RosterEvent::Error(e), true)
            }
            None => {
                warn!("roster feed ended upstream");
                (
                    RosterEvent::Error(StoreError::Feed("change feed ended".to_string())),
                    true,
                )
            }
        };

        let sent = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            sent = tx.send(event) => sent,
        };
        if sent.is_err() || terminal {
            break;
        }
    }

    debug!("roster feed closed");
}
