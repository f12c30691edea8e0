//! Moderation store adapter.
//!
//! The upstream document store pushes whole result sets for a query. The
//! adapter turns that feed into a cancellable subscription of roster
//! snapshots, each one a complete replacement for the previous.
//!
//! # Modules
//!
//! - [`subscription`] - `ModerationStore` and the `RosterSubscription` handle

pub mod subscription;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use starboard_core::{SubscriptionStatus, UserRecord};

pub use subscription::{ModerationStore, RosterEvent, RosterSnapshot, RosterSubscription};

/// Roster page size.
pub const ROSTER_PAGE_SIZE: usize = 10;

/// Errors reported by the document store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The query could not be executed.
    #[error("store query failed: {0}")]
    Query(String),

    /// The change feed broke.
    #[error("change feed failed: {0}")]
    Feed(String),

    /// A stored record could not be decoded.
    #[error("invalid record: {0}")]
    Decode(String),
}

/// Which records a roster shows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_status: Option<SubscriptionStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled: Option<bool>,
}

impl RosterFilter {
    #[must_use]
    pub fn matches(&self, record: &UserRecord) -> bool {
        self.subscription_status
            .is_none_or(|status| record.subscription_status == status)
            && self.disabled.is_none_or(|disabled| record.disabled == disabled)
    }
}

/// Roster sort order. Newest first in both cases.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RosterOrder {
    #[default]
    CreatedAtDesc,
    /// Most recent sign-in first; never-signed-in accounts last.
    LastLoginDesc,
}

/// A roster query: filter, order and page size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterQuery {
    pub filter: RosterFilter,
    pub order: RosterOrder,
    pub limit: usize,
}

impl Default for RosterQuery {
    fn default() -> Self {
        Self {
            filter: RosterFilter::default(),
            order: RosterOrder::default(),
            limit: ROSTER_PAGE_SIZE,
        }
    }
}

impl RosterQuery {
    /// Filter, sort and truncate a result set.
    ///
    /// Ties are broken by uid so the order is total.
    #[must_use]
    pub fn apply(&self, records: Vec<UserRecord>) -> Vec<UserRecord> {
        let mut records: Vec<UserRecord> = records
            .into_iter()
            .filter(|r| self.filter.matches(r))
            .collect();

        match self.order {
            RosterOrder::CreatedAtDesc => records.sort_by(|a, b| {
                b.created_at
                    .cmp(&a.created_at)
                    .then_with(|| a.uid.cmp(&b.uid))
            }),
            // `None < Some(_)`, so descending puts never-signed-in last.
            RosterOrder::LastLoginDesc => records.sort_by(|a, b| {
                b.last_login_at
                    .cmp(&a.last_login_at)
                    .then_with(|| a.uid.cmp(&b.uid))
            }),
        }

        records.truncate(self.limit);
        records
    }
}

/// Live feed of full result sets.
pub type ResultSetStream = BoxStream<'static, Result<Vec<UserRecord>, StoreError>>;

/// Upstream document store boundary.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Open a live query. The stream yields the current result set first and
    /// a fresh one after every change; dropping it closes the feed.
    async fn watch(&self, query: &RosterQuery) -> Result<ResultSetStream, StoreError>;
}
