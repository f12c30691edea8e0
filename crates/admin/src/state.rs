//! Application state shared across handlers.

use std::sync::Arc;

use starboard_core::EntitlementTable;

use crate::db::UserDirectory;
use crate::identity::TokenKeys;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    directory: Arc<dyn UserDirectory>,
    tokens: TokenKeys,
    entitlements: &'static EntitlementTable,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("tokens", &self.inner.tokens)
            .finish_non_exhaustive()
    }
}

impl AppState {
    /// State serving the shipped entitlement table.
    #[must_use]
    pub fn new(directory: Arc<dyn UserDirectory>, tokens: TokenKeys) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                directory,
                tokens,
                entitlements: EntitlementTable::shipped(),
            }),
        }
    }

    #[must_use]
    pub fn directory(&self) -> &dyn UserDirectory {
        self.inner.directory.as_ref()
    }

    #[must_use]
    pub fn tokens(&self) -> &TokenKeys {
        &self.inner.tokens
    }

    #[must_use]
    pub fn entitlements(&self) -> &'static EntitlementTable {
        self.inner.entitlements
    }
}
