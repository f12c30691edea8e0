//! `PostgreSQL` persistence for tenant accounts.
//!
//! One table, `user_records`, backs both sides of moderation: the backend
//! reads and writes it through [`UserDirectory`], and the console watches it
//! through [`PgDocumentStore`], which re-queries on every `NOTIFY` the table's
//! trigger sends.
//!
//! Migrations live in `crates/admin/migrations/` and are applied with
//! `sb-cli migrate`, never on startup.

pub mod user_records;

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;

use crate::store::StoreError;

pub use user_records::{PgDocumentStore, PgUserDirectory, UserDirectory};

const MAX_CONNECTIONS: u32 = 10;
const MIN_CONNECTIONS: u32 = 2;
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

/// Failures of a `user_records` operation.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored row does not decode into a [`starboard_core::UserRecord`].
    #[error("data corruption: {0}")]
    DataCorruption(String),

    #[error("not found")]
    NotFound,

    /// The record is an admin account and was left unchanged.
    #[error("admin account")]
    AdminTarget,
}

/// Roster feeds only distinguish undecodable rows from everything else.
impl From<RepositoryError> for StoreError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::DataCorruption(msg) => Self::Decode(msg),
            other => Self::Query(other.to_string()),
        }
    }
}

/// Open a connection pool.
///
/// # Errors
///
/// Returns `sqlx::Error` if no connection can be established within the
/// acquire timeout.
pub async fn create_pool(database_url: &SecretString) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .min_connections(MIN_CONNECTIONS)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect(database_url.expose_secret())
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_from_repository_error() {
        assert_eq!(
            StoreError::from(RepositoryError::DataCorruption("bad email".to_string())),
            StoreError::Decode("bad email".to_string())
        );
        assert_eq!(
            StoreError::from(RepositoryError::NotFound),
            StoreError::Query("not found".to_string())
        );
        assert_eq!(
            StoreError::from(RepositoryError::AdminTarget),
            StoreError::Query("admin account".to_string())
        );
    }
}
