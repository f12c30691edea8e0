//! User record repository and live roster feed.
//!
//! Queries are built at runtime (`QueryBuilder`, `query_as`) because the
//! roster filter is dynamic.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgListener;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::{debug, instrument, warn};

use starboard_core::{CustomerId, Email, PlanId, SubscriptionStatus, UserId, UserRecord};

use super::RepositoryError;
use crate::store::{DocumentStore, ResultSetStream, RosterOrder, RosterQuery, StoreError};

/// Channel the `user_records` trigger notifies on.
pub const CHANGE_CHANNEL: &str = "user_records_changed";

const RECORD_COLUMNS: &str = "uid, email, subscription_status, plan, stripe_customer_id, \
     pos_connected, created_at, last_login_at, disabled, is_admin";

// =============================================================================
// Internal Row Types
// =============================================================================

#[derive(Debug, sqlx::FromRow)]
struct UserRecordRow {
    uid: String,
    email: String,
    subscription_status: String,
    plan: Option<String>,
    stripe_customer_id: Option<String>,
    pos_connected: Option<bool>,
    created_at: DateTime<Utc>,
    last_login_at: Option<DateTime<Utc>>,
    disabled: bool,
    is_admin: bool,
}

impl TryFrom<UserRecordRow> for UserRecord {
    type Error = RepositoryError;

    fn try_from(row: UserRecordRow) -> Result<Self, Self::Error> {
        let email = Email::parse(&row.email).map_err(|e| {
            RepositoryError::DataCorruption(format!("invalid email for {}: {e}", row.uid))
        })?;
        let subscription_status: SubscriptionStatus =
            row.subscription_status.parse().map_err(|e: String| {
                RepositoryError::DataCorruption(format!("invalid status for {}: {e}", row.uid))
            })?;
        let plan = row
            .plan
            .as_deref()
            .map(str::parse::<PlanId>)
            .transpose()
            .map_err(|e| {
                RepositoryError::DataCorruption(format!("invalid plan for {}: {e}", row.uid))
            })?;

        Ok(Self {
            uid: UserId::new(row.uid),
            email,
            subscription_status,
            plan,
            stripe_customer_id: row.stripe_customer_id.map(CustomerId::new),
            pos_connected: row.pos_connected,
            created_at: row.created_at,
            last_login_at: row.last_login_at,
            disabled: row.disabled,
            is_admin: row.is_admin,
        })
    }
}

// =============================================================================
// Directory
// =============================================================================

/// Point reads and the moderation write used by the privileged backend.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn get(&self, uid: &UserId) -> Result<Option<UserRecord>, RepositoryError>;

    /// Set the `disabled` flag and return the updated record.
    ///
    /// The admin check happens in the same write: fails with
    /// `RepositoryError::AdminTarget` if the record is an admin at the time of
    /// the update, and `RepositoryError::NotFound` if no such record exists.
    async fn set_disabled(
        &self,
        uid: &UserId,
        disabled: bool,
    ) -> Result<UserRecord, RepositoryError>;

    /// Connectivity check for readiness probes.
    async fn ping(&self) -> Result<(), RepositoryError>;
}

/// `PostgreSQL` implementation of [`UserDirectory`].
#[derive(Debug, Clone)]
pub struct PgUserDirectory {
    pool: PgPool,
}

impl PgUserDirectory {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert or replace a record. Used by seeding and the grant tool.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the statement fails.
    pub async fn upsert(&self, record: &UserRecord) -> Result<(), RepositoryError> {
        sqlx::query(
            r"
            INSERT INTO user_records (uid, email, subscription_status, plan, stripe_customer_id,
                                      pos_connected, created_at, last_login_at, disabled, is_admin)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (uid) DO UPDATE SET
                email = EXCLUDED.email,
                subscription_status = EXCLUDED.subscription_status,
                plan = EXCLUDED.plan,
                stripe_customer_id = EXCLUDED.stripe_customer_id,
                pos_connected = EXCLUDED.pos_connected,
                last_login_at = EXCLUDED.last_login_at,
                disabled = EXCLUDED.disabled,
                is_admin = EXCLUDED.is_admin,
                updated_at = NOW()
            ",
        )
        .bind(record.uid.as_str())
        .bind(record.email.as_str())
        .bind(record.subscription_status.as_str())
        .bind(record.plan.map(PlanId::as_str))
        .bind(record.stripe_customer_id.as_ref().map(CustomerId::as_str))
        .bind(record.pos_connected)
        .bind(record.created_at)
        .bind(record.last_login_at)
        .bind(record.disabled)
        .bind(record.is_admin)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    #[instrument(skip_all, fields(uid = %uid))]
    async fn get(&self, uid: &UserId) -> Result<Option<UserRecord>, RepositoryError> {
        let row = sqlx::query_as::<_, UserRecordRow>(&format!(
            "SELECT {RECORD_COLUMNS} FROM user_records WHERE uid = $1"
        ))
        .bind(uid.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    #[instrument(skip_all, fields(uid = %uid))]
    async fn set_disabled(
        &self,
        uid: &UserId,
        disabled: bool,
    ) -> Result<UserRecord, RepositoryError> {
        let row = sqlx::query_as::<_, UserRecordRow>(&format!(
            "UPDATE user_records SET disabled = $2, updated_at = NOW() \
             WHERE uid = $1 AND NOT is_admin RETURNING {RECORD_COLUMNS}"
        ))
        .bind(uid.as_str())
        .bind(disabled)
        .fetch_optional(&self.pool)
        .await?;
        if let Some(row) = row {
            return row.try_into();
        }

        // No row updated: either the uid is unknown or the guard held.
        let exists: Option<i32> = sqlx::query_scalar("SELECT 1 FROM user_records WHERE uid = $1")
            .bind(uid.as_str())
            .fetch_optional(&self.pool)
            .await?;
        Err(if exists.is_some() {
            RepositoryError::AdminTarget
        } else {
            RepositoryError::NotFound
        })
    }

    async fn ping(&self) -> Result<(), RepositoryError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

// =============================================================================
// Live roster feed
// =============================================================================

/// [`DocumentStore`] over `user_records`: the current page on open, and a
/// fresh page after every `NOTIFY` on [`CHANGE_CHANNEL`].
#[derive(Debug, Clone)]
pub struct PgDocumentStore {
    pool: PgPool,
}

impl PgDocumentStore {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn page_query(query: &RosterQuery) -> QueryBuilder<'static, Postgres> {
    let mut builder = QueryBuilder::new(format!(
        "SELECT {RECORD_COLUMNS} FROM user_records WHERE TRUE"
    ));
    if let Some(status) = query.filter.subscription_status {
        builder
            .push(" AND subscription_status = ")
            .push_bind(status.as_str());
    }
    if let Some(disabled) = query.filter.disabled {
        builder.push(" AND disabled = ").push_bind(disabled);
    }
    builder.push(match query.order {
        RosterOrder::CreatedAtDesc => " ORDER BY created_at DESC, uid",
        RosterOrder::LastLoginDesc => " ORDER BY last_login_at DESC NULLS LAST, uid",
    });
    builder
        .push(" LIMIT ")
        .push_bind(i64::try_from(query.limit).unwrap_or(i64::MAX));
    builder
}

async fn fetch_page(pool: &PgPool, query: &RosterQuery) -> Result<Vec<UserRecord>, StoreError> {
    let rows: Vec<UserRecordRow> = page_query(query)
        .build_query_as()
        .fetch_all(pool)
        .await
        .map_err(RepositoryError::from)?;

    rows.into_iter()
        .map(|row| UserRecord::try_from(row).map_err(StoreError::from))
        .collect()
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    #[instrument(skip_all)]
    async fn watch(&self, query: &RosterQuery) -> Result<ResultSetStream, StoreError> {
        let mut listener = PgListener::connect_with(&self.pool)
            .await
            .map_err(|e| StoreError::Feed(e.to_string()))?;
        listener
            .listen(CHANGE_CHANNEL)
            .await
            .map_err(|e| StoreError::Feed(e.to_string()))?;
        debug!(channel = CHANGE_CHANNEL, "listening for roster changes");

        let pool = self.pool.clone();
        let query = query.clone();
        let feed = async_stream::stream! {
            match fetch_page(&pool, &query).await {
                Ok(records) => yield Ok(records),
                Err(e) => {
                    yield Err(e);
                    return;
                }
            }

            loop {
                // `Ok(None)` means the connection dropped and notifications
                // may have been missed; re-query either way.
                match listener.try_recv().await {
                    Ok(Some(_) | None) => {}
                    Err(e) => {
                        warn!(error = %e, "roster listener failed");
                        yield Err(StoreError::Feed(e.to_string()));
                        return;
                    }
                }

                match fetch_page(&pool, &query).await {
                    Ok(records) => yield Ok(records),
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                }
            }
        };

        Ok(Box::pin(feed))
    }
}
