//! Seed `user_records` with sample tenants for local development.
//!
//! Records are upserted, so running the command twice is harmless. One of
//! the accounts is an admin so the self-lockout guard can be exercised.

use chrono::{Duration, Utc};
use tracing::info;

use starboard_admin::db::{self, PgUserDirectory};
use starboard_core::{CustomerId, Email, PlanId, SubscriptionStatus, UserId, UserRecord};

use super::migrate;

struct SampleTenant {
    uid: &'static str,
    email: &'static str,
    status: SubscriptionStatus,
    plan: Option<PlanId>,
    age_days: i64,
    is_admin: bool,
}

const fn tenant(
    uid: &'static str,
    email: &'static str,
    status: SubscriptionStatus,
    plan: Option<PlanId>,
    age_days: i64,
) -> SampleTenant {
    SampleTenant {
        uid,
        email,
        status,
        plan,
        age_days,
        is_admin: false,
    }
}

const SAMPLE_TENANTS: &[SampleTenant] = &[
    SampleTenant {
        is_admin: true,
        ..tenant("ops-admin", "ops@starboard.reviews", SubscriptionStatus::Active, None, 400)
    },
    tenant(
        "t-harbor-cafe",
        "owner@harborcafe.example",
        SubscriptionStatus::Active,
        Some(PlanId::Growth),
        120,
    ),
    tenant(
        "t-lumen-dental",
        "front@lumendental.example",
        SubscriptionStatus::PastDue,
        Some(PlanId::Starter),
        90,
    ),
    tenant(
        "t-north-auto",
        "service@northauto.example",
        SubscriptionStatus::Active,
        Some(PlanId::Professional),
        45,
    ),
    tenant(
        "t-fig-and-vine",
        "hello@figandvine.example",
        SubscriptionStatus::Canceled,
        Some(PlanId::Starter),
        30,
    ),
    tenant(
        "t-brightpath",
        "agency@brightpath.example",
        SubscriptionStatus::Active,
        Some(PlanId::Agency),
        12,
    ),
    tenant(
        "t-new-signup",
        "new@signup.example",
        SubscriptionStatus::Incomplete,
        None,
        1,
    ),
];

/// Upsert the sample tenants.
///
/// # Errors
///
/// Returns an error if the database URL is missing, a sample address fails
/// to parse, or an upsert fails.
pub async fn user_records() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let pool = db::create_pool(&migrate::database_url()?).await?;
    let directory = PgUserDirectory::new(pool);
    let now = Utc::now();

    for sample in SAMPLE_TENANTS {
        let record = UserRecord {
            uid: UserId::new(sample.uid),
            email: Email::parse(sample.email)?,
            subscription_status: sample.status,
            plan: sample.plan,
            stripe_customer_id: sample
                .plan
                .map(|_| CustomerId::new(format!("cus_{}", sample.uid))),
            pos_connected: sample
                .plan
                .map(|p| matches!(p, PlanId::Professional | PlanId::Agency)),
            created_at: now - Duration::days(sample.age_days),
            last_login_at: (sample.age_days > 1).then(|| now - Duration::days(sample.age_days / 3)),
            disabled: false,
            is_admin: sample.is_admin,
        };
        directory.upsert(&record).await?;
        info!(uid = sample.uid, "seeded user record");
    }

    info!(count = SAMPLE_TENANTS.len(), "Seeding complete");
    Ok(())
}
