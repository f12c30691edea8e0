//! Tenant account record as seen by moderators.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{CustomerId, Email, SubscriptionStatus, UserId};
use crate::entitlements::PlanId;

/// A tenant/user row from the user collection.
///
/// Field names follow the document store's camelCase layout so snapshots can
/// be deserialized directly from change-feed payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    /// Stable identity-provider uid.
    pub uid: UserId,
    pub email: Email,
    #[serde(default)]
    pub subscription_status: SubscriptionStatus,
    /// Plan the tenant is subscribed to, if they completed checkout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<PlanId>,
    /// Billing processor customer reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stripe_customer_id: Option<CustomerId>,
    /// Whether a third-party POS account has been connected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pos_connected: Option<bool>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_login_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub disabled: bool,
    /// Mirror of the admin claim, for display only. Authorization never
    /// reads this field.
    #[serde(default)]
    pub is_admin: bool,
}

impl UserRecord {
    /// Whether moderators may toggle this account.
    ///
    /// Admin accounts are never exposed to the disable control.
    #[must_use]
    pub const fn is_moderatable(&self) -> bool {
        !self.is_admin
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_minimal_document() {
        let record: UserRecord = serde_json::from_str(
            r#"{"uid":"u1","email":"a@b.co","createdAt":"2025-03-01T10:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(record.uid.as_str(), "u1");
        assert!(!record.disabled);
        assert!(!record.is_admin);
        assert_eq!(record.subscription_status, SubscriptionStatus::Incomplete);
        assert!(record.plan.is_none());
    }

    #[test]
    fn test_deserialize_full_document() {
        let record: UserRecord = serde_json::from_str(
            r#"{
                "uid":"u2","email":"owner@cafe.example","subscriptionStatus":"past_due",
                "plan":"growth","stripeCustomerId":"cus_123","posConnected":true,
                "createdAt":"2025-03-01T10:00:00Z","lastLoginAt":"2025-04-01T08:30:00Z",
                "disabled":true,"isAdmin":false
            }"#,
        )
        .unwrap();
        assert_eq!(record.subscription_status, SubscriptionStatus::PastDue);
        assert_eq!(record.plan, Some(PlanId::Growth));
        assert_eq!(record.stripe_customer_id, Some(CustomerId::new("cus_123")));
        assert_eq!(record.pos_connected, Some(true));
        assert!(record.disabled);
        assert!(record.is_moderatable());
    }

    #[test]
    fn test_admin_is_not_moderatable() {
        let mut record: UserRecord = serde_json::from_str(
            r#"{"uid":"a","email":"root@starboard.example","createdAt":"2025-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        record.is_admin = true;
        assert!(!record.is_moderatable());
    }
}
