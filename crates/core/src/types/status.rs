//! Status enums for tenant accounts.

use serde::{Deserialize, Serialize};

/// Billing subscription status mirrored from the payment processor.
///
/// Only `Active` grants paid entitlements; the others keep the account
/// readable but are surfaced to moderators so they can follow up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Canceled,
    PastDue,
    #[default]
    Incomplete,
}

impl SubscriptionStatus {
    /// All statuses, in display order.
    pub const ALL: [Self; 4] = [Self::Active, Self::PastDue, Self::Incomplete, Self::Canceled];

    /// Wire/database spelling of the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Canceled => "canceled",
            Self::PastDue => "past_due",
            Self::Incomplete => "incomplete",
        }
    }

    /// Whether the tenant is currently paying for their plan.
    #[must_use]
    pub const fn is_in_good_standing(self) -> bool {
        matches!(self, Self::Active)
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SubscriptionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "canceled" => Ok(Self::Canceled),
            "past_due" => Ok(Self::PastDue),
            "incomplete" => Ok(Self::Incomplete),
            _ => Err(format!("invalid subscription status: {s}")),
        }
    }
}
