//! Plan identifiers and the values a plan assigns to each key.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};

use super::EntitlementError;
use crate::types::Price;

/// The closed set of subscription plans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanId {
    Starter,
    Growth,
    Professional,
    Agency,
}

impl PlanId {
    /// Every plan, cheapest first.
    pub const ALL: [Self; 4] = [Self::Starter, Self::Growth, Self::Professional, Self::Agency];

    /// Wire spelling of the plan id.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Starter => "starter",
            Self::Growth => "growth",
            Self::Professional => "professional",
            Self::Agency => "agency",
        }
    }
}

impl fmt::Display for PlanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PlanId {
    type Err = EntitlementError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|plan| plan.as_str() == s)
            .ok_or_else(|| EntitlementError::UnknownPlan(s.to_string()))
    }
}

/// A numeric limit: a finite non-negative count, or unlimited.
///
/// Serialized as a plain integer or the string `"unlimited"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Limit {
    Finite(u64),
    Unlimited,
}

impl Limit {
    /// Whether one more unit may be consumed given current usage.
    #[must_use]
    pub const fn allows(self, current_usage: u64) -> bool {
        match self {
            Self::Finite(max) => current_usage < max,
            Self::Unlimited => true,
        }
    }

    /// Remaining headroom, `None` when unlimited.
    #[must_use]
    pub const fn remaining(self, current_usage: u64) -> Option<u64> {
        match self {
            Self::Finite(max) => Some(max.saturating_sub(current_usage)),
            Self::Unlimited => None,
        }
    }
}

impl fmt::Display for Limit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Finite(n) => write!(f, "{n}"),
            Self::Unlimited => f.write_str("unlimited"),
        }
    }
}

impl Serialize for Limit {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Finite(n) => serializer.serialize_u64(*n),
            Self::Unlimited => serializer.serialize_str("unlimited"),
        }
    }
}

impl<'de> Deserialize<'de> for Limit {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct LimitVisitor;

        impl Visitor<'_> for LimitVisitor {
            type Value = Limit;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a non-negative integer or \"unlimited\"")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Limit, E> {
                Ok(Limit::Finite(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Limit, E> {
                u64::try_from(v)
                    .map(Limit::Finite)
                    .map_err(|_| E::custom(format!("limit cannot be negative: {v}")))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Limit, E> {
                if v == "unlimited" {
                    Ok(Limit::Unlimited)
                } else {
                    Err(E::invalid_value(de::Unexpected::Str(v), &self))
                }
            }
        }

        deserializer.deserialize_any(LimitVisitor)
    }
}

/// Four-state feature flag value.
///
/// Capability checks coerce with [`FeatureValue::is_enabled`]; UI layers may
/// branch on the raw value to badge experimental or upcoming features.
/// Serialized as `true`, `false`, `"beta"` or `"coming_soon"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeatureValue {
    Enabled,
    Disabled,
    Beta,
    ComingSoon,
}

impl FeatureValue {
    /// `true` for `Enabled` and `Beta`.
    #[must_use]
    pub const fn is_enabled(self) -> bool {
        matches!(self, Self::Enabled | Self::Beta)
    }

    #[must_use]
    pub const fn is_experimental(self) -> bool {
        matches!(self, Self::Beta)
    }

    #[must_use]
    pub const fn is_upcoming(self) -> bool {
        matches!(self, Self::ComingSoon)
    }
}

impl From<bool> for FeatureValue {
    fn from(enabled: bool) -> Self {
        if enabled { Self::Enabled } else { Self::Disabled }
    }
}

impl Serialize for FeatureValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Enabled => serializer.serialize_bool(true),
            Self::Disabled => serializer.serialize_bool(false),
            Self::Beta => serializer.serialize_str("beta"),
            Self::ComingSoon => serializer.serialize_str("coming_soon"),
        }
    }
}

impl<'de> Deserialize<'de> for FeatureValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct FeatureVisitor;

        impl Visitor<'_> for FeatureVisitor {
            type Value = FeatureValue;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a boolean, \"beta\" or \"coming_soon\"")
            }

            fn visit_bool<E: de::Error>(self, v: bool) -> Result<FeatureValue, E> {
                Ok(FeatureValue::from(v))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<FeatureValue, E> {
                match v {
                    "beta" => Ok(FeatureValue::Beta),
                    "coming_soon" => Ok(FeatureValue::ComingSoon),
                    _ => Err(E::invalid_value(de::Unexpected::Str(v), &self)),
                }
            }
        }

        deserializer.deserialize_any(FeatureVisitor)
    }
}

/// Everything a single plan grants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanDefinition {
    /// Marketing label shown on checkout and billing pages.
    pub label: String,
    /// Monthly price.
    pub price: Price,
    pub limits: BTreeMap<String, Limit>,
    pub features: BTreeMap<String, FeatureValue>,
    /// Point-of-sale integrations, same semantics as `features`.
    #[serde(default)]
    pub integrations: BTreeMap<String, FeatureValue>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_id_round_trips_through_str() {
        for plan in PlanId::ALL {
            assert_eq!(plan.as_str().parse::<PlanId>(), Ok(plan));
        }
    }

    #[test]
    fn test_unknown_plan_id() {
        assert_eq!(
            "enterprise".parse::<PlanId>(),
            Err(EntitlementError::UnknownPlan("enterprise".to_string()))
        );
    }

    #[test]
    fn test_limit_deserializes_both_forms() {
        assert_eq!(serde_json::from_str::<Limit>("5").unwrap(), Limit::Finite(5));
        assert_eq!(
            serde_json::from_str::<Limit>("\"unlimited\"").unwrap(),
            Limit::Unlimited
        );
        assert!(serde_json::from_str::<Limit>("-1").is_err());
        assert!(serde_json::from_str::<Limit>("\"lots\"").is_err());
    }

    #[test]
    fn test_limit_allows() {
        assert!(Limit::Finite(3).allows(2));
        assert!(!Limit::Finite(3).allows(3));
        assert!(!Limit::Finite(0).allows(0));
        assert!(Limit::Unlimited.allows(u64::MAX));
        assert_eq!(Limit::Finite(3).remaining(5), Some(0));
        assert_eq!(Limit::Unlimited.remaining(5), None);
    }

    #[test]
    fn test_feature_value_coercion() {
        assert!(FeatureValue::Enabled.is_enabled());
        assert!(FeatureValue::Beta.is_enabled());
        assert!(!FeatureValue::Disabled.is_enabled());
        assert!(!FeatureValue::ComingSoon.is_enabled());
        assert!(FeatureValue::Beta.is_experimental());
        assert!(FeatureValue::ComingSoon.is_upcoming());
    }

    #[test]
    fn test_feature_value_wire_format() {
        let values: Vec<FeatureValue> =
            serde_json::from_str(r#"[true, false, "beta", "coming_soon"]"#).unwrap();
        assert_eq!(
            values,
            vec![
                FeatureValue::Enabled,
                FeatureValue::Disabled,
                FeatureValue::Beta,
                FeatureValue::ComingSoon
            ]
        );
        assert_eq!(
            serde_json::to_string(&values).unwrap(),
            r#"[true,false,"beta","coming_soon"]"#
        );
    }
}
