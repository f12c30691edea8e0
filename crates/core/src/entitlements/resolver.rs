//! Effective entitlements.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::plan::{FeatureValue, Limit, PlanDefinition, PlanId};
use super::EntitlementError;
use crate::types::Price;

/// Per-tenant adjustments layered over a plan (e.g. a negotiated location
/// allowance or early access to a beta feature).
///
/// Overrides may only name keys that exist in the table's schema.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitlementOverrides {
    #[serde(default)]
    pub limits: BTreeMap<String, Limit>,
    #[serde(default)]
    pub features: BTreeMap<String, FeatureValue>,
    #[serde(default)]
    pub integrations: BTreeMap<String, FeatureValue>,
}

impl EntitlementOverrides {
    #[must_use]
    pub fn with_limit(mut self, key: impl Into<String>, limit: Limit) -> Self {
        self.limits.insert(key.into(), limit);
        self
    }

    #[must_use]
    pub fn with_feature(mut self, key: impl Into<String>, value: FeatureValue) -> Self {
        self.features.insert(key.into(), value);
        self
    }

    #[must_use]
    pub fn with_integration(mut self, key: impl Into<String>, value: FeatureValue) -> Self {
        self.integrations.insert(key.into(), value);
        self
    }

    /// Whether no override is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.limits.is_empty() && self.features.is_empty() && self.integrations.is_empty()
    }

    pub(super) fn validate_against(&self, plan: &PlanDefinition) -> Result<(), EntitlementError> {
        if let Some(key) = self.limits.keys().find(|k| !plan.limits.contains_key(*k)) {
            return Err(EntitlementError::UnknownLimitKey(key.clone()));
        }
        if let Some(key) = self.features.keys().find(|k| !plan.features.contains_key(*k)) {
            return Err(EntitlementError::UnknownFeatureKey(key.clone()));
        }
        if let Some(key) = self
            .integrations
            .keys()
            .find(|k| !plan.integrations.contains_key(*k))
        {
            return Err(EntitlementError::UnknownIntegrationKey(key.clone()));
        }
        Ok(())
    }
}

/// The capability set a tenant actually has: a plan definition plus any
/// overrides. Borrowed from the table, so resolving is cheap enough to do
/// per request.
#[derive(Debug, Clone, Copy)]
pub struct EffectiveEntitlement<'a> {
    plan: PlanId,
    definition: &'a PlanDefinition,
    overrides: Option<&'a EntitlementOverrides>,
}

impl<'a> EffectiveEntitlement<'a> {
    pub(super) const fn new(
        plan: PlanId,
        definition: &'a PlanDefinition,
        overrides: Option<&'a EntitlementOverrides>,
    ) -> Self {
        Self {
            plan,
            definition,
            overrides,
        }
    }

    #[must_use]
    pub const fn plan(&self) -> PlanId {
        self.plan
    }

    #[must_use]
    pub fn label(&self) -> &'a str {
        &self.definition.label
    }

    #[must_use]
    pub const fn price(&self) -> Price {
        self.definition.price
    }

    /// Look up a numeric limit.
    ///
    /// # Errors
    ///
    /// Returns `EntitlementError::UnknownLimitKey` if the key is not in the schema.
    pub fn limit(&self, key: &str) -> Result<Limit, EntitlementError> {
        let base = self
            .definition
            .limits
            .get(key)
            .ok_or_else(|| EntitlementError::UnknownLimitKey(key.to_string()))?;
        Ok(*self
            .overrides
            .and_then(|o| o.limits.get(key))
            .unwrap_or(base))
    }

    /// Whether one more unit of `key` may be consumed at `current_usage`.
    ///
    /// # Errors
    ///
    /// Returns `EntitlementError::UnknownLimitKey` if the key is not in the schema.
    pub fn check_limit(&self, key: &str, current_usage: u64) -> Result<bool, EntitlementError> {
        Ok(self.limit(key)?.allows(current_usage))
    }

    /// Raw four-state value of a feature.
    ///
    /// # Errors
    ///
    /// Returns `EntitlementError::UnknownFeatureKey` if the key is not in the schema.
    pub fn feature(&self, key: &str) -> Result<FeatureValue, EntitlementError> {
        let base = self
            .definition
            .features
            .get(key)
            .ok_or_else(|| EntitlementError::UnknownFeatureKey(key.to_string()))?;
        Ok(*self
            .overrides
            .and_then(|o| o.features.get(key))
            .unwrap_or(base))
    }

    /// Boolean capability check: `beta` counts as enabled, `coming_soon` does not.
    ///
    /// # Errors
    ///
    /// Returns `EntitlementError::UnknownFeatureKey` if the key is not in the schema.
    pub fn is_enabled(&self, key: &str) -> Result<bool, EntitlementError> {
        Ok(self.feature(key)?.is_enabled())
    }

    /// Raw four-state value of a POS integration.
    ///
    /// # Errors
    ///
    /// Returns `EntitlementError::UnknownIntegrationKey` if the key is not in the schema.
    pub fn integration(&self, key: &str) -> Result<FeatureValue, EntitlementError> {
        let base = self
            .definition
            .integrations
            .get(key)
            .ok_or_else(|| EntitlementError::UnknownIntegrationKey(key.to_string()))?;
        Ok(*self
            .overrides
            .and_then(|o| o.integrations.get(key))
            .unwrap_or(base))
    }

    /// # Errors
    ///
    /// Returns `EntitlementError::UnknownIntegrationKey` if the key is not in the schema.
    pub fn integration_enabled(&self, key: &str) -> Result<bool, EntitlementError> {
        Ok(self.integration(key)?.is_enabled())
    }

    pub fn limit_keys(&self) -> impl Iterator<Item = &'a str> {
        self.definition.limits.keys().map(String::as_str)
    }

    pub fn feature_keys(&self) -> impl Iterator<Item = &'a str> {
        self.definition.features.keys().map(String::as_str)
    }

    pub fn integration_keys(&self) -> impl Iterator<Item = &'a str> {
        self.definition.integrations.keys().map(String::as_str)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::entitlements::{keys, EntitlementTable};

    #[test]
    fn test_unknown_keys_fail_loudly() {
        let growth = EntitlementTable::shipped().resolve(PlanId::Growth).unwrap();
        assert_eq!(
            growth.limit("seats").unwrap_err(),
            EntitlementError::UnknownLimitKey("seats".to_string())
        );
        assert_eq!(
            growth.feature("teleport").unwrap_err(),
            EntitlementError::UnknownFeatureKey("teleport".to_string())
        );
        assert_eq!(
            growth.is_enabled("teleport").unwrap_err(),
            EntitlementError::UnknownFeatureKey("teleport".to_string())
        );
        assert_eq!(
            growth.integration("vend").unwrap_err(),
            EntitlementError::UnknownIntegrationKey("vend".to_string())
        );
    }

    #[test]
    fn test_overrides_take_precedence() {
        let table = EntitlementTable::shipped();
        let overrides = EntitlementOverrides::default()
            .with_limit(keys::limits::LOCATIONS, Limit::Finite(7))
            .with_feature(keys::features::API_ACCESS, FeatureValue::Beta)
            .with_integration(keys::integrations::TOAST, FeatureValue::Enabled);

        let starter = table.resolve_with(PlanId::Starter, &overrides).unwrap();
        assert_eq!(starter.limit(keys::limits::LOCATIONS).unwrap(), Limit::Finite(7));
        assert!(starter.is_enabled(keys::features::API_ACCESS).unwrap());
        assert!(starter.integration_enabled(keys::integrations::TOAST).unwrap());

        // Keys without an override fall through to the plan.
        let plain = table.resolve(PlanId::Starter).unwrap();
        assert_eq!(
            starter.limit(keys::limits::TEAM_MEMBERS).unwrap(),
            plain.limit(keys::limits::TEAM_MEMBERS).unwrap()
        );
    }

    #[test]
    fn test_override_with_unknown_key_rejected() {
        let table = EntitlementTable::shipped();
        let bad_limit = EntitlementOverrides::default().with_limit("seats", Limit::Unlimited);
        assert_eq!(
            table.resolve_with(PlanId::Growth, &bad_limit).unwrap_err(),
            EntitlementError::UnknownLimitKey("seats".to_string())
        );

        let bad_feature =
            EntitlementOverrides::default().with_feature("teleport", FeatureValue::Enabled);
        assert_eq!(
            table.resolve_with(PlanId::Growth, &bad_feature).unwrap_err(),
            EntitlementError::UnknownFeatureKey("teleport".to_string())
        );
    }

    #[test]
    fn test_check_limit() {
        let starter = EntitlementTable::shipped().resolve(PlanId::Starter).unwrap();
        assert!(starter.check_limit(keys::limits::LOCATIONS, 0).unwrap());
        assert!(!starter.check_limit(keys::limits::LOCATIONS, 1).unwrap());
    }

    #[test]
    fn test_overrides_deserialize_from_tenant_document() {
        let overrides: EntitlementOverrides =
            serde_json::from_str(r#"{"limits":{"locations":"unlimited"}}"#).unwrap();
        assert_eq!(
            overrides.limits.get("locations"),
            Some(&Limit::Unlimited)
        );
        assert!(!overrides.is_empty());
        assert!(EntitlementOverrides::default().is_empty());
    }
}
