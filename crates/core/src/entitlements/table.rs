//! The plan table.
//!
//! The shipped table is parsed once from `plans.json` on first use and is
//! immutable afterwards. Tests and tools build their own table from a fixture
//! through the same validation path.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use super::plan::{PlanDefinition, PlanId};
use super::resolver::{EffectiveEntitlement, EntitlementOverrides};
use super::EntitlementError;

static SHIPPED: LazyLock<EntitlementTable> = LazyLock::new(|| {
    EntitlementTable::from_json(include_str!("plans.json"))
        .expect("embedded plans.json must satisfy schema parity")
});

/// Validated mapping from plan id to plan definition.
///
/// Construction guarantees schema parity: every plan defines exactly the same
/// limit, feature and integration keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntitlementTable {
    plans: BTreeMap<PlanId, PlanDefinition>,
}

impl EntitlementTable {
    /// The process-wide table shipped with this build.
    #[must_use]
    pub fn shipped() -> &'static Self {
        &SHIPPED
    }

    /// Parse a table from its JSON form (`{"<plan>": PlanDefinition, ...}`).
    ///
    /// # Errors
    ///
    /// Returns `EntitlementError::Definition` if the JSON is malformed or names
    /// an unknown plan, and `EntitlementError::SchemaMismatch` if plans disagree
    /// on their key sets.
    pub fn from_json(json: &str) -> Result<Self, EntitlementError> {
        let plans: BTreeMap<PlanId, PlanDefinition> =
            serde_json::from_str(json).map_err(|e| EntitlementError::Definition(e.to_string()))?;
        Self::from_plans(plans)
    }

    /// Build a table from already-constructed definitions.
    ///
    /// # Errors
    ///
    /// Returns `EntitlementError::Definition` for an empty table and
    /// `EntitlementError::SchemaMismatch` if plans disagree on their key sets.
    pub fn from_plans(
        plans: impl IntoIterator<Item = (PlanId, PlanDefinition)>,
    ) -> Result<Self, EntitlementError> {
        let plans: BTreeMap<PlanId, PlanDefinition> = plans.into_iter().collect();
        let Some((&reference_id, reference)) = plans.iter().next() else {
            return Err(EntitlementError::Definition(
                "table defines no plans".to_string(),
            ));
        };

        for (&plan_id, plan) in plans.iter().skip(1) {
            check_parity("limit", plan_id, reference_id, &plan.limits, &reference.limits)?;
            check_parity(
                "feature",
                plan_id,
                reference_id,
                &plan.features,
                &reference.features,
            )?;
            check_parity(
                "integration",
                plan_id,
                reference_id,
                &plan.integrations,
                &reference.integrations,
            )?;
        }

        Ok(Self { plans })
    }

    /// Resolve the effective entitlement of a plan.
    ///
    /// # Errors
    ///
    /// Returns `EntitlementError::UnknownPlan` if the table has no such plan.
    pub fn resolve(&self, plan: PlanId) -> Result<EffectiveEntitlement<'_>, EntitlementError> {
        let definition = self.definition(plan)?;
        Ok(EffectiveEntitlement::new(plan, definition, None))
    }

    /// Resolve a plan given its wire spelling.
    ///
    /// # Errors
    ///
    /// Returns `EntitlementError::UnknownPlan` for ids outside the closed set
    /// or absent from this table.
    pub fn resolve_str(&self, plan: &str) -> Result<EffectiveEntitlement<'_>, EntitlementError> {
        self.resolve(plan.parse()?)
    }

    /// Resolve a plan with per-tenant overrides layered on top.
    ///
    /// # Errors
    ///
    /// Returns `EntitlementError::UnknownPlan` for a missing plan, or the
    /// matching unknown-key error if an override names a key outside the schema.
    pub fn resolve_with<'a>(
        &'a self,
        plan: PlanId,
        overrides: &'a EntitlementOverrides,
    ) -> Result<EffectiveEntitlement<'a>, EntitlementError> {
        let definition = self.definition(plan)?;
        overrides.validate_against(definition)?;
        Ok(EffectiveEntitlement::new(plan, definition, Some(overrides)))
    }

    /// Plans in this table, cheapest first. Equal prices keep tier order.
    pub fn plans(&self) -> impl Iterator<Item = (PlanId, &PlanDefinition)> {
        let mut plans: Vec<_> = self.plans.iter().map(|(id, def)| (*id, def)).collect();
        plans.sort_by_key(|(_, def)| def.price.amount);
        plans.into_iter()
    }

    /// Whether the table defines this plan.
    #[must_use]
    pub fn contains(&self, plan: PlanId) -> bool {
        self.plans.contains_key(&plan)
    }

    /// The raw definition of a plan, without overrides.
    ///
    /// # Errors
    ///
    /// Returns `EntitlementError::UnknownPlan` if the table has no such plan.
    pub fn definition(&self, plan: PlanId) -> Result<&PlanDefinition, EntitlementError> {
        self.plans
            .get(&plan)
            .ok_or_else(|| EntitlementError::UnknownPlan(plan.to_string()))
    }
}

fn check_parity<V>(
    category: &'static str,
    plan: PlanId,
    reference: PlanId,
    keys: &BTreeMap<String, V>,
    reference_keys: &BTreeMap<String, V>,
) -> Result<(), EntitlementError> {
    let ours: BTreeSet<&str> = keys.keys().map(String::as_str).collect();
    let theirs: BTreeSet<&str> = reference_keys.keys().map(String::as_str).collect();
    if ours == theirs {
        return Ok(());
    }

    let missing: Vec<&str> = theirs.difference(&ours).copied().collect();
    let extra: Vec<&str> = ours.difference(&theirs).copied().collect();
    Err(EntitlementError::SchemaMismatch {
        plan,
        reference,
        category,
        detail: format!("missing: [{}], extra: [{}]", missing.join(", "), extra.join(", ")),
    })
}
