//! Entitlement table inspection.
//!
//! # Usage
//!
//! ```bash
//! sb-cli plans list
//! sb-cli plans show professional
//! ```

use starboard_core::{EntitlementTable, PlanId};

/// Print every plan, cheapest first.
pub fn list() {
    let table = EntitlementTable::shipped();

    #[allow(clippy::print_stdout)]
    for (id, definition) in table.plans() {
        println!(
            "{:<14} {:<14} {}/mo",
            id.as_str(),
            definition.label,
            definition.price.display()
        );
    }
}

/// Print one plan's definition as JSON.
///
/// # Errors
///
/// Returns `EntitlementError::UnknownPlan` for an id outside the table.
pub fn show(plan: &str) -> Result<(), Box<dyn std::error::Error>> {
    let id: PlanId = plan.parse()?;
    let definition = EntitlementTable::shipped().definition(id)?;
    let json = serde_json::to_string_pretty(definition)?;

    #[allow(clippy::print_stdout)]
    {
        println!("{json}");
    }
    Ok(())
}
