//! Read-only view of the entitlement table.

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::get,
};
use serde::Serialize;

use starboard_core::{PlanDefinition, PlanId};

use crate::error::AppError;
use crate::state::AppState;

/// Build the plans router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/plans", get(list_plans))
        .route("/api/plans/{plan}", get(show_plan))
}

/// A plan and its definition, flattened into one object.
#[derive(Debug, Serialize)]
pub struct PlanView {
    pub id: PlanId,
    #[serde(flatten)]
    pub definition: &'static PlanDefinition,
}

/// List every plan, cheapest first.
pub async fn list_plans(State(state): State<AppState>) -> Json<Vec<PlanView>> {
    Json(
        state
            .entitlements()
            .plans()
            .map(|(id, definition)| PlanView { id, definition })
            .collect(),
    )
}

/// Show one plan.
///
/// # Errors
///
/// Returns 404 for a plan id outside the table.
pub async fn show_plan(
    State(state): State<AppState>,
    Path(plan): Path<String>,
) -> Result<Json<PlanView>, AppError> {
    let id: PlanId = plan
        .parse()
        .map_err(|e: starboard_core::EntitlementError| AppError::NotFound(e.to_string()))?;
    let definition = state
        .entitlements()
        .definition(id)
        .map_err(|e| AppError::NotFound(e.to_string()))?;

    Ok(Json(PlanView { id, definition }))
}
