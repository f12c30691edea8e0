//! Account moderation handlers.

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    routing::post,
};
use tracing::info;

use crate::backend::{TOGGLE_DISABLED_PATH, ToggleDisabledRequest, ToggleDisabledResponse};
use crate::db::RepositoryError;
use crate::error::AppError;
use crate::middleware::RequireAdminClaim;
use crate::state::AppState;

/// Build the moderation router.
pub fn router() -> Router<AppState> {
    Router::new().route(TOGGLE_DISABLED_PATH, post(toggle_disabled))
}

/// Store an account's `disabled` flag.
///
/// The caller's admin claim is re-verified from the bearer token. Admin
/// accounts and the caller's own account are refused so an operator cannot
/// lock themselves (or every operator) out.
///
/// # Errors
///
/// - 400 for a malformed body
/// - 401/403 from [`RequireAdminClaim`]
/// - 404 if the target does not exist
/// - 409 if the target is the caller or an admin
pub async fn toggle_disabled(
    RequireAdminClaim(caller): RequireAdminClaim,
    State(state): State<AppState>,
    body: Result<Json<ToggleDisabledRequest>, JsonRejection>,
) -> Result<Json<ToggleDisabledResponse>, AppError> {
    let Json(request) = body.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let target = request.target_uid;

    if target == caller.uid() {
        return Err(AppError::Conflict(
            "cannot change your own account".to_string(),
        ));
    }

    let record = state
        .directory()
        .get(&target)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("user {target}")))?;
    if !record.is_moderatable() {
        return Err(AppError::Conflict(format!("{target} is an admin account")));
    }

    // The directory re-checks the admin flag in the write; a grant landing
    // after the read above still ends in 409.
    let updated = state
        .directory()
        .set_disabled(&target, request.disabled)
        .await
        .map_err(|e| match e {
            RepositoryError::NotFound => AppError::NotFound(format!("user {target}")),
            RepositoryError::AdminTarget => {
                AppError::Conflict(format!("{target} is an admin account"))
            }
            other => AppError::Database(other),
        })?;
    info!(
        caller = %caller.sub,
        uid = %updated.uid,
        disabled = updated.disabled,
        "account moderation updated"
    );

    Ok(Json(ToggleDisabledResponse {
        uid: updated.uid,
        disabled: updated.disabled,
    }))
}
