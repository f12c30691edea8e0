//! Privileged backend boundary.
//!
//! The backend performs account mutations the operator's client is not
//! trusted to perform directly. It re-verifies the caller's admin claim and
//! the self-lockout rule on every request.
//!
//! # Modules
//!
//! - [`http`] - reqwest client for the backend's JSON API

pub mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use starboard_core::UserId;

use crate::identity::{IdToken, IdentityError};

pub use http::HttpPrivilegedBackend;

/// Path of the toggle-disabled endpoint.
pub const TOGGLE_DISABLED_PATH: &str = "/api/admin/users/toggle-disabled";

/// Body of a toggle-disabled request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToggleDisabledRequest {
    pub target_uid: UserId,
    /// The value to store, not a relative flip.
    pub disabled: bool,
}

/// Body of a successful toggle-disabled response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToggleDisabledResponse {
    pub uid: UserId,
    pub disabled: bool,
}

/// Error payload of every non-success response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

/// Failures of a privileged call.
#[derive(Debug, Error)]
pub enum BackendError {
    /// No fresh credential could be obtained.
    #[error("could not obtain a fresh credential: {0}")]
    Credential(#[from] IdentityError),

    /// The request never got a response.
    #[error("backend request failed: {0}")]
    Transport(String),

    /// The backend answered with a non-success status.
    #[error("backend rejected the change ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// The backend answered success with a body we could not parse.
    #[error("unexpected backend response: {0}")]
    Response(String),
}

/// Client side of the privileged backend.
#[async_trait]
pub trait PrivilegedBackend: Send + Sync {
    async fn toggle_disabled(
        &self,
        credential: &IdToken,
        request: &ToggleDisabledRequest,
    ) -> Result<ToggleDisabledResponse, BackendError>;
}
