//! Bearer-token extractor for admin-only routes.
//!
//! The caller's ID token is verified on every request and the `admin` claim
//! read from it; nothing about the caller is cached between requests.

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
    response::{IntoResponse, Response},
};
use tracing::debug;

use crate::error::AppError;
use crate::identity::TokenClaims;
use crate::state::AppState;

/// Extractor that requires a valid ID token carrying `admin: true`.
///
/// # Example
///
/// ```rust,ignore
/// async fn handler(RequireAdminClaim(caller): RequireAdminClaim) -> impl IntoResponse {
///     format!("Hello, {}!", caller.sub)
/// }
/// ```
#[derive(Debug)]
pub struct RequireAdminClaim(pub TokenClaims);

/// Why an admin-only request was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimRejection {
    /// No `Authorization: Bearer` header.
    MissingToken,
    /// Signature, expiry or issuer check failed.
    InvalidToken,
    /// Valid token without the admin claim.
    NotAdmin,
}

impl IntoResponse for ClaimRejection {
    fn into_response(self) -> Response {
        match self {
            Self::MissingToken => AppError::Unauthorized("missing bearer token".to_string()),
            Self::InvalidToken => AppError::Unauthorized("invalid token".to_string()),
            Self::NotAdmin => AppError::Forbidden("admin claim required".to_string()),
        }
        .into_response()
    }
}

/// Token from an `Authorization: Bearer <token>` header.
fn bearer_token(parts: &Parts) -> Option<&str> {
    let value = parts.headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

impl FromRequestParts<AppState> for RequireAdminClaim {
    type Rejection = ClaimRejection;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts).ok_or(ClaimRejection::MissingToken)?;

        let claims = state.tokens().verify(token).map_err(|e| {
            debug!(error = %e, "rejecting bearer token");
            ClaimRejection::InvalidToken
        })?;

        if !claims.is_admin() {
            debug!(sub = %claims.sub, "caller lacks admin claim");
            return Err(ClaimRejection::NotAdmin);
        }

        Ok(Self(claims))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use axum::http::{Request, StatusCode};

    use super::*;

    fn parts(authorization: Option<&str>) -> Parts {
        let mut builder = Request::builder().uri("/api/admin/users/toggle-disabled");
        if let Some(value) = authorization {
            builder = builder.header(AUTHORIZATION, value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn test_bearer_token_parsing() {
        assert_eq!(bearer_token(&parts(Some("Bearer abc.def"))), Some("abc.def"));
        assert_eq!(bearer_token(&parts(Some("bearer abc"))), Some("abc"));
        assert_eq!(bearer_token(&parts(Some("Basic abc"))), None);
        assert_eq!(bearer_token(&parts(Some("Bearer "))), None);
        assert_eq!(bearer_token(&parts(None)), None);
    }

    #[test]
    fn test_rejection_status_codes() {
        assert_eq!(
            ClaimRejection::MissingToken.into_response().status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ClaimRejection::InvalidToken.into_response().status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ClaimRejection::NotAdmin.into_response().status(),
            StatusCode::FORBIDDEN
        );
    }
}
