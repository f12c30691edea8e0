//! Identity provider boundary.
//!
//! The provider owns sign-in and issues short-lived signed ID tokens. Custom
//! claims (notably `admin`) are granted out of band, so anything gating a
//! privileged view must read them from a freshly refreshed token.
//!
//! # Modules
//!
//! - [`token`] - HS256 signing keys and token verification
//! - [`secure_token`] - HTTP client for the provider's secure-token endpoint

pub mod secure_token;
pub mod token;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use tokio::sync::watch;

use starboard_core::{Email, UserId};

pub use secure_token::SecureTokenClient;
pub use token::TokenKeys;

/// An authenticated principal as reported by the identity provider.
///
/// Carries no privilege; see [`crate::services::claims::ClaimVerifier`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Principal {
    pub uid: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<Email>,
}

impl Principal {
    #[must_use]
    pub const fn new(uid: UserId) -> Self {
        Self { uid, email: None }
    }

    #[must_use]
    pub fn with_email(mut self, email: Email) -> Self {
        self.email = Some(email);
        self
    }
}

/// Claims carried by an ID token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Subject: the principal's uid.
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Administrative privilege. Only a literal `true` grants it.
    #[serde(
        default,
        deserialize_with = "strict_flag",
        skip_serializing_if = "Option::is_none"
    )]
    pub admin: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    pub iat: i64,
    pub exp: i64,
}

impl TokenClaims {
    #[must_use]
    pub fn uid(&self) -> UserId {
        UserId::new(self.sub.clone())
    }

    /// Whether the `admin` claim is present and exactly `true`.
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.admin == Some(true)
    }
}

/// Non-boolean claim values (`"true"`, `1`) are treated as absent.
fn strict_flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<bool>, D::Error> {
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| v.as_bool()))
}

/// A verified ID token: the raw bearer string plus its decoded claims.
#[derive(Clone)]
pub struct IdToken {
    raw: SecretString,
    claims: TokenClaims,
}

impl std::fmt::Debug for IdToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdToken")
            .field("raw", &"[REDACTED]")
            .field("claims", &self.claims)
            .finish()
    }
}

impl IdToken {
    #[must_use]
    pub const fn new(raw: SecretString, claims: TokenClaims) -> Self {
        Self { raw, claims }
    }

    /// The bearer string to send in an `Authorization` header.
    #[must_use]
    pub fn bearer(&self) -> &str {
        self.raw.expose_secret()
    }

    #[must_use]
    pub const fn claims(&self) -> &TokenClaims {
        &self.claims
    }
}

/// Errors from the identity provider boundary.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// No session is available for the principal.
    #[error("not signed in")]
    SignedOut,

    /// The HTTP request could not be completed.
    #[error("identity request failed: {0}")]
    Request(String),

    /// The provider refused the refresh (revoked or disabled account, bad key).
    #[error("identity provider rejected the request: {0}")]
    Rejected(String),

    /// The provider answered with a body we could not parse.
    #[error("unexpected identity response: {0}")]
    Response(String),

    /// Signature, expiry or issuer check failed.
    #[error("invalid token: {0}")]
    InvalidToken(String),

    /// The refreshed token belongs to someone else.
    #[error("token subject {actual} does not match principal {expected}")]
    PrincipalMismatch { expected: UserId, actual: UserId },
}

/// The operations the admin core needs from an identity provider.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Current principal, updated on every sign-in and sign-out.
    fn auth_state(&self) -> watch::Receiver<Option<Principal>>;

    /// Force a token refresh, bypassing any cached token, and return the
    /// verified claims.
    async fn refresh_claims(&self, principal: &Principal) -> Result<TokenClaims, IdentityError>;

    /// Force a token refresh and return the token for a privileged request.
    async fn fresh_token(&self, principal: &Principal) -> Result<IdToken, IdentityError>;
}
