//! Claim verification.
//!
//! Administrative privilege is granted out of band by setting the `admin`
//! claim on an account, so a token cached before the grant (or before a
//! revocation) says nothing reliable. Every check here forces a refresh and
//! reads the claim from the new token.

use std::sync::Arc;

use tracing::{debug, instrument, warn};

use crate::identity::{IdentityError, IdentityProvider, Principal};

/// Decides whether a principal holds administrative privilege.
#[derive(Clone)]
pub struct ClaimVerifier {
    identity: Arc<dyn IdentityProvider>,
}

impl std::fmt::Debug for ClaimVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClaimVerifier").finish_non_exhaustive()
    }
}

impl ClaimVerifier {
    #[must_use]
    pub fn new(identity: Arc<dyn IdentityProvider>) -> Self {
        Self { identity }
    }

    /// Whether `principal` holds the `admin` claim.
    ///
    /// Returns `Ok(false)` without contacting the provider when there is no
    /// principal, and `Ok(false)` when the refreshed claim is absent, not a
    /// boolean, `false`, or issued for a different uid.
    ///
    /// # Errors
    ///
    /// Returns the provider's error if the refresh itself fails. Callers
    /// gating a view should treat that as "not admin".
    #[instrument(skip_all, fields(uid = principal.map(|p| p.uid.as_str())))]
    pub async fn verify_admin(&self, principal: Option<&Principal>) -> Result<bool, IdentityError> {
        let Some(principal) = principal else {
            return Ok(false);
        };

        let claims = self.identity.refresh_claims(principal).await?;
        if claims.uid() != principal.uid {
            warn!(token_sub = %claims.sub, "refreshed token belongs to another principal");
            return Ok(false);
        }

        let is_admin = claims.is_admin();
        debug!(is_admin, "admin claim checked");
        Ok(is_admin)
    }
}
