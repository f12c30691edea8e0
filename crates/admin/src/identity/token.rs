//! ID token signing keys.
//!
//! The identity provider and the privileged backend share an HS256 secret.
//! The backend only verifies; signing is used by local tooling and tests to
//! mint tokens the same way the provider does.

use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::SecretString;

use super::{IdToken, IdentityError, TokenClaims};
use crate::config::TokenConfig;

/// Keys and validation rules for ID tokens.
#[derive(Clone)]
pub struct TokenKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: Option<String>,
}

impl std::fmt::Debug for TokenKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenKeys")
            .field("issuer", &self.issuer)
            .finish_non_exhaustive()
    }
}

impl TokenKeys {
    #[must_use]
    pub fn new(config: &TokenConfig) -> Self {
        Self::from_secret(config.secret_bytes(), config.issuer.clone())
    }

    #[must_use]
    pub fn from_secret(secret: &[u8], issuer: Option<String>) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            issuer,
        }
    }

    /// Verify signature, expiry and issuer, returning the claims.
    ///
    /// # Errors
    ///
    /// Returns `IdentityError::InvalidToken` if any check fails.
    pub fn verify(&self, raw: &str) -> Result<TokenClaims, IdentityError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.validate_aud = false;
        if let Some(issuer) = &self.issuer {
            validation.set_issuer(&[issuer]);
        }

        jsonwebtoken::decode::<TokenClaims>(raw, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|e| IdentityError::InvalidToken(e.to_string()))
    }

    /// Verify a raw token and wrap it together with its claims.
    ///
    /// # Errors
    ///
    /// Returns `IdentityError::InvalidToken` if verification fails.
    pub fn verify_id_token(&self, raw: String) -> Result<IdToken, IdentityError> {
        let claims = self.verify(&raw)?;
        Ok(IdToken::new(SecretString::from(raw), claims))
    }

    /// Sign a set of claims.
    ///
    /// # Errors
    ///
    /// Returns `IdentityError::InvalidToken` if encoding fails.
    pub fn sign(&self, claims: &TokenClaims) -> Result<String, IdentityError> {
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
            .map_err(|e| IdentityError::InvalidToken(format!("signing failed: {e}")))
    }

    /// Claims for `uid` valid for `ttl_secs` from now, stamped with this
    /// key set's issuer.
    #[must_use]
    pub fn claims_for(&self, uid: &str, admin: Option<bool>, ttl_secs: i64) -> TokenClaims {
        let now = Utc::now().timestamp();
        TokenClaims {
            sub: uid.to_string(),
            email: None,
            admin,
            iss: self.issuer.clone(),
            iat: now,
            exp: now + ttl_secs,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"kT9#vQ2!pL7@xR4$mN8^wB3&zY6*cD1%";

    #[test]
    fn test_sign_and_verify() {
        let keys = TokenKeys::from_secret(SECRET, None);
        let token = keys.sign(&keys.claims_for("u1", Some(true), 3600)).unwrap();

        let claims = keys.verify(&token).unwrap();
        assert_eq!(claims.sub, "u1");
        assert!(claims.is_admin());
    }

    #[test]
    fn test_wrong_secret_fails() {
        let keys = TokenKeys::from_secret(SECRET, None);
        let other = TokenKeys::from_secret(b"a-different-shared-secret-value!", None);
        let token = other.sign(&other.claims_for("u1", Some(true), 3600)).unwrap();

        assert!(matches!(keys.verify(&token), Err(IdentityError::InvalidToken(_))));
    }

    #[test]
    fn test_expired_token_fails() {
        let keys = TokenKeys::from_secret(SECRET, None);
        let token = keys.sign(&keys.claims_for("u1", Some(true), -3600)).unwrap();

        assert!(matches!(keys.verify(&token), Err(IdentityError::InvalidToken(_))));
    }

    #[test]
    fn test_issuer_is_enforced() {
        let provider = TokenKeys::from_secret(SECRET, Some("starboard-identity".to_string()));
        let strict = TokenKeys::from_secret(SECRET, Some("someone-else".to_string()));
        let token = provider
            .sign(&provider.claims_for("u1", None, 3600))
            .unwrap();

        assert!(provider.verify(&token).is_ok());
        assert!(strict.verify(&token).is_err());
    }

    #[test]
    fn test_verify_id_token_keeps_raw_bearer() {
        let keys = TokenKeys::from_secret(SECRET, None);
        let raw = keys.sign(&keys.claims_for("u9", None, 60)).unwrap();

        let token = keys.verify_id_token(raw.clone()).unwrap();
        assert_eq!(token.bearer(), raw);
        assert_eq!(token.claims().uid().as_str(), "u9");
    }
}
