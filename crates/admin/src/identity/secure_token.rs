//! Secure-token endpoint client.
//!
//! Signs an operator in by exchanging a long-lived refresh token for a signed
//! ID token, and performs the forced refreshes the claim verifier and the
//! mutation path require. Every refresh goes over the wire; no ID token is
//! cached.

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};
use url::Url;

use starboard_core::Email;

use super::{IdToken, IdentityError, IdentityProvider, Principal, TokenClaims, TokenKeys};
use crate::config::ConsoleConfig;

/// Response of a successful refresh.
#[derive(Debug, Deserialize)]
struct RefreshResponse {
    id_token: String,
    /// Present when the provider rotates refresh tokens.
    #[serde(default)]
    refresh_token: Option<String>,
}

/// Error envelope of a refused refresh.
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

/// Signed-in session state.
struct SessionCredentials {
    principal: Principal,
    refresh_token: SecretString,
}

/// HTTP identity provider client.
pub struct SecureTokenClient {
    client: Client,
    base_url: Url,
    api_key: SecretString,
    keys: TokenKeys,
    session: Mutex<Option<SessionCredentials>>,
    state: watch::Sender<Option<Principal>>,
}

impl std::fmt::Debug for SecureTokenClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureTokenClient")
            .field("base_url", &self.base_url.as_str())
            .field("api_key", &"[REDACTED]")
            .field("principal", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

impl SecureTokenClient {
    #[must_use]
    pub fn new(client: Client, base_url: Url, api_key: SecretString, keys: TokenKeys) -> Self {
        let (state, _) = watch::channel(None);
        Self {
            client,
            base_url,
            api_key,
            keys,
            session: Mutex::new(None),
            state,
        }
    }

    #[must_use]
    pub fn from_config(config: &ConsoleConfig) -> Self {
        Self::new(
            Client::new(),
            config.identity_base_url.clone(),
            config.identity_api_key.clone(),
            TokenKeys::new(&config.tokens),
        )
    }

    /// Sign in with a refresh token and publish the resulting principal.
    ///
    /// # Errors
    ///
    /// Returns an error if the exchange fails or the token does not verify.
    #[instrument(skip_all)]
    pub async fn sign_in_with_refresh_token(
        &self,
        refresh_token: SecretString,
    ) -> Result<Principal, IdentityError> {
        let (token, rotated) = self.exchange(&refresh_token).await?;
        let claims = token.claims();

        let mut principal = Principal::new(claims.uid());
        if let Some(email) = claims.email.as_deref() {
            match Email::parse(email) {
                Ok(email) => principal = principal.with_email(email),
                Err(e) => warn!(error = %e, "ignoring unparseable email claim"),
            }
        }

        *self.session.lock() = Some(SessionCredentials {
            principal: principal.clone(),
            refresh_token: rotated.unwrap_or(refresh_token),
        });
        self.state.send_replace(Some(principal.clone()));

        info!(uid = %principal.uid, "signed in");
        Ok(principal)
    }

    /// Drop the session and publish the signed-out state.
    pub fn sign_out(&self) {
        let previous = self.session.lock().take();
        self.state.send_replace(None);
        if let Some(session) = previous {
            info!(uid = %session.principal.uid, "signed out");
        }
    }

    fn token_endpoint(&self) -> Result<Url, IdentityError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| IdentityError::Request(format!("invalid base URL: {}", self.base_url)))?
            .pop_if_empty()
            .extend(["v1", "token"]);
        url.query_pairs_mut()
            .append_pair("key", self.api_key.expose_secret());
        Ok(url)
    }

    async fn exchange(
        &self,
        refresh_token: &SecretString,
    ) -> Result<(IdToken, Option<SecretString>), IdentityError> {
        let response = self
            .client
            .post(self.token_endpoint()?)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token.expose_secret()),
            ])
            .send()
            .await
            .map_err(|e| IdentityError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = match response.json::<ErrorEnvelope>().await {
                Ok(envelope) => envelope.error.message,
                Err(_) => status.to_string(),
            };
            return Err(IdentityError::Rejected(message));
        }

        let body: RefreshResponse = response
            .json()
            .await
            .map_err(|e| IdentityError::Response(e.to_string()))?;

        let token = self.keys.verify_id_token(body.id_token)?;
        debug!(uid = %token.claims().sub, exp = token.claims().exp, "token refreshed");
        Ok((token, body.refresh_token.map(SecretString::from)))
    }
}

#[async_trait]
impl IdentityProvider for SecureTokenClient {
    fn auth_state(&self) -> watch::Receiver<Option<Principal>> {
        self.state.subscribe()
    }

    async fn refresh_claims(&self, principal: &Principal) -> Result<TokenClaims, IdentityError> {
        Ok(self.fresh_token(principal).await?.claims().clone())
    }

    #[instrument(skip_all, fields(uid = %principal.uid))]
    async fn fresh_token(&self, principal: &Principal) -> Result<IdToken, IdentityError> {
        let refresh_token = {
            let session = self.session.lock();
            match session.as_ref() {
                Some(s) if s.principal.uid == principal.uid => s.refresh_token.clone(),
                _ => return Err(IdentityError::SignedOut),
            }
        };

        let (token, rotated) = self.exchange(&refresh_token).await?;
        let actual = token.claims().uid();
        if actual != principal.uid {
            return Err(IdentityError::PrincipalMismatch {
                expected: principal.uid.clone(),
                actual,
            });
        }

        if let Some(rotated) = rotated {
            let mut session = self.session.lock();
            if let Some(s) = session.as_mut().filter(|s| s.principal.uid == principal.uid) {
                s.refresh_token = rotated;
            }
        }

        Ok(token)
    }
}
