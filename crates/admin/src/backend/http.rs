//! HTTP client for the privileged backend.

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, instrument, warn};
use url::Url;

use super::{
    BackendError, ErrorBody, PrivilegedBackend, TOGGLE_DISABLED_PATH, ToggleDisabledRequest,
    ToggleDisabledResponse,
};
use crate::identity::IdToken;

/// JSON-over-HTTP [`PrivilegedBackend`].
#[derive(Debug, Clone)]
pub struct HttpPrivilegedBackend {
    client: Client,
    base_url: Url,
}

impl HttpPrivilegedBackend {
    #[must_use]
    pub fn new(base_url: Url) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    #[must_use]
    pub const fn with_client(client: Client, base_url: Url) -> Self {
        Self { client, base_url }
    }

    fn endpoint(&self, path: &str) -> Result<Url, BackendError> {
        self.base_url
            .join(path)
            .map_err(|e| BackendError::Transport(format!("invalid backend URL: {e}")))
    }
}

#[async_trait]
impl PrivilegedBackend for HttpPrivilegedBackend {
    #[instrument(skip_all, fields(uid = %request.target_uid, disabled = request.disabled))]
    async fn toggle_disabled(
        &self,
        credential: &IdToken,
        request: &ToggleDisabledRequest,
    ) -> Result<ToggleDisabledResponse, BackendError> {
        let response = self
            .client
            .post(self.endpoint(TOGGLE_DISABLED_PATH)?)
            .bearer_auth(credential.bearer())
            .json(request)
            .send()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = match response.json::<ErrorBody>().await {
                Ok(body) => body.error,
                Err(_) => status
                    .canonical_reason()
                    .unwrap_or("unknown error")
                    .to_string(),
            };
            warn!(status = status.as_u16(), error = %message, "backend rejected toggle");
            return Err(BackendError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let body: ToggleDisabledResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Response(e.to_string()))?;

        debug!(uid = %body.uid, disabled = body.disabled, "toggle confirmed");
        Ok(body)
    }
}
