//! Session-description signaling with the realtime speech service.
//!
//! - Endpoint: `POST {realtime_url}?model=<model>`
//! - Auth: `Authorization: Bearer <ephemeral token>`
//! - Body: the local SDP offer (`Content-Type: application/sdp`)
//! - Response: the remote SDP answer as plain text

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;
use url::Url;

use super::base::{EphemeralCredential, NegotiationError, NegotiationResult};

/// Default realtime endpoint.
pub const DEFAULT_REALTIME_URL: &str = "https://api.openai.com/v1/realtime";

/// Default realtime model.
pub const DEFAULT_REALTIME_MODEL: &str = "gpt-4o-realtime-preview-2024-12-17";

/// Default connect timeout in seconds.
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Performs the one-time offer/answer exchange.
#[async_trait]
pub trait SignalingClient: Send + Sync {
    async fn exchange(
        &self,
        credential: &EphemeralCredential,
        offer_sdp: &str,
    ) -> NegotiationResult<String>;
}

/// Check that a response body looks like a session description.
pub fn validate_answer(answer: &str) -> NegotiationResult<()> {
    let trimmed = answer.trim_start();
    if trimmed.is_empty() {
        return Err(NegotiationError::SignalingError(
            "Empty SDP answer".to_string(),
        ));
    }
    if !trimmed.starts_with("v=") {
        return Err(NegotiationError::SignalingError(
            "Malformed SDP answer: missing version line".to_string(),
        ));
    }
    Ok(())
}

/// Signaling over HTTPS.
#[derive(Debug, Clone)]
pub struct HttpSignaling {
    http_client: Client,
    endpoint: Url,
}

impl HttpSignaling {
    /// Create a signaling client for `model` at `realtime_url`.
    pub fn new(realtime_url: &str, model: &str, timeout: Duration) -> NegotiationResult<Self> {
        let mut endpoint = Url::parse(realtime_url).map_err(|e| {
            NegotiationError::SignalingError(format!("Invalid realtime URL '{realtime_url}': {e}"))
        })?;
        endpoint.query_pairs_mut().append_pair("model", model);

        let http_client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| {
                NegotiationError::SignalingError(format!("Failed to create HTTP client: {e}"))
            })?;

        Ok(Self {
            http_client,
            endpoint,
        })
    }

    /// The full endpoint including the model query parameter.
    pub fn endpoint(&self) -> &str {
        self.endpoint.as_str()
    }
}

#[async_trait]
impl SignalingClient for HttpSignaling {
    async fn exchange(
        &self,
        credential: &EphemeralCredential,
        offer_sdp: &str,
    ) -> NegotiationResult<String> {
        let response = self
            .http_client
            .post(self.endpoint.clone())
            .header("Authorization", format!("Bearer {}", credential.token))
            .header("Content-Type", "application/sdp")
            .body(offer_sdp.to_string())
            .send()
            .await
            .map_err(|e| NegotiationError::SignalingError(format!("Request failed: {e}")))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            NegotiationError::SignalingError(format!("Failed to read answer: {e}"))
        })?;

        if !status.is_success() {
            return Err(NegotiationError::SignalingError(format!(
                "Realtime service returned {status}: {body}"
            )));
        }

        validate_answer(&body)?;
        debug!(bytes = body.len(), "Received SDP answer");
        Ok(body)
    }
}
