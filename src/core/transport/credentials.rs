//! Ephemeral credential issuance.
//!
//! The issuer is an HTTP endpoint owned by the surrounding application. It
//! receives the session parameters and answers with a short-lived token used
//! as the bearer credential for signaling.
//!
//! Accepted response shapes:
//!
//! ```json
//! {"token": "ek_...", "session_id": "sess_...", "expires_at": 1735689600}
//! {"id": "sess_...", "client_secret": {"value": "ek_...", "expires_at": 1735689600}}
//! ```

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::base::{EphemeralCredential, NegotiationError, NegotiationResult, SessionParams};

/// Default connect timeout in seconds.
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Mints ephemeral credentials for a session.
#[async_trait]
pub trait CredentialIssuer: Send + Sync {
    async fn issue(&self, params: &SessionParams) -> NegotiationResult<EphemeralCredential>;
}

#[derive(Debug, Deserialize)]
struct CredentialResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    client_secret: Option<ClientSecret>,
    #[serde(default, alias = "id")]
    session_id: Option<String>,
    #[serde(default)]
    expires_at: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ClientSecret {
    value: String,
    #[serde(default)]
    expires_at: Option<i64>,
}

impl CredentialResponse {
    fn into_credential(self) -> NegotiationResult<EphemeralCredential> {
        let (token, secret_expiry) = match (self.token, self.client_secret) {
            (Some(token), _) => (token, None),
            (None, Some(secret)) => (secret.value, secret.expires_at),
            (None, None) => {
                return Err(NegotiationError::CredentialError(
                    "Issuer response contained no token".to_string(),
                ));
            }
        };

        if token.trim().is_empty() {
            return Err(NegotiationError::CredentialError(
                "Issuer returned an empty token".to_string(),
            ));
        }

        Ok(EphemeralCredential {
            token,
            session_id: self.session_id,
            expires_at: self.expires_at.or(secret_expiry),
        })
    }
}

/// Credential issuer reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpCredentialIssuer {
    http_client: Client,
    url: String,
    bearer_token: Option<String>,
}

impl HttpCredentialIssuer {
    /// Create an issuer posting to `url` with the given request timeout.
    pub fn new(url: impl Into<String>, timeout: Duration) -> NegotiationResult<Self> {
        let http_client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| {
                NegotiationError::CredentialError(format!("Failed to create HTTP client: {e}"))
            })?;

        Ok(Self {
            http_client,
            url: url.into(),
            bearer_token: None,
        })
    }

    /// Authenticate requests to the issuer (the application's own session).
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl CredentialIssuer for HttpCredentialIssuer {
    async fn issue(&self, params: &SessionParams) -> NegotiationResult<EphemeralCredential> {
        let mut request = self.http_client.post(&self.url).json(params);
        if let Some(ref token) = self.bearer_token {
            request = request.header("Authorization", format!("Bearer {token}"));
        }

        let response = request
            .send()
            .await
            .map_err(|e| NegotiationError::CredentialError(format!("Request failed: {e}")))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            NegotiationError::CredentialError(format!("Failed to read response: {e}"))
        })?;

        if !status.is_success() {
            return Err(NegotiationError::CredentialError(format!(
                "Issuer returned {status}: {body}"
            )));
        }

        let parsed: CredentialResponse = serde_json::from_str(&body).map_err(|e| {
            NegotiationError::CredentialError(format!("Invalid issuer response: {e}"))
        })?;

        let credential = parsed.into_credential()?;
        debug!(
            session_id = ?credential.session_id,
            expires_at = ?credential.expires_at,
            "Ephemeral credential issued"
        );
        Ok(credential)
    }
}
