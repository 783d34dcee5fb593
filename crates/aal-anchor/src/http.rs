use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::debug;

use crate::backend::{AnchorBackend, AnchorPayload, Submission};
use crate::error::BackendError;

/// Generic JSON anchoring gateway.
///
/// `POST <endpoint>` with an [`AnchorPayload`] body; the gateway answers
/// `{"transactionId": "...", "confirmed": bool}`. Liveness is
/// `GET <endpoint>/health`.
pub struct HttpBackend {
    id: String,
    endpoint: String,
    auth_token: Option<String>,
    timeout: Duration,
    client: Client,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GatewayReceipt {
    transaction_id: String,
    #[serde(default)]
    confirmed: bool,
}

impl HttpBackend {
    pub fn new(
        id: impl Into<String>,
        endpoint: impl Into<String>,
        timeout: Duration,
        auth_token: Option<String>,
    ) -> Result<Self, BackendError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::Unavailable(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            id: id.into(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            auth_token,
            timeout,
            client,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn map_reqwest_error(&self, err: reqwest::Error) -> BackendError {
        if err.is_timeout() {
            BackendError::Timeout(self.timeout)
        } else {
            BackendError::Unavailable(err.to_string())
        }
    }
}

#[async_trait]
impl AnchorBackend for HttpBackend {
    fn id(&self) -> &str {
        &self.id
    }

    async fn submit(&self, payload: &AnchorPayload) -> Result<Submission, BackendError> {
        let mut request = self.client.post(&self.endpoint).json(payload);
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| self.map_reqwest_error(e))?;
        let status = response.status();
        if status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Rejected(format!("{status}: {body}")));
        }
        if !status.is_success() {
            return Err(BackendError::Unavailable(format!("gateway returned {status}")));
        }

        let receipt: GatewayReceipt = response
            .json()
            .await
            .map_err(|e| BackendError::Protocol(e.to_string()))?;
        if receipt.transaction_id.is_empty() {
            return Err(BackendError::Protocol("empty transactionId".into()));
        }
        debug!(backend = %self.id, tx = %receipt.transaction_id, "gateway accepted root");
        Ok(Submission {
            transaction_id: receipt.transaction_id,
            confirmed: receipt.confirmed,
        })
    }

    async fn is_healthy(&self) -> bool {
        let url = format!("{}/health", self.endpoint);
        match self.client.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(backend = %self.id, error = %e, "gateway health check failed");
                false
            }
        }
    }
}
