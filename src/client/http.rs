//! Generic JSON-over-HTTP generation adapter.
//!
//! Posts `{system, user, json_mode}` to a configured endpoint and reads a
//! `{text}` reply. Model selection, prompt dialects and provider quirks are
//! the endpoint's business; this adapter only maps transport and status
//! codes onto [`ClientError`] so the gate can apply the right retry policy.

use crate::client::{ClientError, GenerationClient, GenerationRequest};
use crate::config::BackendSettings;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

const DEFAULT_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, Deserialize)]
struct GenerationReply {
    text: String,
}

pub struct HttpGenerationClient {
    http: reqwest::Client,
    endpoint: String,
    auth_token: Option<String>,
}

impl HttpGenerationClient {
    pub fn new(settings: &BackendSettings) -> Result<Self, anyhow::Error> {
        if settings.endpoint.is_empty() {
            anyhow::bail!("backend endpoint is not configured (set [backend].endpoint)");
        }
        let timeout = Duration::from_secs(settings.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS));
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            endpoint: settings.endpoint.clone(),
            auth_token: settings.auth_token.clone(),
        })
    }
}

#[async_trait]
impl GenerationClient for HttpGenerationClient {
    async fn generate(&self, request: GenerationRequest) -> Result<String, ClientError> {
        let mut builder = self.http.post(&self.endpoint).json(&request);
        if let Some(token) = &self.auth_token {
            builder = builder.bearer_auth(token);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ClientError::Transient(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(ClientError::RateLimited);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Transient(format!(
                "endpoint returned {}: {}",
                status,
                body.chars().take(200).collect::<String>()
            )));
        }

        let reply: GenerationReply = response
            .json()
            .await
            .map_err(|e| ClientError::Transient(format!("reply was not json: {}", e)))?;
        Ok(reply.text)
    }
}
