//! Embedding provider client and the retrying [`Embedder`].
//!
//! - **[`EmbeddingClient`]** is the provider seam: one text in, one vector out,
//!   no retries of its own.
//! - **[`HttpEmbeddingClient`]** talks to Azure OpenAI deployments or the
//!   OpenAI-compatible `/embeddings` endpoint.
//! - **[`Embedder`]** wraps a client with a [`RetryPolicy`] and checks the
//!   returned dimensionality.
//!
//! # Error classification
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → `Transient`, retried
//! - HTTP 4xx (client error, not 429) → `Rejected`, fails immediately
//! - Network errors → `Transient`, retried
//! - Malformed success body → `Rejected`

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::{Config, ProviderKind};
use crate::error::EmbeddingError;
use crate::retry::{execute_with_retry, RetryFailure, RetryPolicy};

const OPENAI_DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1";

/// A provider that turns one text into one vector.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    async fn create_embedding(&self, model: &str, text: &str) -> Result<Vec<f32>, EmbeddingError>;
}

pub struct HttpEmbeddingClient {
    http: reqwest::Client,
    provider: ProviderKind,
    endpoint: String,
    api_version: String,
    api_key: String,
}

impl HttpEmbeddingClient {
    pub fn new(
        provider: ProviderKind,
        endpoint: &str,
        api_version: &str,
        api_key: &str,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            provider,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_version: api_version.to_string(),
            api_key: api_key.to_string(),
        })
    }

    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let embedding = &config.embedding;
        let api_key = config
            .secrets
            .openai_api_key
            .as_deref()
            .context("AOAI_KEY or OPENAI_API_KEY environment variable not set")?;
        let endpoint = embedding
            .endpoint
            .as_deref()
            .unwrap_or(OPENAI_DEFAULT_ENDPOINT);

        Ok(Self::new(
            embedding.provider,
            endpoint,
            &embedding.api_version,
            api_key,
            Duration::from_secs(embedding.timeout_secs),
        )?)
    }

    fn url(&self, model: &str) -> String {
        match self.provider {
            ProviderKind::Azure => format!(
                "{}/openai/deployments/{}/embeddings?api-version={}",
                self.endpoint, model, self.api_version
            ),
            ProviderKind::OpenAi => format!("{}/embeddings", self.endpoint),
        }
    }
}

#[async_trait]
impl EmbeddingClient for HttpEmbeddingClient {
    async fn create_embedding(&self, model: &str, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let body = serde_json::json!({
            "model": model,
            "input": text,
        });

        let request = self.http.post(self.url(model)).json(&body);
        let request = match self.provider {
            ProviderKind::Azure => request.header("api-key", &self.api_key),
            ProviderKind::OpenAi => request.bearer_auth(&self.api_key),
        };

        let response = request
            .send()
            .await
            .map_err(|e| EmbeddingError::Transient(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            let json: serde_json::Value = response
                .json()
                .await
                .map_err(|e| EmbeddingError::Transient(e.to_string()))?;
            return parse_embedding_response(&json);
        }

        let body_text = response.text().await.unwrap_or_default();
        let message = format!("HTTP {}: {}", status.as_u16(), body_text);
        if status.as_u16() == 429 || status.is_server_error() {
            Err(EmbeddingError::Transient(message))
        } else {
            Err(EmbeddingError::Rejected(message))
        }
    }
}

/// Pull `data[0].embedding` out of an embeddings response.
fn parse_embedding_response(json: &serde_json::Value) -> Result<Vec<f32>, EmbeddingError> {
    let values = json
        .get("data")
        .and_then(|d| d.as_array())
        .and_then(|d| d.first())
        .and_then(|item| item.get("embedding"))
        .and_then(|e| e.as_array())
        .ok_or_else(|| EmbeddingError::Rejected("response missing data[0].embedding".into()))?;

    values
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| EmbeddingError::Rejected("non-numeric embedding value".into()))
        })
        .collect()
}

/// The `embed(text) -> vector` contract the pipeline depends on.
pub struct Embedder {
    client: Box<dyn EmbeddingClient>,
    model: String,
    dims: usize,
    policy: RetryPolicy,
}

impl Embedder {
    pub fn new(client: Box<dyn EmbeddingClient>, model: &str, dims: usize, policy: RetryPolicy) -> Self {
        Self {
            client,
            model: model.to_string(),
            dims,
            policy,
        }
    }

    /// HTTP-backed embedder with the retry policy from `[embedding]`.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let client = HttpEmbeddingClient::from_config(config)?;
        Ok(Self::new(
            Box::new(client),
            &config.embedding.model,
            config.embedding.dims,
            RetryPolicy::from_config(&config.embedding),
        ))
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    /// Embed one text.
    ///
    /// Transient failures are retried under the policy; once the attempts
    /// run out the last error comes back wrapped in
    /// [`EmbeddingError::Exhausted`]. A vector of the wrong length is an
    /// error, never padded or truncated.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let result = execute_with_retry(
            &self.policy,
            || self.client.create_embedding(&self.model, text),
            |e: &EmbeddingError| {
                let retry = e.is_transient();
                if retry {
                    debug!(error = %e, "transient embedding failure, backing off");
                }
                retry
            },
        )
        .await;

        let vector = match result {
            Ok(v) => v,
            Err(RetryFailure { attempts, error }) if error.is_transient() => {
                warn!(attempts, error = %error, "embedding retries exhausted");
                return Err(EmbeddingError::Exhausted {
                    attempts,
                    source: Box::new(error),
                });
            }
            Err(RetryFailure { error, .. }) => return Err(error),
        };

        if vector.len() != self.dims {
            return Err(EmbeddingError::Dimension {
                expected: self.dims,
                actual: vector.len(),
            });
        }
        Ok(vector)
    }
}
