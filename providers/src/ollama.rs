//! Client for a local Ollama-style inference service.
//!
//! One non-streaming `POST {base_url}/api/generate` per call; the answer is
//! the `response` field of the JSON body.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::retry::{RetryConfig, RetryOutcome, send_with_retry};
use crate::{BackendError, GenerateRequest, ReasoningBackend};

pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

/// Cap on error body text kept in [`BackendError::Http`].
const MAX_ERROR_BODY_CHARS: usize = 500;

#[derive(Debug, Clone, PartialEq)]
pub struct OllamaConfig {
    pub base_url: String,
    /// Transport deadline per attempt. Callers apply their own, usually
    /// shorter, deadline on top.
    pub request_timeout: Duration,
    pub temperature: f64,
    pub top_p: f64,
    pub retry: RetryConfig,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout: Duration::from_secs(300),
            temperature: 0.7,
            top_p: 0.9,
            retry: RetryConfig::default(),
        }
    }
}

#[derive(Serialize)]
struct GenerateBody<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    num_predict: u32,
    temperature: f64,
    top_p: f64,
}

#[derive(Deserialize)]
struct GenerateReply {
    #[serde(default)]
    response: String,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct OllamaClient {
    http: reqwest::Client,
    config: OllamaConfig,
}

impl OllamaClient {
    pub fn new(config: OllamaConfig) -> Result<Self, BackendError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| BackendError::Fatal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http, config })
    }

    #[must_use]
    pub fn config(&self) -> &OllamaConfig {
        &self.config
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.config.base_url.trim_end_matches('/'))
    }

    /// Whether the service answers its model listing within two seconds.
    pub async fn is_available(&self) -> bool {
        let url = self.endpoint("/api/tags");
        match self
            .http
            .get(&url)
            .timeout(Duration::from_secs(2))
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::debug!(url = %url, "Inference service probe failed: {e}");
                false
            }
        }
    }

    pub async fn generate(&self, request: GenerateRequest<'_>) -> Result<String, BackendError> {
        let url = self.endpoint("/api/generate");
        let body = GenerateBody {
            model: request.model,
            prompt: request.prompt,
            stream: false,
            options: GenerateOptions {
                num_predict: request.max_tokens,
                temperature: self.config.temperature,
                top_p: self.config.top_p,
            },
        };

        let outcome =
            send_with_retry(|| self.http.post(&url).json(&body), &self.config.retry).await;

        let response = match outcome {
            RetryOutcome::Success(response) => response,
            RetryOutcome::HttpError(response) => {
                let status = response.status().as_u16();
                let text = response.text().await.unwrap_or_default();
                return Err(BackendError::Http {
                    status,
                    body: text.chars().take(MAX_ERROR_BODY_CHARS).collect(),
                });
            }
            RetryOutcome::ConnectionError { attempts, source } => {
                return Err(if source.is_timeout() {
                    BackendError::Timeout(self.config.request_timeout)
                } else {
                    BackendError::Unavailable(format!("{source} (after {attempts} attempts)"))
                });
            }
            RetryOutcome::NonRetryable(source) => {
                return Err(BackendError::Unavailable(source.to_string()));
            }
        };

        let reply: GenerateReply = response
            .json()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))?;
        if let Some(error) = reply.error {
            return Err(BackendError::Rejected(error));
        }

        tracing::debug!(
            model = request.model,
            chars = reply.response.len(),
            "Inference service answered"
        );
        Ok(reply.response.trim().to_string())
    }
}

impl ReasoningBackend for OllamaClient {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn generate(&self, request: GenerateRequest<'_>) -> Result<String, BackendError> {
        OllamaClient::generate(self, request).await
    }
}
