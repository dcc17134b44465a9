//! Retry policy for calls to the local inference service.
//!
//! The service answers 503 while it loads a model and refuses connections
//! while it restarts, so both are retried with capped exponential backoff.
//! Anything else is handed back to the caller on the first attempt.

use std::time::Duration;

use reqwest::{RequestBuilder, Response, StatusCode, header::HeaderMap};

/// Longest server-requested pause we are willing to honour.
const MAX_SERVER_PAUSE: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Each delay is shortened by a random fraction up to this value.
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            jitter_factor: 0.25,
        }
    }
}

impl RetryConfig {
    /// Backoff before retry `retry` (zero-based), ignoring server hints.
    #[must_use]
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2_u32.saturating_pow(retry);
        let delay = self
            .initial_delay
            .saturating_mul(factor)
            .min(self.max_delay);
        delay.mul_f64(1.0 - rand::random::<f64>() * self.jitter_factor)
    }
}

/// Whole seconds from a `Retry-After` header, when positive and below a
/// minute.
#[must_use]
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let secs: u64 = headers
        .get("retry-after")?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()?;
    let pause = Duration::from_secs(secs);
    (!pause.is_zero() && pause < MAX_SERVER_PAUSE).then_some(pause)
}

#[must_use]
pub fn should_retry(status: StatusCode) -> bool {
    status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
}

/// Delay before retry `retry`, preferring the server's `Retry-After`.
#[must_use]
pub fn calculate_retry_delay(
    retry: u32,
    config: &RetryConfig,
    headers: Option<&HeaderMap>,
) -> Duration {
    headers
        .and_then(parse_retry_after)
        .unwrap_or_else(|| config.backoff(retry))
}

/// How a retried request ended.
#[derive(Debug)]
pub enum RetryOutcome {
    Success(Response),
    /// Final non-2xx response.
    HttpError(Response),
    /// The service stayed unreachable for every attempt.
    ConnectionError {
        attempts: u32,
        source: reqwest::Error,
    },
    /// A transport failure retrying would not fix (bad URL, body encoding).
    NonRetryable(reqwest::Error),
}

/// Send a request, retrying transient failures. `build_request` is called
/// once per attempt.
pub async fn send_with_retry<F>(build_request: F, config: &RetryConfig) -> RetryOutcome
where
    F: Fn() -> RequestBuilder,
{
    let mut retry = 0;
    loop {
        let exhausted = retry >= config.max_retries;
        let delay = match build_request().send().await {
            Ok(response) if response.status().is_success() => {
                return RetryOutcome::Success(response);
            }
            Ok(response) => {
                let status = response.status();
                if exhausted || !should_retry(status) {
                    return RetryOutcome::HttpError(response);
                }
                let delay = calculate_retry_delay(retry, config, Some(response.headers()));
                tracing::debug!(
                    %status,
                    retry = retry + 1,
                    delay_ms = delay.as_millis(),
                    "Inference service busy, retrying"
                );
                delay
            }
            Err(source) if !is_transient(&source) => return RetryOutcome::NonRetryable(source),
            Err(source) if exhausted => {
                return RetryOutcome::ConnectionError {
                    attempts: retry + 1,
                    source,
                };
            }
            Err(source) => {
                let delay = config.backoff(retry);
                tracing::debug!(
                    error = %source,
                    retry = retry + 1,
                    delay_ms = delay.as_millis(),
                    "Inference service unreachable, retrying"
                );
                delay
            }
        };
        tokio::time::sleep(delay).await;
        retry += 1;
    }
}

fn is_transient(error: &reqwest::Error) -> bool {
    error.is_connect() || error.is_timeout() || error.is_request()
}
