//! HTTP client for the upstream content API

use crate::config::{RetryConfig, UpstreamConfig};
use crate::endpoints::EnvelopeMode;
use crate::error::{GatewayError, Result};
use bytes::Bytes;
use reqwest::{Client, Url};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::sleep;

/// Retry policy for transient upstream failures
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one
    pub max_attempts: usize,
    /// Backoff durations in milliseconds before each retry
    pub backoff_ms: Vec<u64>,
}

impl RetryPolicy {
    /// Create a retry policy with exponential backoff
    ///
    /// With a base of 300ms the delays are 300ms, 600ms, 1200ms, ...
    pub fn new(max_attempts: usize, base_ms: u64) -> Self {
        let max_attempts = max_attempts.max(1);
        let backoff_ms = (0..max_attempts - 1)
            .map(|i| base_ms.saturating_mul(2u64.saturating_pow(i as u32)))
            .collect();

        RetryPolicy {
            max_attempts,
            backoff_ms,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.max_attempts, config.backoff_base_ms)
    }

    /// Check if another attempt should follow a failed one
    ///
    /// `attempt` is zero-based.
    pub fn should_retry(&self, attempt: usize, error: &GatewayError) -> bool {
        attempt + 1 < self.max_attempts && error.should_retry()
    }

    /// Delay before the retry that follows the given zero-based attempt
    pub fn backoff_duration(&self, attempt: usize) -> Duration {
        let ms = self
            .backoff_ms
            .get(attempt)
            .copied()
            .unwrap_or_else(|| self.backoff_ms.last().copied().unwrap_or(0));
        Duration::from_millis(ms)
    }
}

/// Outcome of a retried fetch
#[derive(Debug)]
pub struct FetchReport {
    /// Normalized payload, or the error of the last attempt
    pub outcome: Result<Value>,
    /// Number of attempts actually made
    pub attempts: usize,
}

/// Result of a connectivity probe
#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub status: u16,
    pub body: Option<Value>,
}

/// Upstream answer relayed unchanged by the pass-through route
#[derive(Debug, Clone)]
pub struct ForwardedResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Bytes,
}

impl ForwardedResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Client for the upstream JSON API
pub struct UpstreamClient {
    http_client: Client,
    retry_policy: RetryPolicy,
    request_timeout: Duration,
    passthrough_timeout: Duration,
}

impl UpstreamClient {
    /// Create a new UpstreamClient
    ///
    /// # Arguments
    /// * `config` - Upstream configuration (per-attempt timeout, user agent)
    /// * `retry` - Retry configuration, fixed for the lifetime of the client
    pub fn new(config: &UpstreamConfig, retry: &RetryConfig) -> Result<Self> {
        let request_timeout = Duration::from_millis(config.request_timeout_ms);
        let http_client = Client::builder()
            .timeout(request_timeout)
            .user_agent(config.user_agent.clone())
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| GatewayError::ConfigError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(UpstreamClient {
            http_client,
            retry_policy: RetryPolicy::from_config(retry),
            request_timeout,
            passthrough_timeout: Duration::from_millis(config.passthrough_timeout_ms),
        })
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Build an upstream URL from a base URL, path segments and query parameters
    ///
    /// Segments are percent-encoded; query parameters are sorted by name.
    pub fn build_url(
        base_url: &str,
        segments: &[String],
        params: &HashMap<String, String>,
    ) -> Result<Url> {
        let mut url = Url::parse(base_url)
            .map_err(|e| GatewayError::InvalidUrl(format!("{}: {}", base_url, e)))?;

        url.path_segments_mut()
            .map_err(|_| GatewayError::InvalidUrl(format!("{} cannot be a base", base_url)))?
            .pop_if_empty()
            .extend(segments);

        if !params.is_empty() {
            let mut pairs: Vec<(&String, &String)> = params.iter().collect();
            pairs.sort();
            url.query_pairs_mut().extend_pairs(pairs);
        }

        Ok(url)
    }

    /// Single attempt, no retry
    async fn try_fetch(&self, url: &Url, mode: EnvelopeMode) -> Result<Value> {
        let response = self
            .http_client
            .get(url.clone())
            .header(http::header::ACCEPT, "application/json")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = status.canonical_reason().unwrap_or("").to_string();
            return Err(GatewayError::from_http_status(status.as_u16(), message));
        }

        let body: Value = response.json().await?;
        normalize_envelope(body, mode)
    }

    /// Fetch and normalize a payload, retrying transient failures
    ///
    /// Non-transient failures (4xx, malformed payload) end the loop immediately.
    pub async fn fetch(&self, url: &Url, mode: EnvelopeMode) -> FetchReport {
        let mut attempt = 0;

        loop {
            match self.try_fetch(url, mode).await {
                Ok(payload) => {
                    return FetchReport {
                        outcome: Ok(payload),
                        attempts: attempt + 1,
                    }
                }
                Err(e) => {
                    if !self.retry_policy.should_retry(attempt, &e) {
                        return FetchReport {
                            outcome: Err(e),
                            attempts: attempt + 1,
                        };
                    }

                    let backoff = self.retry_policy.backoff_duration(attempt);
                    tracing::warn!(
                        "Upstream request to {} failed (attempt {}), retrying after {:?}: {}",
                        url,
                        attempt + 1,
                        backoff,
                        e
                    );
                    sleep(backoff).await;

                    attempt += 1;
                }
            }
        }
    }

    /// One-shot GET used by connectivity checks
    pub async fn probe(&self, url: &Url, timeout: Duration) -> Result<ProbeResult> {
        let response = self
            .http_client
            .get(url.clone())
            .header(http::header::ACCEPT, "application/json")
            .timeout(timeout)
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = response.json::<Value>().await.ok();
        Ok(ProbeResult { status, body })
    }

    /// Single GET relayed as is: no retry, no envelope check
    ///
    /// Any status is returned as a response; only transport failures are errors.
    pub async fn forward(&self, url: &Url, accept: &str) -> Result<ForwardedResponse> {
        let response = self
            .http_client
            .get(url.clone())
            .header(http::header::ACCEPT, accept)
            .timeout(self.passthrough_timeout)
            .send()
            .await?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(http::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await?;

        Ok(ForwardedResponse {
            status,
            content_type,
            body,
        })
    }
}

/// Append a request path and raw query to the base URL of the pass-through
///
/// Dot segments are rejected so a request cannot climb above the base path.
pub fn passthrough_url(base_url: &str, path: &str, query: Option<&str>) -> Result<Url> {
    let climbs = path.split('/').any(|segment| {
        matches!(
            segment.to_ascii_lowercase().as_str(),
            "." | ".." | "%2e" | "%2e%2e" | ".%2e" | "%2e."
        )
    });
    if climbs {
        return Err(GatewayError::InvalidUrl(format!(
            "dot segments are not allowed: {}",
            path
        )));
    }

    let mut url = Url::parse(&format!("{}{}", base_url.trim_end_matches('/'), path))
        .map_err(|e| GatewayError::InvalidUrl(format!("{}{}: {}", base_url, path, e)))?;
    url.set_query(query.filter(|q| !q.is_empty()));
    Ok(url)
}

/// Validate the `{ status: "Ok" }` envelope and extract the payload
pub fn normalize_envelope(body: Value, mode: EnvelopeMode) -> Result<Value> {
    if body.get("status").and_then(Value::as_str) != Some("Ok") {
        return Err(GatewayError::MalformedPayload(
            "Invalid API response format".to_string(),
        ));
    }

    match mode {
        EnvelopeMode::PassThrough => Ok(body),
        EnvelopeMode::Unwrap => match body {
            Value::Object(mut map) => map.remove("data").ok_or_else(|| {
                GatewayError::MalformedPayload("envelope has no data field".to_string())
            }),
            _ => Err(GatewayError::MalformedPayload(
                "envelope is not an object".to_string(),
            )),
        },
    }
}
