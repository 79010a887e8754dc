//! HTTP PURGE method handler for cache invalidation
//!
//! Supported forms:
//! - `PURGE /<pattern>` - drop entries whose key contains `<pattern>`
//! - `PURGE /` with `X-Purge-All: true` - flush the namespace
//!
//! The namespace defaults to `api` and is chosen with `X-Purge-Namespace`.
//! With `X-Purge-All: true` and no namespace header every namespace is flushed.

use crate::error::{GatewayError, Result};
use crate::purge_metrics::PurgeMetrics;
use crate::tiered_cache::{TieredCache, API_NAMESPACE};
use bytes::Bytes;
use http::{Method, Request, Response, StatusCode};
use http_body_util::Full;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

const NAMESPACE_HEADER: &str = "x-purge-namespace";
const PURGE_ALL_HEADER: &str = "x-purge-all";

/// PURGE request handler
pub struct PurgeHandler {
    cache: Arc<TieredCache>,
    /// Optional auth token; when set every request must present it
    auth_token: Option<String>,
    /// Prometheus metrics (optional)
    metrics: Option<Arc<PurgeMetrics>>,
}

/// PURGE response body
#[derive(Debug, Serialize, Deserialize)]
pub struct PurgeResponse {
    pub success: bool,
    pub purged_count: usize,
    pub namespace: Option<String>,
    pub pattern: Option<String>,
    pub message: String,
}

impl PurgeHandler {
    /// Create a new PURGE handler without authentication
    pub fn new(cache: Arc<TieredCache>) -> Self {
        Self {
            cache,
            auth_token: None,
            metrics: None,
        }
    }

    /// Create a new PURGE handler with authentication
    pub fn with_auth(cache: Arc<TieredCache>, auth_token: String) -> Self {
        Self {
            cache,
            auth_token: Some(auth_token),
            metrics: None,
        }
    }

    /// Enable Prometheus metrics
    pub fn with_metrics(mut self, metrics: Arc<PurgeMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn is_purge(method: &Method) -> bool {
        method.as_str() == "PURGE"
    }

    /// Handle an HTTP PURGE request
    pub async fn handle_purge<B>(&self, req: Request<B>) -> Result<Response<Full<Bytes>>> {
        let start_time = Instant::now();

        if !Self::is_purge(req.method()) {
            return self.error_response(
                StatusCode::METHOD_NOT_ALLOWED,
                "Only PURGE method is allowed",
            );
        }

        if let Err(reason) = self.check_auth(&req) {
            if let Some(metrics) = &self.metrics {
                metrics.record_auth_failure(reason);
            }
            return self.error_response(
                StatusCode::UNAUTHORIZED,
                "Invalid or missing authentication token",
            );
        }

        let namespace_header = req
            .headers()
            .get(NAMESPACE_HEADER)
            .and_then(|h| h.to_str().ok())
            .map(str::to_string);

        let purge_all = req
            .headers()
            .get(PURGE_ALL_HEADER)
            .and_then(|h| h.to_str().ok())
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        let pattern = req.uri().path().trim_start_matches('/').to_string();

        let purge_method = match (purge_all, &namespace_header) {
            (true, None) => "all",
            (true, Some(_)) => "namespace",
            (false, _) => "pattern",
        };

        if let Some(metrics) = &self.metrics {
            metrics.record_request(purge_method);
        }

        let namespace = namespace_header.unwrap_or_else(|| API_NAMESPACE.to_string());
        if purge_method != "all" && !self.cache.has_namespace(&namespace) {
            self.record_outcome(purge_method, false, 0, start_time);
            return self.error_response(
                StatusCode::NOT_FOUND,
                &format!("Unknown cache namespace: {}", namespace),
            );
        }

        let response = match purge_method {
            "all" => {
                let mut names: Vec<String> = self
                    .cache
                    .namespace_names()
                    .into_iter()
                    .map(str::to_string)
                    .collect();
                names.sort();
                let count: usize = names.iter().map(|name| self.cache.flush(name)).sum();
                info!("Purged all {} cache entries", count);
                PurgeResponse {
                    success: true,
                    purged_count: count,
                    namespace: None,
                    pattern: None,
                    message: format!("Successfully purged all {} cache entries", count),
                }
            }
            "namespace" => {
                let count = self.cache.flush(&namespace);
                PurgeResponse {
                    success: true,
                    purged_count: count,
                    message: format!("Successfully purged {} entries from {}", count, namespace),
                    namespace: Some(namespace),
                    pattern: None,
                }
            }
            _ => {
                if pattern.is_empty() || pattern == "*" {
                    self.record_outcome(purge_method, false, 0, start_time);
                    return self.error_response(
                        StatusCode::BAD_REQUEST,
                        "A pattern is required unless X-Purge-All is set",
                    );
                }
                let count = self.cache.invalidate_pattern(&namespace, &pattern);
                let message = if count > 0 {
                    format!("Successfully purged {} cache entries matching {}", count, pattern)
                } else {
                    format!("No cache entries found matching {}", pattern)
                };
                PurgeResponse {
                    success: true,
                    purged_count: count,
                    namespace: Some(namespace),
                    pattern: Some(pattern),
                    message,
                }
            }
        };

        self.record_outcome(purge_method, true, response.purged_count, start_time);
        self.json_response(StatusCode::OK, &response)
    }

    fn record_outcome(&self, method: &str, success: bool, count: usize, start_time: Instant) {
        if let Some(metrics) = &self.metrics {
            metrics.record_result(method, success);
            metrics.record_purged_items(method, count);
            metrics.record_duration(method, start_time.elapsed().as_secs_f64());
        }
    }

    /// Check authentication, returning the failure reason
    fn check_auth<B>(&self, req: &Request<B>) -> std::result::Result<(), &'static str> {
        let Some(expected_token) = &self.auth_token else {
            return Ok(());
        };

        let presented = req
            .headers()
            .get(http::header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .map(|auth| auth.strip_prefix("Bearer ").unwrap_or(auth))
            .or_else(|| {
                req.headers()
                    .get("x-purge-token")
                    .and_then(|h| h.to_str().ok())
            });

        match presented {
            None => {
                warn!("Purge request without token rejected");
                Err("missing_token")
            }
            Some(token) if token == expected_token => Ok(()),
            Some(_) => {
                warn!("Purge request with invalid token rejected");
                Err("invalid_token")
            }
        }
    }

    fn json_response(
        &self,
        status: StatusCode,
        body: &PurgeResponse,
    ) -> Result<Response<Full<Bytes>>> {
        let json = serde_json::to_string(body).map_err(|e| {
            GatewayError::InternalError(format!("Failed to serialize response: {}", e))
        })?;

        Response::builder()
            .status(status)
            .header("content-type", "application/json")
            .header("cache-control", "no-cache, no-store, must-revalidate")
            .body(Full::new(Bytes::from(json)))
            .map_err(|e| GatewayError::InternalError(format!("Failed to build response: {}", e)))
    }

    fn error_response(&self, status: StatusCode, message: &str) -> Result<Response<Full<Bytes>>> {
        let response = PurgeResponse {
            success: false,
            purged_count: 0,
            namespace: None,
            pattern: None,
            message: message.to_string(),
        };

        self.json_response(status, &response)
    }
}
