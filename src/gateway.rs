//! Resilient upstream gateway
//!
//! `fetch` never fails. Its payload comes from the first of these that succeeds:
//! cache, live upstream call (guarded by the circuit breaker and retried with
//! backoff), static snapshot. When all of them fail it returns
//! [`GatewayResponse::Unavailable`].

use crate::circuit_breaker::CircuitBreaker;
use crate::config::{GatewayConfig, TtlConfig};
use crate::endpoints::LogicalEndpoint;
use crate::error::Result;
use crate::metrics::GatewayMetrics;
use crate::snapshot::SnapshotStore;
use crate::tiered_cache::{generate_api_key, TieredCache, API_NAMESPACE};
use crate::upstream_client::{passthrough_url, ForwardedResponse, UpstreamClient};
use crate::upstream_resolver::{ConfigStore, UpstreamResolver};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const HEALTH_PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const HOME_PROBE_TIMEOUT: Duration = Duration::from_secs(7);

/// Payload returned by [`Gateway::fetch`], tagged with where it came from
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayResponse {
    Live(Value),
    Cached(Value),
    Snapshot(Value),
    Unavailable,
}

impl GatewayResponse {
    pub fn source(&self) -> &'static str {
        match self {
            GatewayResponse::Live(_) => "live",
            GatewayResponse::Cached(_) => "cache",
            GatewayResponse::Snapshot(_) => "snapshot",
            GatewayResponse::Unavailable => "unavailable",
        }
    }

    pub fn payload(&self) -> Option<&Value> {
        match self {
            GatewayResponse::Live(value)
            | GatewayResponse::Cached(value)
            | GatewayResponse::Snapshot(value) => Some(value),
            GatewayResponse::Unavailable => None,
        }
    }

    pub fn into_payload(self) -> Option<Value> {
        match self {
            GatewayResponse::Live(value)
            | GatewayResponse::Cached(value)
            | GatewayResponse::Snapshot(value) => Some(value),
            GatewayResponse::Unavailable => None,
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, GatewayResponse::Unavailable)
    }
}

/// Result of probing the upstream API
#[derive(Debug, Clone, Serialize)]
pub struct ConnectivityReport {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    pub base_url: String,
    pub tested_endpoint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Orchestrates cache, circuit breaker, retrying client and snapshots
pub struct Gateway {
    cache: Arc<TieredCache>,
    breaker: Arc<CircuitBreaker>,
    resolver: UpstreamResolver,
    client: UpstreamClient,
    snapshots: SnapshotStore,
    ttl: TtlConfig,
    metrics: Arc<GatewayMetrics>,
}

impl Gateway {
    pub fn new(
        cache: Arc<TieredCache>,
        breaker: Arc<CircuitBreaker>,
        resolver: UpstreamResolver,
        client: UpstreamClient,
        snapshots: SnapshotStore,
        ttl: TtlConfig,
        metrics: Arc<GatewayMetrics>,
    ) -> Self {
        Gateway {
            cache,
            breaker,
            resolver,
            client,
            snapshots,
            ttl,
            metrics,
        }
    }

    /// Compose a gateway from configuration
    ///
    /// # Returns
    /// * `Err(GatewayError)` if the HTTP client cannot be built
    pub fn from_config(
        config: &GatewayConfig,
        cache: Arc<TieredCache>,
        store: Option<Arc<dyn ConfigStore>>,
        metrics: Arc<GatewayMetrics>,
    ) -> Result<Self> {
        Ok(Gateway::new(
            cache,
            Arc::new(CircuitBreaker::from_config(&config.breaker)),
            UpstreamResolver::new(&config.upstream, store),
            UpstreamClient::new(&config.upstream, &config.retry)?,
            SnapshotStore::new(&config.snapshot_dir),
            config.ttl,
            metrics,
        ))
    }

    pub fn cache(&self) -> &Arc<TieredCache> {
        &self.cache
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn metrics(&self) -> &Arc<GatewayMetrics> {
        &self.metrics
    }

    pub fn resolver(&self) -> &UpstreamResolver {
        &self.resolver
    }

    /// Cache key of a request; independent of parameter insertion order
    pub fn cache_key(endpoint: LogicalEndpoint, params: &HashMap<String, String>) -> String {
        generate_api_key(endpoint.name(), params)
    }

    /// Fetch the normalized payload of a logical endpoint
    pub async fn fetch(
        &self,
        endpoint: LogicalEndpoint,
        params: &HashMap<String, String>,
    ) -> GatewayResponse {
        self.metrics.record_request();
        let key = Self::cache_key(endpoint, params);

        if let Some(value) = self.cache.get(API_NAMESPACE, &key) {
            debug!("Cache hit for {}", key);
            self.metrics.record_cache_hit();
            return GatewayResponse::Cached(value);
        }
        self.metrics.record_cache_miss();

        if !self.breaker.allow_request() {
            info!("Circuit breaker is open for {}, using snapshot", endpoint);
            self.metrics.record_circuit_rejection();
            return self.fallback(endpoint).await;
        }

        let segments = match endpoint.path_segments(params) {
            Ok(segments) => segments,
            Err(e) => {
                warn!("Cannot build upstream request for {}: {}", endpoint, e);
                return self.fallback(endpoint).await;
            }
        };

        let base_url = self.resolver.resolve_base_url().await;
        let url = match UpstreamClient::build_url(&base_url, &segments, params) {
            Ok(url) => url,
            Err(e) => {
                warn!("Cannot build upstream URL for {}: {}", endpoint, e);
                return self.fallback(endpoint).await;
            }
        };

        info!("Making API request to {}", url);
        let start = Instant::now();
        let report = self.client.fetch(&url, endpoint.envelope()).await;
        self.metrics
            .record_upstream_call(report.attempts, report.outcome.is_ok(), start.elapsed());

        match report.outcome {
            Ok(payload) => {
                self.breaker.record_success();
                let ttl = endpoint.ttl_class().duration(&self.ttl);
                self.cache
                    .set(API_NAMESPACE, &key, payload.clone(), Some(ttl));
                GatewayResponse::Live(payload)
            }
            Err(e) => {
                warn!(
                    "API request failed for {} after {} attempts: {}",
                    endpoint, report.attempts, e
                );
                self.breaker.record_failure();
                self.fallback(endpoint).await
            }
        }
    }

    async fn fallback(&self, endpoint: LogicalEndpoint) -> GatewayResponse {
        match self.snapshots.load(endpoint).await {
            Some(payload) => {
                self.metrics.record_snapshot_response();
                GatewayResponse::Snapshot(payload)
            }
            None => {
                warn!("No snapshot available for {}", endpoint);
                self.metrics.record_unavailable_response();
                GatewayResponse::Unavailable
            }
        }
    }

    /// Drop cached api entries whose key contains `pattern`
    pub fn invalidate(&self, pattern: &str) -> usize {
        self.cache.invalidate_pattern(API_NAMESPACE, pattern)
    }

    /// Relay `GET {base}{path}?{query}` to the resolved upstream as is
    ///
    /// Skips the cache, the breaker and the retry loop.
    pub async fn passthrough(
        &self,
        path: &str,
        query: Option<&str>,
        accept: &str,
    ) -> Result<ForwardedResponse> {
        let base_url = self.resolver.resolve_base_url().await;
        let url = passthrough_url(&base_url, path, query)?;
        debug!("Proxying {}", url);
        self.client.forward(&url, accept).await
    }

    /// Probe the upstream: `/health` first, then `/home`
    ///
    /// Bypasses the cache and the circuit breaker.
    pub async fn check_connectivity(&self) -> ConnectivityReport {
        let base_url = self.resolver.resolve_base_url().await;
        let no_params = HashMap::new();

        let health_url = UpstreamClient::build_url(&base_url, &["health".to_string()], &no_params);
        let home_url = UpstreamClient::build_url(&base_url, &["home".to_string()], &no_params);
        let (health_url, home_url) = match (health_url, home_url) {
            (Ok(health), Ok(home)) => (health, home),
            (Err(e), _) | (_, Err(e)) => {
                return ConnectivityReport {
                    ok: false,
                    status: None,
                    base_url,
                    tested_endpoint: "unresolved".to_string(),
                    error: Some(e.to_string()),
                }
            }
        };

        match self.client.probe(&health_url, HEALTH_PROBE_TIMEOUT).await {
            Ok(probe) if (200..300).contains(&probe.status) => {
                return ConnectivityReport {
                    ok: true,
                    status: Some(probe.status),
                    base_url,
                    tested_endpoint: "/health".to_string(),
                    error: None,
                };
            }
            Ok(probe) => debug!("Health probe returned {}, trying /home", probe.status),
            Err(e) => debug!("Health probe failed, trying /home: {}", e),
        }

        match self.client.probe(&home_url, HOME_PROBE_TIMEOUT).await {
            Ok(probe) => ConnectivityReport {
                ok: (200..300).contains(&probe.status)
                    && probe.body.as_ref().is_some_and(|body| !body.is_null()),
                status: Some(probe.status),
                base_url,
                tested_endpoint: "/home".to_string(),
                error: None,
            },
            Err(e) => ConnectivityReport {
                ok: false,
                status: None,
                base_url,
                tested_endpoint: "/health then /home".to_string(),
                error: Some(e.to_string()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_response_source_and_payload() {
        let live = GatewayResponse::Live(json!({"a": 1}));
        assert_eq!(live.source(), "live");
        assert_eq!(live.payload(), Some(&json!({"a": 1})));

        assert_eq!(GatewayResponse::Cached(json!(1)).source(), "cache");
        assert_eq!(GatewayResponse::Snapshot(json!(1)).source(), "snapshot");

        let unavailable = GatewayResponse::Unavailable;
        assert_eq!(unavailable.source(), "unavailable");
        assert!(unavailable.is_unavailable());
        assert_eq!(unavailable.into_payload(), None);
    }

    #[test]
    fn test_cache_key_ignores_insertion_order() {
        let mut first = HashMap::new();
        first.insert("keyword".to_string(), "naruto".to_string());
        first.insert("page".to_string(), "1".to_string());

        let mut second = HashMap::new();
        second.insert("page".to_string(), "1".to_string());
        second.insert("keyword".to_string(), "naruto".to_string());

        let key = Gateway::cache_key(LogicalEndpoint::Search, &first);
        assert_eq!(key, Gateway::cache_key(LogicalEndpoint::Search, &second));
        assert_eq!(key, "api:search:keyword=naruto&page=1");
    }
}
