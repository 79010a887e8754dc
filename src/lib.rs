//! Content Gateway
//!
//! A resilient HTTP gateway in front of an unreliable content API, plus a
//! byte-range media streaming proxy.
//!
//! # Overview
//!
//! Requests for logical API endpoints are answered by the first source that
//! works: the namespaced in-memory cache, a live upstream call (guarded by a
//! circuit breaker and retried with exponential backoff), or a static JSON
//! snapshot on disk. When nothing works the caller gets an explicit
//! "unavailable" answer instead of an error.
//!
//! Streaming requests carry either an embed page URL or a token. The embed page
//! is scanned for its video configuration, and the media host's bytes are then
//! relayed to the client with the client's `Range` header forwarded as-is.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use content_gateway::{Gateway, GatewayConfig, GatewayMetrics, LogicalEndpoint, TieredCache};
//! use std::collections::HashMap;
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = GatewayConfig::from_file("gateway.yaml")?;
//! let cache = Arc::new(TieredCache::new(config.namespace_policies()));
//! let gateway = Gateway::from_config(&config, cache, None, Arc::new(GatewayMetrics::new()))?;
//!
//! let response = gateway.fetch(LogicalEndpoint::Home, &HashMap::new()).await;
//! println!("home answered from {}", response.source());
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - [`TieredCache`]: namespaced TTL cache with bounded size
//! - [`UpstreamResolver`]: picks the upstream base URL (override, config store, default)
//! - [`CircuitBreaker`]: closed / open / half-open guard around live calls
//! - [`UpstreamClient`]: retrying JSON client with envelope normalization
//! - [`Gateway`]: cache, breaker, client and snapshot fallback composed
//! - [`StreamResolver`] / [`EmbedPageResolver`]: stream reference to media URL
//! - [`StreamingProxy`]: Range-forwarding media relay, also for direct download ids
//! - [`GatewayServer`]: hyper HTTP/1 front end, including the raw `/v1/*` pass-through
//!
//! # Configuration
//!
//! ```yaml
//! listen_address: "0.0.0.0:3001"
//! environment: production
//! upstream:
//!   default_url: "https://api.example.com/v1"
//!   fallback_file: "endpoint.json"
//!   request_timeout_ms: 5000
//! retry:
//!   max_attempts: 3
//!   backoff_base_ms: 300
//! breaker:
//!   failure_threshold: 3
//!   open_duration_secs: 30
//! cache:
//!   namespaces:
//!     api: { ttl_secs: 600, max_entries: 1000 }
//! snapshot_dir: "apiResponse"
//! purge:
//!   enabled: true
//!   auth_token: "secret"
//! ```

pub mod circuit_breaker;
pub mod config;
pub mod endpoints;
pub mod error;
pub mod gateway;
pub mod metrics;
pub mod metrics_endpoint;
pub mod models;
pub mod purge_handler;
pub mod purge_metrics;
pub mod server;
pub mod snapshot;
pub mod stream_resolver;
pub mod streaming_proxy;
pub mod tiered_cache;
pub mod upstream_client;
pub mod upstream_resolver;

pub use circuit_breaker::{BreakerSnapshot, CircuitBreaker, CircuitState};
pub use config::{
    BreakerConfig, CacheConfig, Environment, GatewayConfig, NamespacePolicy, PurgeConfig,
    RetryConfig, StreamConfig, TtlConfig, UpstreamConfig,
};
pub use endpoints::{EnvelopeMode, LogicalEndpoint, TtlClass};
pub use error::{GatewayError, Result};
pub use gateway::{ConnectivityReport, Gateway, GatewayResponse};
pub use metrics::{GatewayMetrics, MetricsSnapshot};
pub use models::{ContentRange, EndpointSource, StreamReference, StreamTarget, UpstreamEndpoint};
pub use purge_handler::{PurgeHandler, PurgeResponse};
pub use purge_metrics::PurgeMetrics;
pub use server::{GatewayServer, HealthStatus};
pub use snapshot::SnapshotStore;
pub use stream_resolver::{EmbedPageResolver, StreamResolver};
pub use streaming_proxy::{MediaStreamer, ResponseBody, StreamingProxy};
pub use tiered_cache::{CacheStats, NamespaceStats, TieredCache};
pub use upstream_client::{ForwardedResponse, RetryPolicy, UpstreamClient};
pub use upstream_resolver::{ConfigStore, InMemoryConfigStore, UpstreamResolver};
