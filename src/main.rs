//! Content Gateway Server
//!
//! Loads configuration, sets up logging, wires the gateway and the streaming
//! proxy together and serves them over HTTP.

use anyhow::Context;
use content_gateway::{
    ConfigStore, EmbedPageResolver, Gateway, GatewayConfig, GatewayMetrics, GatewayServer,
    InMemoryConfigStore, MediaStreamer, PurgeHandler, PurgeMetrics, StreamingProxy, TieredCache,
};
use std::env;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Main entry point for the content gateway
///
/// # Usage
/// ```bash
/// # Start with default config (gateway.yaml)
/// cargo run
///
/// # Start with custom config
/// cargo run -- /path/to/config.yaml
/// ```
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    info!("Starting Content Gateway");

    let config_path = env::args()
        .nth(1)
        .unwrap_or_else(|| "gateway.yaml".to_string());

    info!("Loading configuration from: {}", config_path);

    let config = match GatewayConfig::from_file(&config_path) {
        Ok(cfg) => {
            info!("Configuration loaded successfully");
            info!("  - Environment: {:?}", cfg.environment);
            info!("  - Default upstream: {}", cfg.upstream.default_url);
            if let Some(url) = &cfg.upstream.override_url {
                info!("  - Upstream override: {}", url);
            }
            info!(
                "  - Retry: {} attempts, {}ms base backoff",
                cfg.retry.max_attempts, cfg.retry.backoff_base_ms
            );
            info!(
                "  - Breaker: opens after {} failures for {}s",
                cfg.breaker.failure_threshold, cfg.breaker.open_duration_secs
            );
            info!("  - Snapshot directory: {}", cfg.snapshot_dir);
            cfg
        }
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            error!("Please ensure the configuration file exists and is valid");
            std::process::exit(1);
        }
    };

    let cache = Arc::new(TieredCache::new(config.namespace_policies()));
    for ns in cache.stats().namespaces {
        info!(
            "  - Cache namespace {}: ttl {}s, max {} entries",
            ns.name, ns.ttl_secs, ns.max_entries
        );
    }
    let _sweeper = cache.spawn_sweeper(config.sweep_interval());

    let metrics = Arc::new(GatewayMetrics::new());
    let store: Arc<dyn ConfigStore> = Arc::new(InMemoryConfigStore::new());

    let gateway = Arc::new(
        Gateway::from_config(&config, Arc::clone(&cache), Some(store), Arc::clone(&metrics))
            .context("failed to build upstream gateway")?,
    );

    let resolver = EmbedPageResolver::new(&config.stream).context("failed to build stream resolver")?;
    let streamer = MediaStreamer::new(&config.stream, Arc::clone(&metrics))
        .context("failed to build media streamer")?;
    let streaming = StreamingProxy::new(Arc::new(resolver), streamer, Arc::clone(&metrics));

    let mut server = GatewayServer::new(Arc::clone(&gateway), streaming);

    match &config.purge {
        Some(purge) if purge.enabled => {
            let handler = match &purge.auth_token {
                Some(token) => PurgeHandler::with_auth(Arc::clone(&cache), token.clone()),
                None => {
                    warn!("Cache purge enabled without authentication");
                    PurgeHandler::new(Arc::clone(&cache))
                }
            };
            let purge_metrics =
                Arc::new(PurgeMetrics::new().context("failed to register purge metrics")?);
            server = server.with_purge(handler, purge_metrics);
            info!("Cache purge enabled");
        }
        _ => info!("Cache purge disabled"),
    }

    let report = gateway.check_connectivity().await;
    if report.ok {
        info!(
            "Upstream {} reachable via {}",
            report.base_url, report.tested_endpoint
        );
    } else {
        warn!(
            "Upstream {} not reachable ({}), serving from cache and snapshots until it recovers",
            report.base_url,
            report.error.as_deref().unwrap_or("unexpected response")
        );
    }

    let addr: SocketAddr = config
        .listen_address
        .parse()
        .with_context(|| format!("invalid listen address {}", config.listen_address))?;

    server.run(addr).await?;
    Ok(())
}
