//! Prometheus counters for the PURGE endpoint
//!
//! Every instance owns its registry, so several gateways (or tests) can
//! coexist in one process without name clashes.

use prometheus::core::Collector;
use prometheus::{CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder};

/// Purge method label values: `pattern`, `namespace`, `all`
const METHOD_LABEL: &str = "method";

fn register<C>(registry: &Registry, collector: C) -> Result<C, prometheus::Error>
where
    C: Collector + Clone + 'static,
{
    registry.register(Box::new(collector.clone()))?;
    Ok(collector)
}

/// Counters and latency histogram of cache purges
#[derive(Clone)]
pub struct PurgeMetrics {
    registry: Registry,
    requests: CounterVec,
    results: CounterVec,
    purged_items: CounterVec,
    duration: HistogramVec,
    auth_failures: CounterVec,
}

impl PurgeMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        Self::with_registry(Registry::new())
    }

    /// Register the purge collectors in an existing registry
    pub fn with_registry(registry: Registry) -> Result<Self, prometheus::Error> {
        let requests = register(
            &registry,
            CounterVec::new(
                Opts::new(
                    "content_gateway_purge_requests_total",
                    "PURGE requests received, by purge method",
                ),
                &[METHOD_LABEL],
            )?,
        )?;

        let results = register(
            &registry,
            CounterVec::new(
                Opts::new(
                    "content_gateway_purge_results_total",
                    "Completed PURGE requests, by purge method and outcome",
                ),
                &[METHOD_LABEL, "result"],
            )?,
        )?;

        let purged_items = register(
            &registry,
            CounterVec::new(
                Opts::new(
                    "content_gateway_purge_items_total",
                    "Cache entries removed by PURGE requests",
                ),
                &[METHOD_LABEL],
            )?,
        )?;

        let duration = register(
            &registry,
            HistogramVec::new(
                HistogramOpts::new(
                    "content_gateway_purge_duration_seconds",
                    "Time spent executing a PURGE request",
                )
                .buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1]),
                &[METHOD_LABEL],
            )?,
        )?;

        // reason: missing_token, invalid_token
        let auth_failures = register(
            &registry,
            CounterVec::new(
                Opts::new(
                    "content_gateway_purge_auth_failures_total",
                    "PURGE requests rejected for authentication",
                ),
                &["reason"],
            )?,
        )?;

        Ok(PurgeMetrics {
            registry,
            requests,
            results,
            purged_items,
            duration,
            auth_failures,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_request(&self, method: &str) {
        self.requests.with_label_values(&[method]).inc();
    }

    pub fn record_result(&self, method: &str, success: bool) {
        let outcome = if success { "success" } else { "failure" };
        self.results.with_label_values(&[method, outcome]).inc();
    }

    pub fn record_purged_items(&self, method: &str, count: usize) {
        self.purged_items
            .with_label_values(&[method])
            .inc_by(count as f64);
    }

    pub fn record_duration(&self, method: &str, duration_secs: f64) {
        self.duration
            .with_label_values(&[method])
            .observe(duration_secs);
    }

    pub fn record_auth_failure(&self, reason: &str) {
        self.auth_failures.with_label_values(&[reason]).inc();
    }

    /// Render the registry in Prometheus text format
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
