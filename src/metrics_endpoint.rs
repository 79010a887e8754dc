//! Prometheus text rendering of the service counters
//!
//! Served at `/metrics` by the HTTP server, followed by the purge registry.

use crate::circuit_breaker::{BreakerSnapshot, CircuitState};
use crate::metrics::MetricsSnapshot;
use crate::tiered_cache::CacheStats;
use std::fmt::Write;

/// Content type of the Prometheus text exposition format
pub const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

fn push_metric(output: &mut String, name: &str, help: &str, kind: &str, value: impl std::fmt::Display) {
    let _ = writeln!(output, "# HELP {} {}", name, help);
    let _ = writeln!(output, "# TYPE {} {}", name, kind);
    let _ = writeln!(output, "{} {}", name, value);
    output.push('\n');
}

/// Format metrics in Prometheus exposition format
///
/// Each metric carries a HELP line describing it and a TYPE line.
pub fn format_prometheus_metrics(
    snapshot: &MetricsSnapshot,
    cache: &CacheStats,
    breaker: &BreakerSnapshot,
) -> String {
    let mut output = String::new();

    // Gateway
    push_metric(
        &mut output,
        "content_gateway_requests_total",
        "Total number of gateway fetches",
        "counter",
        snapshot.gateway_requests,
    );
    push_metric(
        &mut output,
        "content_gateway_cache_hits_total",
        "Gateway fetches answered from cache",
        "counter",
        snapshot.cache_hits,
    );
    push_metric(
        &mut output,
        "content_gateway_cache_misses_total",
        "Gateway fetches that missed the cache",
        "counter",
        snapshot.cache_misses,
    );
    push_metric(
        &mut output,
        "content_gateway_cache_hit_rate",
        "Gateway cache hit rate percentage",
        "gauge",
        format!("{:.2}", snapshot.cache_hit_rate()),
    );
    push_metric(
        &mut output,
        "content_gateway_live_responses_total",
        "Gateway fetches answered by a live upstream call",
        "counter",
        snapshot.live_responses,
    );
    push_metric(
        &mut output,
        "content_gateway_snapshot_responses_total",
        "Gateway fetches answered from a static snapshot",
        "counter",
        snapshot.snapshot_responses,
    );
    push_metric(
        &mut output,
        "content_gateway_unavailable_responses_total",
        "Gateway fetches with no data available",
        "counter",
        snapshot.unavailable_responses,
    );

    // Upstream
    push_metric(
        &mut output,
        "content_gateway_upstream_attempts_total",
        "Upstream API attempts including retries",
        "counter",
        snapshot.upstream_attempts,
    );
    push_metric(
        &mut output,
        "content_gateway_upstream_retries_total",
        "Upstream API retries",
        "counter",
        snapshot.upstream_retries,
    );
    push_metric(
        &mut output,
        "content_gateway_upstream_failures_total",
        "Upstream API calls that failed after all attempts",
        "counter",
        snapshot.upstream_failures,
    );
    push_metric(
        &mut output,
        "content_gateway_upstream_duration_ms_avg",
        "Average duration of an upstream API call in milliseconds",
        "gauge",
        format!("{:.2}", snapshot.avg_upstream_duration_ms()),
    );
    push_metric(
        &mut output,
        "content_gateway_circuit_rejections_total",
        "Fetches rejected by the open circuit breaker",
        "counter",
        snapshot.circuit_rejections,
    );
    push_metric(
        &mut output,
        "content_gateway_circuit_open",
        "1 when the circuit breaker is open",
        "gauge",
        u8::from(breaker.state == CircuitState::Open),
    );
    push_metric(
        &mut output,
        "content_gateway_circuit_consecutive_failures",
        "Consecutive upstream failures seen by the circuit breaker",
        "gauge",
        breaker.consecutive_failures,
    );

    // Cache entries
    let _ = writeln!(
        output,
        "# HELP content_gateway_cache_entries Live entries per cache namespace"
    );
    let _ = writeln!(output, "# TYPE content_gateway_cache_entries gauge");
    for ns in &cache.namespaces {
        let _ = writeln!(
            output,
            "content_gateway_cache_entries{{namespace=\"{}\"}} {}",
            ns.name, ns.keys
        );
    }
    output.push('\n');

    // Streaming
    push_metric(
        &mut output,
        "content_gateway_stream_requests_total",
        "Streaming requests received",
        "counter",
        snapshot.stream_requests,
    );
    push_metric(
        &mut output,
        "content_gateway_stream_resolution_failures_total",
        "Streaming requests whose video source could not be found",
        "counter",
        snapshot.resolution_failures,
    );
    push_metric(
        &mut output,
        "content_gateway_stream_errors_total",
        "Media host failures before the response started",
        "counter",
        snapshot.stream_errors,
    );
    push_metric(
        &mut output,
        "content_gateway_stream_bytes_total",
        "Media bytes relayed to clients",
        "counter",
        snapshot.bytes_relayed,
    );
    push_metric(
        &mut output,
        "content_gateway_stream_client_disconnects_total",
        "Streams aborted because the client went away",
        "counter",
        snapshot.client_disconnects,
    );

    output
}
