//! Metrics collection for the gateway and the streaming proxy
//!
//! Thread-safe counters built on atomic operations. They track gateway
//! requests and where their payloads came from, upstream attempts, and
//! streaming traffic.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Metrics collector shared by every component of the service
#[derive(Debug, Default)]
pub struct GatewayMetrics {
    // Gateway requests by payload source
    gateway_requests: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    live_responses: AtomicU64,
    snapshot_responses: AtomicU64,
    unavailable_responses: AtomicU64,

    // Upstream API calls
    upstream_attempts: AtomicU64,
    upstream_retries: AtomicU64,
    upstream_failures: AtomicU64,
    circuit_rejections: AtomicU64,

    // Streaming
    stream_requests: AtomicU64,
    resolution_failures: AtomicU64,
    stream_errors: AtomicU64,
    bytes_relayed: AtomicU64,
    client_disconnects: AtomicU64,

    // Latency (stored as microseconds)
    total_upstream_duration_us: AtomicU64,
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub gateway_requests: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub live_responses: u64,
    pub snapshot_responses: u64,
    pub unavailable_responses: u64,

    pub upstream_attempts: u64,
    pub upstream_retries: u64,
    pub upstream_failures: u64,
    pub circuit_rejections: u64,

    pub stream_requests: u64,
    pub resolution_failures: u64,
    pub stream_errors: u64,
    pub bytes_relayed: u64,
    pub client_disconnects: u64,

    pub total_upstream_duration_us: u64,
}

impl GatewayMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an incoming gateway fetch
    pub fn record_request(&self) {
        self.gateway_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a live upstream call that took `attempts` attempts
    ///
    /// # Arguments
    /// * `attempts` - Number of attempts made, including the first one
    /// * `success` - Whether the last attempt succeeded
    /// * `duration` - Wall time spent, backoff delays included
    pub fn record_upstream_call(&self, attempts: usize, success: bool, duration: Duration) {
        let attempts = attempts as u64;
        self.upstream_attempts.fetch_add(attempts, Ordering::Relaxed);
        self.upstream_retries
            .fetch_add(attempts.saturating_sub(1), Ordering::Relaxed);
        if success {
            self.live_responses.fetch_add(1, Ordering::Relaxed);
        } else {
            self.upstream_failures.fetch_add(1, Ordering::Relaxed);
        }
        self.total_upstream_duration_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn record_circuit_rejection(&self) {
        self.circuit_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_snapshot_response(&self) {
        self.snapshot_responses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unavailable_response(&self) {
        self.unavailable_responses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stream_request(&self) {
        self.stream_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_resolution_failure(&self) {
        self.resolution_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a media host failure before any byte reached the client
    pub fn record_stream_error(&self) {
        self.stream_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_bytes_relayed(&self, bytes: u64) {
        self.bytes_relayed.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_client_disconnect(&self) {
        self.client_disconnects.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot of current metrics
    ///
    /// Fields are loaded one by one, so a snapshot taken under load may be
    /// slightly inconsistent across fields.
    pub fn get_stats(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            gateway_requests: self.gateway_requests.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            live_responses: self.live_responses.load(Ordering::Relaxed),
            snapshot_responses: self.snapshot_responses.load(Ordering::Relaxed),
            unavailable_responses: self.unavailable_responses.load(Ordering::Relaxed),
            upstream_attempts: self.upstream_attempts.load(Ordering::Relaxed),
            upstream_retries: self.upstream_retries.load(Ordering::Relaxed),
            upstream_failures: self.upstream_failures.load(Ordering::Relaxed),
            circuit_rejections: self.circuit_rejections.load(Ordering::Relaxed),
            stream_requests: self.stream_requests.load(Ordering::Relaxed),
            resolution_failures: self.resolution_failures.load(Ordering::Relaxed),
            stream_errors: self.stream_errors.load(Ordering::Relaxed),
            bytes_relayed: self.bytes_relayed.load(Ordering::Relaxed),
            client_disconnects: self.client_disconnects.load(Ordering::Relaxed),
            total_upstream_duration_us: self.total_upstream_duration_us.load(Ordering::Relaxed),
        }
    }
}

impl MetricsSnapshot {
    /// Cache hit rate as a percentage (0.0 to 100.0)
    pub fn cache_hit_rate(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            0.0
        } else {
            (self.cache_hits as f64 / total as f64) * 100.0
        }
    }

    /// Average duration of a live upstream call in milliseconds
    pub fn avg_upstream_duration_ms(&self) -> f64 {
        let calls = self.live_responses + self.upstream_failures;
        if calls == 0 {
            0.0
        } else {
            (self.total_upstream_duration_us as f64 / calls as f64) / 1000.0
        }
    }

    /// Share of live upstream calls that ended in failure, as a percentage
    pub fn upstream_failure_rate(&self) -> f64 {
        let calls = self.live_responses + self.upstream_failures;
        if calls == 0 {
            0.0
        } else {
            (self.upstream_failures as f64 / calls as f64) * 100.0
        }
    }
}
