//! Circuit breaker guarding upstream API calls
//!
//! ```text
//! Closed ──(consecutive failures ≥ threshold)──▶ Open
//! Open ──(open duration elapsed, checked lazily on allow_request)──▶ HalfOpen
//! HalfOpen ──(success)──▶ Closed
//! HalfOpen ──(failure)──▶ Open
//! ```
//!
//! Concurrent callers may both observe HalfOpen and both probe the upstream; a
//! failed probe simply reopens the circuit.

use crate::config::BreakerConfig;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

/// Breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure_at: Option<Instant>,
}

/// Point-in-time view of the breaker, used by stats and health endpoints
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub failure_threshold: u32,
    pub open_duration_secs: u64,
    /// Seconds since the last recorded failure
    pub last_failure_secs_ago: Option<u64>,
    pub total_successes: u64,
    pub total_failures: u64,
    pub rejected_requests: u64,
}

/// Three-state failure tracker
pub struct CircuitBreaker {
    inner: Mutex<BreakerInner>,
    failure_threshold: u32,
    open_duration: Duration,
    total_successes: AtomicU64,
    total_failures: AtomicU64,
    rejected_requests: AtomicU64,
}

impl CircuitBreaker {
    /// Create a closed breaker
    pub fn new(failure_threshold: u32, open_duration: Duration) -> Self {
        CircuitBreaker {
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                last_failure_at: None,
            }),
            failure_threshold,
            open_duration,
            total_successes: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
            rejected_requests: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &BreakerConfig) -> Self {
        Self::new(
            config.failure_threshold,
            Duration::from_secs(config.open_duration_secs),
        )
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether a live upstream call may be made now
    ///
    /// An open circuit whose open duration has elapsed moves to HalfOpen and
    /// lets the call through.
    pub fn allow_request(&self) -> bool {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = inner
                    .last_failure_at
                    .map(|at| Instant::now().saturating_duration_since(at))
                    .unwrap_or(self.open_duration);
                if elapsed >= self.open_duration {
                    inner.state = CircuitState::HalfOpen;
                    info!("Circuit breaker half-open after {:?}, allowing probe", elapsed);
                    true
                } else {
                    self.rejected_requests.fetch_add(1, Ordering::Relaxed);
                    false
                }
            }
        }
    }

    /// Reset the failure count and close the circuit
    pub fn record_success(&self) {
        let mut inner = self.lock();
        if inner.state != CircuitState::Closed {
            info!("Circuit breaker closed after successful call");
        }
        inner.consecutive_failures = 0;
        inner.state = CircuitState::Closed;
        self.total_successes.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a failed call, opening the circuit at the threshold
    pub fn record_failure(&self) {
        let mut inner = self.lock();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        inner.last_failure_at = Some(Instant::now());
        self.total_failures.fetch_add(1, Ordering::Relaxed);

        let should_open = inner.state == CircuitState::HalfOpen
            || inner.consecutive_failures >= self.failure_threshold;
        if should_open {
            if inner.state != CircuitState::Open {
                warn!(
                    "Circuit breaker opened after {} consecutive failures",
                    inner.consecutive_failures
                );
            }
            inner.state = CircuitState::Open;
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.lock().consecutive_failures
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.lock();
        BreakerSnapshot {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            failure_threshold: self.failure_threshold,
            open_duration_secs: self.open_duration.as_secs(),
            last_failure_secs_ago: inner
                .last_failure_at
                .map(|at| Instant::now().saturating_duration_since(at).as_secs()),
            total_successes: self.total_successes.load(Ordering::Relaxed),
            total_failures: self.total_failures.load(Ordering::Relaxed),
            rejected_requests: self.rejected_requests.load(Ordering::Relaxed),
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::from_config(&BreakerConfig::default())
    }
}
