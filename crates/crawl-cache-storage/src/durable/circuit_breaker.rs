use parking_lot::RwLock;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crawl_cache_core::CacheError;

#[derive(Debug, Clone, Copy, PartialEq)]
enum State {
    Closed,
    /// Instant when it opened
    Open(Instant),
    /// Instant when the probe was let through
    HalfOpen(Instant),
}

#[derive(Debug)]
struct Inner {
    state: State,
    failures: u32,
}

/// Trips after consecutive store failures and fails fast while open
///
/// After `reset_timeout` a single probe request is allowed through. Its
/// success closes the circuit, its failure re-opens it. A probe whose
/// result is never reported is superseded after another `reset_timeout`.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    inner: Arc<RwLock<Inner>>,
    failure_threshold: u32,
    reset_timeout: Duration,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                state: State::Closed,
                failures: 0,
            })),
            failure_threshold: failure_threshold.max(1),
            reset_timeout,
        }
    }

    /// Check if we can execute a request
    pub fn allow_request(&self) -> bool {
        let mut inner = self.inner.write();
        match inner.state {
            State::Closed => true,
            State::Open(since) | State::HalfOpen(since) => {
                if since.elapsed() >= self.reset_timeout {
                    inner.state = State::HalfOpen(Instant::now());
                    tracing::info!("durable store circuit half-open, probing");
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Report success
    pub fn report_success(&self) {
        let mut inner = self.inner.write();
        if matches!(inner.state, State::HalfOpen(_)) {
            tracing::info!("durable store recovered, circuit closed");
        }
        inner.state = State::Closed;
        inner.failures = 0;
    }

    /// Report failure
    pub fn report_failure(&self) {
        let mut inner = self.inner.write();
        match inner.state {
            State::Closed => {
                inner.failures += 1;
                if inner.failures >= self.failure_threshold {
                    inner.state = State::Open(Instant::now());
                    tracing::warn!(
                        failures = inner.failures,
                        reset_timeout_ms = self.reset_timeout.as_millis() as u64,
                        "durable store circuit opened"
                    );
                }
            }
            State::HalfOpen(_) => {
                inner.state = State::Open(Instant::now());
                tracing::warn!("durable store probe failed, circuit re-opened");
            }
            State::Open(_) => {}
        }
    }

    /// Whether requests are currently being short-circuited
    pub fn is_open(&self) -> bool {
        !matches!(self.inner.read().state, State::Closed)
    }

    /// Consecutive failures counted while closed
    pub fn failures(&self) -> u32 {
        self.inner.read().failures
    }

    /// Helper to classify if an error should trip the breaker
    pub fn is_failure(err: &CacheError) -> bool {
        matches!(
            err,
            CacheError::StoreUnavailable(_) | CacheError::Backend(_) | CacheError::Internal(_)
        )
    }
}
