// =============================================================================
// Circuit Breaker — consecutive broker failures open the dispatch path
// =============================================================================

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::error;

struct Inner {
    failure_count: u32,
    open_until: Option<Instant>,
}

pub struct CircuitBreaker {
    threshold: u32,
    timeout: Duration,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, timeout_s: u64) -> Self {
        Self {
            threshold,
            timeout: Duration::from_secs(timeout_s),
            inner: Mutex::new(Inner {
                failure_count: 0,
                open_until: None,
            }),
        }
    }

    /// True while the breaker rejects all dispatches.
    pub fn is_open(&self) -> bool {
        let inner = self.inner.lock();
        matches!(inner.open_until, Some(until) if until > Instant::now())
    }

    /// A successful dispatch resets the failure streak.
    pub fn record_success(&self) {
        self.inner.lock().failure_count = 0;
    }

    /// Record a failure; returns true when this one trips the breaker.
    pub fn record_failure(&self) -> bool {
        let mut inner = self.inner.lock();
        inner.failure_count += 1;
        if inner.failure_count >= self.threshold {
            inner.open_until = Some(Instant::now() + self.timeout);
            error!(
                failures = inner.failure_count,
                timeout_s = self.timeout.as_secs(),
                "circuit breaker tripped"
            );
            return true;
        }
        false
    }

    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failure_count
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("threshold", &self.threshold)
            .field("open", &self.is_open())
            .finish()
    }
}
