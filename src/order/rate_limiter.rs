// =============================================================================
// Rate Limiter — sliding-window dispatch caps
// =============================================================================
//
// Two thresholds over one window: crossing `soft_cap` logs a warning but
// lets the order through; `hard_cap` rejects. Entries older than the window
// are purged lazily on each check, so an idle limiter costs nothing.
// =============================================================================

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{error, warn};

pub struct RateLimiter {
    window: Mutex<VecDeque<Instant>>,
    soft_cap: usize,
    hard_cap: usize,
    window_len: Duration,
}

impl RateLimiter {
    pub fn new(soft_cap: usize, hard_cap: usize, window_s: u64) -> Self {
        Self {
            window: Mutex::new(VecDeque::new()),
            soft_cap,
            hard_cap,
            window_len: Duration::from_secs(window_s),
        }
    }

    /// True if another dispatch is allowed right now.
    pub fn check(&self) -> bool {
        let now = Instant::now();
        let mut window = self.window.lock();
        while let Some(front) = window.front() {
            if now.duration_since(*front) > self.window_len {
                window.pop_front();
            } else {
                break;
            }
        }

        let count = window.len();
        if count >= self.hard_cap {
            error!(count, hard_cap = self.hard_cap, "hard rate limit hit");
            return false;
        }
        if count >= self.soft_cap {
            warn!(count, soft_cap = self.soft_cap, "soft rate limit hit");
        }
        true
    }

    /// Record one dispatch against the window.
    pub fn record(&self) {
        self.window.lock().push_back(Instant::now());
    }

    /// Entries currently inside the window (after a lazy purge).
    pub fn in_window(&self) -> usize {
        let now = Instant::now();
        let mut window = self.window.lock();
        while let Some(front) = window.front() {
            if now.duration_since(*front) > self.window_len {
                window.pop_front();
            } else {
                break;
            }
        }
        window.len()
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("soft_cap", &self.soft_cap)
            .field("hard_cap", &self.hard_cap)
            .field("in_window", &self.window.lock().len())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hard_cap_rejects() {
        let limiter = RateLimiter::new(2, 3, 60);
        for _ in 0..3 {
            assert!(limiter.check());
            limiter.record();
        }
        assert!(!limiter.check());
    }

    #[test]
    fn soft_cap_warns_but_allows() {
        let limiter = RateLimiter::new(1, 10, 60);
        limiter.record();
        limiter.record();
        // Above soft, below hard.
        assert!(limiter.check());
    }

    #[test]
    fn old_entries_purge_lazily() {
        let limiter = RateLimiter::new(1, 1, 0);
        limiter.record();
        // Zero-second window: the entry ages out immediately.
        std::thread::sleep(Duration::from_millis(5));
        assert!(limiter.check());
        assert_eq!(limiter.in_window(), 0);
    }
}
