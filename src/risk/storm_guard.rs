// =============================================================================
// StormGuard — global health FSM: NORMAL / WARM / STORM / HALT
// =============================================================================
//
// Each health signal (drawdown, dispatch latency, feed gap, bus overflow)
// maps to its own per-input state through configured thresholds. The
// effective state is the maximum across all inputs plus the manual latch.
//
// Manual halts are sticky: `trigger_halt` latches HALT until an explicit
// `clear_manual_halt`, regardless of how healthy the inputs look. Halts
// derived purely from signals clear themselves when the inputs normalize.
// =============================================================================

use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::metrics::MetricsRegistry;

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Severity-ordered guard state.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub enum StormGuardState {
    #[default]
    Normal = 0,
    Warm = 1,
    Storm = 2,
    Halt = 3,
}

impl StormGuardState {
    pub fn as_i64(&self) -> i64 {
        *self as i64
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "NORMAL",
            Self::Warm => "WARM",
            Self::Storm => "STORM",
            Self::Halt => "HALT",
        }
    }
}

// ---------------------------------------------------------------------------
// Thresholds
// ---------------------------------------------------------------------------

/// Per-input escalation thresholds. A `None` tier means the input can never
/// reach that state on its own.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StormGuardConfig {
    /// Drawdown fractions (negative numbers; -0.05 = 5 % down).
    pub drawdown_warm: f64,
    pub drawdown_storm: f64,
    pub drawdown_halt: f64,
    /// Dispatch latency in microseconds.
    pub latency_warm_us: f64,
    pub latency_storm_us: f64,
    pub latency_halt_us: f64,
    /// Feed silence in seconds. Feed gaps alone never halt.
    pub feed_gap_warm_s: f64,
    pub feed_gap_storm_s: f64,
}

impl Default for StormGuardConfig {
    fn default() -> Self {
        Self {
            drawdown_warm: -0.005,
            drawdown_storm: -0.05,
            drawdown_halt: -0.08,
            latency_warm_us: 10_000.0,
            latency_storm_us: 20_000.0,
            latency_halt_us: 50_000.0,
            feed_gap_warm_s: 0.5,
            feed_gap_storm_s: 1.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

/// One update's worth of health signals. `None` fields leave the stored
/// per-input state untouched, so signals can arrive from different tasks at
/// different cadences.
#[derive(Debug, Clone, Copy, Default)]
pub struct StormInputs {
    pub drawdown_pct: Option<f64>,
    pub latency_us: Option<f64>,
    pub feed_gap_s: Option<f64>,
}

#[derive(Default)]
struct Inner {
    drawdown_state: StormGuardState,
    latency_state: StormGuardState,
    feed_gap_state: StormGuardState,
    overflow_state: StormGuardState,
    manual_halt: bool,
    manual_reason: Option<String>,
}

impl Inner {
    fn effective(&self) -> StormGuardState {
        let mut state = self
            .drawdown_state
            .max(self.latency_state)
            .max(self.feed_gap_state)
            .max(self.overflow_state);
        if self.manual_halt {
            state = StormGuardState::Halt;
        }
        state
    }
}

// ---------------------------------------------------------------------------
// Guard
// ---------------------------------------------------------------------------

pub struct StormGuard {
    config: StormGuardConfig,
    inner: RwLock<Inner>,
    metrics: Arc<MetricsRegistry>,
}

impl StormGuard {
    pub fn new(config: StormGuardConfig, metrics: Arc<MetricsRegistry>) -> Self {
        Self {
            config,
            inner: RwLock::new(Inner::default()),
            metrics,
        }
    }

    /// Current effective state.
    pub fn state(&self) -> StormGuardState {
        self.inner.read().effective()
    }

    /// True only in NORMAL.
    pub fn is_safe(&self) -> bool {
        self.state() == StormGuardState::Normal
    }

    // -------------------------------------------------------------------------
    // Signal updates
    // -------------------------------------------------------------------------

    /// Feed fresh health signals and return the new effective state.
    pub fn update(&self, inputs: StormInputs) -> StormGuardState {
        let mut inner = self.inner.write();
        let before = inner.effective();

        if let Some(dd) = inputs.drawdown_pct {
            inner.drawdown_state = classify_desc(
                dd,
                self.config.drawdown_warm,
                self.config.drawdown_storm,
                Some(self.config.drawdown_halt),
            );
        }
        if let Some(lat) = inputs.latency_us {
            inner.latency_state = classify_asc(
                lat,
                self.config.latency_warm_us,
                self.config.latency_storm_us,
                Some(self.config.latency_halt_us),
            );
        }
        if let Some(gap) = inputs.feed_gap_s {
            inner.feed_gap_state = classify_asc(
                gap,
                self.config.feed_gap_warm_s,
                self.config.feed_gap_storm_s,
                None,
            );
        }

        let after = inner.effective();
        drop(inner);

        if after != before {
            warn!(
                old = before.as_str(),
                new = after.as_str(),
                "storm guard transition"
            );
        }
        self.metrics
            .stormguard_mode
            .store(after.as_i64(), Ordering::Relaxed);
        after
    }

    /// Escalate the bus-overflow input directly to HALT. Signal-derived, so
    /// it clears through `clear_overflow`.
    pub fn overflow_halt(&self) {
        let mut inner = self.inner.write();
        if inner.overflow_state != StormGuardState::Halt {
            warn!("storm guard: bus overflow input escalated to HALT");
        }
        inner.overflow_state = StormGuardState::Halt;
        let state = inner.effective();
        drop(inner);
        self.metrics
            .stormguard_mode
            .store(state.as_i64(), Ordering::Relaxed);
    }

    /// Reset the bus-overflow input after the bus drains.
    pub fn clear_overflow(&self) {
        let mut inner = self.inner.write();
        inner.overflow_state = StormGuardState::Normal;
        let state = inner.effective();
        drop(inner);
        self.metrics
            .stormguard_mode
            .store(state.as_i64(), Ordering::Relaxed);
    }

    // -------------------------------------------------------------------------
    // Manual latch
    // -------------------------------------------------------------------------

    /// Latch HALT until `clear_manual_halt`. Idempotent.
    pub fn trigger_halt(&self, reason: &str) {
        let mut inner = self.inner.write();
        if !inner.manual_halt {
            warn!(reason, "storm guard manual HALT latched");
        }
        inner.manual_halt = true;
        inner.manual_reason = Some(reason.to_string());
        drop(inner);
        self.metrics
            .stormguard_mode
            .store(StormGuardState::Halt.as_i64(), Ordering::Relaxed);
    }

    /// Release the manual latch. Signal-derived state remains in force.
    pub fn clear_manual_halt(&self) {
        let mut inner = self.inner.write();
        if inner.manual_halt {
            info!(reason = ?inner.manual_reason, "storm guard manual HALT cleared");
        }
        inner.manual_halt = false;
        inner.manual_reason = None;
        let state = inner.effective();
        drop(inner);
        self.metrics
            .stormguard_mode
            .store(state.as_i64(), Ordering::Relaxed);
    }

    /// Reason attached to the manual latch, if any.
    pub fn halt_reason(&self) -> Option<String> {
        self.inner.read().manual_reason.clone()
    }
}

/// Classify an ascending metric (bigger = worse).
fn classify_asc(
    value: f64,
    warm: f64,
    storm: f64,
    halt: Option<f64>,
) -> StormGuardState {
    if let Some(h) = halt {
        if value > h {
            return StormGuardState::Halt;
        }
    }
    if value > storm {
        StormGuardState::Storm
    } else if value > warm {
        StormGuardState::Warm
    } else {
        StormGuardState::Normal
    }
}

/// Classify a descending metric (more negative = worse), e.g. drawdown.
fn classify_desc(
    value: f64,
    warm: f64,
    storm: f64,
    halt: Option<f64>,
) -> StormGuardState {
    if let Some(h) = halt {
        if value < h {
            return StormGuardState::Halt;
        }
    }
    if value < storm {
        StormGuardState::Storm
    } else if value < warm {
        StormGuardState::Warm
    } else {
        StormGuardState::Normal
    }
}

impl std::fmt::Debug for StormGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StormGuard")
            .field("state", &self.state())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn guard() -> StormGuard {
        StormGuard::new(StormGuardConfig::default(), Arc::new(MetricsRegistry::new()))
    }

    #[test]
    fn initial_state_is_normal() {
        let g = guard();
        assert_eq!(g.state(), StormGuardState::Normal);
        assert!(g.is_safe());
    }

    #[test]
    fn drawdown_past_warm_threshold() {
        let g = guard();
        let state = g.update(StormInputs {
            drawdown_pct: Some(-0.006),
            ..Default::default()
        });
        assert_eq!(state, StormGuardState::Warm);
    }

    #[test]
    fn latency_past_storm_threshold() {
        let g = guard();
        let state = g.update(StormInputs {
            latency_us: Some(21_000.0),
            ..Default::default()
        });
        assert_eq!(state, StormGuardState::Storm);
    }

    #[test]
    fn feed_gap_never_halts_alone() {
        let g = guard();
        let state = g.update(StormInputs {
            feed_gap_s: Some(1.1),
            ..Default::default()
        });
        assert_eq!(state, StormGuardState::Storm);

        let state = g.update(StormInputs {
            feed_gap_s: Some(100.0),
            ..Default::default()
        });
        assert_eq!(state, StormGuardState::Storm);
    }

    #[test]
    fn worst_input_wins() {
        let g = guard();
        let state = g.update(StormInputs {
            drawdown_pct: Some(-0.10),
            latency_us: Some(21_000.0),
            ..Default::default()
        });
        assert_eq!(state, StormGuardState::Halt);
    }

    #[test]
    fn manual_halt_is_sticky_through_healthy_updates() {
        let g = guard();
        g.trigger_halt("manual");
        assert_eq!(g.state(), StormGuardState::Halt);
        assert!(!g.is_safe());

        // Healthy inputs do not lift a manual latch.
        let state = g.update(StormInputs {
            drawdown_pct: Some(0.0),
            latency_us: Some(0.0),
            feed_gap_s: Some(0.0),
        });
        assert_eq!(state, StormGuardState::Halt);

        g.clear_manual_halt();
        assert_eq!(g.state(), StormGuardState::Normal);
        assert!(g.is_safe());
    }

    #[test]
    fn signal_halt_clears_when_inputs_normalize() {
        let g = guard();
        g.update(StormInputs {
            drawdown_pct: Some(-0.10),
            ..Default::default()
        });
        assert_eq!(g.state(), StormGuardState::Halt);

        let state = g.update(StormInputs {
            drawdown_pct: Some(0.0),
            ..Default::default()
        });
        assert_eq!(state, StormGuardState::Normal);
    }

    #[test]
    fn overflow_input_escalates_and_clears() {
        let g = guard();
        g.overflow_halt();
        assert_eq!(g.state(), StormGuardState::Halt);
        g.clear_overflow();
        assert_eq!(g.state(), StormGuardState::Normal);
    }

    #[test]
    fn gauge_tracks_state() {
        let metrics = Arc::new(MetricsRegistry::new());
        let g = StormGuard::new(StormGuardConfig::default(), metrics.clone());
        g.trigger_halt("ops");
        assert_eq!(metrics.snapshot().stormguard_mode, 3);
    }
}
