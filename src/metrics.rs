// =============================================================================
// Metrics Registry — lock-free counters and gauges with a snapshot view
// =============================================================================
//
// Scalar counters are plain atomics that any thread may bump without locking.
// Labelled counters (per error kind, per reject reason, per table) live in a
// small RwLock-ed map; label cardinality is bounded by design, so contention
// is negligible.
//
// The registry is constructed once at startup and passed by Arc — there is no
// global singleton.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::Serialize;

/// Central metrics registry shared across all subsystems.
#[derive(Default)]
pub struct MetricsRegistry {
    // ── Bus ─────────────────────────────────────────────────────────────
    pub bus_overflow_total: AtomicU64,
    pub bus_published_total: AtomicU64,

    // ── Normalization ───────────────────────────────────────────────────
    normalization_errors: RwLock<HashMap<String, u64>>,

    // ── Risk / gateway ──────────────────────────────────────────────────
    risk_reject: RwLock<HashMap<String, u64>>,
    /// StormGuard state as an integer (0=NORMAL .. 3=HALT).
    pub stormguard_mode: AtomicI64,
    /// GatewayPolicy mode as an integer (0=NORMAL, 1=DEGRADE, 2=HALT).
    pub gateway_policy_mode: AtomicI64,

    // ── Orders ──────────────────────────────────────────────────────────
    order_actions: RwLock<HashMap<String, u64>>,
    pub order_reject_total: AtomicU64,

    // ── Execution ───────────────────────────────────────────────────────
    /// Last observed inbound-exec lag in nanoseconds.
    pub execution_router_lag_ns: AtomicI64,
    pub execution_router_errors_total: AtomicU64,

    // ── Recorder ────────────────────────────────────────────────────────
    recorder_dropped: RwLock<HashMap<String, u64>>,
    pub recorder_rows_total: AtomicU64,
    pub wal_files_written_total: AtomicU64,
    pub wal_files_replayed_total: AtomicU64,
    /// Disk pressure level (0=OK .. 3=HALT).
    pub disk_pressure_level: AtomicI64,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // -------------------------------------------------------------------------
    // Labelled counters
    // -------------------------------------------------------------------------

    /// `normalization_errors_total{type}`.
    pub fn record_normalization_error(&self, kind: &str) {
        *self
            .normalization_errors
            .write()
            .entry(kind.to_string())
            .or_insert(0) += 1;
    }

    /// `risk_reject_total{strategy,reason}`.
    pub fn record_risk_reject(&self, strategy: &str, reason: &str) {
        *self
            .risk_reject
            .write()
            .entry(format!("{strategy}:{reason}"))
            .or_insert(0) += 1;
    }

    /// `order_actions_total{type}` — "place", "cancel", "modify".
    pub fn record_order_action(&self, action: &str) {
        *self
            .order_actions
            .write()
            .entry(action.to_string())
            .or_insert(0) += 1;
    }

    /// `recorder_dropped_total{table,policy}`.
    pub fn record_recorder_drop(&self, table: &str, policy: &str) {
        *self
            .recorder_dropped
            .write()
            .entry(format!("{table}:{policy}"))
            .or_insert(0) += 1;
    }

    /// Sum of rejects for one strategy:reason key (tests and API).
    pub fn risk_reject_count(&self, strategy: &str, reason: &str) -> u64 {
        self.risk_reject
            .read()
            .get(&format!("{strategy}:{reason}"))
            .copied()
            .unwrap_or(0)
    }

    pub fn normalization_error_count(&self, kind: &str) -> u64 {
        self.normalization_errors
            .read()
            .get(kind)
            .copied()
            .unwrap_or(0)
    }

    pub fn recorder_drop_count(&self, table: &str, policy: &str) -> u64 {
        self.recorder_dropped
            .read()
            .get(&format!("{table}:{policy}"))
            .copied()
            .unwrap_or(0)
    }

    // -------------------------------------------------------------------------
    // Snapshot
    // -------------------------------------------------------------------------

    /// Produce a serialisable snapshot of every counter and gauge.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            bus_overflow_total: self.bus_overflow_total.load(Ordering::Relaxed),
            bus_published_total: self.bus_published_total.load(Ordering::Relaxed),
            normalization_errors_total: self.normalization_errors.read().clone(),
            risk_reject_total: self.risk_reject.read().clone(),
            stormguard_mode: self.stormguard_mode.load(Ordering::Relaxed),
            gateway_policy_mode: self.gateway_policy_mode.load(Ordering::Relaxed),
            order_actions_total: self.order_actions.read().clone(),
            order_reject_total: self.order_reject_total.load(Ordering::Relaxed),
            execution_router_lag_ns: self.execution_router_lag_ns.load(Ordering::Relaxed),
            execution_router_errors_total: self
                .execution_router_errors_total
                .load(Ordering::Relaxed),
            recorder_dropped_total: self.recorder_dropped.read().clone(),
            recorder_rows_total: self.recorder_rows_total.load(Ordering::Relaxed),
            wal_files_written_total: self.wal_files_written_total.load(Ordering::Relaxed),
            wal_files_replayed_total: self.wal_files_replayed_total.load(Ordering::Relaxed),
            disk_pressure_level: self.disk_pressure_level.load(Ordering::Relaxed),
        }
    }
}

/// Immutable view of the registry, suitable for the status API.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub bus_overflow_total: u64,
    pub bus_published_total: u64,
    pub normalization_errors_total: HashMap<String, u64>,
    pub risk_reject_total: HashMap<String, u64>,
    pub stormguard_mode: i64,
    pub gateway_policy_mode: i64,
    pub order_actions_total: HashMap<String, u64>,
    pub order_reject_total: u64,
    pub execution_router_lag_ns: i64,
    pub execution_router_errors_total: u64,
    pub recorder_dropped_total: HashMap<String, u64>,
    pub recorder_rows_total: u64,
    pub wal_files_written_total: u64,
    pub wal_files_replayed_total: u64,
    pub disk_pressure_level: i64,
}

impl std::fmt::Debug for MetricsRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsRegistry")
            .field(
                "bus_overflow_total",
                &self.bus_overflow_total.load(Ordering::Relaxed),
            )
            .field(
                "order_reject_total",
                &self.order_reject_total.load(Ordering::Relaxed),
            )
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labelled_counters_accumulate() {
        let m = MetricsRegistry::new();
        m.record_risk_reject("s1", "MAX_PRICE_CAP");
        m.record_risk_reject("s1", "MAX_PRICE_CAP");
        m.record_risk_reject("s2", "HALT");

        assert_eq!(m.risk_reject_count("s1", "MAX_PRICE_CAP"), 2);
        assert_eq!(m.risk_reject_count("s2", "HALT"), 1);
        assert_eq!(m.risk_reject_count("s2", "DEGRADE"), 0);
    }

    #[test]
    fn snapshot_reflects_counters() {
        let m = MetricsRegistry::new();
        m.bus_overflow_total.fetch_add(3, Ordering::Relaxed);
        m.record_normalization_error("bad_price");
        m.record_recorder_drop("orders", "drop_newest");

        let snap = m.snapshot();
        assert_eq!(snap.bus_overflow_total, 3);
        assert_eq!(snap.normalization_errors_total.get("bad_price"), Some(&1));
        assert_eq!(
            snap.recorder_dropped_total.get("orders:drop_newest"),
            Some(&1)
        );
    }
}
