// =============================================================================
// Engine Configuration — file-backed settings with environment overrides
// =============================================================================
//
// Every field has a serde default so older config files keep loading as new
// fields appear. Operational overrides come from `TEMPEST_*` environment
// variables applied after the file loads; persistence uses the atomic
// tmp + rename pattern.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

fn default_symbols_path() -> String {
    "config/symbols.yaml".into()
}

fn default_risk_path() -> String {
    "config/risk.yaml".into()
}

fn default_strategies_path() -> String {
    "config/strategies.yaml".into()
}

fn default_wal_dir() -> String {
    "data/wal".into()
}

fn default_dlq_dir() -> String {
    "data/dlq".into()
}

fn default_bus_capacity() -> usize {
    65_536
}

fn default_true() -> bool {
    true
}

fn default_max_skew_ms() -> i64 {
    5_000
}

fn default_rate_soft_cap() -> usize {
    50
}

fn default_rate_hard_cap() -> usize {
    100
}

fn default_rate_window_s() -> u64 {
    10
}

fn default_breaker_threshold() -> u32 {
    5
}

fn default_breaker_timeout_s() -> u64 {
    30
}

fn default_flush_limit() -> usize {
    1_000
}

fn default_flush_interval_ms() -> u64 {
    500
}

fn default_max_buffer_size() -> usize {
    50_000
}

fn default_disk_warn_mb() -> f64 {
    512.0
}

fn default_disk_critical_mb() -> f64 {
    1_024.0
}

fn default_disk_halt_mb() -> f64 {
    2_048.0
}

fn default_disk_check_interval_s() -> u64 {
    10
}

fn default_reconcile_interval_s() -> u64 {
    60
}

fn default_reconcile_tolerance() -> i64 {
    0
}

fn default_sink_max_retries() -> u32 {
    3
}

fn default_sink_base_delay_ms() -> u64 {
    500
}

fn default_ts_max_future_s() -> i64 {
    60
}

fn default_bind_addr() -> String {
    "0.0.0.0:3001".into()
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    // --- Config files --------------------------------------------------------
    #[serde(default = "default_symbols_path")]
    pub symbols_path: String,
    #[serde(default = "default_risk_path")]
    pub risk_path: String,
    #[serde(default = "default_strategies_path")]
    pub strategies_path: String,

    // --- Durable directories -------------------------------------------------
    #[serde(default = "default_wal_dir")]
    pub wal_dir: String,
    #[serde(default = "default_dlq_dir")]
    pub dlq_dir: String,

    // --- Bus -----------------------------------------------------------------
    #[serde(default = "default_bus_capacity")]
    pub bus_capacity: usize,
    /// Single-writer fast path; clear when several tasks publish.
    #[serde(default = "default_true")]
    pub bus_single_writer: bool,

    // --- Normalizer ----------------------------------------------------------
    /// Broker timestamps further than this in the future are clamped.
    #[serde(default = "default_max_skew_ms")]
    pub max_ts_skew_ms: i64,

    // --- Order dispatch ------------------------------------------------------
    #[serde(default = "default_rate_soft_cap")]
    pub rate_soft_cap: usize,
    #[serde(default = "default_rate_hard_cap")]
    pub rate_hard_cap: usize,
    #[serde(default = "default_rate_window_s")]
    pub rate_window_s: u64,
    #[serde(default = "default_breaker_threshold")]
    pub breaker_threshold: u32,
    #[serde(default = "default_breaker_timeout_s")]
    pub breaker_timeout_s: u64,

    // --- Recorder ------------------------------------------------------------
    #[serde(default = "default_flush_limit")]
    pub recorder_flush_limit: usize,
    #[serde(default = "default_flush_interval_ms")]
    pub recorder_flush_interval_ms: u64,
    #[serde(default = "default_max_buffer_size")]
    pub recorder_max_buffer_size: usize,
    #[serde(default = "default_sink_max_retries")]
    pub sink_max_retries: u32,
    #[serde(default = "default_sink_base_delay_ms")]
    pub sink_base_delay_ms: u64,
    /// Rows stamped further than this into the future are dropped.
    #[serde(default = "default_ts_max_future_s")]
    pub ts_max_future_s: i64,

    // --- Disk pressure -------------------------------------------------------
    #[serde(default = "default_disk_warn_mb")]
    pub disk_warn_mb: f64,
    #[serde(default = "default_disk_critical_mb")]
    pub disk_critical_mb: f64,
    #[serde(default = "default_disk_halt_mb")]
    pub disk_halt_mb: f64,
    #[serde(default = "default_disk_check_interval_s")]
    pub disk_check_interval_s: u64,

    // --- Reconciliation ------------------------------------------------------
    #[serde(default = "default_reconcile_interval_s")]
    pub reconcile_interval_s: u64,
    #[serde(default = "default_reconcile_tolerance")]
    pub reconcile_tolerance: i64,
    /// Latch a StormGuard HALT when drift is found.
    #[serde(default)]
    pub reconcile_halts: bool,

    // --- API -----------------------------------------------------------------
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        serde_json::from_str("{}").expect("defaults deserialize")
    }
}

impl EngineConfig {
    /// Load from a JSON file; callers fall back to defaults on error.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read engine config from {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse engine config from {}", path.display()))?;
        info!(path = %path.display(), "engine config loaded");
        Ok(config)
    }

    /// Atomic save: write a `.tmp` sibling, then rename.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content =
            serde_json::to_string_pretty(self).context("failed to serialize engine config")?;
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename onto {}", path.display()))?;
        info!(path = %path.display(), "engine config saved");
        Ok(())
    }

    /// Apply `TEMPEST_*` environment overrides on top of file values.
    pub fn apply_env(&mut self) {
        override_string(&mut self.symbols_path, "TEMPEST_SYMBOLS_CONFIG");
        override_string(&mut self.risk_path, "TEMPEST_RISK_CONFIG");
        override_string(&mut self.strategies_path, "TEMPEST_STRATEGIES_CONFIG");
        override_string(&mut self.wal_dir, "TEMPEST_WAL_DIR");
        override_string(&mut self.dlq_dir, "TEMPEST_DLQ_DIR");
        override_string(&mut self.bind_addr, "TEMPEST_BIND_ADDR");
        override_parse(&mut self.bus_capacity, "TEMPEST_BUS_SIZE");
        override_parse(&mut self.disk_warn_mb, "TEMPEST_DISK_WARN_MB");
        override_parse(&mut self.disk_critical_mb, "TEMPEST_DISK_CRITICAL_MB");
        override_parse(&mut self.disk_halt_mb, "TEMPEST_DISK_HALT_MB");
        override_parse(&mut self.ts_max_future_s, "TEMPEST_TS_MAX_FUTURE_S");
        override_parse(&mut self.reconcile_interval_s, "TEMPEST_RECONCILE_INTERVAL_S");

        if let Ok(v) = std::env::var("TEMPEST_BUS_SINGLE_WRITER") {
            self.bus_single_writer =
                !matches!(v.to_lowercase().as_str(), "0" | "false" | "no" | "off");
        }
    }
}

fn override_string(target: &mut String, var: &str) {
    if let Ok(v) = std::env::var(var) {
        if !v.is_empty() {
            *target = v;
        }
    }
}

fn override_parse<T: std::str::FromStr>(target: &mut T, var: &str) {
    if let Ok(v) = std::env::var(var) {
        match v.parse() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(var, value = %v, "unparseable override ignored"),
        }
    }
}
