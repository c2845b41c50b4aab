// =============================================================================
// Disk-Pressure Monitor — WAL directory growth watchdog
// =============================================================================
//
// Samples the WAL directory size on an interval and classifies it into four
// levels by MB thresholds. Registered hooks fire on every level transition.
// Per-table behavior under CRITICAL comes from env:
//
//   TEMPEST_WAL_POLICY_<TABLE>=write|drop|halt   (default write)
// =============================================================================

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{info, warn};

use crate::metrics::MetricsRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum DiskPressureLevel {
    Ok = 0,
    Warn = 1,
    Critical = 2,
    Halt = 3,
}

impl DiskPressureLevel {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Ok,
            1 => Self::Warn,
            2 => Self::Critical,
            _ => Self::Halt,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Warn => "WARN",
            Self::Critical => "CRITICAL",
            Self::Halt => "HALT",
        }
    }
}

/// What a table does when pressure reaches CRITICAL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TablePolicy {
    Write,
    Drop,
    Halt,
}

type Hook = Box<dyn Fn(DiskPressureLevel, DiskPressureLevel) + Send + Sync>;

pub struct DiskPressureMonitor {
    wal_dir: PathBuf,
    warn_mb: f64,
    critical_mb: f64,
    halt_mb: f64,
    check_interval: Duration,
    level: AtomicU8,
    hooks: Mutex<Vec<Hook>>,
    metrics: Arc<MetricsRegistry>,
}

impl DiskPressureMonitor {
    pub fn new(
        wal_dir: impl AsRef<Path>,
        warn_mb: f64,
        critical_mb: f64,
        halt_mb: f64,
        check_interval: Duration,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            wal_dir: wal_dir.as_ref().to_path_buf(),
            warn_mb,
            critical_mb,
            halt_mb,
            check_interval,
            level: AtomicU8::new(DiskPressureLevel::Ok as u8),
            hooks: Mutex::new(Vec::new()),
            metrics,
        }
    }

    pub fn get_level(&self) -> DiskPressureLevel {
        DiskPressureLevel::from_u8(self.level.load(Ordering::Relaxed))
    }

    /// Register a transition hook `(old, new)`.
    pub fn register_hook(&self, hook: impl Fn(DiskPressureLevel, DiskPressureLevel) + Send + Sync + 'static) {
        self.hooks.lock().push(Box::new(hook));
    }

    /// CRITICAL-pressure policy for `table`, from env.
    pub fn topic_policy(&self, table: &str) -> TablePolicy {
        let var = format!("TEMPEST_WAL_POLICY_{}", table.to_uppercase());
        match std::env::var(var).ok().as_deref() {
            Some("drop") => TablePolicy::Drop,
            Some("halt") => TablePolicy::Halt,
            Some("write") | None => TablePolicy::Write,
            Some(other) => {
                warn!(table, value = other, "unknown WAL policy value, defaulting to write");
                TablePolicy::Write
            }
        }
    }

    // -------------------------------------------------------------------------
    // Sampling
    // -------------------------------------------------------------------------

    fn compute_level(&self, size_mb: f64) -> DiskPressureLevel {
        if size_mb >= self.halt_mb {
            DiskPressureLevel::Halt
        } else if size_mb >= self.critical_mb {
            DiskPressureLevel::Critical
        } else if size_mb >= self.warn_mb {
            DiskPressureLevel::Warn
        } else {
            DiskPressureLevel::Ok
        }
    }

    fn dir_size_mb(&self) -> f64 {
        let mut bytes = 0u64;
        if let Ok(rd) = std::fs::read_dir(&self.wal_dir) {
            for entry in rd.filter_map(|e| e.ok()) {
                if let Ok(meta) = entry.metadata() {
                    if meta.is_file() {
                        bytes += meta.len();
                    }
                }
            }
        }
        bytes as f64 / (1024.0 * 1024.0)
    }

    /// Take one sample and fire hooks on a transition. Public for tests and
    /// the supervising loop.
    pub fn sample_once(&self) -> DiskPressureLevel {
        let size_mb = self.dir_size_mb();
        let new_level = self.compute_level(size_mb);
        let old_level =
            DiskPressureLevel::from_u8(self.level.swap(new_level as u8, Ordering::Relaxed));

        if new_level != old_level {
            if new_level > old_level {
                warn!(
                    old = old_level.as_str(),
                    new = new_level.as_str(),
                    size_mb,
                    "disk pressure escalated"
                );
            } else {
                info!(
                    old = old_level.as_str(),
                    new = new_level.as_str(),
                    size_mb,
                    "disk pressure recovered"
                );
            }
            self.metrics
                .disk_pressure_level
                .store(new_level as i64, Ordering::Relaxed);
            for hook in self.hooks.lock().iter() {
                hook(old_level, new_level);
            }
        }
        new_level
    }

    /// Supervised sampling loop.
    pub async fn run(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.check_interval);
        info!(
            dir = %self.wal_dir.display(),
            warn_mb = self.warn_mb,
            critical_mb = self.critical_mb,
            halt_mb = self.halt_mb,
            "disk pressure monitor started"
        );
        loop {
            interval.tick().await;
            self.sample_once();
        }
    }
}

impl std::fmt::Debug for DiskPressureMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskPressureMonitor")
            .field("level", &self.get_level())
            .finish_non_exhaustive()
    }
}
