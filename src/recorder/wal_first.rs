// =============================================================================
// WAL-First Writer — durable-by-default recording, never touches the sink
// =============================================================================
//
// Every batch goes straight to the WAL; a separate loader ships WAL files to
// the analytics store on its own schedule. The disk-pressure monitor gates
// writes: HALT drops unconditionally, CRITICAL consults the per-table policy
// (write | drop | halt).
// =============================================================================

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{error, warn};

use crate::metrics::MetricsRegistry;
use crate::recorder::disk_monitor::{DiskPressureLevel, DiskPressureMonitor, TablePolicy};
use crate::recorder::wal::WalWriter;
use crate::recorder::writer::RecorderWrite;

pub struct WalFirstWriter {
    wal: WalWriter,
    disk: Arc<DiskPressureMonitor>,
    metrics: Arc<MetricsRegistry>,
}

impl WalFirstWriter {
    pub fn new(
        wal: WalWriter,
        disk: Arc<DiskPressureMonitor>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self { wal, disk, metrics }
    }
}

#[async_trait]
impl RecorderWrite for WalFirstWriter {
    async fn write(&self, table: &str, rows: Vec<Value>) -> bool {
        let level = self.disk.get_level();

        if level == DiskPressureLevel::Halt {
            error!(table, count = rows.len(), "disk pressure HALT, dropping rows");
            for _ in 0..rows.len() {
                self.metrics.record_recorder_drop(table, "halt_pressure");
            }
            return false;
        }

        if level >= DiskPressureLevel::Critical {
            match self.disk.topic_policy(table) {
                TablePolicy::Halt => {
                    error!(table, count = rows.len(), "policy=halt under CRITICAL pressure, dropping rows");
                    for _ in 0..rows.len() {
                        self.metrics.record_recorder_drop(table, "halt");
                    }
                    return false;
                }
                TablePolicy::Drop => {
                    warn!(table, count = rows.len(), "policy=drop under CRITICAL pressure, dropping rows");
                    for _ in 0..rows.len() {
                        self.metrics.record_recorder_drop(table, "drop");
                    }
                    return false;
                }
                TablePolicy::Write => {}
            }
        }

        match self.wal.write(table, &rows) {
            Ok(_) => {
                self.metrics
                    .recorder_rows_total
                    .fetch_add(rows.len() as u64, std::sync::atomic::Ordering::Relaxed);
                true
            }
            Err(e) => {
                error!(table, error = %e, "WAL write failed");
                false
            }
        }
    }
}
