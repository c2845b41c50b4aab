// =============================================================================
// Batcher — per-table row accumulation with bounded buffers
// =============================================================================
//
// Rows flush when the buffer reaches `flush_limit` or when `check_flush`
// (driven by the recorder's periodic ticker) finds the buffer older than
// `flush_interval`. A full `max_buffer_size` applies one of three
// backpressure policies; drops land in `recorder_dropped_total{table,policy}`.
//
// The buffer lock is never held across the writer await: rows are drained
// under the lock and written after it drops.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;

use crate::metrics::MetricsRegistry;
use crate::recorder::mapper::Table;
use crate::recorder::writer::RecorderWrite;

/// What to do with a new row when the buffer is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackpressurePolicy {
    /// Discard the incoming row.
    DropNewest,
    /// Discard the oldest buffered row to make room.
    DropOldest,
    /// Flush immediately, then buffer the row.
    Block,
}

impl BackpressurePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DropNewest => "drop_newest",
            Self::DropOldest => "drop_oldest",
            Self::Block => "block",
        }
    }
}

pub struct Batcher {
    table: Table,
    flush_limit: usize,
    flush_interval: Duration,
    writer: Arc<dyn RecorderWrite>,
    buffer: AsyncMutex<Vec<Value>>,
    last_flush: Mutex<Instant>,
    max_buffer_size: usize,
    policy: BackpressurePolicy,
    dropped_count: AtomicU64,
    metrics: Arc<MetricsRegistry>,
}

impl Batcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        table: Table,
        flush_limit: usize,
        flush_interval_ms: u64,
        writer: Arc<dyn RecorderWrite>,
        max_buffer_size: usize,
        policy: BackpressurePolicy,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            table,
            flush_limit: flush_limit.max(1),
            flush_interval: Duration::from_millis(flush_interval_ms),
            writer,
            buffer: AsyncMutex::new(Vec::new()),
            last_flush: Mutex::new(Instant::now()),
            max_buffer_size: max_buffer_size.max(1),
            policy,
            dropped_count: AtomicU64::new(0),
            metrics,
        }
    }

    pub fn table(&self) -> Table {
        self.table
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped_count.load(Ordering::Relaxed)
    }

    // -------------------------------------------------------------------------
    // Adds and flushes
    // -------------------------------------------------------------------------

    /// Buffer one row, applying backpressure and the size-triggered flush.
    pub async fn add(&self, row: Value) {
        let to_flush = {
            let mut buffer = self.buffer.lock().await;

            if buffer.len() >= self.max_buffer_size {
                match self.policy {
                    BackpressurePolicy::DropNewest => {
                        self.record_drop();
                        return;
                    }
                    BackpressurePolicy::DropOldest => {
                        buffer.remove(0);
                        self.record_drop();
                    }
                    BackpressurePolicy::Block => {
                        // Flushing is the only way to make room.
                        let drained: Vec<Value> = buffer.drain(..).collect();
                        buffer.push(row);
                        drop(buffer);
                        self.flush_rows(drained).await;
                        return;
                    }
                }
            }

            buffer.push(row);
            if buffer.len() >= self.flush_limit {
                Some(buffer.drain(..).collect::<Vec<Value>>())
            } else {
                None
            }
        };

        if let Some(rows) = to_flush {
            self.flush_rows(rows).await;
        }
    }

    /// Interval-triggered flush; called by the recorder's periodic ticker.
    pub async fn check_flush(&self) {
        let due = {
            let last = self.last_flush.lock();
            last.elapsed() >= self.flush_interval
        };
        if !due {
            return;
        }

        let rows: Vec<Value> = {
            let mut buffer = self.buffer.lock().await;
            buffer.drain(..).collect()
        };
        if !rows.is_empty() {
            self.flush_rows(rows).await;
        }
    }

    /// Unconditional flush (shutdown, tests).
    pub async fn force_flush(&self) {
        let rows: Vec<Value> = {
            let mut buffer = self.buffer.lock().await;
            buffer.drain(..).collect()
        };
        if !rows.is_empty() {
            self.flush_rows(rows).await;
        }
    }

    async fn flush_rows(&self, rows: Vec<Value>) {
        *self.last_flush.lock() = Instant::now();
        self.writer.write(self.table.as_str(), rows).await;
    }

    fn record_drop(&self) {
        self.dropped_count.fetch_add(1, Ordering::Relaxed);
        self.metrics
            .record_recorder_drop(self.table.as_str(), self.policy.as_str());
    }

    /// Rows currently buffered (tests).
    pub async fn buffered(&self) -> usize {
        self.buffer.lock().await.len()
    }
}

impl std::fmt::Debug for Batcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Batcher")
            .field("table", &self.table)
            .field("flush_limit", &self.flush_limit)
            .finish_non_exhaustive()
    }
}
