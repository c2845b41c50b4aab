// =============================================================================
// Data Writer — DIRECT-mode sink path with sanitize, retry, and WAL spill
// =============================================================================
//
// The writer owns the analytics-sink client behind a trait; the engine never
// links the database driver directly. Each batch is timestamp-sanitized,
// then written with exponential-backoff-and-jitter retries. A batch that
// exhausts its retries spills to the WAL so nothing is lost while the sink
// is down — the replayer drains it later.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use rand::Rng;
use serde_json::Value;
use tracing::{error, warn};

use crate::metrics::MetricsRegistry;
use crate::recorder::wal::WalWriter;
use crate::timebase;

// ---------------------------------------------------------------------------
// Sink contract
// ---------------------------------------------------------------------------

/// The analytics store, reduced to the one call the engine needs.
#[async_trait]
pub trait SinkClient: Send + Sync {
    async fn write_rows(&self, table: &str, rows: &[Value]) -> Result<()>;
}

/// In-memory sink for tests and dry runs: records calls, optionally failing
/// the first N of them.
pub struct MemorySink {
    calls: parking_lot::Mutex<Vec<(String, Vec<Value>)>>,
    fail_remaining: parking_lot::Mutex<u32>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self {
            calls: parking_lot::Mutex::new(Vec::new()),
            fail_remaining: parking_lot::Mutex::new(0),
        }
    }

    /// A sink whose first `n` writes fail.
    pub fn failing(n: u32) -> Self {
        let sink = Self::new();
        *sink.fail_remaining.lock() = n;
        sink
    }

    pub fn calls(&self) -> Vec<(String, Vec<Value>)> {
        self.calls.lock().clone()
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SinkClient for MemorySink {
    async fn write_rows(&self, table: &str, rows: &[Value]) -> Result<()> {
        {
            let mut remaining = self.fail_remaining.lock();
            if *remaining > 0 {
                *remaining -= 1;
                anyhow::bail!("sink unavailable (injected)");
            }
        }
        self.calls.lock().push((table.to_string(), rows.to_vec()));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Batch-write contract shared by DIRECT and WAL_FIRST writers
// ---------------------------------------------------------------------------

/// What a batcher flushes into. Returns false when rows were dropped.
#[async_trait]
pub trait RecorderWrite: Send + Sync {
    async fn write(&self, table: &str, rows: Vec<Value>) -> bool;
}

// ---------------------------------------------------------------------------
// DIRECT writer
// ---------------------------------------------------------------------------

pub struct DataWriter {
    sink: Arc<dyn SinkClient>,
    wal: WalWriter,
    max_retries: u32,
    base_delay: Duration,
    /// Rows with `exch_ts` or `ingest_ts` further than this in the future
    /// are dropped outright. Zero disables the filter.
    max_future_s: i64,
    metrics: Arc<MetricsRegistry>,
}

impl DataWriter {
    pub fn new(
        sink: Arc<dyn SinkClient>,
        wal: WalWriter,
        max_retries: u32,
        base_delay: Duration,
        max_future_s: i64,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            sink,
            wal,
            max_retries,
            base_delay,
            max_future_s,
            metrics,
        }
    }

    // -------------------------------------------------------------------------
    // Sanitization
    // -------------------------------------------------------------------------

    /// Drop rows with impossible future timestamps and repair ordering:
    /// `ingest_ts` can never precede `exch_ts`.
    pub fn sanitize_timestamps(&self, table: &str, rows: Vec<Value>) -> Vec<Value> {
        if self.max_future_s == 0 {
            return rows
                .into_iter()
                .map(|row| fix_ts_order(row))
                .collect();
        }

        let limit_ns = timebase::now_ns() + self.max_future_s * 1_000_000_000;
        let before = rows.len();
        let kept: Vec<Value> = rows
            .into_iter()
            .filter(|row| {
                let exch_ok = ts_of(row, "exch_ts").map_or(true, |ts| ts <= limit_ns);
                let ingest_ok = ts_of(row, "ingest_ts").map_or(true, |ts| ts <= limit_ns);
                exch_ok && ingest_ok
            })
            .map(fix_ts_order)
            .collect();

        let dropped = before - kept.len();
        if dropped > 0 {
            warn!(table, dropped, "rows dropped for future timestamps");
            for _ in 0..dropped {
                self.metrics.record_recorder_drop(table, "future_ts");
            }
        }
        kept
    }

    // -------------------------------------------------------------------------
    // Backoff
    // -------------------------------------------------------------------------

    /// `base * 2^attempt`, jittered by a uniform factor in [0.9, 1.1).
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.as_secs_f64() * 2f64.powi(attempt as i32);
        let jitter = rand::thread_rng().gen_range(0.9..1.1);
        Duration::from_secs_f64(exp * jitter)
    }
}

#[async_trait]
impl RecorderWrite for DataWriter {
    async fn write(&self, table: &str, rows: Vec<Value>) -> bool {
        let rows = self.sanitize_timestamps(table, rows);
        if rows.is_empty() {
            return true;
        }

        for attempt in 0..=self.max_retries {
            match self.sink.write_rows(table, &rows).await {
                Ok(()) => {
                    self.metrics
                        .recorder_rows_total
                        .fetch_add(rows.len() as u64, std::sync::atomic::Ordering::Relaxed);
                    return true;
                }
                Err(e) => {
                    if attempt < self.max_retries {
                        let delay = self.backoff_delay(attempt);
                        warn!(
                            table,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "sink write failed, backing off"
                        );
                        tokio::time::sleep(delay).await;
                    } else {
                        error!(table, error = %e, "sink write failed after retries, spilling to WAL");
                    }
                }
            }
        }

        // Persistent sink failure: the WAL is the fallback sink.
        match self.wal.write(table, &rows) {
            Ok(_) => true,
            Err(e) => {
                error!(table, error = %e, "WAL spill failed, rows lost");
                for _ in 0..rows.len() {
                    self.metrics.record_recorder_drop(table, "wal_spill_failed");
                }
                false
            }
        }
    }
}

fn ts_of(row: &Value, key: &str) -> Option<i64> {
    row.get(key).and_then(Value::as_i64)
}

/// Raise `ingest_ts` to `exch_ts` when the pair is out of order.
fn fix_ts_order(mut row: Value) -> Value {
    if let (Some(exch), Some(ingest)) = (ts_of(&row, "exch_ts"), ts_of(&row, "ingest_ts")) {
        if ingest < exch {
            row["ingest_ts"] = Value::from(exch);
        }
    }
    row
}

impl std::fmt::Debug for DataWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataWriter")
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn writer_with(
        sink: Arc<MemorySink>,
        dir: &std::path::Path,
        max_future_s: i64,
    ) -> DataWriter {
        let metrics = Arc::new(MetricsRegistry::new());
        DataWriter::new(
            sink,
            WalWriter::new(dir, metrics.clone()),
            2,
            Duration::from_millis(1),
            max_future_s,
            metrics,
        )
    }

    #[test]
    fn sanitize_drops_future_rows_and_fixes_order() {
        let dir = tempfile::tempdir().unwrap();
        let writer = writer_with(Arc::new(MemorySink::new()), dir.path(), 1);

        let now = timebase::now_ns();
        let rows = vec![
            json!({"exch_ts": now + 2_000_000_000, "ingest_ts": now}),
            json!({"exch_ts": now, "ingest_ts": now + 3_000_000_000}),
            json!({"exch_ts": now, "ingest_ts": now - 1}),
            json!({"exch_ts": null, "ingest_ts": null}),
        ];

        let kept = writer.sanitize_timestamps("market_data", rows);

        // Row 0 (future exch) and row 1 (future ingest) are dropped.
        assert_eq!(kept.len(), 2);
        // Row 2's ingest_ts is raised to its exch_ts.
        assert_eq!(kept[0]["ingest_ts"].as_i64(), Some(now));
        // Null timestamps pass through untouched.
        assert!(kept[1]["exch_ts"].is_null());
    }

    #[test]
    fn sanitize_with_filter_disabled_still_fixes_order() {
        let dir = tempfile::tempdir().unwrap();
        let writer = writer_with(Arc::new(MemorySink::new()), dir.path(), 0);

        let rows = vec![
            json!({"exch_ts": 200, "ingest_ts": 100}),
            json!({"exch_ts": 0, "ingest_ts": 50}),
        ];
        let kept = writer.sanitize_timestamps("market_data", rows);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0]["ingest_ts"].as_i64(), Some(200));
        assert_eq!(kept[1]["ingest_ts"].as_i64(), Some(50));
    }

    #[test]
    fn backoff_doubles_with_bounded_jitter() {
        let dir = tempfile::tempdir().unwrap();
        let writer = DataWriter::new(
            Arc::new(MemorySink::new()),
            WalWriter::new(dir.path(), Arc::new(MetricsRegistry::new())),
            3,
            Duration::from_millis(500),
            0,
            Arc::new(MetricsRegistry::new()),
        );

        for _ in 0..20 {
            let d = writer.backoff_delay(2).as_secs_f64();
            // 0.5 * 2^2 = 2.0, jittered into [1.8, 2.2).
            assert!((1.8..2.2).contains(&d), "delay {d}");
        }
    }

    #[tokio::test]
    async fn transient_failure_retries_then_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(MemorySink::failing(1));
        let writer = writer_with(sink.clone(), dir.path(), 0);

        let ok = writer.write("orders", vec![json!({"order_id": "O1"})]).await;
        assert!(ok);
        assert_eq!(sink.calls().len(), 1);
    }

    #[tokio::test]
    async fn persistent_failure_spills_to_wal() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(MemorySink::failing(100));
        let writer = writer_with(sink, dir.path(), 0);

        let ok = writer.write("orders", vec![json!({"order_id": "O1"})]).await;
        assert!(ok, "spilled rows count as preserved");

        let spilled: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.file_name()
                    .to_string_lossy()
                    .starts_with("orders_")
            })
            .collect();
        assert_eq!(spilled.len(), 1);
    }
}
