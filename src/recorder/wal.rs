// =============================================================================
// Write-Ahead Log — durable jsonl spill files and ordered replay
// =============================================================================
//
// File layout: `<wal_dir>/<table>_<nanos>.jsonl`, one JSON row per line.
// Creation is atomic: write to a `.tmp` sibling, fsync, rename. Filenames
// encode write time, so lexicographic-by-timestamp replay preserves order.
//
// Replay sends each file's rows to the sink; success archives the file into
// `<wal_dir>/archive/`, failure stops the scan so ordering is never broken.
// =============================================================================

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::{error, info, warn};

use crate::metrics::MetricsRegistry;
use crate::recorder::writer::SinkClient;
use crate::timebase;

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

pub struct WalWriter {
    wal_dir: PathBuf,
    metrics: Arc<MetricsRegistry>,
}

impl WalWriter {
    pub fn new(wal_dir: impl AsRef<Path>, metrics: Arc<MetricsRegistry>) -> Self {
        let wal_dir = wal_dir.as_ref().to_path_buf();
        if let Err(e) = std::fs::create_dir_all(&wal_dir) {
            error!(dir = %wal_dir.display(), error = %e, "failed to create WAL directory");
        }
        Self { wal_dir, metrics }
    }

    pub fn wal_dir(&self) -> &Path {
        &self.wal_dir
    }

    /// Spill one batch. Returns the final file path.
    pub fn write(&self, table: &str, rows: &[Value]) -> Result<PathBuf> {
        let final_path = self
            .wal_dir
            .join(format!("{table}_{}.jsonl", timebase::now_ns()));
        let tmp_path = final_path.with_extension("jsonl.tmp");

        {
            let mut file = std::fs::File::create(&tmp_path)
                .with_context(|| format!("failed to create {}", tmp_path.display()))?;
            for row in rows {
                serde_json::to_writer(&mut file, row)
                    .with_context(|| format!("failed to serialize row for {table}"))?;
                file.write_all(b"\n")?;
            }
            file.sync_all()
                .with_context(|| format!("failed to fsync {}", tmp_path.display()))?;
        }

        std::fs::rename(&tmp_path, &final_path).with_context(|| {
            format!(
                "failed to rename {} -> {}",
                tmp_path.display(),
                final_path.display()
            )
        })?;

        self.metrics
            .wal_files_written_total
            .fetch_add(1, Ordering::Relaxed);
        info!(table, count = rows.len(), file = %final_path.display(), "batch spilled to WAL");
        Ok(final_path)
    }
}

// ---------------------------------------------------------------------------
// Replayer
// ---------------------------------------------------------------------------

pub struct WalReplayer {
    wal_dir: PathBuf,
    archive_dir: PathBuf,
    metrics: Arc<MetricsRegistry>,
}

impl WalReplayer {
    pub fn new(wal_dir: impl AsRef<Path>, metrics: Arc<MetricsRegistry>) -> Self {
        let wal_dir = wal_dir.as_ref().to_path_buf();
        let archive_dir = wal_dir.join("archive");
        Self {
            wal_dir,
            archive_dir,
            metrics,
        }
    }

    pub fn archive_dir(&self) -> &Path {
        &self.archive_dir
    }

    /// Replay every pending WAL file in filename order.
    ///
    /// Returns the number of files archived. Stops at the first send failure
    /// so later files never overtake earlier ones.
    pub async fn replay(&self, sink: &dyn SinkClient) -> Result<usize> {
        let mut files = self.pending_files()?;
        if files.is_empty() {
            return Ok(0);
        }
        files.sort();
        info!(count = files.len(), "WAL replay starting");

        let mut archived = 0usize;
        for path in files {
            let Some(table) = table_from_filename(&path) else {
                warn!(file = %path.display(), "unparseable WAL filename, skipping");
                continue;
            };

            let rows = match read_rows(&path) {
                Ok(rows) => rows,
                Err(e) => {
                    error!(file = %path.display(), error = %e, "corrupt WAL file, leaving in place");
                    continue;
                }
            };

            if rows.is_empty() {
                std::fs::remove_file(&path).ok();
                continue;
            }

            match sink.write_rows(&table, &rows).await {
                Ok(()) => {
                    self.archive(&path)?;
                    archived += 1;
                    self.metrics
                        .wal_files_replayed_total
                        .fetch_add(1, Ordering::Relaxed);
                    info!(file = %path.display(), rows = rows.len(), "WAL file replayed and archived");
                }
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "replay send failed, stopping to preserve order");
                    break;
                }
            }
        }
        Ok(archived)
    }

    /// WAL files waiting for replay (excludes archive/ and tmp files).
    pub fn pending_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        let rd = match std::fs::read_dir(&self.wal_dir) {
            Ok(rd) => rd,
            Err(_) => return Ok(files),
        };
        for entry in rd.filter_map(|e| e.ok()) {
            let path = entry.path();
            if path.is_file()
                && path.extension().and_then(|e| e.to_str()) == Some("jsonl")
            {
                files.push(path);
            }
        }
        Ok(files)
    }

    fn archive(&self, path: &Path) -> Result<()> {
        std::fs::create_dir_all(&self.archive_dir)
            .with_context(|| format!("failed to create {}", self.archive_dir.display()))?;
        let target = self
            .archive_dir
            .join(path.file_name().unwrap_or_default());
        std::fs::rename(path, &target)
            .with_context(|| format!("failed to archive {}", path.display()))?;
        Ok(())
    }
}

/// `orders_1700000000000000000.jsonl` -> `orders`. Table names may contain
/// underscores; the timestamp is everything after the last one.
fn table_from_filename(path: &Path) -> Option<String> {
    let stem = path.file_stem()?.to_str()?;
    let (table, ts) = stem.rsplit_once('_')?;
    ts.parse::<u64>().ok()?;
    Some(table.to_string())
}

fn read_rows(path: &Path) -> Result<Vec<Value>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let mut rows = Vec::new();
    for line in content.lines() {
        if line.trim().is_empty() {
            continue;
        }
        rows.push(
            serde_json::from_str(line)
                .with_context(|| format!("bad JSON line in {}", path.display()))?,
        );
    }
    Ok(rows)
}
