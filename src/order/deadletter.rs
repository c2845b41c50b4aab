// =============================================================================
// Dead-Letter Queue — durable record of rejected and failed commands
// =============================================================================
//
// Entries buffer in memory and flush to a jsonl file when the buffer fills
// (or on explicit flush). One file per flush, named `dlq_<nanos>.jsonl`.
// Reading tolerates corrupt lines: post-mortem tooling should see every
// entry that survived, not fail on the first bad one.
// =============================================================================

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::timebase;

/// Why a command landed in the DLQ.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    RateLimit,
    CircuitOpen,
    DeadlineExceeded,
    BrokerError,
    #[serde(untagged)]
    Other(String),
}

/// One dead-lettered command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub timestamp_ns: i64,
    pub order_id: String,
    pub strategy_id: String,
    pub symbol: String,
    pub side: String,
    pub price: i64,
    pub qty: i64,
    pub reason: RejectionReason,
    pub error_message: String,
    pub intent_type: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub trace_id: String,
}

pub struct DeadLetterQueue {
    dlq_dir: PathBuf,
    buffer: Mutex<Vec<DeadLetterEntry>>,
    max_buffer_size: usize,
    total_entries: AtomicU64,
    total_flushed: AtomicU64,
}

impl DeadLetterQueue {
    pub fn new(dlq_dir: impl AsRef<Path>, max_buffer_size: usize) -> Self {
        let dlq_dir = dlq_dir.as_ref().to_path_buf();
        if let Err(e) = std::fs::create_dir_all(&dlq_dir) {
            error!(dir = %dlq_dir.display(), error = %e, "failed to create DLQ directory");
        }
        Self {
            dlq_dir,
            buffer: Mutex::new(Vec::new()),
            max_buffer_size: max_buffer_size.max(1),
            total_entries: AtomicU64::new(0),
            total_flushed: AtomicU64::new(0),
        }
    }

    // -------------------------------------------------------------------------
    // Writes
    // -------------------------------------------------------------------------

    /// Buffer one entry; flushes to disk when the buffer reaches capacity.
    #[allow(clippy::too_many_arguments)]
    pub fn add(
        &self,
        order_id: &str,
        strategy_id: &str,
        symbol: &str,
        side: &str,
        price: i64,
        qty: i64,
        intent_type: &str,
        reason: RejectionReason,
        error_message: &str,
    ) {
        let entry = DeadLetterEntry {
            timestamp_ns: timebase::now_ns(),
            order_id: order_id.to_string(),
            strategy_id: strategy_id.to_string(),
            symbol: symbol.to_string(),
            side: side.to_string(),
            price,
            qty,
            reason,
            error_message: error_message.to_string(),
            intent_type: intent_type.to_string(),
            metadata: HashMap::new(),
            retry_count: 0,
            trace_id: Uuid::new_v4().to_string(),
        };

        self.total_entries.fetch_add(1, Ordering::Relaxed);
        let mut buffer = self.buffer.lock();
        buffer.push(entry);
        if buffer.len() >= self.max_buffer_size {
            let drained: Vec<DeadLetterEntry> = buffer.drain(..).collect();
            drop(buffer);
            self.flush_entries(&drained);
        }
    }

    /// Force the buffer to disk.
    pub fn flush(&self) {
        let drained: Vec<DeadLetterEntry> = {
            let mut buffer = self.buffer.lock();
            buffer.drain(..).collect()
        };
        if !drained.is_empty() {
            self.flush_entries(&drained);
        }
    }

    fn flush_entries(&self, entries: &[DeadLetterEntry]) {
        let path = self.dlq_dir.join(format!("dlq_{}.jsonl", timebase::now_ns()));
        let mut lines = String::new();
        for entry in entries {
            match serde_json::to_string(entry) {
                Ok(line) => {
                    lines.push_str(&line);
                    lines.push('\n');
                }
                Err(e) => error!(error = %e, "failed to serialize DLQ entry"),
            }
        }
        match std::fs::write(&path, lines) {
            Ok(()) => {
                self.total_flushed
                    .fetch_add(entries.len() as u64, Ordering::Relaxed);
                info!(file = %path.display(), count = entries.len(), "DLQ flushed");
            }
            Err(e) => error!(file = %path.display(), error = %e, "DLQ flush failed"),
        }
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    /// Every entry on disk, skipping corrupt lines.
    pub fn read_all(&self) -> Vec<DeadLetterEntry> {
        let mut entries = Vec::new();
        let mut paths: Vec<PathBuf> = match std::fs::read_dir(&self.dlq_dir) {
            Ok(rd) => rd
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| {
                    p.file_name()
                        .and_then(|n| n.to_str())
                        .map(|n| n.starts_with("dlq_") && n.ends_with(".jsonl"))
                        .unwrap_or(false)
                })
                .collect(),
            Err(_) => return entries,
        };
        paths.sort();

        for path in paths {
            let Ok(content) = std::fs::read_to_string(&path) else {
                continue;
            };
            for line in content.lines() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<DeadLetterEntry>(line) {
                    Ok(entry) => entries.push(entry),
                    Err(e) => warn!(file = %path.display(), error = %e, "skipping corrupt DLQ line"),
                }
            }
        }
        entries
    }

    /// Counters for the status API.
    pub fn stats(&self) -> DeadLetterStats {
        DeadLetterStats {
            buffer_size: self.buffer.lock().len(),
            total_entries: self.total_entries.load(Ordering::Relaxed),
            total_flushed: self.total_flushed.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DeadLetterStats {
    pub buffer_size: usize,
    pub total_entries: u64,
    pub total_flushed: u64,
}

impl std::fmt::Debug for DeadLetterQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeadLetterQueue")
            .field("dir", &self.dlq_dir)
            .field("buffer_size", &self.buffer.lock().len())
            .finish()
    }
}
