// =============================================================================
// Recorder Service — bus bridge feeding per-table batchers
// =============================================================================
//
// Owns one batcher per destination table and the writer behind them. The
// mode — DIRECT (sink with WAL fallback) or WAL_FIRST (WAL only, gated by
// disk pressure) — is chosen once at startup from the environment; switching
// modes requires a restart.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::bus::BusConsumer;
use crate::metrics::MetricsRegistry;
use crate::recorder::batcher::{BackpressurePolicy, Batcher};
use crate::recorder::mapper::{map_event, Table};
use crate::recorder::writer::RecorderWrite;
use crate::symbols::SymbolMetadata;

// ---------------------------------------------------------------------------
// Mode selection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderMode {
    Direct,
    WalFirst,
}

impl RecorderMode {
    /// Read the mode from env. `TEMPEST_DISABLE_ANALYTICS` is the deprecated
    /// alias for wal_first kept for old deployment manifests.
    pub fn from_env() -> Self {
        if std::env::var("TEMPEST_DISABLE_ANALYTICS").is_ok() {
            return Self::WalFirst;
        }
        match std::env::var("TEMPEST_RECORDER_MODE")
            .unwrap_or_else(|_| "direct".into())
            .trim()
            .to_lowercase()
            .as_str()
        {
            "direct" => Self::Direct,
            "wal_first" => Self::WalFirst,
            other => {
                warn!(value = other, "unknown recorder mode, falling back to direct");
                Self::Direct
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::WalFirst => "wal_first",
        }
    }
}

// ---------------------------------------------------------------------------
// Batcher settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RecorderSettings {
    pub flush_limit: usize,
    pub flush_interval_ms: u64,
    pub max_buffer_size: usize,
    pub policy: BackpressurePolicy,
}

impl Default for RecorderSettings {
    fn default() -> Self {
        Self {
            flush_limit: 1_000,
            flush_interval_ms: 500,
            max_buffer_size: 50_000,
            policy: BackpressurePolicy::DropOldest,
        }
    }
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

pub struct RecorderService {
    batchers: HashMap<Table, Arc<Batcher>>,
    metadata: Arc<SymbolMetadata>,
    flush_interval: Duration,
}

impl RecorderService {
    pub fn new(
        writer: Arc<dyn RecorderWrite>,
        metadata: Arc<SymbolMetadata>,
        settings: RecorderSettings,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        let mut batchers = HashMap::new();
        for table in Table::ALL {
            batchers.insert(
                table,
                Arc::new(Batcher::new(
                    table,
                    settings.flush_limit,
                    settings.flush_interval_ms,
                    writer.clone(),
                    settings.max_buffer_size,
                    settings.policy,
                    metrics.clone(),
                )),
            );
        }
        Self {
            batchers,
            metadata,
            flush_interval: Duration::from_millis(settings.flush_interval_ms),
        }
    }

    pub fn batcher(&self, table: Table) -> Arc<Batcher> {
        self.batchers[&table].clone()
    }

    /// Consume the bus and feed batchers until shutdown.
    pub async fn run(self: Arc<Self>, mut consumer: BusConsumer) {
        info!("recorder service started");
        loop {
            let batch = consumer.next_batch(256).await;
            for event in &batch {
                if let Some((table, row)) = map_event(event, &self.metadata) {
                    self.batchers[&table].add(row).await;
                }
            }
        }
    }

    /// Periodic flush ticker: drives interval-based flushes for every table.
    pub async fn run_flush_ticker(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.flush_interval);
        loop {
            interval.tick().await;
            for batcher in self.batchers.values() {
                batcher.check_flush().await;
            }
        }
    }

    /// Flush everything (shutdown path).
    pub async fn flush_all(&self) {
        for batcher in self.batchers.values() {
            batcher.force_flush().await;
        }
    }
}

impl std::fmt::Debug for RecorderService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecorderService")
            .field("tables", &self.batchers.len())
            .finish()
    }
}
