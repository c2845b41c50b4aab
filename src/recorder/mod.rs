// =============================================================================
// Recorder — event capture to the analytics store, durable via WAL
// =============================================================================
//
// Pipeline: bus -> mapper -> per-table batcher -> writer. Two writer modes:
//   DIRECT     sink writes with retry, WAL spill on persistent failure
//   WAL_FIRST  WAL only, disk-pressure gated; a loader ships files later
// =============================================================================

pub mod batcher;
pub mod claims;
pub mod disk_monitor;
pub mod mapper;
pub mod replay_contract;
pub mod service;
pub mod wal;
pub mod wal_first;
pub mod writer;

pub use batcher::{BackpressurePolicy, Batcher};
pub use claims::FileClaimRegistry;
pub use disk_monitor::{DiskPressureLevel, DiskPressureMonitor, TablePolicy};
pub use mapper::{map_event, Table};
pub use replay_contract::{FileOrdering, ReplayContract};
pub use service::{RecorderMode, RecorderService, RecorderSettings};
pub use wal::{WalReplayer, WalWriter};
pub use wal_first::WalFirstWriter;
pub use writer::{DataWriter, MemorySink, RecorderWrite, SinkClient};
