// =============================================================================
// Execution — inbound broker reports, position accounting, reconciliation
// =============================================================================

pub mod normalizer;
pub mod positions;
pub mod reconcile;
pub mod router;

pub use normalizer::{ExecutionNormalizer, RawExecEvent};
pub use positions::{Position, PositionKey, PositionStore};
pub use reconcile::{reconcile_once, ReconcileReport};
pub use router::ExecutionRouter;
