// =============================================================================
// Market Data — normalization, book state, and the ingest pump
// =============================================================================

pub mod lob;
pub mod normalizer;
pub mod service;

pub use lob::{LobBook, LobEngine, StatsMode};
pub use normalizer::MarketDataNormalizer;
pub use service::{MarketDataService, RawMarketEvent};
