// =============================================================================
// Strategy — cooperative in-process strategies and their runtime
// =============================================================================

pub mod market_maker;
pub mod registry;
pub mod runtime;

pub use market_maker::SpreadMaker;
pub use registry::{StrategyConfig, StrategyRegistry};
pub use runtime::{Strategy, StrategyContext, StrategyRuntime};
