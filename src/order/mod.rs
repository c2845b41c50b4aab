// =============================================================================
// Order — outbound dispatch path: limits, breaker, DLQ, broker bookkeeping
// =============================================================================

pub mod adapter;
pub mod circuit_breaker;
pub mod deadletter;
pub mod ids;
pub mod rate_limiter;

pub use adapter::OrderAdapter;
pub use circuit_breaker::CircuitBreaker;
pub use deadletter::{DeadLetterQueue, RejectionReason};
pub use ids::OrderIdResolver;
pub use rate_limiter::RateLimiter;
