// =============================================================================
// Event model — typed events flowing through the ring bus
// =============================================================================
//
// All prices, fees, and taxes are fixed-point integers scaled per symbol
// (default x10000). Only the broker boundary descales to floats.
//
// Ordering of `OrderStatus` matters: any status >= Filled is terminal and
// triggers live-order cleanup in the order adapter.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::risk::storm_guard::StormGuardState;

// ---------------------------------------------------------------------------
// Primitive enums
// ---------------------------------------------------------------------------

/// Trade direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// +1 for Buy, -1 for Sell.
    pub fn sign(&self) -> i64 {
        match self {
            Self::Buy => 1,
            Self::Sell => -1,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

/// What a strategy wants done with an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntentType {
    New,
    Cancel,
    Modify,
}

impl std::fmt::Display for IntentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::New => write!(f, "NEW"),
            Self::Cancel => write!(f, "CANCEL"),
            Self::Modify => write!(f, "MODIFY"),
        }
    }
}

/// Time-in-force for an intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Tif {
    Limit,
    Ioc,
    Fok,
    Rod,
}

/// Normalized order life-cycle status.
///
/// Discriminants are ordered so that `status as u8 >= Filled as u8` is the
/// terminal-state test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OrderStatus {
    PendingSubmit = 0,
    Submitted = 1,
    PartiallyFilled = 2,
    Filled = 3,
    Cancelled = 4,
    Failed = 5,
}

impl OrderStatus {
    /// Filled, Cancelled, and Failed end an order's life.
    pub fn is_terminal(&self) -> bool {
        *self >= Self::Filled
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PendingSubmit => "PENDING_SUBMIT",
            Self::Submitted => "SUBMITTED",
            Self::PartiallyFilled => "PARTIALLY_FILLED",
            Self::Filled => "FILLED",
            Self::Cancelled => "CANCELLED",
            Self::Failed => "FAILED",
        }
    }
}

// ---------------------------------------------------------------------------
// Market data events
// ---------------------------------------------------------------------------

/// Common metadata attached to every market-data event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMeta {
    /// Publisher-assigned monotonic sequence.
    pub seq: u64,
    /// Logical topic ("tick", "bidask").
    pub topic: String,
    /// Exchange timestamp (ns).
    pub source_ts_ns: i64,
    /// Local ingest timestamp (ns), skew-clamped.
    pub local_ts_ns: i64,
}

/// A normalized trade print.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickEvent {
    pub meta: EventMeta,
    pub symbol: String,
    pub price: i64,
    pub volume: i64,
    pub total_volume: i64,
    pub bid_side_total_vol: i64,
    pub ask_side_total_vol: i64,
    pub is_simtrade: bool,
    pub is_odd_lot: bool,
}

/// A normalized L1/L5 quote update. Bids sorted descending, asks ascending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BidAskEvent {
    pub meta: EventMeta,
    pub symbol: String,
    /// (scaled price, volume) pairs.
    pub bids: Vec<(i64, i64)>,
    pub asks: Vec<(i64, i64)>,
    pub is_snapshot: bool,
}

/// Derived book metrics emitted by the LOB engine.
///
/// `best_bid` / `best_ask` / `mid_price` / `spread` are `None` when the
/// corresponding side(s) of the book are empty — never a silent zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LobStatsEvent {
    pub symbol: String,
    pub ts_ns: i64,
    pub best_bid: Option<i64>,
    pub best_ask: Option<i64>,
    pub mid_price: Option<i64>,
    pub spread: Option<i64>,
    /// (bid_depth - ask_depth) / (bid_depth + ask_depth), 0.0 on empty book.
    pub imbalance: f64,
    pub bid_depth: i64,
    pub ask_depth: i64,
}

// ---------------------------------------------------------------------------
// Strategy intents and risk-approved commands
// ---------------------------------------------------------------------------

/// What a strategy asks the risk engine to do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderIntent {
    pub intent_id: u64,
    pub strategy_id: String,
    pub symbol: String,
    pub intent_type: IntentType,
    pub side: Side,
    pub price: i64,
    pub qty: i64,
    pub tif: Tif,
    /// For CANCEL/MODIFY: the order key being targeted.
    pub target_order_id: Option<String>,
    pub timestamp_ns: i64,
}

impl OrderIntent {
    /// Canonical live-order key: `strategy_id:intent_id`.
    pub fn order_key(&self) -> String {
        format!("{}:{}", self.strategy_id, self.intent_id)
    }
}

/// A risk-approved intent carrying its outbound deadline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCommand {
    pub cmd_id: u64,
    pub intent: OrderIntent,
    /// Hard deadline: the gateway must reject past this point.
    pub deadline_ns: i64,
    /// StormGuard state at approval time.
    pub storm_guard_state: StormGuardState,
}

// ---------------------------------------------------------------------------
// Execution events
// ---------------------------------------------------------------------------

/// Normalized order status update from the broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderEvent {
    pub order_id: String,
    pub strategy_id: String,
    pub symbol: String,
    pub status: OrderStatus,
    pub submitted_qty: i64,
    pub filled_qty: i64,
    pub remaining_qty: i64,
    pub price: i64,
    pub side: Side,
    pub ingest_ts_ns: i64,
    pub broker_ts_ns: i64,
}

/// Normalized trade execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FillEvent {
    pub fill_id: String,
    pub account_id: String,
    pub order_id: String,
    pub strategy_id: String,
    pub symbol: String,
    pub side: Side,
    pub qty: i64,
    pub price: i64,
    pub fee: i64,
    pub tax: i64,
    pub ingest_ts_ns: i64,
    pub match_ts_ns: i64,
}

/// Incremental position update produced by the position store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PositionDelta {
    pub account_id: String,
    pub strategy_id: String,
    pub symbol: String,
    pub net_qty: i64,
    pub avg_price: i64,
    pub realized_pnl: i64,
    pub unrealized_pnl: i64,
    /// "FILL", "RECONCILE", or "MARK".
    pub delta_source: &'static str,
}

// ---------------------------------------------------------------------------
// Bus envelope
// ---------------------------------------------------------------------------

/// Tagged union of everything that travels on the ring bus.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum BusEvent {
    Tick(TickEvent),
    BidAsk(BidAskEvent),
    Stats(LobStatsEvent),
    Order(OrderEvent),
    Fill(FillEvent),
    Position(PositionDelta),
}

impl BusEvent {
    /// Symbol this event refers to, for per-strategy filtering.
    pub fn symbol(&self) -> &str {
        match self {
            Self::Tick(e) => &e.symbol,
            Self::BidAsk(e) => &e.symbol,
            Self::Stats(e) => &e.symbol,
            Self::Order(e) => &e.symbol,
            Self::Fill(e) => &e.symbol,
            Self::Position(e) => &e.symbol,
        }
    }
}
