// =============================================================================
// LOB Engine — per-symbol limit-order-book state and derived stats
// =============================================================================
//
// Books are sorted maps price -> volume per side. Snapshots clear both sides
// and insert every level; incremental updates set a level or delete it when
// volume is zero. Trade ticks never mutate levels, only `last_price`.
//
// Invariants: best bid < best ask when both sides are populated (a crossed
// snapshot is logged at error level and applied anyway — the feed is the
// source of truth), and zero-volume levels never persist.
// =============================================================================

use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;
use serde::Serialize;
use tracing::error;

use crate::events::{BidAskEvent, LobStatsEvent, TickEvent};

// ---------------------------------------------------------------------------
// Book
// ---------------------------------------------------------------------------

/// One symbol's book. Prices and volumes are scaled integers.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LobBook {
    pub bids: BTreeMap<i64, i64>,
    pub asks: BTreeMap<i64, i64>,
    /// Bumped on every mutation.
    pub version: u64,
    pub last_update_ts_ns: i64,
    pub last_price: i64,
}

impl LobBook {
    pub fn best_bid(&self) -> Option<i64> {
        self.bids.keys().next_back().copied()
    }

    pub fn best_ask(&self) -> Option<i64> {
        self.asks.keys().next().copied()
    }

    pub fn bid_depth(&self) -> i64 {
        self.bids.values().sum()
    }

    pub fn ask_depth(&self) -> i64 {
        self.asks.values().sum()
    }

    fn is_crossed(&self) -> bool {
        match (self.best_bid(), self.best_ask()) {
            (Some(bb), Some(ba)) => bb >= ba,
            _ => false,
        }
    }
}

/// Stats recomputation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatsMode {
    /// Recompute on every applied event.
    Eager,
    /// Recompute only when stats are requested.
    Lazy,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Owner of all books. Mutation is expected from the market-data task only;
/// other consumers take immutable snapshots.
pub struct LobEngine {
    books: RwLock<HashMap<String, LobBook>>,
    stats_mode: StatsMode,
}

impl LobEngine {
    pub fn new(stats_mode: StatsMode) -> Self {
        Self {
            books: RwLock::new(HashMap::new()),
            stats_mode,
        }
    }

    // -------------------------------------------------------------------------
    // Event application
    // -------------------------------------------------------------------------

    /// Apply a quote update. Snapshot semantics replace both sides;
    /// incremental semantics set/delete individual levels.
    ///
    /// Returns fresh stats in eager mode, `None` in lazy mode.
    pub fn apply_bidask(&self, event: &BidAskEvent) -> Option<LobStatsEvent> {
        let mut books = self.books.write();
        let book = books.entry(event.symbol.clone()).or_default();

        if event.is_snapshot {
            book.bids.clear();
            book.asks.clear();
            for &(price, volume) in &event.bids {
                if volume > 0 {
                    book.bids.insert(price, volume);
                }
            }
            for &(price, volume) in &event.asks {
                if volume > 0 {
                    book.asks.insert(price, volume);
                }
            }
        } else {
            for &(price, volume) in &event.bids {
                if volume == 0 {
                    book.bids.remove(&price);
                } else {
                    book.bids.insert(price, volume);
                }
            }
            for &(price, volume) in &event.asks {
                if volume == 0 {
                    book.asks.remove(&price);
                } else {
                    book.asks.insert(price, volume);
                }
            }
        }

        book.version += 1;
        book.last_update_ts_ns = event.meta.source_ts_ns;

        if event.is_snapshot && book.is_crossed() {
            error!(
                symbol = %event.symbol,
                best_bid = ?book.best_bid(),
                best_ask = ?book.best_ask(),
                "crossed book in snapshot"
            );
        }

        match self.stats_mode {
            StatsMode::Eager => Some(compute_stats(&event.symbol, book, event.meta.source_ts_ns)),
            StatsMode::Lazy => None,
        }
    }

    /// Apply a trade tick: `last_price` only, levels untouched.
    pub fn apply_tick(&self, event: &TickEvent) -> Option<LobStatsEvent> {
        let mut books = self.books.write();
        let book = books.entry(event.symbol.clone()).or_default();
        book.last_price = event.price;
        book.version += 1;
        book.last_update_ts_ns = event.meta.source_ts_ns;

        match self.stats_mode {
            StatsMode::Eager => Some(compute_stats(&event.symbol, book, event.meta.source_ts_ns)),
            StatsMode::Lazy => None,
        }
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    /// Immutable snapshot of a symbol's book, creating an empty one on miss.
    pub fn book(&self, symbol: &str) -> LobBook {
        let mut books = self.books.write();
        books.entry(symbol.to_string()).or_default().clone()
    }

    /// Current stats for `symbol` (creates an empty book on miss).
    pub fn stats(&self, symbol: &str, ts_ns: i64) -> LobStatsEvent {
        let mut books = self.books.write();
        let book = books.entry(symbol.to_string()).or_default();
        compute_stats(symbol, book, ts_ns)
    }

    /// Last trade price, 0 before the first tick.
    pub fn last_price(&self, symbol: &str) -> i64 {
        self.books
            .read()
            .get(symbol)
            .map(|b| b.last_price)
            .unwrap_or(0)
    }

    pub fn symbols(&self) -> Vec<String> {
        self.books.read().keys().cloned().collect()
    }
}

/// Derive stats from a book. Mid/spread are `None` unless both sides exist.
fn compute_stats(symbol: &str, book: &LobBook, ts_ns: i64) -> LobStatsEvent {
    let best_bid = book.best_bid();
    let best_ask = book.best_ask();
    let (mid_price, spread) = match (best_bid, best_ask) {
        (Some(bb), Some(ba)) => (Some((bb + ba) / 2), Some(ba - bb)),
        _ => (None, None),
    };

    let bid_depth = book.bid_depth();
    let ask_depth = book.ask_depth();
    let total = bid_depth + ask_depth;
    let imbalance = if total > 0 {
        (bid_depth - ask_depth) as f64 / total as f64
    } else {
        0.0
    };

    LobStatsEvent {
        symbol: symbol.to_string(),
        ts_ns,
        best_bid,
        best_ask,
        mid_price,
        spread,
        imbalance,
        bid_depth,
        ask_depth,
    }
}

impl std::fmt::Debug for LobEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LobEngine")
            .field("symbols", &self.books.read().len())
            .field("stats_mode", &self.stats_mode)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventMeta;

    fn meta(ts: i64) -> EventMeta {
        EventMeta {
            seq: 0,
            topic: "bidask".into(),
            source_ts_ns: ts,
            local_ts_ns: ts,
        }
    }

    fn snapshot(symbol: &str, bids: Vec<(i64, i64)>, asks: Vec<(i64, i64)>) -> BidAskEvent {
        BidAskEvent {
            meta: meta(1_000),
            symbol: symbol.into(),
            bids,
            asks,
            is_snapshot: true,
        }
    }

    #[test]
    fn snapshot_application_and_stats() {
        let engine = LobEngine::new(StatsMode::Eager);
        let stats = engine
            .apply_bidask(&snapshot(
                "2330",
                vec![(5_000_000, 10)],
                vec![(5_010_000, 20)],
            ))
            .unwrap();

        assert_eq!(stats.best_bid, Some(5_000_000));
        assert_eq!(stats.best_ask, Some(5_010_000));
        assert_eq!(stats.mid_price, Some(5_005_000));
        assert_eq!(stats.spread, Some(10_000));
        assert_eq!(stats.bid_depth, 10);
        assert_eq!(stats.ask_depth, 20);
        assert!((stats.imbalance - (-10.0 / 30.0)).abs() < 1e-9);
    }

    #[test]
    fn reapplying_snapshot_is_idempotent() {
        let engine = LobEngine::new(StatsMode::Eager);
        let snap = snapshot("2330", vec![(100, 10), (99, 5)], vec![(102, 10)]);
        engine.apply_bidask(&snap);
        let first = engine.book("2330");
        engine.apply_bidask(&snap);
        let second = engine.book("2330");

        assert_eq!(first.bids, second.bids);
        assert_eq!(first.asks, second.asks);
        // Version still advances per application.
        assert!(second.version > first.version);
    }

    #[test]
    fn incremental_update_sets_and_deletes_levels() {
        let engine = LobEngine::new(StatsMode::Eager);
        engine.apply_bidask(&snapshot("2330", vec![(100, 10)], vec![(102, 10)]));

        let update = BidAskEvent {
            meta: meta(1_001),
            symbol: "2330".into(),
            bids: vec![(101, 5), (100, 0)],
            asks: vec![(102, 10)],
            is_snapshot: false,
        };
        let stats = engine.apply_bidask(&update).unwrap();

        assert_eq!(stats.best_bid, Some(101));
        assert_eq!(stats.mid_price, Some(101)); // (101 + 102) / 2 truncated
        assert_eq!(stats.spread, Some(1));
        assert_eq!(stats.bid_depth, 5);

        // The zero-volume level must be gone, not stored as zero.
        let book = engine.book("2330");
        assert!(!book.bids.contains_key(&100));
    }

    #[test]
    fn zero_volume_levels_never_persist_from_snapshot() {
        let engine = LobEngine::new(StatsMode::Lazy);
        engine.apply_bidask(&snapshot("2330", vec![(100, 0), (99, 3)], vec![(102, 0)]));
        let book = engine.book("2330");
        assert_eq!(book.bids.len(), 1);
        assert!(book.asks.is_empty());
    }

    #[test]
    fn tick_updates_last_price_but_not_levels() {
        let engine = LobEngine::new(StatsMode::Eager);
        engine.apply_bidask(&snapshot("2330", vec![(100, 10)], vec![(102, 10)]));

        let tick = TickEvent {
            meta: meta(1_005),
            symbol: "2330".into(),
            price: 101,
            volume: 2,
            total_volume: 0,
            bid_side_total_vol: 0,
            ask_side_total_vol: 0,
            is_simtrade: false,
            is_odd_lot: false,
        };
        let stats = engine.apply_tick(&tick).unwrap();

        assert_eq!(engine.last_price("2330"), 101);
        assert_eq!(stats.best_bid, Some(100));
    }

    #[test]
    fn empty_book_reports_sentinels_not_zeroes() {
        let engine = LobEngine::new(StatsMode::Lazy);
        let stats = engine.stats("UNKNOWN", 42);
        assert_eq!(stats.best_bid, None);
        assert_eq!(stats.best_ask, None);
        assert_eq!(stats.mid_price, None);
        assert_eq!(stats.spread, None);
        assert_eq!(stats.imbalance, 0.0);
    }

    #[test]
    fn one_sided_book_has_no_mid() {
        let engine = LobEngine::new(StatsMode::Lazy);
        engine.apply_bidask(&snapshot("2330", vec![(100, 10)], vec![]));
        let stats = engine.stats("2330", 0);
        assert_eq!(stats.best_bid, Some(100));
        assert_eq!(stats.best_ask, None);
        assert_eq!(stats.mid_price, None);
        assert!((stats.imbalance - 1.0).abs() < 1e-9);
    }

    #[test]
    fn best_bid_below_best_ask_after_normal_flow() {
        let engine = LobEngine::new(StatsMode::Lazy);
        engine.apply_bidask(&snapshot(
            "2330",
            vec![(100, 1), (98, 2), (99, 3)],
            vec![(103, 1), (101, 2), (102, 3)],
        ));
        let book = engine.book("2330");
        assert!(book.best_bid().unwrap() < book.best_ask().unwrap());
    }
}
