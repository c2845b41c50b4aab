// =============================================================================
// Spread Maker — reference market-making strategy
// =============================================================================
//
// Quotes symmetrically around a micro-price: the mid shifted toward book
// imbalance, skewed against inventory. Everything stays in scaled integers;
// the imbalance adjustment is the one float term and is truncated back.
// =============================================================================

use serde::Deserialize;

use crate::events::LobStatsEvent;
use crate::strategy::runtime::{Strategy, StrategyContext};

fn default_qty() -> i64 {
    1
}

fn default_max_position() -> i64 {
    100
}

fn default_edge_coeff() -> f64 {
    0.2
}

fn default_min_spread() -> i64 {
    2
}

/// Tunables, deserialized from the strategy registry's `params` block.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SpreadMakerParams {
    pub qty: i64,
    pub max_position: i64,
    /// Fraction of the spread the micro-price shifts per unit imbalance.
    pub edge_coeff: f64,
    /// Narrower books than this are left alone.
    pub min_spread: i64,
}

impl Default for SpreadMakerParams {
    fn default() -> Self {
        Self {
            qty: default_qty(),
            max_position: default_max_position(),
            edge_coeff: default_edge_coeff(),
            min_spread: default_min_spread(),
        }
    }
}

pub struct SpreadMaker {
    id: String,
    symbols: Vec<String>,
    params: SpreadMakerParams,
}

impl SpreadMaker {
    pub fn new(id: impl Into<String>, symbols: Vec<String>, params: SpreadMakerParams) -> Self {
        Self {
            id: id.into(),
            symbols,
            params,
        }
    }
}

impl Strategy for SpreadMaker {
    fn id(&self) -> &str {
        &self.id
    }

    fn symbols(&self) -> &[String] {
        &self.symbols
    }

    fn on_stats(&mut self, ctx: &mut StrategyContext, event: &LobStatsEvent) {
        let (Some(mid), Some(spread)) = (event.mid_price, event.spread) else {
            return;
        };
        if spread < self.params.min_spread {
            return;
        }

        // Micro-price: mid pushed toward the heavy side of the book.
        let shift = (event.imbalance * spread as f64 * self.params.edge_coeff) as i64;
        // Inventory skew: long books quote lower, short books higher.
        let pos = ctx.position(&event.symbol);
        let skew = -pos.signum();

        let fair = mid + shift + skew;
        let half = (spread / 2).max(1);

        if pos < self.params.max_position {
            ctx.buy(&event.symbol, fair - half, self.params.qty);
        }
        if pos > -self.params.max_position {
            ctx.sell(&event.symbol, fair + half, self.params.qty);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{OrderIntent, Side};
    use crate::execution::positions::PositionStore;
    use crate::strategy::runtime::StrategyRuntime;
    use crate::events::BusEvent;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn stats(best_bid: i64, best_ask: i64, imbalance: f64) -> BusEvent {
        BusEvent::Stats(LobStatsEvent {
            symbol: "AAA".into(),
            ts_ns: 0,
            best_bid: Some(best_bid),
            best_ask: Some(best_ask),
            mid_price: Some((best_bid + best_ask) / 2),
            spread: Some(best_ask - best_bid),
            imbalance,
            bid_depth: 10,
            ask_depth: 10,
        })
    }

    async fn quotes_for(event: BusEvent) -> Vec<OrderIntent> {
        let (tx, mut rx) = mpsc::channel(8);
        let maker = SpreadMaker::new("mm", vec!["AAA".into()], SpreadMakerParams::default());
        let mut runtime =
            StrategyRuntime::new(vec![Box::new(maker)], Arc::new(PositionStore::new()), tx);
        runtime.dispatch(&event).await;
        drop(runtime);

        let mut out = Vec::new();
        while let Ok(intent) = rx.try_recv() {
            out.push(intent);
        }
        out
    }

    #[tokio::test]
    async fn balanced_book_quotes_symmetrically() {
        let quotes = quotes_for(stats(9_990, 10_010, 0.0)).await;
        assert_eq!(quotes.len(), 2);

        let buy = quotes.iter().find(|q| q.side == Side::Buy).unwrap();
        let sell = quotes.iter().find(|q| q.side == Side::Sell).unwrap();
        // mid 10_000, half-spread 10.
        assert_eq!(buy.price, 9_990);
        assert_eq!(sell.price, 10_010);
    }

    #[tokio::test]
    async fn bid_heavy_book_shifts_quotes_up() {
        let quotes = quotes_for(stats(9_990, 10_010, 1.0)).await;
        let buy = quotes.iter().find(|q| q.side == Side::Buy).unwrap();
        // Shift = 1.0 * 20 * 0.2 = 4 ticks above the balanced quote.
        assert_eq!(buy.price, 9_994);
    }

    #[tokio::test]
    async fn tight_books_are_left_alone() {
        let quotes = quotes_for(stats(10_000, 10_001, 0.0)).await;
        assert!(quotes.is_empty());
    }

    #[tokio::test]
    async fn empty_book_is_ignored() {
        let quotes = quotes_for(BusEvent::Stats(LobStatsEvent {
            symbol: "AAA".into(),
            ts_ns: 0,
            best_bid: None,
            best_ask: None,
            mid_price: None,
            spread: None,
            imbalance: 0.0,
            bid_depth: 0,
            ask_depth: 0,
        }))
        .await;
        assert!(quotes.is_empty());
    }
}
