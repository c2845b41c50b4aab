// =============================================================================
// Recorder Mapper — typed bus events to destination-table rows
// =============================================================================
//
// Rows keep scaled-integer prices (`price_scaled` and friends); the
// analytics side owns any descaling for display. Events with no table
// (stats, position deltas) map to nothing.
// =============================================================================

use std::sync::Arc;

use serde_json::{json, Value};

use crate::events::BusEvent;
use crate::symbols::SymbolMetadata;

/// Destination tables in the analytics store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    MarketData,
    Orders,
    Fills,
}

impl Table {
    pub const ALL: [Table; 3] = [Table::MarketData, Table::Orders, Table::Fills];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MarketData => "market_data",
            Self::Orders => "orders",
            Self::Fills => "fills",
        }
    }
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Map one event to its `(table, row)`, or `None` for unmapped event kinds.
pub fn map_event(event: &BusEvent, metadata: &Arc<SymbolMetadata>) -> Option<(Table, Value)> {
    match event {
        BusEvent::Tick(tick) => Some((
            Table::MarketData,
            json!({
                "symbol": tick.symbol,
                "exchange": metadata.exchange(&tick.symbol),
                "type": "Tick",
                "exch_ts": tick.meta.source_ts_ns,
                "ingest_ts": tick.meta.local_ts_ns,
                "price_scaled": tick.price,
                "volume": tick.volume,
                "bids_price": [],
                "bids_vol": [],
                "asks_price": [],
                "asks_vol": [],
                "seq_no": tick.meta.seq,
            }),
        )),
        BusEvent::BidAsk(quote) => {
            let (bids_price, bids_vol): (Vec<i64>, Vec<i64>) = quote.bids.iter().copied().unzip();
            let (asks_price, asks_vol): (Vec<i64>, Vec<i64>) = quote.asks.iter().copied().unzip();
            Some((
                Table::MarketData,
                json!({
                    "symbol": quote.symbol,
                    "exchange": metadata.exchange(&quote.symbol),
                    "type": if quote.is_snapshot { "Snapshot" } else { "BidAsk" },
                    "exch_ts": quote.meta.source_ts_ns,
                    "ingest_ts": quote.meta.local_ts_ns,
                    "price_scaled": 0,
                    "volume": 0,
                    "bids_price": bids_price,
                    "bids_vol": bids_vol,
                    "asks_price": asks_price,
                    "asks_vol": asks_vol,
                    "seq_no": quote.meta.seq,
                }),
            ))
        }
        BusEvent::Order(order) => Some((
            Table::Orders,
            json!({
                "order_id": order.order_id,
                "strategy_id": order.strategy_id,
                "symbol": order.symbol,
                "status": order.status.as_str(),
                "price_scaled": order.price,
                "side": order.side.to_string(),
                "qty": order.submitted_qty,
                "ingest_ts": order.ingest_ts_ns,
                "broker_ts": order.broker_ts_ns,
            }),
        )),
        BusEvent::Fill(fill) => Some((
            Table::Fills,
            json!({
                "fill_id": fill.fill_id,
                "order_id": fill.order_id,
                "strategy_id": fill.strategy_id,
                "symbol": fill.symbol,
                "side": fill.side.to_string(),
                "qty": fill.qty,
                "price_scaled": fill.price,
                "fee_scaled": fill.fee,
                "tax_scaled": fill.tax,
                "ingest_ts": fill.ingest_ts_ns,
                "match_ts": fill.match_ts_ns,
            }),
        )),
        BusEvent::Stats(_) | BusEvent::Position(_) => None,
    }
}
