// =============================================================================
// Position Store — avg-price and PnL accounting per (account, strategy, symbol)
// =============================================================================
//
// All arithmetic in scaled integers. Division appears only in the weighted
// average and rounds half-to-even so the sum of deltas stays equal to the
// total across any fill sequence.
//
// Fill handling:
//   - same side / opening from flat: weighted-average entry price,
//   - opposite side reducing: realize PnL on the closed portion, avg intact,
//   - crossing zero: close-and-reopen — realize on the closed lot, reset the
//     average to the fill price,
//   - exact flat: realize everything, clear the average.
// =============================================================================

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::debug;

use crate::events::{FillEvent, PositionDelta};

/// Identity of one position book.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct PositionKey {
    pub account_id: String,
    pub strategy_id: String,
    pub symbol: String,
}

/// One position's running state.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Position {
    /// Signed quantity: positive long, negative short.
    pub net_qty: i64,
    /// Scaled average entry price; zero when flat.
    pub avg_price: i64,
    /// Cumulative realized PnL in scaled price units.
    pub realized_pnl: i64,
    pub unrealized_pnl: i64,
}

/// Owner of all positions. Written by the execution router; everyone else
/// reads snapshots.
#[derive(Default)]
pub struct PositionStore {
    positions: RwLock<HashMap<PositionKey, Position>>,
}

impl PositionStore {
    pub fn new() -> Self {
        Self::default()
    }

    // -------------------------------------------------------------------------
    // Fills
    // -------------------------------------------------------------------------

    /// Apply one fill and return the resulting delta.
    pub fn on_fill(&self, fill: &FillEvent) -> PositionDelta {
        let key = PositionKey {
            account_id: fill.account_id.clone(),
            strategy_id: fill.strategy_id.clone(),
            symbol: fill.symbol.clone(),
        };

        let mut positions = self.positions.write();
        let pos = positions.entry(key).or_default();

        let signed_fill = fill.qty * fill.side.sign();
        let old_qty = pos.net_qty;
        let mut realized_now = 0i64;

        if old_qty == 0 || old_qty.signum() == signed_fill.signum() {
            // Same direction (or opening from flat): re-average.
            let old_abs = old_qty.unsigned_abs() as i128;
            let fill_abs = fill.qty as i128;
            pos.avg_price = div_round_half_even(
                old_abs * pos.avg_price as i128 + fill_abs * fill.price as i128,
                old_abs + fill_abs,
            );
            pos.net_qty = old_qty + signed_fill;
        } else {
            // Opposing fill: realize on the closed portion.
            let closing = fill.qty.min(old_qty.abs());
            realized_now = (fill.price - pos.avg_price) * closing * old_qty.signum();
            pos.realized_pnl += realized_now;

            pos.net_qty = old_qty + signed_fill;
            if pos.net_qty == 0 {
                pos.avg_price = 0;
            } else if pos.net_qty.signum() != old_qty.signum() {
                // Crossed zero: the remainder opened at the fill price.
                pos.avg_price = fill.price;
            }
            // Reduced but not flat: average unchanged.
        }

        pos.unrealized_pnl = if pos.net_qty == 0 {
            0
        } else {
            (fill.price - pos.avg_price) * pos.net_qty
        };

        debug!(
            symbol = %fill.symbol,
            strategy = %fill.strategy_id,
            net_qty = pos.net_qty,
            avg_price = pos.avg_price,
            realized_now,
            "fill applied"
        );

        PositionDelta {
            account_id: fill.account_id.clone(),
            strategy_id: fill.strategy_id.clone(),
            symbol: fill.symbol.clone(),
            net_qty: pos.net_qty,
            avg_price: pos.avg_price,
            realized_pnl: realized_now,
            unrealized_pnl: pos.unrealized_pnl,
            delta_source: "FILL",
        }
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    pub fn get(&self, account_id: &str, strategy_id: &str, symbol: &str) -> Option<Position> {
        self.positions
            .read()
            .get(&PositionKey {
                account_id: account_id.to_string(),
                strategy_id: strategy_id.to_string(),
                symbol: symbol.to_string(),
            })
            .cloned()
    }

    /// Immutable snapshot of every position.
    pub fn snapshot(&self) -> Vec<(PositionKey, Position)> {
        self.positions
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Aggregate signed quantity per symbol across all accounts/strategies,
    /// for reconciliation against broker-reported positions.
    pub fn net_qty_by_symbol(&self) -> HashMap<String, i64> {
        let mut out: HashMap<String, i64> = HashMap::new();
        for (key, pos) in self.positions.read().iter() {
            *out.entry(key.symbol.clone()).or_insert(0) += pos.net_qty;
        }
        out
    }

    /// Signed net quantity for one strategy's symbol (strategy read view).
    pub fn strategy_net_qty(&self, strategy_id: &str, symbol: &str) -> i64 {
        self.positions
            .read()
            .iter()
            .filter(|(k, _)| k.strategy_id == strategy_id && k.symbol == symbol)
            .map(|(_, p)| p.net_qty)
            .sum()
    }
}

/// Round-half-to-even integer division for non-negative denominators.
fn div_round_half_even(num: i128, den: i128) -> i64 {
    if den == 0 {
        return 0;
    }
    let q = num.div_euclid(den);
    let r = num.rem_euclid(den);
    let twice = r * 2;
    let rounded = if twice > den {
        q + 1
    } else if twice == den {
        if q % 2 == 0 {
            q
        } else {
            q + 1
        }
    } else {
        q
    };
    rounded as i64
}

impl std::fmt::Debug for PositionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PositionStore")
            .field("positions", &self.positions.read().len())
            .finish()
    }
}
