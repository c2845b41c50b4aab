// =============================================================================
// Risk Validators — hard per-intent checks after policy gating
// =============================================================================
//
// Order matters and is fixed by the engine: policy gates run first (cheap,
// global), then these symbol/price checks. Each validator returns the reason
// code that lands in `risk_reject_total{strategy,reason}` on failure.
//
// CANCEL intents skip price/size checks entirely — they carry no meaningful
// economics, only a target order.
// =============================================================================

use std::sync::Arc;

use crate::events::{IntentType, OrderIntent, Side};
use crate::market_data::lob::LobEngine;
use crate::risk::config::RiskLimits;

/// Reference-price deviation band plus an absolute price ceiling.
pub struct PriceBandValidator {
    lob: Arc<LobEngine>,
}

impl PriceBandValidator {
    pub fn new(lob: Arc<LobEngine>) -> Self {
        Self { lob }
    }

    /// Reference is the touch on the side being crossed (best ask for a buy,
    /// best bid for a sell), falling back to the last trade price. With no
    /// reference at all only the absolute cap applies.
    pub fn check(&self, intent: &OrderIntent, limits: &RiskLimits) -> Result<(), &'static str> {
        if intent.intent_type == IntentType::Cancel {
            return Ok(());
        }
        if intent.price > limits.max_price_cap {
            return Err("MAX_PRICE_CAP");
        }

        let stats = self.lob.stats(&intent.symbol, intent.timestamp_ns);
        let reference = match intent.side {
            Side::Buy => stats.best_ask,
            Side::Sell => stats.best_bid,
        }
        .or_else(|| {
            let last = self.lob.last_price(&intent.symbol);
            (last > 0).then_some(last)
        });

        if let Some(reference) = reference {
            let band = (reference as f64 * limits.price_band_pct).abs();
            if (intent.price - reference).abs() as f64 > band {
                return Err("PRICE_BAND");
            }
        }
        Ok(())
    }
}

/// `price * qty * contract_multiplier <= max_notional`, in scaled integers.
pub struct MaxNotionalValidator;

impl MaxNotionalValidator {
    pub fn check(intent: &OrderIntent, limits: &RiskLimits) -> Result<(), &'static str> {
        if intent.intent_type == IntentType::Cancel {
            return Ok(());
        }
        let notional = intent.price as i128
            * intent.qty as i128
            * limits.contract_multiplier as i128;
        if notional > limits.max_notional as i128 {
            return Err("MAX_NOTIONAL");
        }
        Ok(())
    }
}

/// `qty <= max_order_size`.
pub struct MaxOrderSizeValidator;

impl MaxOrderSizeValidator {
    pub fn check(intent: &OrderIntent, limits: &RiskLimits) -> Result<(), &'static str> {
        if intent.intent_type == IntentType::Cancel {
            return Ok(());
        }
        if intent.qty > limits.max_order_size {
            return Err("MAX_ORDER_SIZE");
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventMeta, BidAskEvent, Tif};
    use crate::market_data::lob::StatsMode;

    fn intent(side: Side, price: i64, qty: i64) -> OrderIntent {
        OrderIntent {
            intent_id: 1,
            strategy_id: "s1".into(),
            symbol: "AAA".into(),
            intent_type: IntentType::New,
            side,
            price,
            qty,
            tif: Tif::Limit,
            target_order_id: None,
            timestamp_ns: 0,
        }
    }

    fn lob_with_touch(best_bid: i64, best_ask: i64) -> Arc<LobEngine> {
        let lob = Arc::new(LobEngine::new(StatsMode::Lazy));
        lob.apply_bidask(&BidAskEvent {
            meta: EventMeta {
                seq: 0,
                topic: "bidask".into(),
                source_ts_ns: 0,
                local_ts_ns: 0,
            },
            symbol: "AAA".into(),
            bids: vec![(best_bid, 10)],
            asks: vec![(best_ask, 7)],
            is_snapshot: true,
        });
        lob
    }

    #[test]
    fn price_cap_rejects_before_band() {
        let v = PriceBandValidator::new(lob_with_touch(10_000, 10_100));
        let limits = RiskLimits {
            max_price_cap: 15_000,
            ..Default::default()
        };
        assert_eq!(
            v.check(&intent(Side::Buy, 20_000, 1), &limits),
            Err("MAX_PRICE_CAP")
        );
    }

    #[test]
    fn band_rejects_far_from_reference() {
        let v = PriceBandValidator::new(lob_with_touch(10_000, 10_100));
        let limits = RiskLimits {
            price_band_pct: 0.05,
            ..Default::default()
        };
        // Buy priced 20% above best ask.
        assert_eq!(
            v.check(&intent(Side::Buy, 12_120, 1), &limits),
            Err("PRICE_BAND")
        );
        // Within 5% of best ask.
        assert!(v.check(&intent(Side::Buy, 10_200, 1), &limits).is_ok());
    }

    #[test]
    fn empty_book_applies_cap_only() {
        let v = PriceBandValidator::new(Arc::new(LobEngine::new(StatsMode::Lazy)));
        let limits = RiskLimits {
            max_price_cap: 50_000,
            price_band_pct: 0.001,
            ..Default::default()
        };
        assert!(v.check(&intent(Side::Buy, 49_999, 1), &limits).is_ok());
        assert_eq!(
            v.check(&intent(Side::Buy, 50_001, 1), &limits),
            Err("MAX_PRICE_CAP")
        );
    }

    #[test]
    fn notional_uses_scaled_integer_math() {
        let limits = RiskLimits {
            max_notional: 1_000_000,
            contract_multiplier: 1,
            ..Default::default()
        };
        assert!(MaxNotionalValidator::check(&intent(Side::Buy, 10_000, 100), &limits).is_ok());
        assert_eq!(
            MaxNotionalValidator::check(&intent(Side::Buy, 10_000, 101), &limits),
            Err("MAX_NOTIONAL")
        );
    }

    #[test]
    fn order_size_limit() {
        let limits = RiskLimits {
            max_order_size: 10,
            ..Default::default()
        };
        assert!(MaxOrderSizeValidator::check(&intent(Side::Buy, 1, 10), &limits).is_ok());
        assert_eq!(
            MaxOrderSizeValidator::check(&intent(Side::Buy, 1, 11), &limits),
            Err("MAX_ORDER_SIZE")
        );
    }

    #[test]
    fn cancel_intents_skip_economic_checks() {
        let v = PriceBandValidator::new(lob_with_touch(10_000, 10_100));
        let limits = RiskLimits {
            max_price_cap: 1,
            max_order_size: 0,
            max_notional: 0,
            ..Default::default()
        };
        let mut cancel = intent(Side::Buy, 99_999, 99);
        cancel.intent_type = IntentType::Cancel;
        assert!(v.check(&cancel, &limits).is_ok());
        assert!(MaxNotionalValidator::check(&cancel, &limits).is_ok());
        assert!(MaxOrderSizeValidator::check(&cancel, &limits).is_ok());
    }
}
