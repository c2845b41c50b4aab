// =============================================================================
// Price Codec — bidirectional fixed-point scaling per symbol
// =============================================================================
//
// Inbound prices are scaled through `rust_decimal` so float payloads never
// accumulate binary-float drift on their way into the integer domain.
// Descaling back to floats happens only at external boundaries (broker
// dispatch, recorder rows that require it).
// =============================================================================

use std::str::FromStr;
use std::sync::Arc;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::symbols::SymbolMetadata;

/// Default scale when a symbol carries no metadata.
pub const DEFAULT_PRICE_SCALE: i64 = 10_000;

/// Source of per-symbol price scales.
pub trait PriceScaleProvider: Send + Sync {
    fn price_scale(&self, symbol: &str) -> i64;
}

/// Fixed scale for every symbol (tests, single-market deployments).
pub struct FixedScaleProvider {
    pub scale: i64,
}

impl PriceScaleProvider for FixedScaleProvider {
    fn price_scale(&self, _symbol: &str) -> i64 {
        if self.scale > 0 {
            self.scale
        } else {
            1
        }
    }
}

impl PriceScaleProvider for SymbolMetadata {
    fn price_scale(&self, symbol: &str) -> i64 {
        SymbolMetadata::price_scale(self, symbol)
    }
}

/// Bidirectional scaled-integer price codec.
#[derive(Clone)]
pub struct PriceCodec {
    provider: Arc<dyn PriceScaleProvider>,
}

impl PriceCodec {
    pub fn new(provider: Arc<dyn PriceScaleProvider>) -> Self {
        Self { provider }
    }

    /// Fixed scale codec, mostly for tests.
    pub fn fixed(scale: i64) -> Self {
        Self::new(Arc::new(FixedScaleProvider { scale }))
    }

    fn resolve(&self, symbol: &str) -> i64 {
        let scale = self.provider.price_scale(symbol);
        if scale > 0 {
            scale
        } else {
            1
        }
    }

    /// The scale factor currently in effect for `symbol`.
    pub fn scale_factor(&self, symbol: &str) -> i64 {
        self.resolve(symbol)
    }

    /// Scale a decimal price to a fixed-point integer.
    pub fn scale(&self, symbol: &str, price: Decimal) -> i64 {
        let scaled = price * Decimal::from(self.resolve(symbol));
        scaled.trunc().to_i64().unwrap_or(0)
    }

    /// Scale a float price exactly.
    ///
    /// The float is converted through its shortest decimal representation so
    /// a payload of `500.1` scales to `5001000`, not `5000999`.
    pub fn scale_f64(&self, symbol: &str, price: f64) -> i64 {
        if !price.is_finite() {
            return 0;
        }
        match Decimal::from_str(&price.to_string()) {
            Ok(d) => self.scale(symbol, d),
            Err(_) => 0,
        }
    }

    /// Descale a fixed-point integer to a float for broker APIs.
    pub fn descale(&self, symbol: &str, value: i64) -> f64 {
        let d = Decimal::from(value) / Decimal::from(self.resolve(symbol));
        d.to_f64().unwrap_or(0.0)
    }
}

impl std::fmt::Debug for PriceCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriceCodec").finish_non_exhaustive()
    }
}
