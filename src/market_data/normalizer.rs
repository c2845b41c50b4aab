// =============================================================================
// Market-Data Normalizer — raw broker payloads to typed events
// =============================================================================
//
// Broker callbacks deliver loosely-typed JSON. This stage turns them into
// `TickEvent` / `BidAskEvent`:
//   - timestamps coerced to epoch ns by magnitude, future skew clamped,
//   - prices scaled to per-symbol fixed-point through the decimal path,
//   - levels with price <= 0 dropped, unknown symbols dropped,
//   - every failure counted under `normalization_errors_total{type}` and the
//     event discarded; the pipeline never stalls on a bad payload.
// =============================================================================

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

use crate::events::{BidAskEvent, EventMeta, TickEvent};
use crate::metrics::MetricsRegistry;
use crate::pricing::PriceCodec;
use crate::symbols::SymbolMetadata;
use crate::timebase;

/// Skew-warning log cooldown so a broken broker clock cannot flood the log.
const SKEW_WARN_COOLDOWN_NS: i64 = 1_000_000_000;

pub struct MarketDataNormalizer {
    metadata: Arc<SymbolMetadata>,
    codec: PriceCodec,
    metrics: Arc<MetricsRegistry>,
    seq: AtomicU64,
    /// Max tolerated future skew of broker timestamps (ns).
    max_skew_ns: i64,
    last_skew_warn_ns: AtomicI64,
}

impl MarketDataNormalizer {
    pub fn new(
        metadata: Arc<SymbolMetadata>,
        codec: PriceCodec,
        metrics: Arc<MetricsRegistry>,
        max_skew_ns: i64,
    ) -> Self {
        Self {
            metadata,
            codec,
            metrics,
            seq: AtomicU64::new(0),
            max_skew_ns,
            last_skew_warn_ns: AtomicI64::new(0),
        }
    }

    // -------------------------------------------------------------------------
    // Tick path
    // -------------------------------------------------------------------------

    /// Normalize a trade-tick payload:
    /// `{code, ts, close|last_price, volume, total_volume?, ...}`.
    pub fn normalize_tick(&self, payload: &Value) -> Option<TickEvent> {
        let symbol = match payload.get("code").and_then(Value::as_str) {
            Some(s) if !s.is_empty() => s.to_string(),
            _ => {
                self.metrics.record_normalization_error("missing_symbol");
                return None;
            }
        };
        self.metadata.reload_if_changed();
        if !self.metadata.is_known(&symbol) {
            self.metrics.record_normalization_error("unknown_symbol");
            return None;
        }

        let price_raw = payload
            .get("close")
            .or_else(|| payload.get("last_price"))
            .and_then(Value::as_f64);
        let price = match price_raw {
            Some(p) if p > 0.0 => self.codec.scale_f64(&symbol, p),
            _ => {
                self.metrics.record_normalization_error("bad_price");
                return None;
            }
        };

        let meta = self.build_meta("tick", payload.get("ts"));
        Some(TickEvent {
            meta,
            symbol,
            price,
            volume: int_field(payload, "volume"),
            total_volume: int_field(payload, "total_volume"),
            bid_side_total_vol: int_field(payload, "bid_side_total_vol"),
            ask_side_total_vol: int_field(payload, "ask_side_total_vol"),
            is_simtrade: bool_field(payload, "simtrade"),
            is_odd_lot: bool_field(payload, "intraday_odd"),
        })
    }

    // -------------------------------------------------------------------------
    // Quote path
    // -------------------------------------------------------------------------

    /// Normalize a quote payload:
    /// `{code, ts, bid_price[], bid_volume[], ask_price[], ask_volume[]}`.
    pub fn normalize_bidask(&self, payload: &Value) -> Option<BidAskEvent> {
        let symbol = match payload.get("code").and_then(Value::as_str) {
            Some(s) if !s.is_empty() => s.to_string(),
            _ => {
                self.metrics.record_normalization_error("missing_symbol");
                return None;
            }
        };
        self.metadata.reload_if_changed();
        if !self.metadata.is_known(&symbol) {
            self.metrics.record_normalization_error("unknown_symbol");
            return None;
        }

        let bids = self.scale_levels(&symbol, payload.get("bid_price"), payload.get("bid_volume"));
        let asks = self.scale_levels(&symbol, payload.get("ask_price"), payload.get("ask_volume"));

        let meta = self.build_meta("bidask", payload.get("ts"));
        Some(BidAskEvent {
            meta,
            symbol,
            bids,
            asks,
            is_snapshot: bool_field(payload, "is_snapshot"),
        })
    }

    /// Zip price/volume arrays into scaled (price, volume) pairs, dropping
    /// non-positive prices.
    fn scale_levels(
        &self,
        symbol: &str,
        prices: Option<&Value>,
        volumes: Option<&Value>,
    ) -> Vec<(i64, i64)> {
        let empty = Vec::new();
        let prices = prices.and_then(Value::as_array).unwrap_or(&empty);
        let volumes = volumes.and_then(Value::as_array).unwrap_or(&empty);

        prices
            .iter()
            .zip(volumes.iter())
            .filter_map(|(p, v)| {
                let price = p.as_f64()?;
                if price <= 0.0 {
                    return None;
                }
                let volume = v.as_i64().or_else(|| v.as_f64().map(|f| f as i64))?;
                Some((self.codec.scale_f64(symbol, price), volume))
            })
            .collect()
    }

    // -------------------------------------------------------------------------
    // Metadata
    // -------------------------------------------------------------------------

    fn build_meta(&self, topic: &str, ts: Option<&Value>) -> EventMeta {
        let local_ts_ns = timebase::now_ns();
        let raw_source = match ts {
            Some(Value::Number(n)) => {
                if let Some(i) = n.as_i64() {
                    timebase::coerce_ns(i)
                } else {
                    timebase::coerce_ns_f64(n.as_f64().unwrap_or(0.0))
                }
            }
            _ => 0,
        };

        let (source_ts_ns, clamped) =
            timebase::clamp_future_ts(raw_source, local_ts_ns, self.max_skew_ns);
        if clamped {
            self.metrics.record_normalization_error("future_ts");
            self.warn_skew_rate_limited(raw_source, local_ts_ns);
        }

        EventMeta {
            seq: self.seq.fetch_add(1, Ordering::Relaxed) + 1,
            topic: topic.to_string(),
            source_ts_ns,
            local_ts_ns,
        }
    }

    fn warn_skew_rate_limited(&self, source_ns: i64, local_ns: i64) {
        let last = self.last_skew_warn_ns.load(Ordering::Relaxed);
        if local_ns - last >= SKEW_WARN_COOLDOWN_NS
            && self
                .last_skew_warn_ns
                .compare_exchange(last, local_ns, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
        {
            warn!(
                source_ns,
                local_ns,
                skew_ns = source_ns - local_ns,
                "broker timestamp beyond skew window, clamped to local clock"
            );
        }
    }
}

fn int_field(payload: &Value, key: &str) -> i64 {
    payload
        .get(key)
        .and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f as i64)))
        .unwrap_or(0)
}

fn bool_field(payload: &Value, key: &str) -> bool {
    match payload.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_i64().unwrap_or(0) != 0,
        _ => false,
    }
}

impl std::fmt::Debug for MarketDataNormalizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarketDataNormalizer")
            .field("seq", &self.seq.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    fn fixture() -> (MarketDataNormalizer, Arc<MetricsRegistry>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("symbols.yaml");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(b"symbols:\n  - code: 'AAA'\n    exchange: 'TSE'\n    price_scale: 100\n")
            .unwrap();

        let metadata = Arc::new(SymbolMetadata::new(&path));
        let codec = PriceCodec::new(metadata.clone());
        let metrics = Arc::new(MetricsRegistry::new());
        let norm = MarketDataNormalizer::new(
            metadata,
            codec,
            metrics.clone(),
            5_000_000_000,
        );
        (norm, metrics, dir)
    }

    #[test]
    fn tick_is_scaled_and_sequenced() {
        let (norm, _metrics, _dir) = fixture();
        let ev = norm
            .normalize_tick(&json!({
                "code": "AAA",
                "ts": 1_700_000_000,
                "close": 500.1,
                "volume": 3,
                "total_volume": 10
            }))
            .unwrap();

        assert_eq!(ev.symbol, "AAA");
        assert_eq!(ev.price, 50_010);
        assert_eq!(ev.volume, 3);
        assert_eq!(ev.total_volume, 10);
        assert_eq!(ev.meta.seq, 1);
        assert_eq!(ev.meta.source_ts_ns, 1_700_000_000 * 1_000_000_000);
    }

    #[test]
    fn normalizer_is_idempotent_for_identical_inputs() {
        let (norm, _metrics, _dir) = fixture();
        let payload = json!({"code": "AAA", "ts": 1_700_000_000, "close": 42.5, "volume": 1});
        let a = norm.normalize_tick(&payload).unwrap();
        let b = norm.normalize_tick(&payload).unwrap();
        // Sequence and local clock differ; the payload-derived fields do not.
        assert_eq!(a.price, b.price);
        assert_eq!(a.symbol, b.symbol);
        assert_eq!(a.meta.source_ts_ns, b.meta.source_ts_ns);
    }

    #[test]
    fn unknown_symbol_is_dropped_and_counted() {
        let (norm, metrics, _dir) = fixture();
        let out = norm.normalize_tick(&json!({"code": "ZZZ", "ts": 1, "close": 1.0, "volume": 1}));
        assert!(out.is_none());
        assert_eq!(metrics.normalization_error_count("unknown_symbol"), 1);
    }

    #[test]
    fn non_positive_price_is_dropped_and_counted() {
        let (norm, metrics, _dir) = fixture();
        let out = norm.normalize_tick(&json!({"code": "AAA", "ts": 1, "close": 0.0, "volume": 1}));
        assert!(out.is_none());
        assert_eq!(metrics.normalization_error_count("bad_price"), 1);
    }

    #[test]
    fn bidask_filters_non_positive_levels() {
        let (norm, _metrics, _dir) = fixture();
        let ev = norm
            .normalize_bidask(&json!({
                "code": "AAA",
                "ts": 1_700_000_000,
                "bid_price": [100.0, 0.0, 99.5],
                "bid_volume": [1, 2, 3],
                "ask_price": [-1.0, 100.5],
                "ask_volume": [7, 4]
            }))
            .unwrap();

        assert_eq!(ev.bids, vec![(10_000, 1), (9_950, 3)]);
        assert_eq!(ev.asks, vec![(10_050, 4)]);
    }

    #[test]
    fn future_timestamp_is_clamped_to_local() {
        let (norm, metrics, _dir) = fixture();
        // A timestamp a year in the future (ns magnitude).
        let future_ns = timebase::now_ns() + 365 * 24 * 3_600 * 1_000_000_000;
        let ev = norm
            .normalize_tick(&json!({
                "code": "AAA",
                "ts": future_ns,
                "close": 10.0,
                "volume": 1
            }))
            .unwrap();

        assert!(ev.meta.source_ts_ns <= timebase::now_ns());
        assert_eq!(metrics.normalization_error_count("future_ts"), 1);
    }
}
