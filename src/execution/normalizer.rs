// =============================================================================
// Execution Normalizer — broker callbacks to OrderEvent / FillEvent
// =============================================================================
//
// Broker execution callbacks arrive on two topics: `order` (status updates)
// and `deal` (fills). Payload keys follow the broker's vocabulary (`ord_no`,
// `seq_no`, `contract.code`, `action`, ...), and status strings are mapped
// case-insensitively with substring matching so venue spellings like
// "f pending" still land on PENDING_SUBMIT.
// =============================================================================

use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

use crate::events::{FillEvent, OrderEvent, OrderStatus, Side};
use crate::order::ids::OrderIdResolver;
use crate::pricing::PriceCodec;
use crate::timebase;

/// Raw broker execution callback, topic-tagged.
#[derive(Debug, Clone)]
pub struct RawExecEvent {
    /// "order" or "deal".
    pub topic: String,
    pub payload: Value,
    pub ingest_ts_ns: i64,
}

pub struct ExecutionNormalizer {
    resolver: Arc<OrderIdResolver>,
    codec: PriceCodec,
}

impl ExecutionNormalizer {
    pub fn new(resolver: Arc<OrderIdResolver>, codec: PriceCodec) -> Self {
        Self { resolver, codec }
    }

    // -------------------------------------------------------------------------
    // Order updates
    // -------------------------------------------------------------------------

    pub fn normalize_order(&self, raw: &RawExecEvent) -> Option<OrderEvent> {
        let p = &raw.payload;
        let order_id = str_at(p, &["ord_no"])
            .or_else(|| str_at(p, &["seq_no"]))
            .unwrap_or_default();
        if order_id.is_empty() {
            warn!("order callback without ord_no/seq_no, dropped");
            return None;
        }

        let symbol = str_at(p, &["contract", "code"])
            .or_else(|| str_at(p, &["code"]))
            .unwrap_or_default();

        let status_str = str_at(p, &["status", "status"])
            .or_else(|| str_at(p, &["status"]))
            .unwrap_or_default();
        let status = map_status(&status_str)?;

        let side = map_side(&str_at(p, &["order", "action"]).unwrap_or_default())?;
        let price = f64_at(p, &["order", "price"]).unwrap_or(0.0);
        let submitted_qty = i64_at(p, &["order", "quantity"]).unwrap_or(0);
        let filled_qty = i64_at(p, &["filled_qty"]).unwrap_or(0);

        let seq_no = str_at(p, &["seq_no"]).unwrap_or_default();
        let strategy_id = self
            .resolver
            .resolve_strategy_id_from_candidates(&[&order_id, &seq_no]);

        Some(OrderEvent {
            order_id,
            strategy_id,
            symbol: symbol.clone(),
            status,
            submitted_qty,
            filled_qty,
            remaining_qty: (submitted_qty - filled_qty).max(0),
            price: self.codec.scale_f64(&symbol, price),
            side,
            ingest_ts_ns: raw.ingest_ts_ns,
            broker_ts_ns: ts_at(p),
        })
    }

    // -------------------------------------------------------------------------
    // Fills
    // -------------------------------------------------------------------------

    pub fn normalize_fill(&self, raw: &RawExecEvent) -> Option<FillEvent> {
        let p = &raw.payload;
        let fill_id = str_at(p, &["seq_no"])
            .or_else(|| str_at(p, &["fill_id"]))
            .unwrap_or_default();
        let order_id = str_at(p, &["ord_no"]).unwrap_or_default();
        let symbol = str_at(p, &["code"])
            .or_else(|| str_at(p, &["contract", "code"]))
            .unwrap_or_default();
        if fill_id.is_empty() || symbol.is_empty() {
            warn!("deal callback missing seq_no/code, dropped");
            return None;
        }

        let side = map_side(&str_at(p, &["action"]).unwrap_or_default())?;
        let qty = i64_at(p, &["quantity"]).unwrap_or(0);
        let price = f64_at(p, &["price"]).unwrap_or(0.0);

        let strategy_id = self
            .resolver
            .resolve_strategy_id_from_candidates(&[&order_id, &fill_id]);

        Some(FillEvent {
            fill_id,
            account_id: str_at(p, &["account_id"]).unwrap_or_default(),
            order_id,
            strategy_id,
            symbol: symbol.clone(),
            side,
            qty,
            price: self.codec.scale_f64(&symbol, price),
            fee: self.codec.scale_f64(&symbol, f64_at(p, &["fee"]).unwrap_or(0.0)),
            tax: self.codec.scale_f64(&symbol, f64_at(p, &["tax"]).unwrap_or(0.0)),
            ingest_ts_ns: raw.ingest_ts_ns,
            match_ts_ns: ts_at(p),
        })
    }
}

/// Case-insensitive, substring-tolerant status mapping.
fn map_status(raw: &str) -> Option<OrderStatus> {
    let s = raw.trim().to_lowercase();
    if s.is_empty() {
        return None;
    }
    // "pending" first: venue spellings like "f pending" prefix the status.
    let status = if s.contains("pending") || s.contains("presubmit") {
        OrderStatus::PendingSubmit
    } else if s.contains("partf") || s.contains("partial") {
        OrderStatus::PartiallyFilled
    } else if s.contains("submit") {
        OrderStatus::Submitted
    } else if s.contains("fill") {
        OrderStatus::Filled
    } else if s.contains("cancel") {
        OrderStatus::Cancelled
    } else if s.contains("fail") || s.contains("reject") {
        OrderStatus::Failed
    } else {
        warn!(status = %raw, "unmapped broker order status, dropped");
        return None;
    };
    Some(status)
}

fn map_side(raw: &str) -> Option<Side> {
    match raw.trim().to_lowercase().as_str() {
        "buy" | "action.buy" | "b" => Some(Side::Buy),
        "sell" | "action.sell" | "s" => Some(Side::Sell),
        _ => None,
    }
}

fn value_at<'a>(payload: &'a Value, path: &[&str]) -> Option<&'a Value> {
    let mut current = payload;
    for key in path {
        current = current.get(key)?;
    }
    Some(current)
}

fn str_at(payload: &Value, path: &[&str]) -> Option<String> {
    value_at(payload, path)
        .and_then(Value::as_str)
        .map(|s| s.to_string())
        .filter(|s| !s.is_empty())
}

fn f64_at(payload: &Value, path: &[&str]) -> Option<f64> {
    value_at(payload, path).and_then(Value::as_f64)
}

fn i64_at(payload: &Value, path: &[&str]) -> Option<i64> {
    value_at(payload, path)
        .and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f as i64)))
}

fn ts_at(payload: &Value) -> i64 {
    match payload.get("ts") {
        Some(Value::Number(n)) => {
            if let Some(i) = n.as_i64() {
                timebase::coerce_ns(i)
            } else {
                timebase::coerce_ns_f64(n.as_f64().unwrap_or(0.0))
            }
        }
        _ => 0,
    }
}
