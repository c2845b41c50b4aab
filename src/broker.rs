// =============================================================================
// Broker Boundary — the dispatch trait and a simulated implementation
// =============================================================================
//
// Real broker SDK adapters live outside the engine; the engine only knows
// this trait. Prices cross the boundary as floats (descaled) because that is
// what broker APIs take — everything inside stays fixed-point.
//
// `SimBroker` acknowledges orders locally and feeds synthetic execution
// callbacks back into the raw exec queue, which exercises the entire
// downstream pipeline (router -> positions -> bus) without a live session.
// The engine starts against the sim unless a real adapter is wired in.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::events::Side;
use crate::execution::normalizer::RawExecEvent;
use crate::timebase;

// ---------------------------------------------------------------------------
// Contract
// ---------------------------------------------------------------------------

/// Outbound order request, already descaled for the broker.
#[derive(Debug, Clone)]
pub struct PlaceOrderRequest {
    pub symbol: String,
    pub side: Side,
    /// Descaled float price.
    pub price: f64,
    pub qty: i64,
    /// Broker TIF string ("ROD", "IOC", "FOK").
    pub tif: String,
}

/// Broker acknowledgement of a placed order.
#[derive(Debug, Clone)]
pub struct BrokerAck {
    pub seq_no: String,
    pub ord_no: String,
}

/// A position as the broker reports it, used by reconciliation.
#[derive(Debug, Clone)]
pub struct BrokerPosition {
    pub symbol: String,
    pub net_qty: i64,
}

#[async_trait]
pub trait BrokerClient: Send + Sync {
    async fn place_order(&self, request: &PlaceOrderRequest) -> Result<BrokerAck>;
    async fn cancel_order(&self, ord_no: &str) -> Result<()>;
    async fn positions(&self) -> Result<Vec<BrokerPosition>>;
}

// ---------------------------------------------------------------------------
// Simulated broker
// ---------------------------------------------------------------------------

/// Local fill simulator. Every accepted order gets a Submitted callback and,
/// when `fill_immediately` is set, a full fill at the limit price.
pub struct SimBroker {
    seq: AtomicU64,
    exec_tx: mpsc::Sender<RawExecEvent>,
    fill_immediately: bool,
    account_id: String,
    /// Orders to fail, keyed by symbol — lets tests drive the failure path.
    fail_symbols: parking_lot::RwLock<std::collections::HashSet<String>>,
}

impl SimBroker {
    pub fn new(exec_tx: mpsc::Sender<RawExecEvent>, fill_immediately: bool) -> Self {
        info!(fill_immediately, "sim broker ready");
        Self {
            seq: AtomicU64::new(0),
            exec_tx,
            fill_immediately,
            account_id: "SIM-ACC".to_string(),
            fail_symbols: parking_lot::RwLock::new(std::collections::HashSet::new()),
        }
    }

    /// Make subsequent orders for `symbol` fail at the broker.
    pub fn fail_symbol(&self, symbol: &str) {
        self.fail_symbols.write().insert(symbol.to_string());
    }

    fn next_ids(&self) -> (String, String) {
        let n = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
        (format!("S{n}"), format!("O{n}"))
    }

    fn emit(&self, event: RawExecEvent) {
        // Callbacks are fire-and-forget; a full queue only costs sim events.
        if let Err(e) = self.exec_tx.try_send(event) {
            warn!(error = %e, "sim broker dropped exec callback");
        }
    }
}

#[async_trait]
impl BrokerClient for SimBroker {
    async fn place_order(&self, request: &PlaceOrderRequest) -> Result<BrokerAck> {
        if self.fail_symbols.read().contains(&request.symbol) {
            bail!("sim broker configured to fail {}", request.symbol);
        }

        let (seq_no, ord_no) = self.next_ids();
        let ts = timebase::now_ns();
        let action = match request.side {
            Side::Buy => "Buy",
            Side::Sell => "Sell",
        };

        debug!(
            symbol = %request.symbol,
            side = %request.side,
            price = request.price,
            qty = request.qty,
            ord_no = %ord_no,
            "sim broker accepted order"
        );

        self.emit(RawExecEvent {
            topic: "order".into(),
            payload: json!({
                "ord_no": ord_no,
                "seq_no": seq_no,
                "status": {"status": "Submitted"},
                "contract": {"code": request.symbol},
                "order": {"action": action, "price": request.price, "quantity": request.qty},
                "ts": ts,
            }),
            ingest_ts_ns: ts,
        });

        if self.fill_immediately {
            let fill_ts = timebase::now_ns();
            self.emit(RawExecEvent {
                topic: "deal".into(),
                payload: json!({
                    "seq_no": format!("D{}", seq_no),
                    "ord_no": ord_no,
                    "code": request.symbol,
                    "action": action,
                    "quantity": request.qty,
                    "price": request.price,
                    "account_id": self.account_id,
                    "ts": fill_ts,
                }),
                ingest_ts_ns: fill_ts,
            });
        }

        Ok(BrokerAck { seq_no, ord_no })
    }

    async fn cancel_order(&self, ord_no: &str) -> Result<()> {
        let ts = timebase::now_ns();
        self.emit(RawExecEvent {
            topic: "order".into(),
            payload: json!({
                "ord_no": ord_no,
                "status": {"status": "Cancelled"},
                "contract": {"code": ""},
                "order": {"action": "Buy", "price": 0.0, "quantity": 0},
                "ts": ts,
            }),
            ingest_ts_ns: ts,
        });
        Ok(())
    }

    async fn positions(&self) -> Result<Vec<BrokerPosition>> {
        Ok(Vec::new())
    }
}

impl std::fmt::Debug for SimBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimBroker")
            .field("orders", &self.seq.load(Ordering::Relaxed))
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn place_order_acks_and_emits_callbacks() {
        let (tx, mut rx) = mpsc::channel(8);
        let broker = SimBroker::new(tx, true);

        let ack = broker
            .place_order(&PlaceOrderRequest {
                symbol: "AAA".into(),
                side: Side::Buy,
                price: 1.005,
                qty: 2,
                tif: "ROD".into(),
            })
            .await
            .unwrap();

        assert_eq!(ack.seq_no, "S1");
        assert_eq!(ack.ord_no, "O1");

        let order = rx.recv().await.unwrap();
        assert_eq!(order.topic, "order");
        assert_eq!(order.payload["ord_no"], "O1");

        let deal = rx.recv().await.unwrap();
        assert_eq!(deal.topic, "deal");
        assert_eq!(deal.payload["quantity"], 2);
    }

    #[tokio::test]
    async fn configured_failure_is_an_error() {
        let (tx, _rx) = mpsc::channel(8);
        let broker = SimBroker::new(tx, false);
        broker.fail_symbol("BAD");

        let result = broker
            .place_order(&PlaceOrderRequest {
                symbol: "BAD".into(),
                side: Side::Sell,
                price: 1.0,
                qty: 1,
                tif: "IOC".into(),
            })
            .await;
        assert!(result.is_err());
    }
}
