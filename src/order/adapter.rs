// =============================================================================
// Order Adapter — rate-limit, circuit-break, dispatch, and id bookkeeping
// =============================================================================
//
// Consumes risk-approved `OrderCommand`s. Pre-dispatch checks run in cost
// order: deadline, rate limiter, circuit breaker. Anything rejected lands in
// the dead-letter queue with a typed reason.
//
// On a successful placement the broker's `seq_no` and `ord_no` both map to
// the `strategy:intent_id` order key in the shared resolver so execution
// callbacks can be attributed later. Live orders are keyed by order key and
// removed by `on_terminal_state` once the router reports a terminal status.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::broker::{BrokerClient, PlaceOrderRequest};
use crate::events::{IntentType, OrderCommand, Tif};
use crate::metrics::MetricsRegistry;
use crate::order::circuit_breaker::CircuitBreaker;
use crate::order::deadletter::{DeadLetterQueue, RejectionReason};
use crate::order::ids::OrderIdResolver;
use crate::order::rate_limiter::RateLimiter;
use crate::pricing::PriceCodec;
use crate::timebase;

/// A resting order the adapter still considers alive.
#[derive(Debug, Clone)]
pub struct LiveOrder {
    pub command: OrderCommand,
    pub seq_no: String,
    pub ord_no: String,
}

pub struct OrderAdapter {
    client: Arc<dyn BrokerClient>,
    rate_limiter: RateLimiter,
    circuit_breaker: CircuitBreaker,
    dlq: Arc<DeadLetterQueue>,
    resolver: Arc<OrderIdResolver>,
    live_orders: RwLock<HashMap<String, LiveOrder>>,
    codec: PriceCodec,
    metrics: Arc<MetricsRegistry>,
}

impl OrderAdapter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: Arc<dyn BrokerClient>,
        rate_limiter: RateLimiter,
        circuit_breaker: CircuitBreaker,
        dlq: Arc<DeadLetterQueue>,
        resolver: Arc<OrderIdResolver>,
        codec: PriceCodec,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            client,
            rate_limiter,
            circuit_breaker,
            dlq,
            resolver,
            live_orders: RwLock::new(HashMap::new()),
            codec,
            metrics,
        }
    }

    // -------------------------------------------------------------------------
    // Loop
    // -------------------------------------------------------------------------

    /// Drain the command queue until it closes.
    pub async fn run(self: Arc<Self>, mut cmd_rx: mpsc::Receiver<OrderCommand>) {
        info!("order adapter started");
        while let Some(cmd) = cmd_rx.recv().await {
            self.dispatch(cmd).await;
        }
        info!("order adapter stopped");
    }

    // -------------------------------------------------------------------------
    // Dispatch
    // -------------------------------------------------------------------------

    /// Run pre-dispatch checks and forward one command to the broker.
    pub async fn dispatch(&self, cmd: OrderCommand) {
        // 1. Deadline.
        if timebase::now_ns() > cmd.deadline_ns {
            warn!(cmd_id = cmd.cmd_id, "command past deadline, rejecting");
            self.reject(&cmd, RejectionReason::DeadlineExceeded, "deadline exceeded");
            return;
        }

        // 2. Rate limit.
        if !self.rate_limiter.check() {
            self.reject(&cmd, RejectionReason::RateLimit, "hard rate limit");
            return;
        }

        // 3. Circuit breaker.
        if self.circuit_breaker.is_open() {
            self.reject(&cmd, RejectionReason::CircuitOpen, "circuit breaker open");
            return;
        }

        match cmd.intent.intent_type {
            IntentType::New | IntentType::Modify => self.dispatch_place(cmd).await,
            IntentType::Cancel => self.dispatch_cancel(cmd).await,
        }
    }

    async fn dispatch_place(&self, cmd: OrderCommand) {
        let intent = &cmd.intent;
        let request = PlaceOrderRequest {
            symbol: intent.symbol.clone(),
            side: intent.side,
            price: self.codec.descale(&intent.symbol, intent.price),
            qty: intent.qty,
            tif: tif_str(intent.tif).to_string(),
        };

        self.rate_limiter.record();
        self.metrics.record_order_action("place");

        match self.client.place_order(&request).await {
            Ok(ack) => {
                self.circuit_breaker.record_success();
                let order_key = intent.order_key();
                self.resolver.record(&ack.seq_no, &order_key);
                if !ack.ord_no.is_empty() {
                    self.resolver.record(&ack.ord_no, &order_key);
                }
                info!(
                    order_key = %order_key,
                    seq_no = %ack.seq_no,
                    ord_no = %ack.ord_no,
                    symbol = %intent.symbol,
                    "order dispatched"
                );
                self.live_orders.write().insert(
                    order_key,
                    LiveOrder {
                        command: cmd,
                        seq_no: ack.seq_no,
                        ord_no: ack.ord_no,
                    },
                );
            }
            Err(e) => {
                warn!(cmd_id = cmd.cmd_id, error = %e, "broker rejected order");
                self.circuit_breaker.record_failure();
                self.reject(&cmd, RejectionReason::BrokerError, &e.to_string());
            }
        }
    }

    async fn dispatch_cancel(&self, cmd: OrderCommand) {
        let target = match cmd.intent.target_order_id.as_deref() {
            Some(t) => t.to_string(),
            None => {
                self.reject(
                    &cmd,
                    RejectionReason::Other("missing_target".into()),
                    "cancel without target order",
                );
                return;
            }
        };

        // Target may be an order key or a broker ord_no.
        let ord_no = self
            .live_orders
            .read()
            .get(&target)
            .map(|o| o.ord_no.clone())
            .unwrap_or(target);

        self.rate_limiter.record();
        self.metrics.record_order_action("cancel");

        match self.client.cancel_order(&ord_no).await {
            Ok(()) => {
                self.circuit_breaker.record_success();
                info!(ord_no = %ord_no, "cancel dispatched");
            }
            Err(e) => {
                warn!(ord_no = %ord_no, error = %e, "cancel failed at broker");
                self.circuit_breaker.record_failure();
                self.reject(&cmd, RejectionReason::BrokerError, &e.to_string());
            }
        }
    }

    fn reject(&self, cmd: &OrderCommand, reason: RejectionReason, message: &str) {
        self.metrics
            .order_reject_total
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let intent = &cmd.intent;
        self.dlq.add(
            &intent.order_key(),
            &intent.strategy_id,
            &intent.symbol,
            &intent.side.to_string(),
            intent.price,
            intent.qty,
            &intent.intent_type.to_string(),
            reason,
            message,
        );
    }

    // -------------------------------------------------------------------------
    // Terminal-state cleanup
    // -------------------------------------------------------------------------

    /// Remove a live order once the router reports a terminal status.
    ///
    /// `order_id` may be a broker identifier or an order key; both resolve.
    pub fn on_terminal_state(&self, strategy_id: &str, order_id: &str) {
        let order_key = self
            .resolver
            .order_key(order_id)
            .unwrap_or_else(|| {
                if order_id.contains(':') {
                    order_id.to_string()
                } else {
                    format!("{strategy_id}:{order_id}")
                }
            });

        if self.live_orders.write().remove(&order_key).is_some() {
            info!(order_key = %order_key, "live order cleared on terminal state");
        }
    }

    /// Snapshot of live order keys.
    pub fn live_order_keys(&self) -> Vec<String> {
        self.live_orders.read().keys().cloned().collect()
    }

    pub fn has_live_order(&self, order_key: &str) -> bool {
        self.live_orders.read().contains_key(order_key)
    }
}

fn tif_str(tif: Tif) -> &'static str {
    match tif {
        Tif::Limit => "LIMIT",
        Tif::Ioc => "IOC",
        Tif::Fok => "FOK",
        Tif::Rod => "ROD",
    }
}

impl std::fmt::Debug for OrderAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderAdapter")
            .field("live_orders", &self.live_orders.read().len())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::SimBroker;
    use crate::events::{OrderIntent, Side};
    use crate::risk::storm_guard::StormGuardState;

    fn command(intent_id: u64, symbol: &str, deadline_offset_ns: i64) -> OrderCommand {
        OrderCommand {
            cmd_id: intent_id,
            intent: OrderIntent {
                intent_id,
                strategy_id: "strat1".into(),
                symbol: symbol.into(),
                intent_type: IntentType::New,
                side: Side::Buy,
                price: 10_000,
                qty: 1,
                tif: Tif::Limit,
                target_order_id: None,
                timestamp_ns: 0,
            },
            deadline_ns: timebase::now_ns() + deadline_offset_ns,
            storm_guard_state: StormGuardState::Normal,
        }
    }

    fn adapter(
        broker: Arc<SimBroker>,
        dlq_dir: &std::path::Path,
    ) -> (Arc<OrderAdapter>, Arc<OrderIdResolver>, Arc<DeadLetterQueue>) {
        let resolver = Arc::new(OrderIdResolver::new());
        let dlq = Arc::new(DeadLetterQueue::new(dlq_dir, 64));
        let adapter = Arc::new(OrderAdapter::new(
            broker,
            RateLimiter::new(100, 200, 10),
            CircuitBreaker::new(3, 60),
            dlq.clone(),
            resolver.clone(),
            PriceCodec::fixed(10_000),
            Arc::new(MetricsRegistry::new()),
        ));
        (adapter, resolver, dlq)
    }

    #[tokio::test]
    async fn maps_broker_ids_and_clears_on_terminal() {
        let dir = tempfile::tempdir().unwrap();
        let (exec_tx, _exec_rx) = mpsc::channel(8);
        let broker = Arc::new(SimBroker::new(exec_tx, false));
        let (adapter, resolver, _dlq) = adapter(broker, dir.path());

        adapter.dispatch(command(1, "AAA", 1_000_000_000)).await;

        assert_eq!(resolver.order_key("S1").as_deref(), Some("strat1:1"));
        assert_eq!(resolver.order_key("O1").as_deref(), Some("strat1:1"));
        assert!(adapter.has_live_order("strat1:1"));

        adapter.on_terminal_state("strat1", "O1");
        assert!(!adapter.has_live_order("strat1:1"));
    }

    #[tokio::test]
    async fn expired_deadline_goes_to_dlq() {
        let dir = tempfile::tempdir().unwrap();
        let (exec_tx, _exec_rx) = mpsc::channel(8);
        let broker = Arc::new(SimBroker::new(exec_tx, false));
        let (adapter, _resolver, dlq) = adapter(broker, dir.path());

        adapter.dispatch(command(1, "AAA", -1)).await;

        assert!(!adapter.has_live_order("strat1:1"));
        let stats = dlq.stats();
        assert_eq!(stats.total_entries, 1);
        dlq.flush();
        let entries = dlq.read_all();
        assert_eq!(entries[0].reason, RejectionReason::DeadlineExceeded);
    }

    #[tokio::test]
    async fn broker_failure_feeds_breaker_and_dlq() {
        let dir = tempfile::tempdir().unwrap();
        let (exec_tx, _exec_rx) = mpsc::channel(8);
        let broker = Arc::new(SimBroker::new(exec_tx, false));
        broker.fail_symbol("BAD");
        let (adapter, _resolver, dlq) = adapter(broker, dir.path());

        for id in 1..=3 {
            adapter.dispatch(command(id, "BAD", 1_000_000_000)).await;
        }

        // Threshold 3 consecutive failures opens the breaker.
        adapter.dispatch(command(4, "BAD", 1_000_000_000)).await;
        dlq.flush();
        let entries = dlq.read_all();
        assert_eq!(entries.len(), 4);
        assert_eq!(entries[3].reason, RejectionReason::CircuitOpen);
    }

    #[tokio::test]
    async fn cancel_resolves_live_order_to_broker_id() {
        let dir = tempfile::tempdir().unwrap();
        let (exec_tx, mut exec_rx) = mpsc::channel(8);
        let broker = Arc::new(SimBroker::new(exec_tx, false));
        let (adapter, _resolver, _dlq) = adapter(broker, dir.path());

        adapter.dispatch(command(1, "AAA", 1_000_000_000)).await;
        let _submitted = exec_rx.recv().await.unwrap();

        let mut cancel = command(2, "AAA", 1_000_000_000);
        cancel.intent.intent_type = IntentType::Cancel;
        cancel.intent.target_order_id = Some("strat1:1".into());
        adapter.dispatch(cancel).await;

        let cb = exec_rx.recv().await.unwrap();
        assert_eq!(cb.topic, "order");
        assert_eq!(cb.payload["ord_no"], "O1");
        assert_eq!(cb.payload["status"]["status"], "Cancelled");
    }
}
