// =============================================================================
// Execution Router — inbound broker callbacks to positions and the bus
// =============================================================================
//
// Drains the raw exec queue and dispatches by topic:
//   `order` — normalize, publish; a terminal status additionally invokes the
//             terminal callback handed in at construction (that callback is
//             how the adapter learns to drop the live order — passing a
//             boundary callable breaks the adapter <-> router cycle).
//   `deal`  — normalize to a fill, fold into the position store, and publish
//             delta + fill adjacently in one batch.
//
// Per-event failures are counted and swallowed; the router never dies on a
// malformed callback.
// =============================================================================

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::info;

use crate::bus::RingBus;
use crate::events::BusEvent;
use crate::execution::normalizer::{ExecutionNormalizer, RawExecEvent};
use crate::execution::positions::PositionStore;
use crate::metrics::MetricsRegistry;
use crate::timebase;

/// Callback invoked with `(strategy_id, order_id)` on terminal statuses.
pub type TerminalHandler = Box<dyn Fn(&str, &str) + Send + Sync>;

pub struct ExecutionRouter {
    bus: Arc<RingBus>,
    normalizer: ExecutionNormalizer,
    positions: Arc<PositionStore>,
    terminal_handler: TerminalHandler,
    metrics: Arc<MetricsRegistry>,
}

impl ExecutionRouter {
    pub fn new(
        bus: Arc<RingBus>,
        normalizer: ExecutionNormalizer,
        positions: Arc<PositionStore>,
        terminal_handler: TerminalHandler,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            bus,
            normalizer,
            positions,
            terminal_handler,
            metrics,
        }
    }

    /// Drain the raw exec queue until it closes.
    pub async fn run(self, mut raw_rx: mpsc::Receiver<RawExecEvent>) {
        info!("execution router started");
        while let Some(raw) = raw_rx.recv().await {
            self.process(raw);
        }
        info!("execution router stopped");
    }

    /// Route one callback. Split out for tests.
    pub fn process(&self, raw: RawExecEvent) {
        if raw.ingest_ts_ns > 0 {
            self.metrics
                .execution_router_lag_ns
                .store(timebase::now_ns() - raw.ingest_ts_ns, Ordering::Relaxed);
        }

        match raw.topic.as_str() {
            "order" => {
                let Some(event) = self.normalizer.normalize_order(&raw) else {
                    self.metrics
                        .execution_router_errors_total
                        .fetch_add(1, Ordering::Relaxed);
                    return;
                };
                let terminal = event.status.is_terminal();
                let strategy_id = event.strategy_id.clone();
                let order_id = event.order_id.clone();
                self.bus.publish(BusEvent::Order(event));
                if terminal {
                    (self.terminal_handler)(&strategy_id, &order_id);
                }
            }
            "deal" => {
                let Some(fill) = self.normalizer.normalize_fill(&raw) else {
                    self.metrics
                        .execution_router_errors_total
                        .fetch_add(1, Ordering::Relaxed);
                    return;
                };
                let delta = self.positions.on_fill(&fill);
                // Delta and fill for the same execution stay adjacent.
                self.bus
                    .publish_many(vec![BusEvent::Position(delta), BusEvent::Fill(fill)]);
            }
            _ => {
                self.metrics
                    .execution_router_errors_total
                    .fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

impl std::fmt::Debug for ExecutionRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionRouter").finish_non_exhaustive()
    }
}
