// =============================================================================
// Strategy Runtime — bus events in, order intents out
// =============================================================================
//
// Strategies are cooperative: they run on the runtime's task, receive typed
// events for their subscribed symbols, and emit intents through the context
// helpers. The runtime forwards intents to the risk queue in emit order —
// a strategy always sees its own intents reach risk in the order it placed
// them.
// =============================================================================

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::bus::BusConsumer;
use crate::events::{
    BidAskEvent, BusEvent, FillEvent, IntentType, LobStatsEvent, OrderEvent, OrderIntent, Side,
    TickEvent, Tif,
};
use crate::execution::positions::PositionStore;
use crate::timebase;

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// An in-process trading strategy. Handlers default to no-ops so a strategy
/// implements only the events it cares about.
pub trait Strategy: Send {
    fn id(&self) -> &str;

    /// Symbols this strategy wants. Empty means every symbol.
    fn symbols(&self) -> &[String];

    fn on_tick(&mut self, _ctx: &mut StrategyContext, _event: &TickEvent) {}
    fn on_book(&mut self, _ctx: &mut StrategyContext, _event: &BidAskEvent) {}
    fn on_stats(&mut self, _ctx: &mut StrategyContext, _event: &LobStatsEvent) {}
    fn on_order(&mut self, _ctx: &mut StrategyContext, _event: &OrderEvent) {}
    fn on_fill(&mut self, _ctx: &mut StrategyContext, _event: &FillEvent) {}
}

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// Per-dispatch helper handed to strategy callbacks. Collects emitted
/// intents and exposes a read-only position view.
pub struct StrategyContext {
    strategy_id: String,
    positions: Arc<PositionStore>,
    intents: Vec<OrderIntent>,
    next_intent_id: u64,
}

impl StrategyContext {
    fn new(strategy_id: &str, positions: Arc<PositionStore>, next_intent_id: u64) -> Self {
        Self {
            strategy_id: strategy_id.to_string(),
            positions,
            intents: Vec::new(),
            next_intent_id,
        }
    }

    /// Signed net position for this strategy on `symbol`.
    pub fn position(&self, symbol: &str) -> i64 {
        self.positions.strategy_net_qty(&self.strategy_id, symbol)
    }

    pub fn buy(&mut self, symbol: &str, price: i64, qty: i64) {
        self.emit(symbol, Side::Buy, price, qty, IntentType::New, None);
    }

    pub fn sell(&mut self, symbol: &str, price: i64, qty: i64) {
        self.emit(symbol, Side::Sell, price, qty, IntentType::New, None);
    }

    pub fn cancel(&mut self, symbol: &str, target_order_id: &str) {
        self.emit(
            symbol,
            Side::Buy,
            0,
            0,
            IntentType::Cancel,
            Some(target_order_id.to_string()),
        );
    }

    fn emit(
        &mut self,
        symbol: &str,
        side: Side,
        price: i64,
        qty: i64,
        intent_type: IntentType,
        target_order_id: Option<String>,
    ) {
        self.next_intent_id += 1;
        self.intents.push(OrderIntent {
            intent_id: self.next_intent_id,
            strategy_id: self.strategy_id.clone(),
            symbol: symbol.to_string(),
            intent_type,
            side,
            price,
            qty,
            tif: Tif::Limit,
            target_order_id,
            timestamp_ns: timebase::now_ns(),
        });
    }
}

// ---------------------------------------------------------------------------
// Runtime
// ---------------------------------------------------------------------------

pub struct StrategyRuntime {
    strategies: Vec<Box<dyn Strategy>>,
    positions: Arc<PositionStore>,
    intent_tx: mpsc::Sender<OrderIntent>,
    /// Next intent id per strategy index; ids are monotonic per strategy.
    intent_seqs: Vec<u64>,
}

impl StrategyRuntime {
    pub fn new(
        strategies: Vec<Box<dyn Strategy>>,
        positions: Arc<PositionStore>,
        intent_tx: mpsc::Sender<OrderIntent>,
    ) -> Self {
        let intent_seqs = vec![0; strategies.len()];
        Self {
            strategies,
            positions,
            intent_tx,
            intent_seqs,
        }
    }

    /// Consume the bus and dispatch until shutdown.
    pub async fn run(mut self, mut consumer: BusConsumer) {
        info!(strategies = self.strategies.len(), "strategy runtime started");
        loop {
            let batch = consumer.next_batch(64).await;
            for event in &batch {
                self.dispatch(event).await;
            }
        }
    }

    /// Route one event through every subscribed strategy and forward the
    /// collected intents in emit order. Public for tests.
    pub async fn dispatch(&mut self, event: &BusEvent) {
        let symbol = event.symbol();
        for (idx, strategy) in self.strategies.iter_mut().enumerate() {
            let wants = {
                let subs = strategy.symbols();
                subs.is_empty() || subs.iter().any(|s| s == symbol)
            };
            if !wants {
                continue;
            }

            let mut ctx = StrategyContext::new(
                strategy.id(),
                self.positions.clone(),
                self.intent_seqs[idx],
            );
            match event {
                BusEvent::Tick(e) => strategy.on_tick(&mut ctx, e),
                BusEvent::BidAsk(e) => strategy.on_book(&mut ctx, e),
                BusEvent::Stats(e) => strategy.on_stats(&mut ctx, e),
                BusEvent::Order(e) => strategy.on_order(&mut ctx, e),
                BusEvent::Fill(e) => strategy.on_fill(&mut ctx, e),
                BusEvent::Position(_) => {}
            }

            self.intent_seqs[idx] = ctx.next_intent_id;
            for intent in ctx.intents {
                if self.intent_tx.send(intent).await.is_err() {
                    warn!("intent queue closed, dropping strategy output");
                    return;
                }
            }
        }
    }
}

impl std::fmt::Debug for StrategyRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyRuntime")
            .field("strategies", &self.strategies.len())
            .finish()
    }
}
