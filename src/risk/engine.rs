// =============================================================================
// Risk Engine — strategy intents in, approved order commands out
// =============================================================================
//
// Per-intent pipeline, in this order:
//   1. StormGuard gate   — STORM blocks NEW; HALT blocks all but CANCEL.
//   2. GatewayPolicy gate — mode-based admission (NORMAL/DEGRADE/HALT).
//   3. Price band + absolute cap.
//   4. Max notional.
//   5. Max order size.
// Approval assigns a monotonic cmd_id, stamps `deadline_ns`, and copies the
// StormGuard state into the command. Rejections are terminal: counted under
// `risk_reject_total{strategy,reason}` and never retried.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::events::{IntentType, OrderCommand, OrderIntent};
use crate::market_data::lob::LobEngine;
use crate::metrics::MetricsRegistry;
use crate::risk::config::RiskConfig;
use crate::risk::gateway::GatewayPolicy;
use crate::risk::storm_guard::{StormGuard, StormGuardState};
use crate::risk::validators::{MaxNotionalValidator, MaxOrderSizeValidator, PriceBandValidator};
use crate::timebase;

/// Outcome of evaluating one intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RiskDecision {
    pub approved: bool,
    pub reason_code: Option<&'static str>,
}

impl RiskDecision {
    fn approve() -> Self {
        Self {
            approved: true,
            reason_code: None,
        }
    }

    fn reject(reason: &'static str) -> Self {
        Self {
            approved: false,
            reason_code: Some(reason),
        }
    }
}

pub struct RiskEngine {
    config: RiskConfig,
    storm_guard: Arc<StormGuard>,
    gateway: Arc<GatewayPolicy>,
    price_band: PriceBandValidator,
    cmd_id: AtomicU64,
    metrics: Arc<MetricsRegistry>,
}

impl RiskEngine {
    pub fn new(
        config: RiskConfig,
        storm_guard: Arc<StormGuard>,
        gateway: Arc<GatewayPolicy>,
        lob: Arc<LobEngine>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            config,
            storm_guard,
            gateway,
            price_band: PriceBandValidator::new(lob),
            cmd_id: AtomicU64::new(0),
            metrics,
        }
    }

    // -------------------------------------------------------------------------
    // Evaluation
    // -------------------------------------------------------------------------

    /// Run the full validation pipeline for one intent.
    pub fn evaluate(&self, intent: &OrderIntent) -> RiskDecision {
        let sg_state = self.storm_guard.state();

        // 1. StormGuard gate.
        match sg_state {
            StormGuardState::Halt => {
                if intent.intent_type != IntentType::Cancel {
                    return RiskDecision::reject("HALT");
                }
            }
            StormGuardState::Storm => {
                if intent.intent_type == IntentType::New {
                    return RiskDecision::reject("STORMGUARD_STORM_NEW_BLOCKED");
                }
            }
            _ => {}
        }

        // 2. GatewayPolicy gate.
        let (allowed, reason) = self.gateway.gate(intent, sg_state);
        if !allowed {
            return RiskDecision::reject(reason);
        }

        // 3-5. Hard validators, cheapest-reference first.
        let limits = self.config.limits_for(&intent.strategy_id);
        if let Err(reason) = self.price_band.check(intent, &limits) {
            return RiskDecision::reject(reason);
        }
        if let Err(reason) = MaxNotionalValidator::check(intent, &limits) {
            return RiskDecision::reject(reason);
        }
        if let Err(reason) = MaxOrderSizeValidator::check(intent, &limits) {
            return RiskDecision::reject(reason);
        }

        RiskDecision::approve()
    }

    /// Wrap an approved intent into a command.
    pub fn create_command(&self, intent: OrderIntent) -> OrderCommand {
        let cmd_id = self.cmd_id.fetch_add(1, Ordering::Relaxed) + 1;
        OrderCommand {
            cmd_id,
            intent,
            deadline_ns: timebase::now_ns() + self.config.deadline_ms * 1_000_000,
            storm_guard_state: self.storm_guard.state(),
        }
    }

    // -------------------------------------------------------------------------
    // Loop
    // -------------------------------------------------------------------------

    /// Drain the intent queue until it closes, forwarding approved commands.
    pub async fn run(
        self: Arc<Self>,
        mut intent_rx: mpsc::Receiver<OrderIntent>,
        cmd_tx: mpsc::Sender<OrderCommand>,
    ) {
        info!("risk engine started");
        while let Some(intent) = intent_rx.recv().await {
            let decision = self.evaluate(&intent);
            if decision.approved {
                let cmd = self.create_command(intent);
                if cmd_tx.send(cmd).await.is_err() {
                    warn!("command queue closed, risk engine stopping");
                    break;
                }
            } else {
                let reason = decision.reason_code.unwrap_or("UNKNOWN");
                warn!(
                    strategy = %intent.strategy_id,
                    intent_id = intent.intent_id,
                    reason,
                    "intent rejected by risk"
                );
                self.metrics.record_risk_reject(&intent.strategy_id, reason);
            }
        }
        info!("risk engine stopped");
    }
}

impl std::fmt::Debug for RiskEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RiskEngine")
            .field("cmd_id", &self.cmd_id.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{Side, Tif};
    use crate::market_data::lob::StatsMode;
    use crate::risk::config::RiskLimits;
    use crate::risk::gateway::GatewayPolicy;
    use crate::risk::storm_guard::{StormGuardConfig, StormInputs};

    fn intent(intent_type: IntentType, price: i64, qty: i64) -> OrderIntent {
        OrderIntent {
            intent_id: 3,
            strategy_id: "strat".into(),
            symbol: "AAA".into(),
            intent_type,
            side: Side::Buy,
            price,
            qty,
            tif: Tif::Rod,
            target_order_id: None,
            timestamp_ns: 0,
        }
    }

    fn engine_with(limits: RiskLimits) -> (Arc<RiskEngine>, Arc<StormGuard>, Arc<MetricsRegistry>) {
        let metrics = Arc::new(MetricsRegistry::new());
        let storm = Arc::new(StormGuard::new(
            StormGuardConfig::default(),
            metrics.clone(),
        ));
        let gateway = Arc::new(GatewayPolicy::with_flags(true, true, metrics.clone()));
        let lob = Arc::new(LobEngine::new(StatsMode::Lazy));
        let config = RiskConfig {
            global_defaults: limits,
            ..Default::default()
        };
        let engine = Arc::new(RiskEngine::new(
            config,
            storm.clone(),
            gateway,
            lob,
            metrics.clone(),
        ));
        (engine, storm, metrics)
    }

    #[test]
    fn valid_intent_is_approved() {
        let (engine, _storm, _metrics) = engine_with(RiskLimits {
            max_order_size: 10,
            max_notional: 1_000_000,
            ..Default::default()
        });
        let decision = engine.evaluate(&intent(IntentType::New, 100, 5));
        assert!(decision.approved);
    }

    #[test]
    fn storm_blocks_new_with_typed_reason() {
        let (engine, storm, _metrics) = engine_with(RiskLimits::default());
        storm.update(StormInputs {
            latency_us: Some(21_000.0),
            ..Default::default()
        });
        let decision = engine.evaluate(&intent(IntentType::New, 100, 1));
        assert!(!decision.approved);
        assert_eq!(decision.reason_code, Some("STORMGUARD_STORM_NEW_BLOCKED"));
    }

    #[test]
    fn halt_blocks_new_allows_cancel() {
        let (engine, storm, _metrics) = engine_with(RiskLimits::default());
        storm.trigger_halt("ops");

        let decision = engine.evaluate(&intent(IntentType::New, 100, 1));
        assert!(!decision.approved);
        assert_eq!(decision.reason_code, Some("HALT"));

        let decision = engine.evaluate(&intent(IntentType::Cancel, 100, 1));
        assert!(decision.approved);
    }

    #[test]
    fn price_cap_reject_reaches_metrics_via_run_path() {
        let (engine, _storm, metrics) = engine_with(RiskLimits {
            max_price_cap: 15_000,
            ..Default::default()
        });
        let decision = engine.evaluate(&intent(IntentType::New, 20_000, 1));
        assert_eq!(decision.reason_code, Some("MAX_PRICE_CAP"));

        // The loop records the reject; emulate one pass.
        metrics.record_risk_reject("strat", decision.reason_code.unwrap());
        assert_eq!(metrics.risk_reject_count("strat", "MAX_PRICE_CAP"), 1);
    }

    #[test]
    fn commands_carry_monotonic_ids_and_deadlines() {
        let (engine, _storm, _metrics) = engine_with(RiskLimits::default());
        let before = timebase::now_ns();
        let c1 = engine.create_command(intent(IntentType::New, 100, 1));
        let c2 = engine.create_command(intent(IntentType::New, 100, 1));

        assert_eq!(c1.cmd_id + 1, c2.cmd_id);
        assert!(c1.deadline_ns >= before + 400 * 1_000_000);
        assert_eq!(c1.storm_guard_state, StormGuardState::Normal);
    }

    #[tokio::test]
    async fn run_forwards_approved_intents_in_order() {
        let (engine, _storm, _metrics) = engine_with(RiskLimits {
            max_order_size: 10,
            max_notional: i64::MAX,
            ..Default::default()
        });
        let (intent_tx, intent_rx) = mpsc::channel(16);
        let (cmd_tx, mut cmd_rx) = mpsc::channel(16);

        let handle = tokio::spawn(engine.run(intent_rx, cmd_tx));

        for id in 1..=3u64 {
            let mut i = intent(IntentType::New, 100, 1);
            i.intent_id = id;
            intent_tx.send(i).await.unwrap();
        }
        drop(intent_tx);

        let mut seen = Vec::new();
        while let Some(cmd) = cmd_rx.recv().await {
            seen.push(cmd.intent.intent_id);
        }
        assert_eq!(seen, vec![1, 2, 3]);
        handle.await.unwrap();
    }
}
