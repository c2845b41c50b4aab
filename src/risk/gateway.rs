// =============================================================================
// Gateway Policy — intent-admission FSM: NORMAL / DEGRADE / HALT
// =============================================================================
//
// Admission rules:
//   NORMAL:  everything passes.
//   DEGRADE: NEW blocked; CANCEL and MODIFY pass.
//   HALT:    everything blocked, except CANCEL when the halt-cancel flag is
//            set (orders already resting should be killable during a halt).
//
// NORMAL <-> DEGRADE transitions follow StormGuard automatically (>= STORM
// degrades, < STORM recovers). HALT is never entered automatically — only an
// operator or a supervising component sets it.
//
// Env flags:
//   TEMPEST_GATEWAY_HALT_CANCEL      allow CANCEL in HALT (default on)
//   TEMPEST_GATEWAY_DEGRADE_ON_STORM auto-degrade on STORM (default on)
// =============================================================================

use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::warn;

use crate::events::{IntentType, OrderIntent};
use crate::metrics::MetricsRegistry;
use crate::risk::storm_guard::StormGuardState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GatewayPolicyMode {
    Normal = 0,
    Degrade = 1,
    Halt = 2,
}

impl GatewayPolicyMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "NORMAL",
            Self::Degrade => "DEGRADE",
            Self::Halt => "HALT",
        }
    }
}

pub struct GatewayPolicy {
    mode: RwLock<GatewayPolicyMode>,
    halt_cancel: bool,
    degrade_on_storm: bool,
    metrics: Arc<MetricsRegistry>,
}

impl GatewayPolicy {
    pub fn new(metrics: Arc<MetricsRegistry>) -> Self {
        Self {
            mode: RwLock::new(GatewayPolicyMode::Normal),
            halt_cancel: env_flag("TEMPEST_GATEWAY_HALT_CANCEL", true),
            degrade_on_storm: env_flag("TEMPEST_GATEWAY_DEGRADE_ON_STORM", true),
            metrics,
        }
    }

    /// Test constructor with explicit flags.
    #[cfg(test)]
    pub fn with_flags(
        halt_cancel: bool,
        degrade_on_storm: bool,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            mode: RwLock::new(GatewayPolicyMode::Normal),
            halt_cancel,
            degrade_on_storm,
            metrics,
        }
    }

    // -------------------------------------------------------------------------
    // Gating
    // -------------------------------------------------------------------------

    /// Evaluate the intent against the current mode and StormGuard state.
    ///
    /// Returns `(allowed, reason)` where the reason is `"OK"`, `"DEGRADE"`,
    /// or `"HALT"`. Side effect: NORMAL/DEGRADE auto-transitions.
    pub fn gate(&self, intent: &OrderIntent, sg_state: StormGuardState) -> (bool, &'static str) {
        if self.degrade_on_storm
            && sg_state >= StormGuardState::Storm
            && self.mode() == GatewayPolicyMode::Normal
        {
            self.set_mode(GatewayPolicyMode::Degrade);
        }
        if sg_state < StormGuardState::Storm && self.mode() == GatewayPolicyMode::Degrade {
            self.set_mode(GatewayPolicyMode::Normal);
        }

        match self.mode() {
            GatewayPolicyMode::Halt => {
                if intent.intent_type == IntentType::Cancel && self.halt_cancel {
                    (true, "OK")
                } else {
                    (false, "HALT")
                }
            }
            GatewayPolicyMode::Degrade => {
                if intent.intent_type == IntentType::New {
                    (false, "DEGRADE")
                } else {
                    (true, "OK")
                }
            }
            GatewayPolicyMode::Normal => (true, "OK"),
        }
    }

    // -------------------------------------------------------------------------
    // Mode control
    // -------------------------------------------------------------------------

    pub fn mode(&self) -> GatewayPolicyMode {
        *self.mode.read()
    }

    /// Explicit operator halt.
    pub fn set_halt(&self) {
        self.set_mode(GatewayPolicyMode::Halt);
    }

    /// Explicit recovery to NORMAL.
    pub fn set_normal(&self) {
        self.set_mode(GatewayPolicyMode::Normal);
    }

    fn set_mode(&self, new_mode: GatewayPolicyMode) {
        let mut mode = self.mode.write();
        if *mode == new_mode {
            return;
        }
        warn!(
            old = mode.as_str(),
            new = new_mode.as_str(),
            "gateway policy transition"
        );
        *mode = new_mode;
        drop(mode);
        self.metrics
            .gateway_policy_mode
            .store(new_mode as i64, Ordering::Relaxed);
    }
}

fn env_flag(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(v) => !matches!(v.to_lowercase().as_str(), "0" | "false" | "no" | "off"),
        Err(_) => default,
    }
}

impl std::fmt::Debug for GatewayPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayPolicy")
            .field("mode", &self.mode().as_str())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{Side, Tif};

    fn intent(intent_type: IntentType) -> OrderIntent {
        OrderIntent {
            intent_id: 1,
            strategy_id: "s1".into(),
            symbol: "TSE:2330".into(),
            intent_type,
            side: Side::Buy,
            price: 1_000_000,
            qty: 1,
            tif: Tif::Limit,
            target_order_id: None,
            timestamp_ns: 0,
        }
    }

    fn policy(halt_cancel: bool, degrade_on_storm: bool) -> GatewayPolicy {
        GatewayPolicy::with_flags(halt_cancel, degrade_on_storm, Arc::new(MetricsRegistry::new()))
    }

    #[test]
    fn normal_allows_new() {
        let p = policy(true, true);
        let (ok, reason) = p.gate(&intent(IntentType::New), StormGuardState::Normal);
        assert!(ok);
        assert_eq!(reason, "OK");
    }

    #[test]
    fn halt_blocks_new() {
        let p = policy(true, true);
        p.set_halt();
        let (ok, reason) = p.gate(&intent(IntentType::New), StormGuardState::Halt);
        assert!(!ok);
        assert_eq!(reason, "HALT");
    }

    #[test]
    fn halt_allows_cancel_when_flag_set() {
        let p = policy(true, true);
        p.set_halt();
        let (ok, _) = p.gate(&intent(IntentType::Cancel), StormGuardState::Halt);
        assert!(ok);
    }

    #[test]
    fn halt_blocks_cancel_when_flag_cleared() {
        let p = policy(false, true);
        p.set_halt();
        let (ok, reason) = p.gate(&intent(IntentType::Cancel), StormGuardState::Halt);
        assert!(!ok);
        assert_eq!(reason, "HALT");
    }

    #[test]
    fn auto_degrade_on_storm_blocks_new_allows_cancel() {
        let p = policy(true, true);
        let (ok, reason) = p.gate(&intent(IntentType::New), StormGuardState::Storm);
        assert!(!ok);
        assert_eq!(reason, "DEGRADE");
        assert_eq!(p.mode(), GatewayPolicyMode::Degrade);

        let (ok, _) = p.gate(&intent(IntentType::Cancel), StormGuardState::Storm);
        assert!(ok);
    }

    #[test]
    fn auto_recover_when_storm_clears() {
        let p = policy(true, true);
        p.gate(&intent(IntentType::New), StormGuardState::Storm);
        assert_eq!(p.mode(), GatewayPolicyMode::Degrade);

        let (ok, _) = p.gate(&intent(IntentType::New), StormGuardState::Normal);
        assert!(ok);
        assert_eq!(p.mode(), GatewayPolicyMode::Normal);
    }

    #[test]
    fn no_auto_degrade_when_disabled() {
        let p = policy(true, false);
        p.gate(&intent(IntentType::New), StormGuardState::Storm);
        assert_eq!(p.mode(), GatewayPolicyMode::Normal);
    }

    #[test]
    fn halt_is_never_entered_automatically() {
        let p = policy(true, true);
        p.gate(&intent(IntentType::New), StormGuardState::Halt);
        // StormGuard HALT degrades, but never force-halts the gateway.
        assert_eq!(p.mode(), GatewayPolicyMode::Degrade);
    }

    #[test]
    fn mode_gauge_is_exported() {
        let metrics = Arc::new(MetricsRegistry::new());
        let p = GatewayPolicy::with_flags(true, true, metrics.clone());
        p.set_halt();
        assert_eq!(metrics.snapshot().gateway_policy_mode, 2);
    }
}
