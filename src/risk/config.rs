// =============================================================================
// Risk Configuration — YAML limits with per-strategy overrides
// =============================================================================
//
// Loaded once at startup. `global_defaults` applies to every strategy;
// entries under `strategies:` override individual limits. All monetary
// limits are in scaled-integer units, matching the rest of the engine.
// =============================================================================

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::risk::storm_guard::StormGuardConfig;

fn default_max_order_size() -> i64 {
    100
}

fn default_max_notional() -> i64 {
    1_000_000_000
}

fn default_max_price_cap() -> i64 {
    i64::MAX
}

fn default_price_band_pct() -> f64 {
    0.10
}

fn default_contract_multiplier() -> i64 {
    1
}

fn default_deadline_ms() -> i64 {
    500
}

/// Limits applied to an intent. Used both as the global default block and as
/// per-strategy overrides (every field optional in the override position).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskLimits {
    #[serde(default = "default_max_order_size")]
    pub max_order_size: i64,
    #[serde(default = "default_max_notional")]
    pub max_notional: i64,
    /// Absolute scaled-price ceiling.
    #[serde(default = "default_max_price_cap")]
    pub max_price_cap: i64,
    /// Allowed deviation from the reference price, as a fraction.
    #[serde(default = "default_price_band_pct")]
    pub price_band_pct: f64,
    #[serde(default = "default_contract_multiplier")]
    pub contract_multiplier: i64,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_order_size: default_max_order_size(),
            max_notional: default_max_notional(),
            max_price_cap: default_max_price_cap(),
            price_band_pct: default_price_band_pct(),
            contract_multiplier: default_contract_multiplier(),
        }
    }
}

/// Optional per-strategy override block.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RiskLimitOverrides {
    pub max_order_size: Option<i64>,
    pub max_notional: Option<i64>,
    pub max_price_cap: Option<i64>,
    pub price_band_pct: Option<f64>,
    pub contract_multiplier: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    #[serde(default)]
    pub global_defaults: RiskLimits,
    #[serde(default)]
    pub strategies: HashMap<String, RiskLimitOverrides>,
    #[serde(default)]
    pub storm_guard: StormGuardConfig,
    /// Outbound deadline attached to approved commands.
    #[serde(default = "default_deadline_ms")]
    pub deadline_ms: i64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            global_defaults: RiskLimits::default(),
            strategies: HashMap::new(),
            storm_guard: StormGuardConfig::default(),
            deadline_ms: default_deadline_ms(),
        }
    }
}

impl RiskConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read risk config from {}", path.display()))?;
        let config: Self = serde_yaml::from_str(&content)
            .with_context(|| format!("failed to parse risk config from {}", path.display()))?;
        info!(
            path = %path.display(),
            strategies = config.strategies.len(),
            "risk config loaded"
        );
        Ok(config)
    }

    /// Effective limits for one strategy: globals with overrides applied.
    pub fn limits_for(&self, strategy_id: &str) -> RiskLimits {
        let mut limits = self.global_defaults.clone();
        if let Some(ov) = self.strategies.get(strategy_id) {
            if let Some(v) = ov.max_order_size {
                limits.max_order_size = v;
            }
            if let Some(v) = ov.max_notional {
                limits.max_notional = v;
            }
            if let Some(v) = ov.max_price_cap {
                limits.max_price_cap = v;
            }
            if let Some(v) = ov.price_band_pct {
                limits.price_band_pct = v;
            }
            if let Some(v) = ov.contract_multiplier {
                limits.contract_multiplier = v;
            }
        }
        limits
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_yaml_yields_defaults() {
        let cfg: RiskConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(cfg.global_defaults.max_order_size, 100);
        assert_eq!(cfg.deadline_ms, 500);
        assert!(cfg.strategies.is_empty());
    }

    #[test]
    fn per_strategy_overrides_win() {
        let yaml = "\
global_defaults:
  max_order_size: 10
  max_notional: 1000000
strategies:
  scalper:
    max_order_size: 2
";
        let cfg: RiskConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.limits_for("scalper").max_order_size, 2);
        assert_eq!(cfg.limits_for("scalper").max_notional, 1_000_000);
        assert_eq!(cfg.limits_for("other").max_order_size, 10);
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("risk.yaml");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(b"global_defaults:\n  max_price_cap: 15000\ndeadline_ms: 250\n")
            .unwrap();

        let cfg = RiskConfig::load(&path).unwrap();
        assert_eq!(cfg.global_defaults.max_price_cap, 15_000);
        assert_eq!(cfg.deadline_ms, 250);
    }
}
