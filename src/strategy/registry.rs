// =============================================================================
// Strategy Registry — YAML-configured strategy instantiation
// =============================================================================
//
// Maps a `kind` string to a constructor; strategies are compiled in, the
// registry only chooses which ones run and with what parameters. Unknown
// kinds and bad params are logged and skipped — one broken entry must not
// keep the rest of the fleet from starting.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{error, info, warn};

use crate::strategy::market_maker::{SpreadMaker, SpreadMakerParams};
use crate::strategy::runtime::Strategy;

#[derive(Debug, Clone, Deserialize)]
pub struct StrategyConfig {
    pub id: String,
    pub kind: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub symbols: Vec<String>,
    #[serde(default)]
    pub params: serde_yaml::Value,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Default, Deserialize)]
struct StrategiesFile {
    #[serde(default)]
    strategies: Vec<StrategyConfig>,
}

#[derive(Debug, Default)]
pub struct StrategyRegistry {
    pub configs: Vec<StrategyConfig>,
}

impl StrategyRegistry {
    /// Load strategy configs. A missing file is an empty fleet, not a crash.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match Self::parse(path) {
            Ok(configs) => {
                info!(path = %path.display(), count = configs.len(), "strategy registry loaded");
                Self { configs }
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "strategy registry unavailable, starting empty");
                Self::default()
            }
        }
    }

    fn parse(path: &Path) -> Result<Vec<StrategyConfig>> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read strategies from {}", path.display()))?;
        let file: StrategiesFile = serde_yaml::from_str(&content)
            .with_context(|| format!("failed to parse strategies from {}", path.display()))?;
        Ok(file.strategies)
    }

    /// Instantiate every enabled strategy.
    pub fn instantiate(&self) -> Vec<Box<dyn Strategy>> {
        let mut strategies: Vec<Box<dyn Strategy>> = Vec::new();
        for cfg in &self.configs {
            if !cfg.enabled {
                continue;
            }
            match cfg.kind.as_str() {
                "spread_maker" => {
                    let params: SpreadMakerParams = if cfg.params.is_null() {
                        SpreadMakerParams::default()
                    } else {
                        match serde_yaml::from_value(cfg.params.clone()) {
                            Ok(p) => p,
                            Err(e) => {
                                error!(id = %cfg.id, error = %e, "bad spread_maker params, skipping");
                                continue;
                            }
                        }
                    };
                    strategies.push(Box::new(SpreadMaker::new(
                        cfg.id.clone(),
                        cfg.symbols.clone(),
                        params,
                    )));
                }
                other => {
                    error!(id = %cfg.id, kind = other, "unknown strategy kind, skipping");
                }
            }
        }
        strategies
    }
}
