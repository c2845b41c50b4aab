// =============================================================================
// Reconciliation — compare internal positions against the broker
// =============================================================================
//
// SAFETY POLICY: this module reports drift, it never corrects it. No orders
// are cancelled and no positions are closed here — an operator (or an
// explicit StormGuard halt, when enabled) handles the rest.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use tracing::{error, info};

use crate::broker::BrokerClient;
use crate::execution::positions::PositionStore;
use crate::risk::storm_guard::StormGuard;

/// Summary of one reconciliation pass.
#[derive(Debug, Clone, Serialize)]
pub struct ReconcileReport {
    pub symbols_checked: usize,
    /// (symbol, internal_qty, broker_qty) triples beyond tolerance.
    pub drifts: Vec<(String, i64, i64)>,
    pub timestamp: String,
}

impl ReconcileReport {
    pub fn clean(&self) -> bool {
        self.drifts.is_empty()
    }
}

/// Run one reconciliation cycle.
///
/// Fetches broker positions, aggregates internal net quantities per symbol,
/// and reports every symbol whose absolute difference exceeds `tolerance`.
/// When `storm_guard` is supplied, any drift latches a manual HALT.
pub async fn reconcile_once(
    client: &dyn BrokerClient,
    positions: &PositionStore,
    tolerance: i64,
    storm_guard: Option<&Arc<StormGuard>>,
) -> Result<ReconcileReport> {
    let broker_positions = client
        .positions()
        .await
        .context("reconcile: failed to fetch broker positions")?;

    let mut broker_map: HashMap<String, i64> = HashMap::new();
    for bp in broker_positions {
        *broker_map.entry(bp.symbol).or_insert(0) += bp.net_qty;
    }
    let internal = positions.net_qty_by_symbol();

    // Union of symbols either side knows about.
    let mut symbols: Vec<String> = internal.keys().cloned().collect();
    for symbol in broker_map.keys() {
        if !internal.contains_key(symbol) {
            symbols.push(symbol.clone());
        }
    }

    let mut drifts = Vec::new();
    for symbol in &symbols {
        let ours = internal.get(symbol).copied().unwrap_or(0);
        let theirs = broker_map.get(symbol).copied().unwrap_or(0);
        if (ours - theirs).abs() > tolerance {
            error!(
                symbol = %symbol,
                internal_qty = ours,
                broker_qty = theirs,
                "position drift detected"
            );
            drifts.push((symbol.clone(), ours, theirs));
        }
    }

    if !drifts.is_empty() {
        if let Some(guard) = storm_guard {
            guard.trigger_halt("reconciliation_drift");
        }
    } else {
        info!(symbols = symbols.len(), "reconciliation clean");
    }

    Ok(ReconcileReport {
        symbols_checked: symbols.len(),
        drifts,
        timestamp: Utc::now().to_rfc3339(),
    })
}
