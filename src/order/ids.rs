// =============================================================================
// Order-Id Resolver — broker identifiers back to strategy order keys
// =============================================================================
//
// The adapter records `broker_seq_no -> "strategy:intent_id"` (and the same
// for `ord_no`) at dispatch time; the execution router reads the map when
// broker callbacks arrive carrying only broker identifiers. Written by one
// task, read by another, so the map lives behind a lock.
// =============================================================================

use std::collections::HashMap;

use parking_lot::RwLock;

/// Shared broker-id -> order-key map.
#[derive(Default)]
pub struct OrderIdResolver {
    map: RwLock<HashMap<String, String>>,
}

impl OrderIdResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a broker identifier for an order key.
    pub fn record(&self, broker_id: impl Into<String>, order_key: impl Into<String>) {
        self.map.write().insert(broker_id.into(), order_key.into());
    }

    pub fn remove(&self, broker_id: &str) {
        self.map.write().remove(broker_id);
    }

    /// Order key mapped to `broker_id`, if known.
    pub fn order_key(&self, broker_id: &str) -> Option<String> {
        self.map.read().get(broker_id).cloned()
    }

    /// Strategy owning `broker_id`, or `"UNKNOWN"`.
    pub fn resolve_strategy_id(&self, broker_id: &str) -> String {
        match self.map.read().get(broker_id) {
            Some(key) => match key.split_once(':') {
                Some((strategy, _)) => strategy.to_string(),
                None => key.clone(),
            },
            None => "UNKNOWN".to_string(),
        }
    }

    /// First candidate identifier that resolves to a known strategy.
    pub fn resolve_strategy_id_from_candidates(&self, candidates: &[&str]) -> String {
        for candidate in candidates {
            if candidate.is_empty() {
                continue;
            }
            let resolved = self.resolve_strategy_id(candidate);
            if resolved != "UNKNOWN" {
                return resolved;
            }
        }
        "UNKNOWN".to_string()
    }

    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }
}

impl std::fmt::Debug for OrderIdResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderIdResolver")
            .field("entries", &self.len())
            .finish()
    }
}
