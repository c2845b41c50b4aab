// =============================================================================
// Market-Data Service — raw feed queue -> normalizer -> LOB -> ring bus
// =============================================================================
//
// Broker feed adapters push raw payloads into a bounded queue; this task
// drains it, normalizes, applies book state, and publishes the typed event
// (plus derived stats when running eagerly). All of that is non-suspending
// compute — the only await point is the queue read.
// =============================================================================

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::info;

use crate::bus::RingBus;
use crate::events::BusEvent;
use crate::market_data::lob::LobEngine;
use crate::market_data::normalizer::MarketDataNormalizer;

/// Topic-tagged raw payload from a feed adapter.
#[derive(Debug, Clone)]
pub struct RawMarketEvent {
    /// "tick" or "bidask".
    pub topic: String,
    pub payload: Value,
}

impl RawMarketEvent {
    pub fn tick(payload: Value) -> Self {
        Self {
            topic: "tick".into(),
            payload,
        }
    }

    pub fn bidask(payload: Value) -> Self {
        Self {
            topic: "bidask".into(),
            payload,
        }
    }
}

pub struct MarketDataService {
    normalizer: MarketDataNormalizer,
    lob: Arc<LobEngine>,
    bus: Arc<RingBus>,
}

impl MarketDataService {
    pub fn new(
        normalizer: MarketDataNormalizer,
        lob: Arc<LobEngine>,
        bus: Arc<RingBus>,
    ) -> Self {
        Self {
            normalizer,
            lob,
            bus,
        }
    }

    /// Drain the raw feed queue until it closes.
    pub async fn run(self, mut raw_rx: mpsc::Receiver<RawMarketEvent>) {
        info!("market data service started");
        while let Some(raw) = raw_rx.recv().await {
            self.process(raw);
        }
        info!("market data service stopped (feed queue closed)");
    }

    /// One raw event through the pipeline. Split out for tests.
    pub fn process(&self, raw: RawMarketEvent) {
        match raw.topic.as_str() {
            "tick" => {
                if let Some(tick) = self.normalizer.normalize_tick(&raw.payload) {
                    let stats = self.lob.apply_tick(&tick);
                    self.bus.publish(BusEvent::Tick(tick));
                    if let Some(stats) = stats {
                        self.bus.publish(BusEvent::Stats(stats));
                    }
                }
            }
            "bidask" => {
                if let Some(quote) = self.normalizer.normalize_bidask(&raw.payload) {
                    let stats = self.lob.apply_bidask(&quote);
                    self.bus.publish(BusEvent::BidAsk(quote));
                    if let Some(stats) = stats {
                        self.bus.publish(BusEvent::Stats(stats));
                    }
                }
            }
            _ => {}
        }
    }
}
