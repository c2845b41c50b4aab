// =============================================================================
// Ring Bus — bounded in-memory event bus with per-consumer cursors
// =============================================================================
//
// A power-of-two ring of slots with one global write cursor. Publishing never
// blocks and never fails: when consumers lag, the oldest slots are simply
// overwritten. Each consumer owns its cursor; on detecting a lag larger than
// the ring capacity it skips forward to the oldest retained event and bumps
// `bus_overflow_total`.
//
// Sequencing is 1-based: the write cursor counts events published so far, and
// slot for sequence `s` is `(s - 1) & mask`, so slots have fixed addresses
// and are overwritten in place on wrap.
//
// Sustained overflow is a health signal: if more than a threshold of skips
// land inside a sliding window, the bus escalates to
// `StormGuard::trigger_halt("bus_overflow")`.
// =============================================================================

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;
use tracing::warn;

use crate::events::BusEvent;
use crate::metrics::MetricsRegistry;
use crate::risk::storm_guard::StormGuard;

/// Default overflow-halt policy: 64 skips inside 10 s.
const DEFAULT_OVERFLOW_HALT_THRESHOLD: usize = 64;
const DEFAULT_OVERFLOW_WINDOW: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Bus
// ---------------------------------------------------------------------------

pub struct RingBus {
    slots: Box<[RwLock<Option<BusEvent>>]>,
    mask: u64,
    capacity: u64,
    /// Number of events published so far (next sequence = writer + 1).
    writer: AtomicU64,
    /// Serializes publishers when the multi-writer flag is set.
    write_lock: Mutex<()>,
    single_writer: bool,
    notify: Notify,
    metrics: Arc<MetricsRegistry>,
    storm_guard: Option<Arc<StormGuard>>,
    overflow_window: Mutex<VecDeque<Instant>>,
    overflow_halt_threshold: usize,
    overflow_window_len: Duration,
}

impl RingBus {
    /// Create a bus with at least `capacity` slots (rounded up to a power of
    /// two). The single-writer fast path is the default; set
    /// `single_writer = false` when several tasks publish concurrently.
    pub fn new(
        capacity: usize,
        single_writer: bool,
        metrics: Arc<MetricsRegistry>,
        storm_guard: Option<Arc<StormGuard>>,
    ) -> Self {
        let cap = capacity.max(2).next_power_of_two();
        let slots: Vec<RwLock<Option<BusEvent>>> =
            (0..cap).map(|_| RwLock::new(None)).collect();

        Self {
            slots: slots.into_boxed_slice(),
            mask: (cap - 1) as u64,
            capacity: cap as u64,
            writer: AtomicU64::new(0),
            write_lock: Mutex::new(()),
            single_writer,
            notify: Notify::new(),
            metrics,
            storm_guard,
            overflow_window: Mutex::new(VecDeque::new()),
            overflow_halt_threshold: overflow_halt_threshold_from_env(),
            overflow_window_len: DEFAULT_OVERFLOW_WINDOW,
        }
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Count of events published so far.
    pub fn cursor(&self) -> u64 {
        self.writer.load(Ordering::Acquire)
    }

    // -------------------------------------------------------------------------
    // Publish
    // -------------------------------------------------------------------------

    /// Publish one event. Never blocks on consumers; overwrites the oldest
    /// slot when the ring is full.
    pub fn publish(&self, event: BusEvent) {
        if self.single_writer {
            self.publish_seq(event);
        } else {
            let _g = self.write_lock.lock();
            self.publish_seq(event);
        }
        self.notify.notify_waiters();
    }

    /// Publish a batch so the events occupy adjacent sequences with no
    /// interleaving from other publishers.
    pub fn publish_many(&self, events: Vec<BusEvent>) {
        if events.is_empty() {
            return;
        }
        if self.single_writer {
            for ev in events {
                self.publish_seq(ev);
            }
        } else {
            let _g = self.write_lock.lock();
            for ev in events {
                self.publish_seq(ev);
            }
        }
        self.notify.notify_waiters();
    }

    fn publish_seq(&self, event: BusEvent) {
        let seq = self.writer.load(Ordering::Relaxed) + 1;
        *self.slots[((seq - 1) & self.mask) as usize].write() = Some(event);
        self.writer.store(seq, Ordering::Release);
        self.metrics.bus_published_total.fetch_add(1, Ordering::Relaxed);
    }

    // -------------------------------------------------------------------------
    // Subscribe
    // -------------------------------------------------------------------------

    /// Consumer starting at the beginning of retained history.
    pub fn subscribe(self: &Arc<Self>) -> BusConsumer {
        BusConsumer {
            bus: self.clone(),
            cursor: 0,
        }
    }

    /// Consumer that only sees events published after this call.
    pub fn subscribe_latest(self: &Arc<Self>) -> BusConsumer {
        BusConsumer {
            bus: self.clone(),
            cursor: self.cursor(),
        }
    }

    // -------------------------------------------------------------------------
    // Overflow accounting
    // -------------------------------------------------------------------------

    fn record_overflow(&self) {
        self.metrics.bus_overflow_total.fetch_add(1, Ordering::Relaxed);

        let now = Instant::now();
        let mut window = self.overflow_window.lock();
        window.push_back(now);
        while let Some(front) = window.front() {
            if now.duration_since(*front) > self.overflow_window_len {
                window.pop_front();
            } else {
                break;
            }
        }
        let saturated = window.len() >= self.overflow_halt_threshold;
        drop(window);

        if saturated {
            warn!(
                threshold = self.overflow_halt_threshold,
                "sustained bus overflow, escalating to storm guard"
            );
            if let Some(sg) = &self.storm_guard {
                sg.trigger_halt("bus_overflow");
            }
        }
    }
}

fn overflow_halt_threshold_from_env() -> usize {
    std::env::var("TEMPEST_BUS_OVERFLOW_HALT_THRESHOLD")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_OVERFLOW_HALT_THRESHOLD)
}

impl std::fmt::Debug for RingBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBus")
            .field("capacity", &self.capacity)
            .field("cursor", &self.cursor())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Consumer
// ---------------------------------------------------------------------------

/// A cursor into the bus. Cheap to create; each consumer progresses
/// independently.
pub struct BusConsumer {
    bus: Arc<RingBus>,
    cursor: u64,
}

impl BusConsumer {
    /// Non-blocking: the next event, or `None` when caught up.
    ///
    /// When the writer has lapped this consumer by more than the ring
    /// capacity, the cursor jumps to the oldest retained event and the
    /// overflow counter increments.
    pub fn try_next(&mut self) -> Option<BusEvent> {
        let writer = self.bus.cursor();
        if self.cursor >= writer {
            return None;
        }
        if writer - self.cursor > self.bus.capacity {
            // Skip to latest: first observable sequence is
            // writer - capacity + 1.
            self.cursor = writer - self.bus.capacity;
            self.bus.record_overflow();
        }
        let seq = self.cursor + 1;
        let event = self.bus.slots[((seq - 1) & self.bus.mask) as usize].read().clone();
        self.cursor = seq;
        // A slot can only be empty if the writer lapped us between the load
        // and the read; surface that as a skip rather than a phantom event.
        event
    }

    /// Up to `max` immediately available events.
    pub fn try_next_batch(&mut self, max: usize) -> Vec<BusEvent> {
        let mut out = Vec::new();
        while out.len() < max {
            match self.try_next() {
                Some(ev) => out.push(ev),
                None => break,
            }
        }
        out
    }

    /// Await the next event.
    pub async fn next(&mut self) -> BusEvent {
        loop {
            // Register for the wakeup before the emptiness check so a publish
            // landing in between is never missed.
            let bus = self.bus.clone();
            let notified = bus.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if let Some(ev) = self.try_next() {
                return ev;
            }
            notified.await;
        }
    }

    /// Await at least one event, returning up to `max`.
    pub async fn next_batch(&mut self, max: usize) -> Vec<BusEvent> {
        loop {
            let bus = self.bus.clone();
            let notified = bus.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            let batch = self.try_next_batch(max);
            if !batch.is_empty() {
                return batch;
            }
            notified.await;
        }
    }

    /// Sequence of the last consumed event.
    pub fn position(&self) -> u64 {
        self.cursor
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventMeta, TickEvent};
    use crate::risk::storm_guard::{StormGuardConfig, StormGuardState};

    fn tick(n: u64) -> BusEvent {
        BusEvent::Tick(TickEvent {
            meta: EventMeta {
                seq: n,
                topic: "tick".into(),
                source_ts_ns: 0,
                local_ts_ns: 0,
            },
            symbol: format!("e{n}"),
            price: n as i64,
            volume: 1,
            total_volume: 0,
            bid_side_total_vol: 0,
            ask_side_total_vol: 0,
            is_simtrade: false,
            is_odd_lot: false,
        })
    }

    fn symbol_of(ev: &BusEvent) -> String {
        ev.symbol().to_string()
    }

    #[test]
    fn publish_then_consume_single() {
        let bus = Arc::new(RingBus::new(4, true, Arc::new(MetricsRegistry::new()), None));
        let mut consumer = bus.subscribe();

        bus.publish(tick(1));
        assert_eq!(symbol_of(&consumer.try_next().unwrap()), "e1");
        assert!(consumer.try_next().is_none());
    }

    #[test]
    fn batch_publish_preserves_order_and_adjacency() {
        let bus = Arc::new(RingBus::new(8, true, Arc::new(MetricsRegistry::new()), None));
        let mut consumer = bus.subscribe();

        bus.publish_many(vec![tick(1), tick(2), tick(3)]);
        let batch = consumer.try_next_batch(3);
        let names: Vec<String> = batch.iter().map(symbol_of).collect();
        assert_eq!(names, vec!["e1", "e2", "e3"]);
    }

    #[test]
    fn overflow_skips_to_oldest_retained() {
        let metrics = Arc::new(MetricsRegistry::new());
        let bus = Arc::new(RingBus::new(2, true, metrics.clone(), None));
        let mut consumer = bus.subscribe();

        for n in 1..=5 {
            bus.publish(tick(n));
        }

        // capacity 2, writer 5: first observable is sequence 4.
        let first = consumer.try_next().unwrap();
        assert_eq!(symbol_of(&first), "e4");
        assert!(metrics.snapshot().bus_overflow_total >= 1);

        let second = consumer.try_next().unwrap();
        assert_eq!(symbol_of(&second), "e5");
        assert!(consumer.try_next().is_none());
    }

    #[test]
    fn late_subscriber_sees_only_new_events() {
        let bus = Arc::new(RingBus::new(8, true, Arc::new(MetricsRegistry::new()), None));
        bus.publish(tick(1));

        let mut consumer = bus.subscribe_latest();
        assert!(consumer.try_next().is_none());

        bus.publish(tick(2));
        assert_eq!(symbol_of(&consumer.try_next().unwrap()), "e2");
    }

    #[test]
    fn multi_writer_mode_publishes_through_lock() {
        let bus = Arc::new(RingBus::new(4, false, Arc::new(MetricsRegistry::new()), None));
        let mut consumer = bus.subscribe();
        bus.publish(tick(9));
        assert_eq!(symbol_of(&consumer.try_next().unwrap()), "e9");
    }

    #[test]
    fn sustained_overflow_triggers_storm_guard() {
        std::env::set_var("TEMPEST_BUS_OVERFLOW_HALT_THRESHOLD", "1");
        let metrics = Arc::new(MetricsRegistry::new());
        let guard = Arc::new(StormGuard::new(
            StormGuardConfig::default(),
            metrics.clone(),
        ));
        let bus = Arc::new(RingBus::new(2, true, metrics, Some(guard.clone())));
        let mut consumer = bus.subscribe();

        for n in 1..=5 {
            bus.publish(tick(n));
        }
        consumer.try_next();

        assert_eq!(guard.state(), StormGuardState::Halt);
        assert_eq!(guard.halt_reason().as_deref(), Some("bus_overflow"));
        std::env::remove_var("TEMPEST_BUS_OVERFLOW_HALT_THRESHOLD");
    }

    #[tokio::test]
    async fn async_consumer_wakes_on_publish() {
        let bus = Arc::new(RingBus::new(4, true, Arc::new(MetricsRegistry::new()), None));
        let mut consumer = bus.subscribe();

        let publisher = bus.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            publisher.publish(tick(42));
        });

        let ev = consumer.next().await;
        assert_eq!(symbol_of(&ev), "e42");
        handle.await.unwrap();
    }
}
