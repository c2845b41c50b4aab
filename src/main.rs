// =============================================================================
// Tempest HFT Engine — Main Entry Point
// =============================================================================
//
// Wires the hot event pipeline: feed queue -> normalizer -> LOB -> ring bus
// -> strategies -> risk -> order adapter -> broker, with execution callbacks
// closing the loop through positions, and the recorder capturing everything.
//
// The engine starts against the simulated broker; a real broker adapter is
// wired in by replacing the `BrokerClient` at construction.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod broker;
mod bus;
mod config;
mod events;
mod execution;
mod market_data;
mod metrics;
mod order;
mod pricing;
mod recorder;
mod risk;
mod strategy;
mod symbols;
mod timebase;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::broker::SimBroker;
use crate::bus::RingBus;
use crate::config::EngineConfig;
use crate::execution::normalizer::ExecutionNormalizer;
use crate::execution::positions::PositionStore;
use crate::execution::router::ExecutionRouter;
use crate::market_data::lob::{LobEngine, StatsMode};
use crate::market_data::normalizer::MarketDataNormalizer;
use crate::market_data::service::{MarketDataService, RawMarketEvent};
use crate::metrics::MetricsRegistry;
use crate::order::adapter::OrderAdapter;
use crate::order::circuit_breaker::CircuitBreaker;
use crate::order::deadletter::DeadLetterQueue;
use crate::order::ids::OrderIdResolver;
use crate::order::rate_limiter::RateLimiter;
use crate::pricing::PriceCodec;
use crate::recorder::disk_monitor::DiskPressureMonitor;
use crate::recorder::service::{RecorderMode, RecorderService, RecorderSettings};
use crate::recorder::wal::{WalReplayer, WalWriter};
use crate::recorder::wal_first::WalFirstWriter;
use crate::recorder::writer::{DataWriter, MemorySink, RecorderWrite, SinkClient};
use crate::risk::config::RiskConfig;
use crate::risk::engine::RiskEngine;
use crate::risk::gateway::GatewayPolicy;
use crate::risk::storm_guard::StormGuard;
use crate::strategy::registry::StrategyRegistry;
use crate::strategy::runtime::StrategyRuntime;
use crate::symbols::SymbolMetadata;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        Tempest HFT Engine — Starting Up                  ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let mut cfg = EngineConfig::load("tempest.json").unwrap_or_else(|e| {
        warn!(error = %e, "engine config unavailable, using defaults");
        EngineConfig::default()
    });
    cfg.apply_env();

    let risk_cfg = RiskConfig::load(&cfg.risk_path).unwrap_or_else(|e| {
        warn!(error = %e, "risk config unavailable, using defaults");
        RiskConfig::default()
    });
    let recorder_mode = RecorderMode::from_env();
    info!(
        recorder_mode = recorder_mode.as_str(),
        bus_capacity = cfg.bus_capacity,
        "engine configuration resolved"
    );

    // ── 2. Shared building blocks ────────────────────────────────────────
    let metrics = Arc::new(MetricsRegistry::new());
    let metadata = Arc::new(SymbolMetadata::new(&cfg.symbols_path));
    let codec = PriceCodec::new(metadata.clone());
    let storm_guard = Arc::new(StormGuard::new(risk_cfg.storm_guard.clone(), metrics.clone()));
    let gateway = Arc::new(GatewayPolicy::new(metrics.clone()));
    let bus = Arc::new(RingBus::new(
        cfg.bus_capacity,
        cfg.bus_single_writer,
        metrics.clone(),
        Some(storm_guard.clone()),
    ));
    let lob = Arc::new(LobEngine::new(StatsMode::Eager));
    let positions = Arc::new(PositionStore::new());
    let resolver = Arc::new(OrderIdResolver::new());
    let dlq = Arc::new(DeadLetterQueue::new(&cfg.dlq_dir, 64));

    // ── 3. Stage queues ──────────────────────────────────────────────────
    let (raw_md_tx, raw_md_rx) = mpsc::channel::<RawMarketEvent>(8_192);
    let (intent_tx, intent_rx) = mpsc::channel(4_096);
    let (cmd_tx, cmd_rx) = mpsc::channel(4_096);
    let (raw_exec_tx, raw_exec_rx) = mpsc::channel(4_096);

    // ── 4. Broker (simulated by default) ─────────────────────────────────
    let sim_broker = Arc::new(SimBroker::new(raw_exec_tx.clone(), true));

    // ── 5. Market data pipeline ──────────────────────────────────────────
    let md_service = MarketDataService::new(
        MarketDataNormalizer::new(
            metadata.clone(),
            codec.clone(),
            metrics.clone(),
            cfg.max_ts_skew_ms * 1_000_000,
        ),
        lob.clone(),
        bus.clone(),
    );
    tokio::spawn(md_service.run(raw_md_rx));

    // ── 6. Strategy runtime ──────────────────────────────────────────────
    let strategies = StrategyRegistry::load(&cfg.strategies_path).instantiate();
    let strategy_runtime =
        StrategyRuntime::new(strategies, positions.clone(), intent_tx.clone());
    let strategy_consumer = bus.subscribe_latest();
    tokio::spawn(strategy_runtime.run(strategy_consumer));

    // ── 7. Risk engine ───────────────────────────────────────────────────
    let risk_engine = Arc::new(RiskEngine::new(
        risk_cfg,
        storm_guard.clone(),
        gateway.clone(),
        lob.clone(),
        metrics.clone(),
    ));
    tokio::spawn(risk_engine.run(intent_rx, cmd_tx));

    // ── 8. Order adapter ─────────────────────────────────────────────────
    let adapter = Arc::new(OrderAdapter::new(
        sim_broker.clone(),
        RateLimiter::new(cfg.rate_soft_cap, cfg.rate_hard_cap, cfg.rate_window_s),
        CircuitBreaker::new(cfg.breaker_threshold, cfg.breaker_timeout_s),
        dlq.clone(),
        resolver.clone(),
        codec.clone(),
        metrics.clone(),
    ));
    tokio::spawn(adapter.clone().run(cmd_rx));

    // ── 9. Execution router ──────────────────────────────────────────────
    let terminal_adapter = adapter.clone();
    let exec_router = ExecutionRouter::new(
        bus.clone(),
        ExecutionNormalizer::new(resolver.clone(), codec.clone()),
        positions.clone(),
        Box::new(move |strategy_id, order_id| {
            terminal_adapter.on_terminal_state(strategy_id, order_id);
        }),
        metrics.clone(),
    );
    tokio::spawn(exec_router.run(raw_exec_rx));

    // ── 10. Recorder ─────────────────────────────────────────────────────
    let disk_monitor = Arc::new(DiskPressureMonitor::new(
        &cfg.wal_dir,
        cfg.disk_warn_mb,
        cfg.disk_critical_mb,
        cfg.disk_halt_mb,
        Duration::from_secs(cfg.disk_check_interval_s),
        metrics.clone(),
    ));
    tokio::spawn(disk_monitor.clone().run());

    // The analytics driver stays outside the engine; until an adapter is
    // wired in, DIRECT mode records into the in-memory sink (and spills to
    // WAL whenever it is told to fail).
    let sink: Arc<dyn SinkClient> = Arc::new(MemorySink::new());
    let recorder_writer: Arc<dyn RecorderWrite> = match recorder_mode {
        RecorderMode::Direct => Arc::new(DataWriter::new(
            sink.clone(),
            WalWriter::new(&cfg.wal_dir, metrics.clone()),
            cfg.sink_max_retries,
            Duration::from_millis(cfg.sink_base_delay_ms),
            cfg.ts_max_future_s,
            metrics.clone(),
        )),
        RecorderMode::WalFirst => Arc::new(WalFirstWriter::new(
            WalWriter::new(&cfg.wal_dir, metrics.clone()),
            disk_monitor.clone(),
            metrics.clone(),
        )),
    };
    let recorder = Arc::new(RecorderService::new(
        recorder_writer,
        metadata.clone(),
        RecorderSettings {
            flush_limit: cfg.recorder_flush_limit,
            flush_interval_ms: cfg.recorder_flush_interval_ms,
            max_buffer_size: cfg.recorder_max_buffer_size,
            ..Default::default()
        },
        metrics.clone(),
    ));
    let recorder_consumer = bus.subscribe_latest();
    tokio::spawn(recorder.clone().run(recorder_consumer));
    tokio::spawn(recorder.clone().run_flush_ticker());

    // WAL replay: drain anything a previous run (or a sink outage) left
    // behind, then retry on a slow cadence.
    {
        let wal_dir = cfg.wal_dir.clone();
        let sink = sink.clone();
        let metrics = metrics.clone();
        tokio::spawn(async move {
            let replayer = WalReplayer::new(&wal_dir, metrics);
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                interval.tick().await;
                match replayer.replay(sink.as_ref()).await {
                    Ok(0) => {}
                    Ok(n) => info!(files = n, "WAL backlog replayed"),
                    Err(e) => error!(error = %e, "WAL replay pass failed"),
                }
            }
        });
    }

    // ── 11. Reconciliation loop ──────────────────────────────────────────
    {
        let client = sim_broker.clone();
        let positions = positions.clone();
        let storm_guard = storm_guard.clone();
        let tolerance = cfg.reconcile_tolerance;
        let halts = cfg.reconcile_halts;
        let interval_s = cfg.reconcile_interval_s;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(interval_s));
            loop {
                interval.tick().await;
                let guard = halts.then_some(&storm_guard);
                match execution::reconcile::reconcile_once(
                    client.as_ref(),
                    &positions,
                    tolerance,
                    guard,
                )
                .await
                {
                    Ok(report) if !report.clean() => {
                        warn!(drifts = report.drifts.len(), "reconciliation found drift");
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "reconciliation failed"),
                }
            }
        });
    }

    // ── 12. Status API ───────────────────────────────────────────────────
    let api_state = Arc::new(api::ApiState {
        metrics: metrics.clone(),
        storm_guard: storm_guard.clone(),
        gateway: gateway.clone(),
        positions: positions.clone(),
        dlq: dlq.clone(),
        recorder_mode,
    });
    let bind_addr = cfg.bind_addr.clone();
    tokio::spawn(async move {
        let app = api::router(api_state);
        match tokio::net::TcpListener::bind(&bind_addr).await {
            Ok(listener) => {
                info!(addr = %bind_addr, "status API listening");
                if let Err(e) = axum::serve(listener, app).await {
                    error!(error = %e, "status API failed");
                }
            }
            Err(e) => error!(addr = %bind_addr, error = %e, "failed to bind status API"),
        }
    });

    // ── 13. Optional synthetic feed (smoke runs without a live broker) ───
    if std::env::var("TEMPEST_SIM_FEED").is_ok() {
        let feed_tx = raw_md_tx.clone();
        let symbols = metadata.codes();
        tokio::spawn(async move {
            info!(symbols = symbols.len(), "synthetic feed started");
            let mut interval = tokio::time::interval(Duration::from_millis(100));
            let mut px = 100.0f64;
            loop {
                interval.tick().await;
                px += if px as i64 % 2 == 0 { 0.05 } else { -0.05 };
                for symbol in &symbols {
                    let now = timebase::now_ns();
                    let quote = RawMarketEvent::bidask(serde_json::json!({
                        "code": symbol,
                        "ts": now,
                        "bid_price": [px - 0.05],
                        "bid_volume": [10],
                        "ask_price": [px + 0.05],
                        "ask_volume": [10],
                        "is_snapshot": true,
                    }));
                    let tick = RawMarketEvent::tick(serde_json::json!({
                        "code": symbol,
                        "ts": now,
                        "close": px,
                        "volume": 1,
                    }));
                    if feed_tx.send(quote).await.is_err() || feed_tx.send(tick).await.is_err() {
                        return;
                    }
                }
            }
        });
    }

    info!("All subsystems running. Press Ctrl+C to stop.");

    // ── 14. Graceful shutdown ────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("Shutdown signal received — stopping gracefully");

    recorder.flush_all().await;
    dlq.flush();
    if let Err(e) = cfg.save("tempest.json") {
        error!(error = %e, "failed to save engine config on shutdown");
    }

    info!("Tempest engine shut down complete.");
    Ok(())
}

// =============================================================================
// Tests — full pipeline wiring
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{BusEvent, IntentType, OrderIntent, Side, Tif};
    use crate::risk::config::{RiskConfig, RiskLimits};
    use std::io::Write;

    struct Pipeline {
        bus: Arc<RingBus>,
        lob: Arc<LobEngine>,
        positions: Arc<PositionStore>,
        resolver: Arc<OrderIdResolver>,
        risk: Arc<RiskEngine>,
        adapter: Arc<OrderAdapter>,
        router: ExecutionRouter,
        exec_rx: mpsc::Receiver<crate::execution::normalizer::RawExecEvent>,
        md: MarketDataService,
        metrics: Arc<MetricsRegistry>,
        _dirs: (tempfile::TempDir, tempfile::TempDir),
    }

    /// Wire every stage against the sim broker, scale 100 for symbol AAA.
    fn pipeline() -> Pipeline {
        let sym_dir = tempfile::tempdir().unwrap();
        let dlq_dir = tempfile::tempdir().unwrap();
        let sym_path = sym_dir.path().join("symbols.yaml");
        let mut f = std::fs::File::create(&sym_path).unwrap();
        f.write_all(b"symbols:\n  - code: 'AAA'\n    exchange: 'TSE'\n    price_scale: 100\n")
            .unwrap();

        let metrics = Arc::new(MetricsRegistry::new());
        let metadata = Arc::new(SymbolMetadata::new(&sym_path));
        let codec = PriceCodec::new(metadata.clone());
        let storm_guard = Arc::new(StormGuard::new(Default::default(), metrics.clone()));
        let gateway = Arc::new(GatewayPolicy::with_flags(true, true, metrics.clone()));
        let bus = Arc::new(RingBus::new(256, true, metrics.clone(), None));
        let lob = Arc::new(LobEngine::new(StatsMode::Eager));
        let positions = Arc::new(PositionStore::new());
        let resolver = Arc::new(OrderIdResolver::new());
        let dlq = Arc::new(DeadLetterQueue::new(dlq_dir.path(), 64));

        let (exec_tx, exec_rx) = mpsc::channel(64);
        let broker = Arc::new(SimBroker::new(exec_tx, true));

        let risk = Arc::new(RiskEngine::new(
            RiskConfig {
                global_defaults: RiskLimits {
                    max_order_size: 10,
                    max_notional: i64::MAX,
                    ..Default::default()
                },
                ..Default::default()
            },
            storm_guard,
            gateway,
            lob.clone(),
            metrics.clone(),
        ));

        let adapter = Arc::new(OrderAdapter::new(
            broker,
            RateLimiter::new(100, 200, 10),
            CircuitBreaker::new(5, 30),
            dlq,
            resolver.clone(),
            codec.clone(),
            metrics.clone(),
        ));

        let terminal_adapter = adapter.clone();
        let router = ExecutionRouter::new(
            bus.clone(),
            ExecutionNormalizer::new(resolver.clone(), codec.clone()),
            positions.clone(),
            Box::new(move |strategy_id, order_id| {
                terminal_adapter.on_terminal_state(strategy_id, order_id);
            }),
            metrics.clone(),
        );

        let md = MarketDataService::new(
            MarketDataNormalizer::new(metadata, codec, metrics.clone(), 5_000_000_000),
            lob.clone(),
            bus.clone(),
        );

        Pipeline {
            bus,
            lob,
            positions,
            resolver,
            risk,
            adapter,
            router,
            exec_rx,
            md,
            metrics,
            _dirs: (sym_dir, dlq_dir),
        }
    }

    fn new_buy(intent_id: u64, price: i64, qty: i64) -> OrderIntent {
        OrderIntent {
            intent_id,
            strategy_id: "strat".into(),
            symbol: "AAA".into(),
            intent_type: IntentType::New,
            side: Side::Buy,
            price,
            qty,
            tif: Tif::Limit,
            target_order_id: None,
            timestamp_ns: timebase::now_ns(),
        }
    }

    #[tokio::test]
    async fn tick_to_risk_to_order_to_fill_to_position() {
        let mut p = pipeline();

        // Seed the book: bid 10000x10, ask 10100x7 (scaled, scale 100).
        p.md.process(crate::market_data::service::RawMarketEvent::bidask(
            serde_json::json!({
                "code": "AAA",
                "ts": timebase::now_ns(),
                "bid_price": [100.0],
                "bid_volume": [10],
                "ask_price": [101.0],
                "ask_volume": [7],
                "is_snapshot": true,
            }),
        ));
        assert_eq!(p.lob.stats("AAA", 0).best_ask, Some(10_100));

        // Strategy emits NEW BUY 10050 x 2; risk approves and stamps a command.
        let intent = new_buy(1, 10_050, 2);
        let decision = p.risk.evaluate(&intent);
        assert!(decision.approved, "reject: {:?}", decision.reason_code);
        let cmd = p.risk.create_command(intent);

        // Adapter dispatches; the sim broker acks S1/O1 and fills.
        p.adapter.dispatch(cmd).await;
        assert_eq!(p.resolver.order_key("S1").as_deref(), Some("strat:1"));

        let mut consumer = p.bus.subscribe();
        // Drain the seeded market data events first.
        while let Some(ev) = consumer.try_next() {
            assert!(matches!(ev, BusEvent::BidAsk(_) | BusEvent::Stats(_)));
        }

        // Route the broker callbacks: Submitted order, then the fill.
        let submitted = p.exec_rx.recv().await.unwrap();
        p.router.process(submitted);
        let deal = p.exec_rx.recv().await.unwrap();
        p.router.process(deal);

        // Position: long 2 @ 10050, nothing realized.
        let pos = p.positions.get("SIM-ACC", "strat", "AAA").unwrap();
        assert_eq!(pos.net_qty, 2);
        assert_eq!(pos.avg_price, 10_050);
        assert_eq!(pos.realized_pnl, 0);

        // Bus ordering: order event, then delta and fill adjacent.
        match consumer.try_next().unwrap() {
            BusEvent::Order(o) => assert_eq!(o.strategy_id, "strat"),
            other => panic!("expected Order, got {other:?}"),
        }
        match consumer.try_next().unwrap() {
            BusEvent::Position(d) => {
                assert_eq!(d.net_qty, 2);
                assert_eq!(d.avg_price, 10_050);
                assert_eq!(d.realized_pnl, 0);
            }
            other => panic!("expected Position, got {other:?}"),
        }
        match consumer.try_next().unwrap() {
            BusEvent::Fill(f) => {
                assert_eq!(f.qty, 2);
                assert_eq!(f.price, 10_050);
            }
            other => panic!("expected Fill, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn price_cap_reject_emits_no_command() {
        let p = pipeline();

        let risk = Arc::new(RiskEngine::new(
            RiskConfig {
                global_defaults: RiskLimits {
                    max_price_cap: 15_000,
                    ..Default::default()
                },
                ..Default::default()
            },
            Arc::new(StormGuard::new(Default::default(), p.metrics.clone())),
            Arc::new(GatewayPolicy::with_flags(true, true, p.metrics.clone())),
            p.lob.clone(),
            p.metrics.clone(),
        ));

        let (intent_tx, intent_rx) = mpsc::channel(4);
        let (cmd_tx, mut cmd_rx) = mpsc::channel(4);
        let handle = tokio::spawn(risk.run(intent_rx, cmd_tx));

        intent_tx.send(new_buy(1, 20_000, 1)).await.unwrap();
        drop(intent_tx);
        handle.await.unwrap();

        assert!(cmd_rx.recv().await.is_none());
        assert_eq!(p.metrics.risk_reject_count("strat", "MAX_PRICE_CAP"), 1);
    }
}
