// =============================================================================
// Status API — read-mostly operational surface, Axum 0.7
// =============================================================================
//
// Everything lives under `/api/v1/`. The engine is driven by its queues, not
// this API; the router only exposes snapshots plus the two operator controls
// (halt / clear-halt). CORS is permissive for dashboard development.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::State,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tracing::warn;

use crate::execution::positions::PositionStore;
use crate::metrics::MetricsRegistry;
use crate::order::deadletter::DeadLetterQueue;
use crate::recorder::service::RecorderMode;
use crate::risk::gateway::GatewayPolicy;
use crate::risk::storm_guard::StormGuard;

/// Shared handles the API reads from.
pub struct ApiState {
    pub metrics: Arc<MetricsRegistry>,
    pub storm_guard: Arc<StormGuard>,
    pub gateway: Arc<GatewayPolicy>,
    pub positions: Arc<PositionStore>,
    pub dlq: Arc<DeadLetterQueue>,
    pub recorder_mode: RecorderMode,
}

/// Build the router with CORS and shared state.
pub fn router(state: Arc<ApiState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/status", get(status))
        .route("/api/v1/metrics", get(metrics))
        .route("/api/v1/positions", get(positions))
        .route("/api/v1/control/halt", post(control_halt))
        .route("/api/v1/control/clear-halt", post(control_clear_halt))
        .layer(cors)
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    server_time_ms: i64,
}

async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        server_time_ms: chrono::Utc::now().timestamp_millis(),
    })
}

#[derive(Serialize)]
struct StatusResponse {
    storm_guard_state: &'static str,
    storm_halt_reason: Option<String>,
    gateway_mode: &'static str,
    recorder_mode: &'static str,
    open_positions: usize,
    dlq: crate::order::deadletter::DeadLetterStats,
}

async fn status(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    Json(StatusResponse {
        storm_guard_state: state.storm_guard.state().as_str(),
        storm_halt_reason: state.storm_guard.halt_reason(),
        gateway_mode: state.gateway.mode().as_str(),
        recorder_mode: state.recorder_mode.as_str(),
        open_positions: state.positions.snapshot().len(),
        dlq: state.dlq.stats(),
    })
}

async fn metrics(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    Json(state.metrics.snapshot())
}

#[derive(Serialize)]
struct PositionRow {
    account_id: String,
    strategy_id: String,
    symbol: String,
    net_qty: i64,
    avg_price: i64,
    realized_pnl: i64,
    unrealized_pnl: i64,
}

async fn positions(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    let rows: Vec<PositionRow> = state
        .positions
        .snapshot()
        .into_iter()
        .map(|(key, pos)| PositionRow {
            account_id: key.account_id,
            strategy_id: key.strategy_id,
            symbol: key.symbol,
            net_qty: pos.net_qty,
            avg_price: pos.avg_price,
            realized_pnl: pos.realized_pnl,
            unrealized_pnl: pos.unrealized_pnl,
        })
        .collect();
    Json(rows)
}

#[derive(Serialize)]
struct ControlResponse {
    ok: bool,
    storm_guard_state: &'static str,
    gateway_mode: &'static str,
}

async fn control_halt(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    warn!("operator HALT requested via API");
    state.storm_guard.trigger_halt("operator");
    state.gateway.set_halt();
    Json(ControlResponse {
        ok: true,
        storm_guard_state: state.storm_guard.state().as_str(),
        gateway_mode: state.gateway.mode().as_str(),
    })
}

async fn control_clear_halt(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    warn!("operator HALT clear requested via API");
    state.storm_guard.clear_manual_halt();
    state.gateway.set_normal();
    Json(ControlResponse {
        ok: true,
        storm_guard_state: state.storm_guard.state().as_str(),
        gateway_mode: state.gateway.mode().as_str(),
    })
}
