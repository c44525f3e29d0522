// Read-only endpoints: /status, /stats, /health

use axum::{extract::State, Json};
use serde::Serialize;

use crate::server::AppState;
use crate::stats::HostStats;
use crate::status::{self, StatusSnapshot};

/// GET /status
pub async fn get_status(State(state): State<AppState>) -> Json<StatusSnapshot> {
    Json(status::collect(
        state.transfers.registry(),
        state.crypt.as_deref(),
    ))
}

/// GET /stats
pub async fn get_stats(State(state): State<AppState>) -> Json<HostStats> {
    let crypting = state.crypt.as_ref().map_or(0, |c| c.active_count());
    Json(state.stats.collect(state.transfers.registry(), crypting).await)
}

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    service: &'static str,
}

/// GET /health
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: env!("CARGO_PKG_NAME"),
    })
}
