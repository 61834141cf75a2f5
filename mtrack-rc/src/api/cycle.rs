//! Cycle control endpoints
//!
//! - `GET /status`: watermarks, last cycle, in-flight flag
//! - `POST /cycle`: run one cycle now and wait for it (409 while one runs)
//! - `GET /cycle/last`: session of the most recent cycle (404 before the first)

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tracing::info;

use crate::error::{ApiError, ApiResult};
use crate::models::{CycleSession, Watermarks};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub in_flight: bool,
    pub sources: usize,
    pub watermarks: Watermarks,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_cycle: Option<CycleSession>,
}

/// GET /status
pub async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        in_flight: state.runner.is_in_flight(),
        sources: state.runner.orchestrator().source_count(),
        watermarks: state.runner.watermarks().await,
        last_cycle: state.runner.last_cycle().await,
    })
}

/// POST /cycle
pub async fn trigger_cycle(State(state): State<AppState>) -> ApiResult<Json<CycleSession>> {
    info!("Cycle requested via control API");
    let session = state.runner.run_cycle().await.map_err(ApiError::from)?;
    Ok(Json(session))
}

/// GET /cycle/last
pub async fn last_cycle(State(state): State<AppState>) -> ApiResult<Json<CycleSession>> {
    state
        .runner
        .last_cycle()
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("no cycle has run yet".to_string()))
}

pub fn cycle_routes() -> Router<AppState> {
    Router::new()
        .route("/status", get(get_status))
        .route("/cycle", post(trigger_cycle))
        .route("/cycle/last", get(last_cycle))
}
