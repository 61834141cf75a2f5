//! mtrack-rc: media collection reconciler
//!
//! Pulls what is new from each media source once per period, resolves
//! cross-source duplicates through a disambiguation engine and delivers a
//! daily report. Exposed as a library so the pipeline can be driven from
//! integration tests.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod sources;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use mtrack_common::events::EventBus;
use std::sync::Arc;

use crate::services::CycleRunner;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub runner: Arc<CycleRunner>,
    pub event_bus: EventBus,
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(runner: Arc<CycleRunner>) -> Self {
        let event_bus = runner.orchestrator().event_bus().clone();
        Self {
            runner,
            event_bus,
            startup_time: Utc::now(),
        }
    }
}

/// Build the control API router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .merge(api::cycle_routes())
        .merge(api::health_routes())
        .route("/events", get(api::cycle_event_stream))
        .with_state(state)
}
