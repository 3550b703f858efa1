//! WebAPI - Status and Control Endpoints
//!
//! ## Responsibilities
//!
//! - Dashboard read model (status, sidebar events, lane panels)
//! - Latest camera frames and placeholder snapshots
//! - Manual stream control (pause, resume, reconnect)

mod routes;

pub use routes::create_router;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

use crate::connection_notifier::ConnectionStatus;
use crate::models::HealthResponse;
use crate::state::AppState;

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let api_connected = state.notifier.api_status().await == ConnectionStatus::Online;

    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_sec: state.uptime().as_secs(),
        api_connected,
    })
}
