//! API Routes

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::connection_notifier::ConnectionStatus;
use crate::error::{Error, Result};
use crate::event_log_service::DEFAULT_RECENT_CAPACITY;
use crate::models::{ApiResponse, LaneRole};
use crate::plate_launcher::LaunchStatus;
use crate::state::AppState;
use crate::stream_manager::StreamState;

/// Create API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health & Status
        .route("/healthz", get(super::health_check))
        .route("/api/status", get(dashboard_status))
        // Dashboard
        .route("/api/events", get(list_events))
        .route("/api/lanes", get(get_lanes))
        .route("/api/lanes/:role/image", get(get_lane_image))
        // Cameras
        .route("/api/cameras/:id/frame.jpg", get(get_camera_frame))
        .route("/api/cameras/:id/snapshot.jpg", get(get_camera_snapshot))
        .route("/api/cameras/:id/pause", post(pause_camera))
        .route("/api/cameras/:id/resume", post(resume_camera))
        .route("/api/cameras/:id/reconnect", post(reconnect_camera))
        .with_state(state)
}

fn jpeg(bytes: Vec<u8>) -> Response {
    (
        StatusCode::OK,
        [
            ("content-type", "image/jpeg"),
            ("cache-control", "no-cache, no-store, must-revalidate"),
        ],
        bytes,
    )
        .into_response()
}

// ========================================
// Status
// ========================================

#[derive(Debug, Serialize)]
struct CameraStatusView {
    camera_id: String,
    name: String,
    state: StreamState,
    connected: bool,
    last_error: Option<String>,
    frames_delivered: u64,
}

#[derive(Debug, Serialize)]
struct DashboardStatus {
    api_connected: bool,
    captures: u64,
    api_alerts: u64,
    /// "{enabled}/{total}"
    cameras_enabled: String,
    cameras: Vec<CameraStatusView>,
    /// Cameras whose last connectivity report was down
    offline_cameras: Vec<String>,
    plate_process: LaunchStatus,
    uptime_sec: u64,
}

async fn dashboard_status(State(state): State<AppState>) -> impl IntoResponse {
    let summary = state.event_log.summary().await;

    let online: HashSet<String> = state
        .notifier
        .all_camera_status()
        .await
        .into_iter()
        .filter(|c| c.status.is_online())
        .map(|c| c.camera_id)
        .collect();

    let cameras = state
        .streams
        .statuses()
        .into_iter()
        .map(|status| CameraStatusView {
            connected: online.contains(&status.camera_id),
            camera_id: status.camera_id,
            name: status.name,
            state: status.state,
            last_error: status.last_error,
            frames_delivered: status.frames_delivered,
        })
        .collect();

    Json(ApiResponse::success(DashboardStatus {
        api_connected: state.notifier.api_status().await == ConnectionStatus::Online,
        captures: summary.captures,
        api_alerts: summary.api_alerts,
        cameras_enabled: format!(
            "{}/{}",
            state.settings.enabled_count(),
            state.settings.total_count()
        ),
        cameras,
        offline_cameras: state.notifier.offline_cameras().await,
        plate_process: state.launcher.status().await,
        uptime_sec: state.uptime().as_secs(),
    }))
}

// ========================================
// Dashboard Handlers
// ========================================

#[derive(Deserialize)]
struct EventQuery {
    limit: Option<usize>,
}

async fn list_events(
    State(state): State<AppState>,
    Query(query): Query<EventQuery>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(DEFAULT_RECENT_CAPACITY);
    Json(ApiResponse::success(state.event_log.recent(limit).await))
}

async fn get_lanes(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::success(state.event_log.panels().await))
}

fn parse_role(role: &str) -> Result<LaneRole> {
    match role {
        "entrance" => Ok(LaneRole::Entrance),
        "exit" => Ok(LaneRole::Exit),
        other => Err(Error::Validation(format!(
            "Unknown lane '{}', expected entrance or exit",
            other
        ))),
    }
}

async fn get_lane_image(
    State(state): State<AppState>,
    Path(role): Path<String>,
) -> Result<Response> {
    let role = parse_role(&role)?;
    let panel = state
        .event_log
        .panel(role)
        .await
        .ok_or_else(|| Error::NotFound(format!("No {:?} event yet", role)))?;
    Ok(jpeg(panel.image.as_ref().clone()))
}

// ========================================
// Camera Handlers
// ========================================

async fn get_camera_frame(
    State(state): State<AppState>,
    Path(camera_id): Path<String>,
) -> Result<Response> {
    let stream = state.streams.get(&camera_id)?;
    let frame = stream
        .latest_frame()
        .ok_or_else(|| Error::NotFound(format!("No frame from camera {}", camera_id)))?;
    Ok(jpeg(frame.data.as_ref().clone()))
}

async fn get_camera_snapshot(
    State(state): State<AppState>,
    Path(camera_id): Path<String>,
) -> Result<Response> {
    let camera = state.settings.camera(&camera_id)?;
    let snapshot = state.snapshots.require_latest(camera).await?;
    Ok(jpeg(snapshot.data))
}

#[derive(Debug, Serialize)]
struct ControlResponse {
    camera_id: String,
    state: StreamState,
}

async fn pause_camera(
    State(state): State<AppState>,
    Path(camera_id): Path<String>,
) -> Result<impl IntoResponse> {
    let stream_state = state.streams.pause(&camera_id)?;
    Ok(Json(ApiResponse::success(ControlResponse {
        camera_id,
        state: stream_state,
    })))
}

async fn resume_camera(
    State(state): State<AppState>,
    Path(camera_id): Path<String>,
) -> Result<impl IntoResponse> {
    let stream_state = state.streams.resume(&camera_id)?;
    Ok(Json(ApiResponse::success(ControlResponse {
        camera_id,
        state: stream_state,
    })))
}

async fn reconnect_camera(
    State(state): State<AppState>,
    Path(camera_id): Path<String>,
) -> Result<impl IntoResponse> {
    let stream_state = state.streams.reconnect(&camera_id).await?;
    Ok(Json(ApiResponse::success(ControlResponse {
        camera_id,
        state: stream_state,
    })))
}
