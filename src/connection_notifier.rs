//! Connection Health Notifier
//!
//! Aggregates API reachability (poll loop) and per-camera connectivity
//! (stream sessions). Only transitions reach the event sink, so a failing
//! poll cycle or a flapping frame read does not spam the status indicators.

use crate::event_sink::EventSink;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Connection status of one signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// Never reported
    Unknown,
    Online,
    Offline,
}

impl ConnectionStatus {
    fn from_flag(is_online: bool) -> Self {
        if is_online {
            Self::Online
        } else {
            Self::Offline
        }
    }

    pub fn is_online(self) -> bool {
        self == Self::Online
    }
}

/// Status transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityEvent {
    /// Now reachable (first report, or Offline -> Online)
    Up,
    /// Now unreachable (first report, or Online -> Offline)
    Down,
}

/// Snapshot of one camera's connectivity
#[derive(Debug, Clone, Serialize)]
pub struct CameraConnectivity {
    pub camera_id: String,
    pub status: ConnectionStatus,
}

/// Edge-triggered connectivity aggregator, safe for concurrent writers
pub struct ConnectionNotifier {
    api: RwLock<ConnectionStatus>,
    cameras: RwLock<HashMap<String, ConnectionStatus>>,
    sink: Arc<dyn EventSink>,
}

impl ConnectionNotifier {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self {
            api: RwLock::new(ConnectionStatus::Unknown),
            cameras: RwLock::new(HashMap::new()),
            sink,
        }
    }

    /// Record an API reachability observation.
    ///
    /// The sink is notified while the status lock is held, so concurrent
    /// reporters cannot reorder transitions.
    pub async fn update_api_status(&self, is_online: bool) -> Option<ConnectivityEvent> {
        let mut api = self.api.write().await;
        let event = transition(*api, is_online);
        *api = ConnectionStatus::from_flag(is_online);

        match event {
            Some(ConnectivityEvent::Down) => {
                tracing::warn!("Detection API unreachable");
                self.sink.on_api_connectivity_changed(false);
            }
            Some(ConnectivityEvent::Up) => {
                tracing::info!("Detection API reachable");
                self.sink.on_api_connectivity_changed(true);
            }
            None => {}
        }
        event
    }

    /// Record a camera connectivity observation
    pub async fn update_camera_status(
        &self,
        camera_id: &str,
        is_online: bool,
    ) -> Option<ConnectivityEvent> {
        let mut cameras = self.cameras.write().await;
        let prev = cameras
            .get(camera_id)
            .copied()
            .unwrap_or(ConnectionStatus::Unknown);
        let event = transition(prev, is_online);
        cameras.insert(camera_id.to_string(), ConnectionStatus::from_flag(is_online));

        match event {
            Some(ConnectivityEvent::Down) => {
                tracing::warn!(camera_id = %camera_id, "Camera connection lost");
                self.sink.on_camera_connectivity_changed(camera_id, false);
            }
            Some(ConnectivityEvent::Up) => {
                tracing::info!(camera_id = %camera_id, "Camera connected");
                self.sink.on_camera_connectivity_changed(camera_id, true);
            }
            None => {}
        }
        event
    }

    pub async fn api_status(&self) -> ConnectionStatus {
        *self.api.read().await
    }

    pub async fn camera_status(&self, camera_id: &str) -> ConnectionStatus {
        self.cameras
            .read()
            .await
            .get(camera_id)
            .copied()
            .unwrap_or(ConnectionStatus::Unknown)
    }

    pub async fn all_camera_status(&self) -> Vec<CameraConnectivity> {
        let mut all: Vec<CameraConnectivity> = self
            .cameras
            .read()
            .await
            .iter()
            .map(|(id, status)| CameraConnectivity {
                camera_id: id.clone(),
                status: *status,
            })
            .collect();
        all.sort_by(|a, b| a.camera_id.cmp(&b.camera_id));
        all
    }

    pub async fn offline_cameras(&self) -> Vec<String> {
        let mut offline: Vec<String> = self
            .cameras
            .read()
            .await
            .iter()
            .filter(|(_, status)| **status == ConnectionStatus::Offline)
            .map(|(id, _)| id.clone())
            .collect();
        offline.sort();
        offline
    }
}

fn transition(prev: ConnectionStatus, is_online: bool) -> Option<ConnectivityEvent> {
    match (prev, is_online) {
        (ConnectionStatus::Online, true) | (ConnectionStatus::Offline, false) => None,
        (_, true) => Some(ConnectivityEvent::Up),
        (_, false) => Some(ConnectivityEvent::Down),
    }
}
