//! Application state
//!
//! Holds all shared components and state

use crate::config_store::{ConfigStore, DEFAULT_SETTINGS_FILE};
use crate::connection_notifier::ConnectionNotifier;
use crate::detection_source::DEFAULT_FETCH_TIMEOUT;
use crate::event_log_service::{EventLogService, DEFAULT_RECENT_CAPACITY};
use crate::image_resolver::DEFAULT_IMAGE_TIMEOUT;
use crate::plate_launcher::PlateLauncher;
use crate::polling_orchestrator::DEFAULT_SEEN_CAPACITY;
use crate::snapshot_service::SnapshotService;
use crate::stream_manager::{StreamConfig, StreamManager};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Settings file (`appsettings.json`)
    pub settings_path: PathBuf,
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// Start the external plate recogniser
    pub launch_recogniser: bool,
    /// Detection fetch timeout
    pub fetch_timeout: Duration,
    /// Evidence image fetch timeout
    pub image_timeout: Duration,
    /// Dedup window size
    pub seen_capacity: usize,
    /// Sidebar entries kept
    pub recent_capacity: usize,
    pub stream: StreamConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            settings_path: std::env::var("ANPR_SETTINGS")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_SETTINGS_FILE)),
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
            launch_recogniser: true,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            image_timeout: DEFAULT_IMAGE_TIMEOUT,
            seen_capacity: DEFAULT_SEEN_CAPACITY,
            recent_capacity: DEFAULT_RECENT_CAPACITY,
            stream: StreamConfig::default(),
        }
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Application config
    pub config: AppConfig,
    /// Loaded settings and selected cameras
    pub settings: Arc<ConfigStore>,
    /// Connectivity aggregation
    pub notifier: Arc<ConnectionNotifier>,
    /// Live camera streams
    pub streams: Arc<StreamManager>,
    /// Dashboard read model
    pub event_log: Arc<EventLogService>,
    /// Placeholder snapshots
    pub snapshots: Arc<SnapshotService>,
    /// External recogniser
    pub launcher: Arc<PlateLauncher>,
    pub started_at: Instant,
}

impl AppState {
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }
}
