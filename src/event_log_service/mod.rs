//! EventLogService - Dashboard Read Model
//!
//! ## Responsibilities
//!
//! - Single consumer of the event sink channel
//! - Entrance/exit panels (last event per lane role)
//! - Recent sidebar list (bounded, newest first, duplicate-suppressed)
//! - Capture counter and connectivity flags for the status API

use crate::event_sink::SinkEvent;
use crate::models::{DisplaySlot, LaneRole, ResolvedEvent};
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;

/// Default number of sidebar entries kept
pub const DEFAULT_RECENT_CAPACITY: usize = 10;

const PANEL_TIME_FORMAT: &str = "%d/%m/%Y %H:%M:%S";
const SIDEBAR_TIME_FORMAT: &str = "%H:%M:%S";

/// Sidebar entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecentEvent {
    pub plate: String,
    /// `HH:mm:ss`
    pub time: String,
    /// `Camara{lane}`
    pub camera: String,
    pub lane_role: LaneRole,
    pub image_url: String,
}

impl RecentEvent {
    fn same_sighting(&self, other: &RecentEvent) -> bool {
        self.plate == other.plate && self.time == other.time && self.camera == other.camera
    }
}

/// Entrance or exit panel
#[derive(Debug, Clone, Serialize)]
pub struct LanePanel {
    pub plate: String,
    /// `dd/MM/yyyy HH:mm:ss`
    pub timestamp: String,
    pub image_url: String,
    #[serde(skip)]
    pub image: Arc<Vec<u8>>,
}

/// Both lane panels
#[derive(Debug, Clone, Default, Serialize)]
pub struct LanePanels {
    pub entrance: Option<LanePanel>,
    pub exit: Option<LanePanel>,
}

#[derive(Debug, Default)]
struct DashboardModel {
    panels: LanePanels,
    recent: VecDeque<RecentEvent>,
    captures: u64,
    api_connected: bool,
    api_alert_shown: bool,
    api_alerts: u64,
    cameras: BTreeMap<String, bool>,
}

/// Counters and flags shown in the status bar
#[derive(Debug, Clone, Serialize)]
pub struct DashboardSummary {
    pub captures: u64,
    pub api_connected: bool,
    /// Outages alerted so far (one per outage)
    pub api_alerts: u64,
    pub cameras: BTreeMap<String, bool>,
}

/// EventLogService instance
pub struct EventLogService {
    model: RwLock<DashboardModel>,
    recent_capacity: usize,
}

impl EventLogService {
    pub fn new(recent_capacity: usize) -> Self {
        Self {
            model: RwLock::new(DashboardModel::default()),
            recent_capacity: recent_capacity.max(1),
        }
    }

    /// Apply one sink message
    pub async fn apply(&self, event: SinkEvent) {
        match event {
            SinkEvent::Resolved(resolved) => self.add_resolved(resolved).await,
            SinkEvent::ApiConnectivity(connected) => self.set_api_connected(connected).await,
            SinkEvent::CameraConnectivity {
                camera_id,
                connected,
            } => {
                self.model.write().await.cameras.insert(camera_id, connected);
            }
        }
    }

    /// Drain the sink channel until all producers are gone
    pub fn spawn(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<SinkEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                self.apply(event).await;
            }
            tracing::info!("Event log consumer stopped");
        })
    }

    async fn add_resolved(&self, resolved: ResolvedEvent) {
        let ResolvedEvent {
            event,
            image,
            image_url,
        } = resolved;
        let mut model = self.model.write().await;

        if event.display_slot == DisplaySlot::Sidebar {
            let entry = RecentEvent {
                plate: event.plate.clone(),
                time: event.timestamp.format(SIDEBAR_TIME_FORMAT).to_string(),
                camera: event.camera_label(),
                lane_role: event.lane_role,
                image_url: image_url.clone(),
            };

            if model.recent.iter().any(|e| e.same_sighting(&entry)) {
                tracing::debug!(plate = %entry.plate, "Sidebar duplicate skipped");
            } else {
                model.recent.push_front(entry);
                model.recent.truncate(self.recent_capacity);
                model.captures += 1;
            }
        }

        let panel = LanePanel {
            plate: event.plate,
            timestamp: event.timestamp.format(PANEL_TIME_FORMAT).to_string(),
            image_url,
            image: Arc::new(image),
        };
        match event.lane_role {
            LaneRole::Entrance => model.panels.entrance = Some(panel),
            LaneRole::Exit => model.panels.exit = Some(panel),
            LaneRole::None => {}
        }
    }

    async fn set_api_connected(&self, connected: bool) {
        let mut model = self.model.write().await;
        model.api_connected = connected;

        if connected {
            model.api_alert_shown = false;
        } else if !model.api_alert_shown {
            model.api_alert_shown = true;
            model.api_alerts += 1;
            tracing::error!("Detection API connection lost");
        }
    }

    /// Newest first
    pub async fn recent(&self, limit: usize) -> Vec<RecentEvent> {
        self.model
            .read()
            .await
            .recent
            .iter()
            .take(limit)
            .cloned()
            .collect()
    }

    pub async fn panels(&self) -> LanePanels {
        self.model.read().await.panels.clone()
    }

    pub async fn panel(&self, role: LaneRole) -> Option<LanePanel> {
        let model = self.model.read().await;
        match role {
            LaneRole::Entrance => model.panels.entrance.clone(),
            LaneRole::Exit => model.panels.exit.clone(),
            LaneRole::None => None,
        }
    }

    pub async fn summary(&self) -> DashboardSummary {
        let model = self.model.read().await;
        DashboardSummary {
            captures: model.captures,
            api_connected: model.api_connected,
            api_alerts: model.api_alerts,
            cameras: model.cameras.clone(),
        }
    }
}

impl Default for EventLogService {
    fn default() -> Self {
        Self::new(DEFAULT_RECENT_CAPACITY)
    }
}
