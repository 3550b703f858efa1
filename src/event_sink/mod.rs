//! EventSink - Hand-off to the Presentation Layer
//!
//! ## Responsibilities
//!
//! - Define the surface producers (poll pipeline, camera streams, notifier) write to
//! - Marshal every notification onto one ordered, single-consumer channel
//!
//! Producers may call from any task; the consumer drains the receiver on
//! whatever context the presentation requires.

use crate::models::ResolvedEvent;
use tokio::sync::mpsc;

/// Consumer-facing notifications
pub trait EventSink: Send + Sync {
    fn on_resolved_event(&self, event: ResolvedEvent);
    fn on_api_connectivity_changed(&self, connected: bool);
    fn on_camera_connectivity_changed(&self, camera_id: &str, connected: bool);
}

/// Message carried by [`ChannelSink`]
#[derive(Debug, Clone)]
pub enum SinkEvent {
    Resolved(ResolvedEvent),
    ApiConnectivity(bool),
    CameraConnectivity { camera_id: String, connected: bool },
}

impl SinkEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            SinkEvent::Resolved(_) => "resolved_event",
            SinkEvent::ApiConnectivity(_) => "api_connectivity",
            SinkEvent::CameraConnectivity { .. } => "camera_connectivity",
        }
    }
}

/// Sink backed by an unbounded mpsc channel
#[derive(Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<SinkEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<SinkEvent>) -> Self {
        Self { tx }
    }

    fn send(&self, event: SinkEvent) {
        let kind = event.kind();
        if self.tx.send(event).is_err() {
            tracing::warn!(message_type = %kind, "Event sink consumer gone, dropping message");
        }
    }
}

impl EventSink for ChannelSink {
    fn on_resolved_event(&self, event: ResolvedEvent) {
        self.send(SinkEvent::Resolved(event));
    }

    fn on_api_connectivity_changed(&self, connected: bool) {
        self.send(SinkEvent::ApiConnectivity(connected));
    }

    fn on_camera_connectivity_changed(&self, camera_id: &str, connected: bool) {
        self.send(SinkEvent::CameraConnectivity {
            camera_id: camera_id.to_string(),
            connected,
        });
    }
}

/// Create a sink and the receiver its single consumer drains
pub fn channel() -> (ChannelSink, mpsc::UnboundedReceiver<SinkEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ChannelSink::new(tx), rx)
}
