//! ANPR Dashboard Library
//!
//! License-plate detection ingestion and live camera supervision.
//!
//! ## Architecture
//!
//! 1. ConfigStore - Settings file, env overrides, camera selection
//! 2. DetectionSource - Upstream detection list (HTTP)
//! 3. PollingOrchestrator - Sequential poll loop with bounded dedup
//! 4. Classifier - Lane role, display slot and image candidates (pure)
//! 5. ImageResolver - Evidence image fetch with candidate fallback
//! 6. DetectionPipeline - Classify -> resolve -> sink, in arrival order
//! 7. StreamManager - Per-camera live stream state machines
//! 8. ConnectionNotifier - Edge-triggered API/camera connectivity
//! 9. EventSink / EventLogService - Single-consumer hand-off and read model
//! 10. SnapshotService / PlateLauncher - Placeholder snapshots, external recogniser
//! 11. WebAPI - Status and manual control endpoints
//!
//! ## Data flow
//!
//! ```text
//! DetectionSource -> PollingOrchestrator -> DetectionPipeline -> EventSink -> EventLogService
//!                          |                                        ^
//!                          +----------> ConnectionNotifier ---------+
//!                                              ^
//! StreamManager (one pump per camera) ---------+
//! ```

pub mod cancel;
pub mod classifier;
pub mod config_store;
pub mod connection_notifier;
pub mod detection_pipeline;
pub mod detection_source;
pub mod error;
pub mod event_log_service;
pub mod event_sink;
pub mod image_resolver;
pub mod models;
pub mod plate_launcher;
pub mod polling_orchestrator;
pub mod snapshot_service;
pub mod state;
pub mod stream_manager;
pub mod web_api;

pub use error::{Error, Result};
pub use state::AppState;
