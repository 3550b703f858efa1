//! DetectionPipeline - Classify, Resolve and Deliver
//!
//! ## Responsibilities
//!
//! - Consume new detections from the poll loop in arrival order
//! - Classify each one (pure) and drop the unroutable ones
//! - Resolve the evidence image and hand the event to the sink
//!
//! Image fetches happen here, off the poll loop, so a slow image server does
//! not stretch the poll cadence. Detections are processed one at a time to
//! keep delivery order equal to arrival order.

use crate::classifier;
use crate::event_sink::EventSink;
use crate::image_resolver::{self, ImageFetcher};
use crate::models::ResolvedEvent;
use crate::polling_orchestrator::IngestedDetection;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Outcome of processing one detection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineOutcome {
    Delivered,
    /// Rejected by the classifier
    Dropped,
    /// No candidate image could be fetched
    ImageUnavailable,
}

pub struct DetectionPipeline {
    fetcher: Arc<dyn ImageFetcher>,
    sink: Arc<dyn EventSink>,
}

impl DetectionPipeline {
    pub fn new(fetcher: Arc<dyn ImageFetcher>, sink: Arc<dyn EventSink>) -> Self {
        Self { fetcher, sink }
    }

    pub async fn process(&self, ingested: IngestedDetection) -> PipelineOutcome {
        let IngestedDetection {
            detection,
            received_at,
        } = ingested;

        let Some(event) = classifier::classify(&detection, received_at) else {
            tracing::debug!(plate = %detection.plate, "Detection dropped by classifier");
            return PipelineOutcome::Dropped;
        };

        match image_resolver::resolve(self.fetcher.as_ref(), &event.candidate_image_urls).await {
            Ok(image) => {
                tracing::info!(
                    plate = %event.plate,
                    lane_role = ?event.lane_role,
                    display_slot = ?event.display_slot,
                    url = %image.url,
                    "Detection resolved"
                );
                self.sink.on_resolved_event(ResolvedEvent {
                    event,
                    image: image.data,
                    image_url: image.url,
                });
                PipelineOutcome::Delivered
            }
            Err(e) => {
                tracing::warn!(plate = %event.plate, error = %e, "Detection dropped, no evidence image");
                PipelineOutcome::ImageUnavailable
            }
        }
    }

    /// Drain `rx` until every sender is gone
    pub fn spawn(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<IngestedDetection>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(ingested) = rx.recv().await {
                self.process(ingested).await;
            }
            tracing::info!("Detection pipeline stopped");
        })
    }
}
