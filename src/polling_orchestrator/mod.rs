//! PollingOrchestrator - Detection Poll Loop with Dedup
//!
//! ## Responsibilities
//!
//! - Poll the detection source on a fixed cadence (fetch -> process -> sleep)
//! - Suppress already-emitted detections (bounded seen set)
//! - Forward new detections downstream in response order
//! - Report API reachability to the connection notifier
//!
//! A failed cycle never ends the loop; it is reported and retried after the
//! same interval.

mod seen_set;

pub use seen_set::{SeenSet, DEFAULT_SEEN_CAPACITY};

use crate::cancel::CancelSignal;
use crate::connection_notifier::ConnectionNotifier;
use crate::detection_source::DetectionSource;
use crate::models::RawDetection;
use chrono::{Local, NaiveDateTime};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;

/// Default poll interval
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Poll loop settings
#[derive(Debug, Clone)]
pub struct PollingConfig {
    pub interval: Duration,
    pub seen_capacity: usize,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            seen_capacity: DEFAULT_SEEN_CAPACITY,
        }
    }
}

/// New detection plus the time its response was received
#[derive(Debug, Clone)]
pub struct IngestedDetection {
    pub detection: RawDetection,
    pub received_at: NaiveDateTime,
}

/// Result of one poll cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Fetched { received: usize, emitted: usize },
    Failed,
}

/// PollingOrchestrator instance
pub struct PollingOrchestrator {
    source: Arc<dyn DetectionSource>,
    notifier: Arc<ConnectionNotifier>,
    seen: Mutex<SeenSet>,
    config: PollingConfig,
    running: RwLock<bool>,
    stop: CancelSignal,
}

impl PollingOrchestrator {
    pub fn new(
        source: Arc<dyn DetectionSource>,
        notifier: Arc<ConnectionNotifier>,
        config: PollingConfig,
    ) -> Self {
        Self {
            source,
            notifier,
            seen: Mutex::new(SeenSet::new(config.seen_capacity)),
            config,
            running: RwLock::new(false),
            stop: CancelSignal::new(),
        }
    }

    /// Start the poll loop. Returns `None` if it is already running or was stopped.
    pub async fn start(
        self: &Arc<Self>,
        out: mpsc::UnboundedSender<IngestedDetection>,
    ) -> Option<JoinHandle<()>> {
        {
            let mut running = self.running.write().await;
            if *running || self.stop.is_cancelled() {
                tracing::warn!("Polling already running or stopped");
                return None;
            }
            *running = true;
        }

        tracing::info!(
            interval_ms = self.config.interval.as_millis() as u64,
            "Starting polling orchestrator"
        );

        let this = self.clone();
        Some(tokio::spawn(async move {
            this.run(out).await;
            *this.running.write().await = false;
            tracing::info!("Polling orchestrator stopped");
        }))
    }

    /// Request the loop to stop at its next safe point
    pub fn stop(&self) {
        tracing::info!("Stopping polling orchestrator");
        self.stop.cancel();
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    async fn run(&self, out: mpsc::UnboundedSender<IngestedDetection>) {
        loop {
            if self.stop.is_cancelled() {
                break;
            }

            let outcome = self.run_cycle(&out).await;
            tracing::trace!(outcome = ?outcome, "Poll cycle finished");

            if out.is_closed() {
                tracing::warn!("Detection consumer gone, ending poll loop");
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.interval) => {}
                _ = self.stop.cancelled() => break,
            }
        }
    }

    /// One fetch -> dedup -> forward cycle
    pub async fn run_cycle(&self, out: &mpsc::UnboundedSender<IngestedDetection>) -> CycleOutcome {
        match self.source.fetch().await {
            Ok(detections) => {
                self.notifier.update_api_status(true).await;

                let received = detections.len();
                let received_at = Local::now().naive_local();
                let fresh = self.filter_new(detections);
                let emitted = fresh.len();

                for detection in fresh {
                    tracing::debug!(
                        plate = %detection.plate,
                        abs_time = %detection.abs_time,
                        "New detection"
                    );
                    if out
                        .send(IngestedDetection {
                            detection,
                            received_at,
                        })
                        .is_err()
                    {
                        break;
                    }
                }

                CycleOutcome::Fetched { received, emitted }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Detection fetch failed");
                self.notifier.update_api_status(false).await;
                CycleOutcome::Failed
            }
        }
    }

    /// Keep detections whose dedup key has not been seen, in input order
    pub fn filter_new(&self, detections: Vec<RawDetection>) -> Vec<RawDetection> {
        let mut seen = match self.seen.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        detections
            .into_iter()
            .filter(|d| seen.insert(d.dedup_key()))
            .collect()
    }
}
