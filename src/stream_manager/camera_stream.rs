//! Per-camera stream lifecycle
//!
//! Every session gets a generation number. Pause, reconnect and dispose bump
//! the generation under the state lock, and a frame is published only while
//! holding that same lock with the session's generation still current. A
//! frame is therefore either fully published before the bump or discarded.

use super::capture::{CaptureBackend, CaptureSource, FrameRead};
use super::{Frame, StreamConfig, StreamState, StreamStatus};
use crate::cancel::CancelSignal;
use crate::connection_notifier::ConnectionNotifier;
use chrono::Local;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

struct Session {
    cancel: CancelSignal,
    task: JoinHandle<()>,
}

struct Inner {
    state: StreamState,
    generation: u64,
    session: Option<Session>,
    last_error: Option<String>,
    frames_delivered: u64,
}

struct Shared {
    camera_id: String,
    name: String,
    address: Option<String>,
    backend: Arc<dyn CaptureBackend>,
    notifier: Arc<ConnectionNotifier>,
    config: StreamConfig,
    inner: Mutex<Inner>,
    frames: watch::Sender<Option<Frame>>,
}

/// Live stream of one camera
pub struct CameraStream {
    shared: Arc<Shared>,
}

enum PumpExit {
    Cancelled,
    Closed(String),
}

impl CameraStream {
    pub fn new(
        camera_id: impl Into<String>,
        name: impl Into<String>,
        address: Option<String>,
        backend: Arc<dyn CaptureBackend>,
        notifier: Arc<ConnectionNotifier>,
        config: StreamConfig,
    ) -> Self {
        let (frames, _) = watch::channel(None);
        Self {
            shared: Arc::new(Shared {
                camera_id: camera_id.into(),
                name: name.into(),
                address,
                backend,
                notifier,
                config,
                inner: Mutex::new(Inner {
                    state: StreamState::Idle,
                    generation: 0,
                    session: None,
                    last_error: None,
                    frames_delivered: 0,
                }),
                frames,
            }),
        }
    }

    pub fn camera_id(&self) -> &str {
        &self.shared.camera_id
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn state(&self) -> StreamState {
        self.shared.lock().state
    }

    pub fn status(&self) -> StreamStatus {
        let inner = self.shared.lock();
        StreamStatus {
            camera_id: self.shared.camera_id.clone(),
            name: self.shared.name.clone(),
            state: inner.state,
            last_error: inner.last_error.clone(),
            frames_delivered: inner.frames_delivered,
        }
    }

    /// Receiver that always holds the latest published frame
    pub fn subscribe_frames(&self) -> watch::Receiver<Option<Frame>> {
        self.shared.frames.subscribe()
    }

    pub fn latest_frame(&self) -> Option<Frame> {
        self.shared.frames.borrow().clone()
    }

    /// Start streaming from `Idle`, `Paused` or `Error`.
    /// Returns false when the stream is already active or disposed.
    pub fn start(&self) -> bool {
        let mut inner = self.shared.lock();
        match inner.state {
            StreamState::Idle | StreamState::Paused | StreamState::Error => {
                inner.generation += 1;
                let generation = inner.generation;
                self.shared.spawn_session(&mut inner, generation);
                true
            }
            StreamState::Connecting | StreamState::Streaming | StreamState::Disposed => false,
        }
    }

    /// Stop the frame pump, keeping the stream ready for [`resume`](Self::resume)
    pub fn pause(&self) -> bool {
        let mut inner = self.shared.lock();
        match inner.state {
            StreamState::Connecting | StreamState::Streaming => {
                inner.generation += 1;
                if let Some(session) = inner.session.take() {
                    session.cancel.cancel();
                }
                inner.state = StreamState::Paused;
                tracing::info!(camera_id = %self.shared.camera_id, "Stream paused");
                true
            }
            _ => false,
        }
    }

    pub fn resume(&self) -> bool {
        if self.state() != StreamState::Paused {
            return false;
        }
        self.start()
    }

    /// Tear down the current session and open a fresh one.
    ///
    /// Waits for the old session to finish, then for the settle delay, so the
    /// camera sees the previous connection closed first.
    pub async fn reconnect(&self) -> bool {
        let (generation, old) = {
            let mut inner = self.shared.lock();
            if inner.state == StreamState::Disposed {
                return false;
            }
            inner.generation += 1;
            let old = inner.session.take();
            if let Some(session) = &old {
                session.cancel.cancel();
            }
            inner.state = StreamState::Connecting;
            inner.last_error = None;
            (inner.generation, old)
        };

        tracing::info!(camera_id = %self.shared.camera_id, "Reconnecting stream");

        if let Some(session) = old {
            self.shared.join_session(session).await;
            tokio::time::sleep(self.shared.config.settle_delay).await;
        }

        let mut inner = self.shared.lock();
        if inner.generation != generation || inner.state == StreamState::Disposed {
            // superseded while settling
            return false;
        }
        self.shared.spawn_session(&mut inner, generation);
        true
    }

    /// Terminal. Safe to call more than once.
    pub async fn dispose(&self) {
        let old = {
            let mut inner = self.shared.lock();
            if inner.state == StreamState::Disposed {
                return;
            }
            inner.generation += 1;
            inner.state = StreamState::Disposed;
            inner.session.take()
        };

        if let Some(session) = old {
            session.cancel.cancel();
            self.shared.join_session(session).await;
        }
        self.shared.frames.send_replace(None);
        tracing::info!(camera_id = %self.shared.camera_id, "Stream disposed");
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.lock().generation == generation
    }

    fn spawn_session(self: &Arc<Self>, inner: &mut Inner, generation: u64) {
        let cancel = CancelSignal::new();
        inner.state = StreamState::Connecting;
        let task = tokio::spawn(self.clone().run_session(generation, cancel.clone()));
        inner.session = Some(Session { cancel, task });
        tracing::debug!(camera_id = %self.camera_id, generation, "Session started");
    }

    async fn join_session(&self, session: Session) {
        let limit = self.config.open_timeout + self.config.settle_delay;
        if tokio::time::timeout(limit, session.task).await.is_err() {
            tracing::warn!(camera_id = %self.camera_id, "Previous session did not stop in time");
        }
    }

    /// Publish a frame if `generation` is still current and not cancelled
    fn deliver(&self, generation: u64, cancel: &CancelSignal, data: Vec<u8>) -> bool {
        let mut inner = self.lock();
        if inner.generation != generation || cancel.is_cancelled() {
            return false;
        }
        inner.frames_delivered += 1;
        let frame = Frame {
            seq: inner.frames_delivered,
            data: Arc::new(data),
            captured_at: Local::now(),
        };
        self.frames.send_replace(Some(frame));
        true
    }

    /// Move to `state` if the session is still current
    fn settle(&self, generation: u64, state: StreamState, error: Option<String>) -> bool {
        let mut inner = self.lock();
        if inner.generation != generation {
            return false;
        }
        inner.state = state;
        if error.is_some() {
            inner.last_error = error;
        }
        if state == StreamState::Error {
            inner.session = None;
        }
        true
    }

    async fn run_session(self: Arc<Self>, generation: u64, cancel: CancelSignal) {
        let Some(address) = self.address.clone() else {
            self.fail(generation, "no stream address configured".to_string()).await;
            return;
        };

        let opened = tokio::select! {
            result = self.backend.open(&self.camera_id, &address) => result,
            _ = cancel.cancelled() => return,
        };

        let mut source = match opened {
            Ok(source) => source,
            Err(e) => {
                if !cancel.is_cancelled() {
                    self.fail(generation, e.to_string()).await;
                }
                return;
            }
        };

        if cancel.is_cancelled() || !self.settle(generation, StreamState::Streaming, None) {
            source.close().await;
            return;
        }
        tracing::info!(camera_id = %self.camera_id, generation, "Stream connected");
        self.notifier.update_camera_status(&self.camera_id, true).await;

        let exit = self.pump(generation, &cancel, source.as_mut()).await;
        source.close().await;

        match exit {
            PumpExit::Cancelled => {
                tracing::debug!(camera_id = %self.camera_id, generation, "Session cancelled");
            }
            PumpExit::Closed(reason) => self.fail(generation, reason).await,
        }
    }

    async fn fail(&self, generation: u64, reason: String) {
        if !self.settle(generation, StreamState::Error, Some(reason.clone())) {
            return;
        }
        tracing::warn!(camera_id = %self.camera_id, error = %reason, "Stream error");
        self.notifier.update_camera_status(&self.camera_id, false).await;
    }

    async fn pump(
        &self,
        generation: u64,
        cancel: &CancelSignal,
        source: &mut dyn CaptureSource,
    ) -> PumpExit {
        let frame_interval = self.config.frame_interval();

        loop {
            if cancel.is_cancelled() || !self.is_current(generation) {
                return PumpExit::Cancelled;
            }

            let read = tokio::select! {
                read = source.read_frame() => read,
                _ = cancel.cancelled() => return PumpExit::Cancelled,
            };

            let wait = match read {
                FrameRead::Frame(data) if !data.is_empty() => {
                    if !self.deliver(generation, cancel, data) {
                        return PumpExit::Cancelled;
                    }
                    tracing::trace!(camera_id = %self.camera_id, "Frame delivered");
                    frame_interval
                }
                FrameRead::Frame(_) | FrameRead::Empty => self.config.read_retry_delay,
                FrameRead::Failed(reason) => {
                    tracing::trace!(camera_id = %self.camera_id, error = %reason, "Frame read failed");
                    self.config.read_retry_delay
                }
                FrameRead::Closed(reason) => return PumpExit::Closed(reason),
            };

            if !sleep_unless_cancelled(wait, cancel).await {
                return PumpExit::Cancelled;
            }
        }
    }
}

async fn sleep_unless_cancelled(wait: Duration, cancel: &CancelSignal) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(wait) => true,
        _ = cancel.cancelled() => false,
    }
}
