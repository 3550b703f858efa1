//! StreamManager - Live Camera Streams
//!
//! ## Responsibilities
//!
//! - One [`CameraStream`] per configured camera, each with its own frame pump
//! - Manual control surface (pause, resume, reconnect) per camera
//! - Report camera connectivity to the connection notifier
//! - Keep only the latest frame per camera (stale frames are dropped)
//!
//! ## State machine
//!
//! `Idle -> Connecting -> Streaming -> {Paused, Error} -> Connecting -> ... -> Disposed`
//!
//! Open failures and a closed source end in `Error`; nothing retries
//! automatically. `Disposed` is terminal and every later call is a no-op.

mod camera_stream;
pub mod capture;

pub use camera_stream::CameraStream;
pub use capture::{CaptureBackend, CaptureSource, FfmpegBackend, FrameRead, JpegSplitter};

use crate::config_store::CameraEntry;
use crate::connection_notifier::ConnectionNotifier;
use crate::error::{Error, Result};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Stream tunables
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub target_fps: u32,
    /// Delay before retrying after an empty or failed read
    pub read_retry_delay: Duration,
    pub open_timeout: Duration,
    /// Pause between closing the old session and opening the new one on reconnect
    pub settle_delay: Duration,
}

impl StreamConfig {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(1000 / u64::from(self.target_fps.max(1)))
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            target_fps: 25,
            read_retry_delay: Duration::from_millis(10),
            open_timeout: capture::DEFAULT_OPEN_TIMEOUT,
            settle_delay: Duration::from_millis(500),
        }
    }
}

/// Stream lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamState {
    Idle,
    Connecting,
    Streaming,
    Paused,
    Error,
    /// Terminal
    Disposed,
}

/// One delivered frame
#[derive(Debug, Clone)]
pub struct Frame {
    /// Per-camera delivery counter, starts at 1
    pub seq: u64,
    pub data: Arc<Vec<u8>>,
    pub captured_at: DateTime<Local>,
}

/// Stream snapshot for the status API
#[derive(Debug, Clone, Serialize)]
pub struct StreamStatus {
    pub camera_id: String,
    pub name: String,
    pub state: StreamState,
    pub last_error: Option<String>,
    pub frames_delivered: u64,
}

/// StreamManager instance
pub struct StreamManager {
    streams: Vec<Arc<CameraStream>>,
}

impl StreamManager {
    pub fn new(
        cameras: &[CameraEntry],
        backend: Arc<dyn CaptureBackend>,
        notifier: Arc<ConnectionNotifier>,
        config: StreamConfig,
    ) -> Self {
        let streams = cameras
            .iter()
            .map(|camera| {
                Arc::new(CameraStream::new(
                    camera.camera_id.clone(),
                    camera.name.clone(),
                    camera.rtsp_url.clone(),
                    backend.clone(),
                    notifier.clone(),
                    config.clone(),
                ))
            })
            .collect();
        Self { streams }
    }

    /// Start every idle stream
    pub fn start_all(&self) {
        for stream in &self.streams {
            if stream.state() == StreamState::Idle {
                tracing::info!(camera_id = %stream.camera_id(), name = %stream.name(), "Starting stream");
                stream.start();
            }
        }
    }

    pub fn get(&self, camera_id: &str) -> Result<Arc<CameraStream>> {
        self.streams
            .iter()
            .find(|s| s.camera_id() == camera_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Camera {} not found", camera_id)))
    }

    pub fn streams(&self) -> &[Arc<CameraStream>] {
        &self.streams
    }

    pub fn pause(&self, camera_id: &str) -> Result<StreamState> {
        let stream = self.get(camera_id)?;
        stream.pause();
        Ok(stream.state())
    }

    pub fn resume(&self, camera_id: &str) -> Result<StreamState> {
        let stream = self.get(camera_id)?;
        stream.resume();
        Ok(stream.state())
    }

    pub async fn reconnect(&self, camera_id: &str) -> Result<StreamState> {
        let stream = self.get(camera_id)?;
        stream.reconnect().await;
        Ok(stream.state())
    }

    pub fn statuses(&self) -> Vec<StreamStatus> {
        self.streams.iter().map(|s| s.status()).collect()
    }

    /// Dispose every stream (shutdown)
    pub async fn dispose_all(&self) {
        for stream in &self.streams {
            stream.dispose().await;
        }
        tracing::info!(count = self.streams.len(), "All streams disposed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_sink::{self, SinkEvent};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::{mpsc, Semaphore};

    /// Produces numbered frames forever
    struct CountingSource {
        next: u8,
    }

    #[async_trait]
    impl CaptureSource for CountingSource {
        async fn read_frame(&mut self) -> FrameRead {
            tokio::time::sleep(Duration::from_millis(1)).await;
            self.next = self.next.wrapping_add(1);
            FrameRead::Frame(vec![self.next])
        }
    }

    /// Yields `frames` frames, then reports the source closed
    struct FiniteSource {
        left: usize,
    }

    #[async_trait]
    impl CaptureSource for FiniteSource {
        async fn read_frame(&mut self) -> FrameRead {
            if self.left == 0 {
                return FrameRead::Closed("end of stream".to_string());
            }
            self.left -= 1;
            FrameRead::Frame(vec![1, 2, 3])
        }
    }

    /// Alternates empty and failed reads with real frames
    struct FlakySource {
        step: usize,
    }

    #[async_trait]
    impl CaptureSource for FlakySource {
        async fn read_frame(&mut self) -> FrameRead {
            self.step += 1;
            match self.step % 3 {
                0 => FrameRead::Frame(vec![9]),
                1 => FrameRead::Empty,
                _ => FrameRead::Failed("decode hiccup".to_string()),
            }
        }
    }

    /// Each read waits for a permit; `entered` counts reads started
    struct GatedSource {
        gate: Arc<Semaphore>,
        entered: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl CaptureSource for GatedSource {
        async fn read_frame(&mut self) -> FrameRead {
            let n = self.entered.fetch_add(1, Ordering::SeqCst) + 1;
            match self.gate.acquire().await {
                Ok(permit) => permit.forget(),
                Err(_) => return FrameRead::Closed("gate closed".to_string()),
            }
            FrameRead::Frame(vec![n as u8])
        }
    }

    struct GatedBackend {
        gate: Arc<Semaphore>,
        entered: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl CaptureBackend for GatedBackend {
        async fn open(&self, _camera_id: &str, _address: &str) -> Result<Box<dyn CaptureSource>> {
            Ok(Box::new(GatedSource {
                gate: self.gate.clone(),
                entered: self.entered.clone(),
            }))
        }
    }

    #[derive(Clone, Copy)]
    enum Kind {
        Counting,
        Finite(usize),
        Flaky,
        Refuse,
    }

    struct FakeBackend {
        kind: Kind,
        opens: AtomicUsize,
    }

    impl FakeBackend {
        fn new(kind: Kind) -> Arc<Self> {
            Arc::new(Self {
                kind,
                opens: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl CaptureBackend for FakeBackend {
        async fn open(&self, camera_id: &str, _address: &str) -> Result<Box<dyn CaptureSource>> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            match self.kind {
                Kind::Counting => Ok(Box::new(CountingSource { next: 0 })),
                Kind::Finite(left) => Ok(Box::new(FiniteSource { left })),
                Kind::Flaky => Ok(Box::new(FlakySource { step: 0 })),
                Kind::Refuse => Err(Error::Capture {
                    camera_id: camera_id.to_string(),
                    message: "connection refused".to_string(),
                }),
            }
        }
    }

    fn test_config() -> StreamConfig {
        StreamConfig {
            target_fps: 200,
            read_retry_delay: Duration::from_millis(1),
            open_timeout: Duration::from_secs(1),
            settle_delay: Duration::from_millis(5),
        }
    }

    fn camera(id: &str) -> CameraEntry {
        CameraEntry {
            camera_id: id.to_string(),
            name: format!("Camera {}", id),
            url: String::new(),
            rtsp_url: Some(format!("rtsp://10.0.0.1/{}", id)),
            image_path: None,
        }
    }

    fn manager(
        ids: &[&str],
        backend: Arc<FakeBackend>,
    ) -> (StreamManager, mpsc::UnboundedReceiver<SinkEvent>) {
        let (sink, rx) = event_sink::channel();
        let notifier = Arc::new(ConnectionNotifier::new(Arc::new(sink)));
        let cameras: Vec<CameraEntry> = ids.iter().map(|id| camera(id)).collect();
        (StreamManager::new(&cameras, backend, notifier, test_config()), rx)
    }

    async fn wait_for_state(stream: &CameraStream, state: StreamState) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while stream.state() != state {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("stream never reached {:?}, is {:?}", state, stream.state()));
    }

    async fn wait_for_frames(stream: &CameraStream, count: u64) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while stream.status().frames_delivered < count {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("frames should arrive");
    }

    fn camera_events(rx: &mut mpsc::UnboundedReceiver<SinkEvent>) -> Vec<(String, bool)> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let SinkEvent::CameraConnectivity { camera_id, connected } = event {
                out.push((camera_id, connected));
            }
        }
        out
    }

    #[tokio::test]
    async fn test_start_streams_and_reports_up() {
        let (manager, mut rx) = manager(&["cam-1"], FakeBackend::new(Kind::Counting));
        manager.start_all();

        let stream = manager.get("cam-1").unwrap();
        wait_for_state(&stream, StreamState::Streaming).await;
        wait_for_frames(&stream, 3).await;
        assert!(stream.latest_frame().is_some());
        assert_eq!(camera_events(&mut rx), vec![("cam-1".to_string(), true)]);

        manager.dispose_all().await;
    }

    #[tokio::test]
    async fn test_subscriber_sees_latest_frame_only() {
        let (manager, _rx) = manager(&["cam-1"], FakeBackend::new(Kind::Counting));
        let stream = manager.get("cam-1").unwrap();
        let mut frames = stream.subscribe_frames();
        manager.start_all();

        frames.changed().await.unwrap();
        wait_for_frames(&stream, 5).await;
        let latest = frames.borrow_and_update().clone().unwrap();
        assert!(latest.seq >= 5);
        assert_eq!(stream.latest_frame().map(|f| f.seq), Some(latest.seq));

        manager.dispose_all().await;
    }

    #[tokio::test]
    async fn test_open_failure_goes_to_error_without_retry() {
        let backend = FakeBackend::new(Kind::Refuse);
        let (manager, mut rx) = manager(&["cam-1"], backend.clone());
        manager.start_all();

        let stream = manager.get("cam-1").unwrap();
        wait_for_state(&stream, StreamState::Error).await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(backend.opens.load(Ordering::SeqCst), 1);
        assert_eq!(stream.state(), StreamState::Error);
        assert!(stream.status().last_error.is_some());
        assert_eq!(camera_events(&mut rx), vec![("cam-1".to_string(), false)]);
    }

    #[tokio::test]
    async fn test_closed_source_ends_in_error() {
        let (manager, mut rx) = manager(&["cam-1"], FakeBackend::new(Kind::Finite(3)));
        manager.start_all();

        let stream = manager.get("cam-1").unwrap();
        wait_for_state(&stream, StreamState::Error).await;
        assert_eq!(stream.status().frames_delivered, 3);
        assert_eq!(
            camera_events(&mut rx),
            vec![("cam-1".to_string(), true), ("cam-1".to_string(), false)]
        );
    }

    #[tokio::test]
    async fn test_transient_read_failures_keep_session() {
        let (manager, _rx) = manager(&["cam-1"], FakeBackend::new(Kind::Flaky));
        manager.start_all();

        let stream = manager.get("cam-1").unwrap();
        wait_for_frames(&stream, 5).await;
        assert_eq!(stream.state(), StreamState::Streaming);
        manager.dispose_all().await;
    }

    #[tokio::test]
    async fn test_no_frames_after_pause() {
        let (manager, _rx) = manager(&["cam-1"], FakeBackend::new(Kind::Counting));
        manager.start_all();
        let stream = manager.get("cam-1").unwrap();
        wait_for_frames(&stream, 2).await;

        assert_eq!(manager.pause("cam-1").unwrap(), StreamState::Paused);
        let frozen = stream.status().frames_delivered;
        let frozen_seq = stream.latest_frame().map(|f| f.seq);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(stream.status().frames_delivered, frozen);
        assert_eq!(stream.latest_frame().map(|f| f.seq), frozen_seq);
        assert_eq!(stream.state(), StreamState::Paused);
    }

    #[tokio::test]
    async fn test_pause_during_pending_read_discards_frame() {
        let gate = Arc::new(Semaphore::new(1));
        let entered = Arc::new(AtomicUsize::new(0));
        let (sink, _rx) = event_sink::channel();
        let notifier = Arc::new(ConnectionNotifier::new(Arc::new(sink)));
        let manager = StreamManager::new(
            &[camera("cam-1")],
            Arc::new(GatedBackend {
                gate: gate.clone(),
                entered: entered.clone(),
            }),
            notifier,
            test_config(),
        );
        manager.start_all();
        let stream = manager.get("cam-1").unwrap();
        wait_for_frames(&stream, 1).await;

        // second read is blocked on the gate
        tokio::time::timeout(Duration::from_secs(2), async {
            while entered.load(Ordering::SeqCst) < 2 {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("second read should start");

        assert_eq!(manager.pause("cam-1").unwrap(), StreamState::Paused);
        let frozen_seq = stream.latest_frame().map(|f| f.seq);
        gate.add_permits(10);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(stream.status().frames_delivered, 1);
        assert_eq!(stream.latest_frame().map(|f| f.seq), frozen_seq);
        assert_eq!(stream.latest_frame().map(|f| f.data.as_ref().clone()), Some(vec![1]));
        assert_eq!(stream.state(), StreamState::Paused);
    }

    #[tokio::test]
    async fn test_resume_after_pause() {
        let backend = FakeBackend::new(Kind::Counting);
        let (manager, _rx) = manager(&["cam-1"], backend.clone());
        manager.start_all();
        let stream = manager.get("cam-1").unwrap();
        wait_for_state(&stream, StreamState::Streaming).await;

        manager.pause("cam-1").unwrap();
        let before = stream.status().frames_delivered;
        manager.resume("cam-1").unwrap();
        wait_for_state(&stream, StreamState::Streaming).await;
        wait_for_frames(&stream, before + 2).await;
        assert_eq!(backend.opens.load(Ordering::SeqCst), 2);

        manager.dispose_all().await;
    }

    #[tokio::test]
    async fn test_reconnect_isolated_per_camera() {
        let (manager, _rx) = manager(&["cam-a", "cam-b"], FakeBackend::new(Kind::Counting));
        manager.start_all();
        let a = manager.get("cam-a").unwrap();
        let b = manager.get("cam-b").unwrap();
        wait_for_frames(&a, 2).await;
        wait_for_frames(&b, 2).await;

        manager.pause("cam-a").unwrap();
        let b_before = b.status().frames_delivered;
        wait_for_frames(&b, b_before + 5).await;
        assert_eq!(b.state(), StreamState::Streaming);

        assert_eq!(manager.reconnect("cam-a").await.unwrap(), StreamState::Connecting);
        wait_for_state(&a, StreamState::Streaming).await;
        assert_eq!(b.state(), StreamState::Streaming);

        manager.dispose_all().await;
    }

    #[tokio::test]
    async fn test_reconnect_from_error() {
        let (manager, _rx) = manager(&["cam-1"], FakeBackend::new(Kind::Finite(1)));
        manager.start_all();
        let stream = manager.get("cam-1").unwrap();
        wait_for_state(&stream, StreamState::Error).await;

        stream.reconnect().await;
        wait_for_frames(&stream, 2).await;
        wait_for_state(&stream, StreamState::Error).await;
    }

    #[tokio::test]
    async fn test_dispose_is_terminal_and_idempotent() {
        let backend = FakeBackend::new(Kind::Counting);
        let (manager, _rx) = manager(&["cam-1"], backend.clone());
        manager.start_all();
        let stream = manager.get("cam-1").unwrap();
        wait_for_state(&stream, StreamState::Streaming).await;

        stream.dispose().await;
        stream.dispose().await;
        assert_eq!(stream.state(), StreamState::Disposed);
        assert!(stream.latest_frame().is_none());

        assert!(!stream.start());
        assert!(!stream.pause());
        assert!(!stream.resume());
        assert!(!stream.reconnect().await);
        assert_eq!(stream.state(), StreamState::Disposed);
        assert_eq!(backend.opens.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_address_goes_to_error() {
        let (sink, _rx) = event_sink::channel();
        let notifier = Arc::new(ConnectionNotifier::new(Arc::new(sink)));
        let mut entry = camera("cam-1");
        entry.rtsp_url = None;
        let manager = StreamManager::new(
            &[entry],
            FakeBackend::new(Kind::Counting),
            notifier,
            test_config(),
        );
        manager.start_all();

        let stream = manager.get("cam-1").unwrap();
        wait_for_state(&stream, StreamState::Error).await;
    }

    #[test]
    fn test_unknown_camera_is_not_found() {
        let (manager, _rx) = manager(&["cam-1"], FakeBackend::new(Kind::Counting));
        assert!(matches!(manager.get("cam-9"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_frame_interval() {
        assert_eq!(StreamConfig::default().frame_interval(), Duration::from_millis(40));
    }
}
