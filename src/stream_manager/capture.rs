//! Capture backends
//!
//! A backend opens a camera address and yields JPEG frames. The default
//! backend runs `ffmpeg` and splits its MJPEG pipe output on SOI/EOI markers.

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Default time allowed for the first frame to arrive
pub const DEFAULT_OPEN_TIMEOUT: Duration = Duration::from_secs(10);

const READ_CHUNK: usize = 64 * 1024;

/// Outcome of one frame read
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameRead {
    Frame(Vec<u8>),
    /// Nothing decodable this time
    Empty,
    /// Transient read error; the pump retries
    Failed(String),
    /// Source ended; the session is over
    Closed(String),
}

/// An open capture source
#[async_trait]
pub trait CaptureSource: Send {
    async fn read_frame(&mut self) -> FrameRead;

    /// Release the underlying resources
    async fn close(&mut self) {}
}

/// Opens capture sources
#[async_trait]
pub trait CaptureBackend: Send + Sync {
    async fn open(&self, camera_id: &str, address: &str) -> Result<Box<dyn CaptureSource>>;
}

/// Spawns one `ffmpeg` process per session
pub struct FfmpegBackend {
    program: String,
    open_timeout: Duration,
}

impl FfmpegBackend {
    pub fn new(open_timeout: Duration) -> Self {
        Self {
            program: "ffmpeg".to_string(),
            open_timeout,
        }
    }

    /// Use a specific ffmpeg binary
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// `ffmpeg -version` first line
    pub async fn check_available(&self) -> Result<String> {
        let output = Command::new(&self.program)
            .arg("-version")
            .output()
            .await
            .map_err(|e| Error::Internal(format!("ffmpeg not found: {}", e)))?;

        if !output.status.success() {
            return Err(Error::Internal("ffmpeg version check failed".to_string()));
        }

        let version = String::from_utf8_lossy(&output.stdout);
        Ok(version.lines().next().unwrap_or("unknown").to_string())
    }
}

impl Default for FfmpegBackend {
    fn default() -> Self {
        Self::new(DEFAULT_OPEN_TIMEOUT)
    }
}

#[async_trait]
impl CaptureBackend for FfmpegBackend {
    async fn open(&self, camera_id: &str, address: &str) -> Result<Box<dyn CaptureSource>> {
        let capture_error = |message: String| Error::Capture {
            camera_id: camera_id.to_string(),
            message,
        };

        // Child is killed when the source (or this future) is dropped
        let mut child = Command::new(&self.program)
            .args([
                "-rtsp_transport", "tcp",
                "-i", address,
                "-f", "image2pipe",
                "-vcodec", "mjpeg",
                "-loglevel", "error",
                "-",
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| capture_error(format!("ffmpeg spawn failed: {}", e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| capture_error("ffmpeg stdout unavailable".to_string()))?;

        let (tx, frames) = watch::channel(PipeState::default());
        let reader = tokio::spawn(read_pipe(stdout, tx));
        let mut source = FfmpegSource {
            child,
            frames,
            reader,
        };

        // Wait on a clone so the first frame stays unseen for the pump
        let mut opening = source.frames.clone();
        let opened = tokio::time::timeout(self.open_timeout, async move {
            opening
                .wait_for(|s| s.frame.is_some() || s.closed.is_some())
                .await
                .map(|s| s.closed.clone())
                .unwrap_or_else(|_| Some("ffmpeg reader stopped".to_string()))
        })
        .await;

        match opened {
            Ok(None) => {
                tracing::debug!(camera_id = %camera_id, "ffmpeg stream opened");
                Ok(Box::new(source))
            }
            Ok(Some(reason)) => {
                source.close().await;
                Err(capture_error(format!("stream did not open: {}", reason)))
            }
            Err(_) => {
                source.close().await;
                Err(capture_error(format!(
                    "no frame within {}s",
                    self.open_timeout.as_secs()
                )))
            }
        }
    }
}

/// Newest decoded frame of an ffmpeg pipe
#[derive(Debug, Default)]
struct PipeState {
    frame: Option<Vec<u8>>,
    /// Set once the pipe is done
    closed: Option<String>,
}

/// Drain ffmpeg stdout, publishing only the newest complete frame.
/// Frames the consumer has not picked up yet are overwritten.
async fn read_pipe(mut stdout: ChildStdout, tx: watch::Sender<PipeState>) {
    let mut splitter = JpegSplitter::default();
    let mut chunk = vec![0u8; READ_CHUNK];

    let reason = loop {
        match stdout.read(&mut chunk).await {
            Ok(0) => break "ffmpeg output ended".to_string(),
            Ok(n) => {
                splitter.push(&chunk[..n]);
                if let Some(frame) = splitter.latest_frame() {
                    tx.send_modify(|state| state.frame = Some(frame));
                }
            }
            Err(e) => break format!("ffmpeg pipe error: {}", e),
        }
    };
    tx.send_modify(|state| state.closed = Some(reason));
}

struct FfmpegSource {
    child: Child,
    frames: watch::Receiver<PipeState>,
    reader: JoinHandle<()>,
}

#[async_trait]
impl CaptureSource for FfmpegSource {
    /// Waits for a frame newer than the last one returned
    async fn read_frame(&mut self) -> FrameRead {
        if self.frames.changed().await.is_err() {
            return FrameRead::Closed("ffmpeg reader stopped".to_string());
        }
        let state = self.frames.borrow_and_update();
        if let Some(reason) = &state.closed {
            return FrameRead::Closed(reason.clone());
        }
        match &state.frame {
            Some(frame) => FrameRead::Frame(frame.clone()),
            None => FrameRead::Empty,
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.child.kill().await {
            tracing::debug!(error = %e, "ffmpeg already exited");
        }
        self.reader.abort();
    }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Largest image the splitter buffers while waiting for an EOI marker
pub const MAX_FRAME_BYTES: usize = 8 * 1024 * 1024;

/// Splits a concatenated JPEG byte stream into whole images
#[derive(Debug)]
pub struct JpegSplitter {
    buf: Vec<u8>,
    /// Offset already searched for an EOI; `buf` starts with an SOI when non-zero
    scanned: usize,
    max_frame: usize,
}

impl Default for JpegSplitter {
    fn default() -> Self {
        Self::with_max_frame(MAX_FRAME_BYTES)
    }
}

impl JpegSplitter {
    pub fn with_max_frame(max_frame: usize) -> Self {
        Self {
            buf: Vec::new(),
            scanned: 0,
            max_frame,
        }
    }

    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Next complete image (SOI through EOI). Bytes before an SOI are discarded.
    ///
    /// An image that grows past the size limit without an EOI is dropped and
    /// the splitter resyncs on the next SOI.
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        loop {
            let Some(start) = find_marker(&self.buf, 0, 0xD8) else {
                self.discard_all();
                return None;
            };
            if start > 0 {
                self.buf.drain(..start);
                self.scanned = 0;
            }

            if let Some(end) = find_marker(&self.buf, self.scanned.max(2), 0xD9) {
                self.scanned = 0;
                return Some(self.buf.drain(..end + 2).collect());
            }

            if self.buf.len() <= self.max_frame {
                // the last byte may be the first half of an EOI
                self.scanned = self.buf.len().saturating_sub(1).max(2);
                return None;
            }

            tracing::warn!(
                buffered = self.buf.len(),
                limit = self.max_frame,
                "JPEG frame without EOI exceeds limit, resyncing"
            );
            self.scanned = 0;
            match find_marker(&self.buf, 2, 0xD8) {
                Some(next) => {
                    self.buf.drain(..next);
                }
                None => {
                    self.discard_all();
                    return None;
                }
            }
        }
    }

    /// Newest complete image; older complete images are discarded
    pub fn latest_frame(&mut self) -> Option<Vec<u8>> {
        let mut latest = None;
        while let Some(frame) = self.next_frame() {
            latest = Some(frame);
        }
        latest
    }

    /// Drop everything but a trailing 0xFF, which may start an SOI
    fn discard_all(&mut self) {
        let keep = usize::from(self.buf.last() == Some(&0xFF));
        let drop_to = self.buf.len() - keep;
        self.buf.drain(..drop_to);
        self.scanned = 0;
    }

    #[cfg(test)]
    fn buffered(&self) -> usize {
        self.buf.len()
    }
}

fn find_marker(buf: &[u8], from: usize, marker: u8) -> Option<usize> {
    if buf.len() < from + 2 {
        return None;
    }
    buf[from..]
        .windows(2)
        .position(|w| w[0] == 0xFF && w[1] == marker)
        .map(|pos| pos + from)
}
