//! SnapshotService - Local Placeholder Snapshots
//!
//! ## Responsibilities
//!
//! - Find the newest `*.jpg` in a camera's `ImagePath` folder
//! - Read it for display while the live stream is not delivering
//!
//! The recogniser writes captures with sortable names, so "newest" is the
//! lexicographically greatest file name.

use crate::config_store::CameraEntry;
use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use tokio::fs;

/// Snapshot file and its bytes
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub path: PathBuf,
    pub data: Vec<u8>,
}

/// SnapshotService instance
#[derive(Debug, Default, Clone)]
pub struct SnapshotService;

impl SnapshotService {
    pub fn new() -> Self {
        Self
    }

    /// Newest snapshot of `camera`, or `None` without a folder or image
    pub async fn latest(&self, camera: &CameraEntry) -> Result<Option<Snapshot>> {
        let Some(dir) = camera.image_path.as_deref() else {
            return Ok(None);
        };

        let Some(path) = newest_jpg(dir).await? else {
            tracing::debug!(camera_id = %camera.camera_id, dir = %dir.display(), "No snapshot found");
            return Ok(None);
        };

        let data = fs::read(&path).await?;
        tracing::debug!(
            camera_id = %camera.camera_id,
            path = %path.display(),
            size = data.len(),
            "Snapshot loaded"
        );
        Ok(Some(Snapshot { path, data }))
    }

    /// Like [`latest`](Self::latest) but a missing snapshot is `NotFound`
    pub async fn require_latest(&self, camera: &CameraEntry) -> Result<Snapshot> {
        self.latest(camera).await?.ok_or_else(|| {
            Error::NotFound(format!("No snapshot for camera {}", camera.camera_id))
        })
    }
}

/// Greatest `*.jpg` file name in `dir`. A missing folder yields `None`.
pub async fn newest_jpg(dir: &Path) -> Result<Option<PathBuf>> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let mut newest: Option<PathBuf> = None;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_jpg = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("jpg"))
            .unwrap_or(false);
        if !is_jpg || !entry.file_type().await?.is_file() {
            continue;
        }
        if newest.as_ref().map_or(true, |n| path.file_name() > n.file_name()) {
            newest = Some(path);
        }
    }
    Ok(newest)
}
