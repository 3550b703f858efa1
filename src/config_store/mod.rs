//! ConfigStore - Dashboard Settings
//!
//! ## Responsibilities
//!
//! - Load `appsettings.json` (missing file = defaults)
//! - Apply environment overrides
//! - Select the cameras to stream (enabled, capped by `MaxStreams`)
//!
//! ## Design Principles
//!
//! - Loaded once at startup; components receive already-validated values
//! - Camera ids are positional so they survive enabling/disabling others

mod types;

pub use types::*;

use crate::error::{Error, Result};
use chrono::{Local, NaiveDate};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default settings file name
pub const DEFAULT_SETTINGS_FILE: &str = "appsettings.json";

/// ConfigStore instance
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
    settings: AppSettings,
    cameras: Vec<CameraEntry>,
}

impl ConfigStore {
    /// Load settings from `path`, apply environment overrides and select cameras
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut settings = read_settings(&path)?;
        apply_env_overrides(&mut settings);
        Ok(Self::from_settings(path, settings, Local::now().date_naive()))
    }

    /// Build from already-parsed settings, resolving the date token against `today`
    pub fn from_settings(path: PathBuf, settings: AppSettings, today: NaiveDate) -> Self {
        let cameras = select_cameras(&settings, today);

        tracing::info!(
            path = %path.display(),
            configured = settings.cameras.len(),
            selected = cameras.len(),
            "Settings loaded"
        );

        Self {
            path,
            settings,
            cameras,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn settings(&self) -> &AppSettings {
        &self.settings
    }

    /// Cameras selected for streaming, in settings order
    pub fn cameras(&self) -> &[CameraEntry] {
        &self.cameras
    }

    pub fn camera(&self, camera_id: &str) -> Result<&CameraEntry> {
        self.cameras
            .iter()
            .find(|c| c.camera_id == camera_id)
            .ok_or_else(|| Error::NotFound(format!("Camera {} not found", camera_id)))
    }

    pub fn enabled_count(&self) -> usize {
        self.settings.cameras.iter().filter(|c| c.enabled).count()
    }

    pub fn total_count(&self) -> usize {
        self.settings.cameras.len()
    }

    pub fn polling_interval(&self) -> Duration {
        Duration::from_secs(self.settings.polling_interval_seconds.max(1))
    }

    /// Error unless both API URLs are present
    pub fn validate(&self) -> Result<()> {
        if self.settings.api_url.trim().is_empty() {
            return Err(Error::Config("ApiUrl is not configured".to_string()));
        }
        if self.settings.api_base_url.trim().is_empty() {
            return Err(Error::Config("ApiBaseUrl is not configured".to_string()));
        }
        Ok(())
    }
}

fn read_settings(path: &Path) -> Result<AppSettings> {
    let json = match std::fs::read_to_string(path) {
        Ok(json) => json,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!(path = %path.display(), "Settings file not found, using defaults");
            return Ok(AppSettings::default());
        }
        Err(e) => return Err(e.into()),
    };

    serde_json::from_str(&json)
        .map_err(|e| Error::Config(format!("Invalid settings file {}: {}", path.display(), e)))
}

fn apply_env_overrides(settings: &mut AppSettings) {
    if let Ok(url) = std::env::var("ANPR_API_URL") {
        settings.api_url = url;
    }
    if let Ok(url) = std::env::var("ANPR_API_BASE_URL") {
        settings.api_base_url = url;
    }
    if let Some(secs) = std::env::var("ANPR_POLL_INTERVAL_SECS")
        .ok()
        .and_then(|s| s.parse().ok())
    {
        settings.polling_interval_seconds = secs;
    }
}

/// Enabled cameras in settings order, truncated to `MaxStreams` when positive
pub fn select_cameras(settings: &AppSettings, today: NaiveDate) -> Vec<CameraEntry> {
    let date = today.format("%Y%m%d").to_string();

    let enabled = settings
        .cameras
        .iter()
        .enumerate()
        .filter(|(_, camera)| camera.enabled)
        .map(|(index, camera)| {
            let rtsp_url = non_empty(&camera.rtsp_url);
            if rtsp_url.is_none() {
                tracing::error!(camera = %camera.name, "Camera has no RtspUrl configured");
            }

            let image_path = camera
                .image_path
                .as_deref()
                .and_then(non_empty)
                .map(|p| PathBuf::from(p.replace(DATE_TOKEN, &date)));
            if let Some(path) = &image_path {
                tracing::info!(camera = %camera.name, path = %path.display(), "Snapshot folder");
            }

            CameraEntry {
                camera_id: format!("cam-{}", index + 1),
                name: camera.name.clone(),
                url: camera.url.clone(),
                rtsp_url,
                image_path,
            }
        });

    match usize::try_from(settings.max_streams) {
        Ok(max) if max > 0 => enabled.take(max).collect(),
        _ => enabled.collect(),
    }
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}
