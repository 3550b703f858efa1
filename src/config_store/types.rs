//! ConfigStore types

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default poll interval in seconds
pub const DEFAULT_POLLING_INTERVAL_SECS: u64 = 5;

/// Default number of live streams
pub const DEFAULT_MAX_STREAMS: i32 = 2;

/// Token in `ImagePath` replaced with the current date (`%Y%m%d`)
pub const DATE_TOKEN: &str = "YYYYMMDD";

/// Contents of `appsettings.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct AppSettings {
    /// Detection list endpoint
    pub api_url: String,
    /// Base for relative image paths
    pub api_base_url: String,
    pub polling_interval_seconds: u64,
    /// Live streams to open; zero or less means every enabled camera
    pub max_streams: i32,
    /// Plate recogniser started alongside the dashboard
    pub external_executable_path: String,
    pub cameras: Vec<CameraSettings>,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            api_url: String::new(),
            api_base_url: String::new(),
            polling_interval_seconds: DEFAULT_POLLING_INTERVAL_SECS,
            max_streams: DEFAULT_MAX_STREAMS,
            external_executable_path: String::new(),
            cameras: Vec::new(),
        }
    }
}

/// One `Cameras[]` entry as written in the settings file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct CameraSettings {
    pub name: String,
    /// Camera web UI
    pub url: String,
    pub rtsp_url: String,
    pub image_path: Option<String>,
    pub enabled: bool,
}

/// Camera selected for streaming
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CameraEntry {
    /// `cam-{n}`, n = 1-based position in the settings list
    pub camera_id: String,
    pub name: String,
    pub url: String,
    pub rtsp_url: Option<String>,
    /// Snapshot folder with the date token already substituted
    pub image_path: Option<PathBuf>,
}
