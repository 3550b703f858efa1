//! Shared data models
//!
//! Wire types received from the detection source and the derived
//! classified/resolved events handed to the event sink.

use chrono::{Local, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Fixed layout of `absTime`: `yyyyMMddHHmmssfff`
pub const ABS_TIME_FORMAT: &str = "%Y%m%d%H%M%S%3f";

const ABS_TIME_LEN: usize = 17;

/// One plate read as reported by the upstream recogniser.
///
/// Field names are fixed by the upstream contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RawDetection {
    #[serde(rename = "absTime", default)]
    pub abs_time: String,
    #[serde(rename = "placa", default)]
    pub plate: String,
    #[serde(rename = "lane", default)]
    pub lane: String,
    #[serde(rename = "imageUrl", default)]
    pub image_url: String,
}

impl RawDetection {
    /// Identity used to suppress duplicate delivery
    pub fn dedup_key(&self) -> String {
        format!("{}{}", self.plate, self.abs_time)
    }

    /// Detection time, or ingestion wall-clock time when `absTime` is malformed
    pub fn timestamp(&self) -> NaiveDateTime {
        self.timestamp_or(Local::now().naive_local())
    }

    /// Detection time, or `fallback` when `absTime` is malformed
    pub fn timestamp_or(&self, fallback: NaiveDateTime) -> NaiveDateTime {
        parse_abs_time(&self.abs_time).unwrap_or(fallback)
    }
}

/// Parse an `absTime` token. Returns `None` unless the token is exactly
/// seventeen digits forming a valid date-time.
pub fn parse_abs_time(token: &str) -> Option<NaiveDateTime> {
    let token = token.trim();
    if token.len() != ABS_TIME_LEN || !token.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    NaiveDateTime::parse_from_str(token, ABS_TIME_FORMAT).ok()
}

/// Physical traffic direction of a detection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaneRole {
    Entrance,
    Exit,
    None,
}

/// Where the detection is listed besides the lane panels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplaySlot {
    Sidebar,
    None,
}

/// Detection after lane/slot classification
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassifiedEvent {
    pub plate: String,
    pub abs_time: String,
    pub timestamp: NaiveDateTime,
    /// Lane index used for the role decision (from `lane` or the URL marker)
    pub lane_index: Option<i64>,
    pub lane_role: LaneRole,
    pub display_slot: DisplaySlot,
    /// Highest priority first
    pub candidate_image_urls: Vec<String>,
}

impl ClassifiedEvent {
    /// Label shown next to sidebar entries: `Camara{n}`, where `n` is the
    /// resolved `lane_index` (the `lane` field, or the URL marker when
    /// `lane` is not numeric), not the raw `lane` string.
    pub fn camera_label(&self) -> String {
        match self.lane_index {
            Some(lane) => format!("Camara{}", lane),
            None => "Camara".to_string(),
        }
    }
}

/// Classified event with its evidence image
#[derive(Debug, Clone)]
pub struct ResolvedEvent {
    pub event: ClassifiedEvent,
    pub image: Vec<u8>,
    /// Candidate URL that produced `image`
    pub image_url: String,
}

/// API response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
        }
    }
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_sec: u64,
    pub api_connected: bool,
}
