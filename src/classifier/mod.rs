//! Classifier - Lane/Slot Routing of Detections
//!
//! ## Responsibilities
//!
//! - Reject unreadable plates
//! - Map a detection to an entrance/exit lane and a display slot
//! - Compute evidence image candidates (processed image first, raw capture as fallback)
//!
//! Pure and synchronous: no I/O, same input always gives the same output.

use crate::models::{ClassifiedEvent, DisplaySlot, LaneRole, RawDetection};
use chrono::NaiveDateTime;

/// Folder holding the annotated ("processed") variant of a capture
pub const PROCESSED_FOLDER: &str = "Procesado";

/// Suffix marking the raw, unprocessed capture stream of a camera
const RAW_SUFFIX: char = 'X';

/// Camera segment prefixes (both spellings are deployed)
const CAMERA_PREFIXES: [&str; 2] = ["CAMARA", "CAMERA"];

/// Lanes that map to a role
const MAX_LANE: i64 = 4;

/// Camera markers scanned in image URLs
const MAX_URL_CAMERA: i64 = 8;

/// Parsed camera path segment such as `Camara2X`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CameraSegment {
    index: i64,
    raw: bool,
}

/// Classify a detection.
///
/// `received_at` is the ingestion time, used as the timestamp when `absTime`
/// does not parse. Returns `None` when the detection must not reach the event sink: the plate is
/// empty/`unknown`, or it has neither a lane role nor a display slot.
pub fn classify(detection: &RawDetection, received_at: NaiveDateTime) -> Option<ClassifiedEvent> {
    let plate = detection.plate.trim();
    if plate.is_empty() || plate.eq_ignore_ascii_case("unknown") {
        tracing::debug!(plate = %detection.plate, "Discarded: empty or unknown plate");
        return None;
    }

    let segments = path_segments(&detection.image_url);
    let camera = segments.iter().find_map(|s| parse_camera_segment(s));

    let display_slot = match camera {
        Some(CameraSegment { index, raw: true }) if (1..=MAX_LANE).contains(&index) => {
            DisplaySlot::Sidebar
        }
        _ => DisplaySlot::None,
    };

    let lane_index = parse_lane(&detection.lane).or(camera.map(|c| c.index));
    let lane_role = lane_role(lane_index);

    if lane_role == LaneRole::None && display_slot == DisplaySlot::None {
        tracing::debug!(
            plate = %plate,
            lane = %detection.lane,
            url = %detection.image_url,
            "Discarded: no lane role and no display slot"
        );
        return None;
    }

    Some(ClassifiedEvent {
        plate: plate.to_string(),
        abs_time: detection.abs_time.clone(),
        timestamp: detection.timestamp_or(received_at),
        lane_index,
        lane_role,
        display_slot,
        candidate_image_urls: candidate_image_urls(&detection.image_url),
    })
}

/// Role for a lane index: odd lanes are entrances, even lanes exits
pub fn lane_role(lane_index: Option<i64>) -> LaneRole {
    match lane_index {
        Some(n) if (1..=MAX_LANE).contains(&n) => {
            if n % 2 == 1 {
                LaneRole::Entrance
            } else {
                LaneRole::Exit
            }
        }
        _ => LaneRole::None,
    }
}

/// Evidence image URLs in priority order.
///
/// - processed-folder URL: itself only
/// - raw capture URL (`.../Camara2X/<date>/shot.jpg`): the processed sibling
///   (`.../Camara2/<date>/Procesado/shot.jpg`) first, then the raw URL
/// - anything else: itself only
pub fn candidate_image_urls(image_url: &str) -> Vec<String> {
    let url = image_url.trim();
    if url.is_empty() {
        return Vec::new();
    }

    let normalized = url.replace('\\', "/");
    let segments: Vec<&str> = normalized.split('/').collect();

    let in_processed = segments
        .iter()
        .any(|s| s.eq_ignore_ascii_case(PROCESSED_FOLDER));
    if in_processed {
        return vec![url.to_string()];
    }

    match processed_sibling(&segments) {
        Some(primary) => vec![primary, url.to_string()],
        None => vec![url.to_string()],
    }
}

fn processed_sibling(segments: &[&str]) -> Option<String> {
    let camera_pos = segments.iter().position(|s| {
        matches!(parse_camera_segment(s), Some(CameraSegment { raw: true, .. }))
    })?;

    // A file name must follow the camera folder
    let file_pos = segments.len() - 1;
    if file_pos <= camera_pos || segments[file_pos].is_empty() {
        return None;
    }

    let mut out: Vec<String> = Vec::with_capacity(segments.len() + 1);
    for (i, segment) in segments.iter().enumerate() {
        if i == camera_pos {
            out.push(segment[..segment.len() - RAW_SUFFIX.len_utf8()].to_string());
        } else if i == file_pos {
            out.push(PROCESSED_FOLDER.to_string());
            out.push(segment.to_string());
        } else {
            out.push(segment.to_string());
        }
    }
    Some(out.join("/"))
}

/// Any integer counts as parsed, even outside the lane range; only
/// non-numeric input falls back to the URL marker.
fn parse_lane(lane: &str) -> Option<i64> {
    lane.trim().parse::<i64>().ok()
}

fn path_segments(image_url: &str) -> Vec<String> {
    image_url
        .replace('\\', "/")
        .split('/')
        .map(str::to_string)
        .collect()
}

/// `Camara3`, `camera3X`, ... -> index and raw flag (case-insensitive)
fn parse_camera_segment(segment: &str) -> Option<CameraSegment> {
    let upper = segment.to_ascii_uppercase();
    let rest = CAMERA_PREFIXES
        .iter()
        .find_map(|prefix| upper.strip_prefix(prefix))?;

    let (digits, raw) = match rest.strip_suffix(RAW_SUFFIX) {
        Some(digits) => (digits, true),
        None => (rest, false),
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let index: i64 = digits.parse().ok()?;
    if !(1..=MAX_URL_CAMERA).contains(&index) {
        return None;
    }
    Some(CameraSegment { index, raw })
}
