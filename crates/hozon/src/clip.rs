//! Clip types, run windows and object key derivation

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Milliseconds since the Unix epoch.
pub type Timestamp = i64;

/// Default camera name for clips whose device record carries none
pub const UNKNOWN_CAMERA: &str = "unknown";

/// Default MIME type for clips whose device record carries none
pub const DEFAULT_MIME_TYPE: &str = "video/mp4";

/// Current wall-clock time in milliseconds.
pub fn now_ms() -> Timestamp {
    Utc::now().timestamp_millis()
}

/// Render a timestamp as RFC 3339 for log lines.
pub fn format_ms(ts: Timestamp) -> String {
    DateTime::<Utc>::from_timestamp_millis(ts)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| format!("{}ms", ts))
}

/// Half-open time window `[start_ms, end_ms)` covered by one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RunWindow {
    pub start_ms: Timestamp,
    pub end_ms: Timestamp,
}

impl RunWindow {
    /// Build a window. An end before the start collapses to an empty window
    /// at `start_ms` so a skewed clock never yields a negative range.
    pub fn new(start_ms: Timestamp, end_ms: Timestamp) -> Self {
        Self {
            start_ms,
            end_ms: end_ms.max(start_ms),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.end_ms <= self.start_ms
    }

    pub fn contains(&self, ts: Timestamp) -> bool {
        ts >= self.start_ms && ts < self.end_ms
    }

    pub fn duration_ms(&self) -> i64 {
        self.end_ms - self.start_ms
    }
}

impl fmt::Display for RunWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", format_ms(self.start_ms), format_ms(self.end_ms))
    }
}

/// A clip record as reported by the device, before normalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawClip {
    pub id: String,
    #[serde(default)]
    pub camera_name: Option<String>,
    pub start_time: Timestamp,
    pub end_time: Timestamp,
    #[serde(default)]
    pub mime_type: Option<String>,
}

impl RawClip {
    pub fn new(id: &str, camera_name: &str, start_time: Timestamp, end_time: Timestamp) -> Self {
        Self {
            id: id.to_string(),
            camera_name: Some(camera_name.to_string()),
            start_time,
            end_time,
            mime_type: Some(DEFAULT_MIME_TYPE.to_string()),
        }
    }

    /// Camera name used for filtering: the normalized name, lower-cased.
    pub fn camera_key(&self) -> String {
        normalized_camera(self.camera_name.as_deref()).to_lowercase()
    }
}

fn normalized_camera(name: Option<&str>) -> &str {
    match name {
        Some(name) if !name.trim().is_empty() => name,
        _ => UNKNOWN_CAMERA,
    }
}

/// A normalized clip ready for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClipMetadata {
    pub id: String,
    pub camera_name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub mime_type: String,
}

impl ClipMetadata {
    /// Normalize a device record. Returns `None` when a timestamp is outside
    /// the representable calendar range.
    pub fn from_raw(raw: RawClip) -> Option<Self> {
        let start_time = DateTime::<Utc>::from_timestamp_millis(raw.start_time)?;
        let end_time = DateTime::<Utc>::from_timestamp_millis(raw.end_time)?;
        let camera_name = normalized_camera(raw.camera_name.as_deref()).to_string();
        let mime_type = match raw.mime_type {
            Some(mime) if !mime.trim().is_empty() => mime,
            _ => DEFAULT_MIME_TYPE.to_string(),
        };

        Some(Self {
            id: raw.id,
            camera_name,
            start_time,
            end_time,
            mime_type,
        })
    }

    pub fn start_ms(&self) -> Timestamp {
        self.start_time.timestamp_millis()
    }

    pub fn end_ms(&self) -> Timestamp {
        self.end_time.timestamp_millis()
    }

    /// Deterministic object key for this clip.
    pub fn object_key(&self) -> String {
        object_key(&self.camera_name, self.start_time, &self.mime_type)
    }
}

/// Hierarchical object key: `camera/YYYY/MM/DD/HH-mm-ss.<ext>` in UTC.
pub fn object_key(camera_name: &str, start_time: DateTime<Utc>, mime_type: &str) -> String {
    format!(
        "{}/{}.{}",
        camera_name,
        start_time.format("%Y/%m/%d/%H-%M-%S"),
        extension_for(mime_type)
    )
}

/// File extension for a clip MIME type. Unrecognized types keep `mp4`.
pub fn extension_for(mime_type: &str) -> &'static str {
    let essence = mime_type.split(';').next().unwrap_or("").trim();
    match essence.to_ascii_lowercase().as_str() {
        "video/quicktime" => "mov",
        "video/x-matroska" => "mkv",
        "video/webm" => "webm",
        "video/mp2t" => "ts",
        _ => "mp4",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn clip(camera: &str, start: DateTime<Utc>) -> ClipMetadata {
        ClipMetadata {
            id: "c1".to_string(),
            camera_name: camera.to_string(),
            start_time: start,
            end_time: start + chrono::Duration::seconds(30),
            mime_type: DEFAULT_MIME_TYPE.to_string(),
        }
    }

    #[test]
    fn test_object_key_layout() {
        let start = Utc.with_ymd_and_hms(2024, 3, 7, 4, 5, 9).unwrap();
        let key = clip("Front Door", start).object_key();
        assert_eq!(key, "Front Door/2024/03/07/04-05-09.mp4");
    }

    #[test]
    fn test_object_key_is_deterministic() {
        let start = Utc.with_ymd_and_hms(2023, 12, 31, 23, 59, 59).unwrap();
        let a = clip("back", start);
        let mut b = a.clone();
        b.id = "other-id".to_string();
        b.end_time = start + chrono::Duration::minutes(5);

        assert_eq!(a.object_key(), a.object_key());
        assert_eq!(a.object_key(), b.object_key());
    }

    #[test]
    fn test_object_key_ignores_sub_second_precision() {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let a = clip("side", base + chrono::Duration::milliseconds(10));
        let b = clip("side", base + chrono::Duration::milliseconds(990));
        assert_eq!(a.object_key(), b.object_key());
    }

    #[test]
    fn test_extension_for() {
        assert_eq!(extension_for("video/mp4"), "mp4");
        assert_eq!(extension_for("video/quicktime"), "mov");
        assert_eq!(extension_for("Video/WebM; codecs=vp9"), "webm");
        assert_eq!(extension_for("application/octet-stream"), "mp4");
    }

    #[test]
    fn test_normalize_defaults() {
        let raw = RawClip {
            id: "x".to_string(),
            camera_name: None,
            start_time: 1_700_000_000_000,
            end_time: 1_700_000_030_000,
            mime_type: Some("  ".to_string()),
        };
        let clip = ClipMetadata::from_raw(raw).unwrap();
        assert_eq!(clip.camera_name, UNKNOWN_CAMERA);
        assert_eq!(clip.mime_type, DEFAULT_MIME_TYPE);
        assert_eq!(clip.start_ms(), 1_700_000_000_000);
        assert_eq!(clip.end_ms(), 1_700_000_030_000);
    }

    #[test]
    fn test_normalize_rejects_out_of_range() {
        let raw = RawClip::new("x", "front", i64::MAX, i64::MAX);
        assert!(ClipMetadata::from_raw(raw).is_none());
    }

    #[test]
    fn test_raw_clip_json_shape() {
        let json = r#"{"id":"a","cameraName":"Front","startTime":1,"endTime":2}"#;
        let raw: RawClip = serde_json::from_str(json).unwrap();
        assert_eq!(raw.camera_name.as_deref(), Some("Front"));
        assert_eq!(raw.mime_type, None);
        assert_eq!(raw.camera_key(), "front");
    }

    #[test]
    fn test_run_window() {
        let w = RunWindow::new(100, 50);
        assert!(w.is_empty());
        assert_eq!(w.end_ms, 100);

        let w = RunWindow::new(100, 200);
        assert!(w.contains(100));
        assert!(!w.contains(200));
        assert_eq!(w.duration_ms(), 100);
    }
}
