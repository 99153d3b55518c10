//! Record and payload types for pose recordings.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{SystemTime, UNIX_EPOCH};

/// Unique record identifier, assigned by the store and never reused.
pub type RecordId = i64;

/// Current wall-clock time in epoch milliseconds.
#[must_use]
pub fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis() as i64
}

/// Render an epoch-millisecond stamp as ISO-8601 / RFC 3339.
#[must_use]
pub fn format_timestamp_ms(ms: i64) -> String {
    DateTime::from_timestamp_millis(ms)
        .unwrap_or_default()
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Name given to recordings submitted without one.
pub const DEFAULT_RECORDING_NAME: &str = "live_capture";

/// Sampling rate assumed when estimating a recording's duration.
pub const ASSUMED_FPS: u32 = 30;

/// Approximate duration of `frame_count` frames at [`ASSUMED_FPS`].
///
/// This is an estimate, not a measurement: the capture side is assumed to
/// have sampled at a fixed rate.
#[must_use]
pub fn approx_duration_ms(frame_count: u32) -> u64 {
    u64::from(frame_count) * 1000 / u64::from(ASSUMED_FPS)
}

/// A persisted pose recording.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LandmarkRecord {
    /// Store-assigned identifier.
    pub id: RecordId,
    /// Owning user, absent for anonymous live-capture sessions.
    pub user_id: Option<String>,
    /// Human-readable label.
    pub name: String,
    /// Number of frames in the payload, computed at ingest.
    pub frame_count: u32,
    /// Opaque frames payload.
    pub landmarks: Value,
    /// Persistence timestamp in epoch milliseconds.
    ///
    /// Monotonic non-decreasing per store instance; the canonical sort key
    /// for retrieval, with ties broken by `id`.
    pub created_at_ms: i64,
}

impl LandmarkRecord {
    /// Persistence timestamp as a UTC datetime.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.created_at_ms).unwrap_or_default()
    }

    /// Persistence timestamp rendered as ISO-8601 / RFC 3339.
    #[must_use]
    pub fn timestamp(&self) -> String {
        format_timestamp_ms(self.created_at_ms)
    }

    /// Approximate recording duration, assuming [`ASSUMED_FPS`] sampling.
    #[must_use]
    pub fn duration_ms_approx(&self) -> u64 {
        approx_duration_ms(self.frame_count)
    }
}

/// A record as handed to the store, before `id` and timestamp assignment.
#[derive(Debug, Clone)]
pub struct NewRecord {
    /// Owning user, if any.
    pub user_id: Option<String>,
    /// Recording label.
    pub name: String,
    /// Number of frames in the payload.
    pub frame_count: u32,
    /// Opaque frames payload.
    pub landmarks: Value,
}

/// One client-submitted set of landmark frames to ingest.
#[derive(Debug, Clone, Deserialize)]
pub struct LandmarkBatch {
    /// Owning user, if any.
    #[serde(default)]
    pub user_id: Option<String>,
    /// Recording label; defaults to [`DEFAULT_RECORDING_NAME`].
    #[serde(default)]
    pub name: Option<String>,
    /// Frames payload: an array of frames, each an array of points.
    pub landmarks: Value,
}

/// The public payload delivered to live subscribers and returned as a list
/// item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LandmarkUpdate {
    /// Record identifier.
    pub id: RecordId,
    /// Owning user, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Recording label.
    pub name: String,
    /// Number of frames in the payload.
    pub frame_count: u32,
    /// Opaque frames payload.
    pub landmarks: Value,
    /// ISO-8601 persistence timestamp.
    pub timestamp: String,
}

impl From<&LandmarkRecord> for LandmarkUpdate {
    fn from(record: &LandmarkRecord) -> Self {
        Self {
            id: record.id,
            user_id: record.user_id.clone(),
            name: record.name.clone(),
            frame_count: record.frame_count,
            landmarks: record.landmarks.clone(),
            timestamp: record.timestamp(),
        }
    }
}
