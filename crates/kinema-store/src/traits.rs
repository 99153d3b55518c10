//! Storage abstraction traits for Kinema.
//!
//! These traits define the interface the ingest pipeline persists through,
//! allowing the core to be storage-agnostic.

use async_trait::async_trait;
use kinema_model::{format_timestamp_ms, LandmarkRecord, NewRecord, RecordId, ASSUMED_FPS};
use serde::Serialize;
use thiserror::Error;

/// Hard ceiling on page size, bounding response payloads.
pub const MAX_PAGE_SIZE: u32 = 200;

/// Page size used when the caller does not specify one.
pub const DEFAULT_PAGE_SIZE: u32 = 25;

/// Storage errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing engine failed.
    #[error("storage backend failure: {0}")]
    Backend(String),

    /// The referenced record does not exist.
    #[error("record not found: {0}")]
    NotFound(RecordId),

    /// The blocking storage task was cancelled or panicked.
    #[error("storage task interrupted")]
    Interrupted,
}

/// A 1-indexed page request.
///
/// Construction clamps out-of-range values: `page` is at least 1,
/// `page_size` between 1 and [`MAX_PAGE_SIZE`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    page: u32,
    page_size: u32,
}

impl PageRequest {
    /// Create a clamped page request.
    #[must_use]
    pub fn new(page: u32, page_size: u32) -> Self {
        Self {
            page: page.max(1),
            page_size: page_size.clamp(1, MAX_PAGE_SIZE),
        }
    }

    /// The 1-indexed page number.
    #[must_use]
    pub fn page(&self) -> u32 {
        self.page
    }

    /// Records per page.
    #[must_use]
    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Number of records preceding this page.
    #[must_use]
    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.page_size)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(1, DEFAULT_PAGE_SIZE)
    }
}

/// One page of records, newest first, plus the total match count across
/// all pages.
#[derive(Debug, Clone)]
pub struct RecordPage {
    /// Records on this page, ordered by `created_at_ms` descending, `id`
    /// descending as tiebreak.
    pub items: Vec<LandmarkRecord>,
    /// Count of all matching records regardless of page.
    pub total: u64,
}

/// Aggregate statistics over all persisted recordings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoreStats {
    /// Number of persisted recordings.
    pub total_recordings: u64,
    /// Mean frame count per recording.
    pub avg_frame_count: f64,
    /// Mean approximate duration per recording, at the assumed sampling
    /// rate.
    pub avg_duration_ms: f64,
    /// ISO-8601 timestamp of the oldest recording, if any.
    pub first_recording: Option<String>,
    /// ISO-8601 timestamp of the newest recording, if any.
    pub latest_recording: Option<String>,
}

impl StoreStats {
    /// Build stats from backend aggregates.
    #[must_use]
    pub fn from_aggregates(
        total: u64,
        avg_frame_count: Option<f64>,
        first_ms: Option<i64>,
        latest_ms: Option<i64>,
    ) -> Self {
        let avg_frame_count = avg_frame_count.unwrap_or(0.0);
        Self {
            total_recordings: total,
            avg_frame_count,
            avg_duration_ms: avg_frame_count * 1000.0 / f64::from(ASSUMED_FPS),
            first_recording: first_ms.map(format_timestamp_ms),
            latest_recording: latest_ms.map(format_timestamp_ms),
        }
    }
}

/// Durable append-only log of landmark records, queryable by user and
/// time, paginated.
///
/// Implementations must be safe under concurrent calls and must not hold
/// any lock shared with the rate gate or broadcaster while waiting on I/O.
#[async_trait]
pub trait Store: Send + Sync {
    /// Assign `id` and `created_at_ms`, durably persist, and return the
    /// full record.
    ///
    /// Once this returns `Ok`, the record must survive a process restart
    /// (for durable backends) and must be visible to `query_by_user`.
    ///
    /// # Errors
    ///
    /// Any persistence failure surfaces as [`StoreError::Backend`]; the
    /// caller decides retry policy.
    async fn append(&self, new: NewRecord) -> Result<LandmarkRecord, StoreError>;

    /// Fetch a single record by id.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] when no such record exists.
    async fn fetch(&self, id: RecordId) -> Result<LandmarkRecord, StoreError>;

    /// Page through one user's records, newest first (`created_at_ms`
    /// descending, `id` descending as tiebreak).
    ///
    /// `user_id = None` addresses the anonymous bucket: records persisted
    /// without an owner. Out-of-range pages return empty items with the
    /// correct total.
    ///
    /// # Errors
    ///
    /// Any persistence failure surfaces as [`StoreError::Backend`].
    async fn query_by_user(
        &self,
        user_id: Option<&str>,
        page: PageRequest,
    ) -> Result<RecordPage, StoreError>;

    /// Remove a record if present. Idempotent: returns whether anything
    /// was deleted; a second call is a no-op returning `false`.
    ///
    /// # Errors
    ///
    /// Any persistence failure surfaces as [`StoreError::Backend`].
    async fn delete_by_id(&self, id: RecordId) -> Result<bool, StoreError>;

    /// Remove every record, returning the count removed.
    ///
    /// # Errors
    ///
    /// Any persistence failure surfaces as [`StoreError::Backend`].
    async fn delete_all(&self) -> Result<u64, StoreError>;

    /// Aggregate statistics over all recordings.
    ///
    /// # Errors
    ///
    /// Any persistence failure surfaces as [`StoreError::Backend`].
    async fn stats(&self) -> Result<StoreStats, StoreError>;
}
