//! The ingest pipeline: validate → persist → throttle-check → broadcast.
//!
//! This is the composition root. Every valid batch is persisted; only the
//! live notification is throttled, so the durable record set never depends
//! on broadcast outcomes. A batch moves through
//! `RECEIVED → VALIDATING → PERSISTING → THROTTLE_CHECK → BROADCAST |
//! SUPPRESSED`; validation and storage failures abort the pipeline for
//! that batch, a suppressed broadcast does not.

use crate::gate::RateGate;
use crate::hub::{Hub, SubscriberId, Subscription, DEFAULT_SUBSCRIBER_BUFFER};
use kinema_model::{
    unix_millis, validate_batch, LandmarkBatch, LandmarkRecord, LandmarkUpdate, NewRecord,
    RecordId, SkeletonMode, ValidationError, DEFAULT_RECORDING_NAME,
};
use kinema_store::{PageRequest, RecordPage, Store, StoreError, StoreStats};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Default minimum interval between live broadcasts per user.
pub const DEFAULT_BROADCAST_INTERVAL: Duration = Duration::from_millis(500);

/// Pipeline tuning knobs.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Minimum interval between live broadcasts per user key.
    pub broadcast_interval: Duration,
    /// Shape requirement applied to incoming frames.
    pub skeleton_mode: SkeletonMode,
    /// Per-subscriber mailbox capacity.
    pub subscriber_buffer: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            broadcast_interval: DEFAULT_BROADCAST_INTERVAL,
            skeleton_mode: SkeletonMode::AnyPose,
            subscriber_buffer: DEFAULT_SUBSCRIBER_BUFFER,
        }
    }
}

/// Why an ingest call failed.
#[derive(Debug, Error)]
pub enum IngestError {
    /// The batch shape is malformed; recoverable by fixing and
    /// resubmitting. Nothing was persisted.
    #[error(transparent)]
    Invalid(#[from] ValidationError),

    /// The durable layer failed; fatal for this request. Nothing was
    /// broadcast.
    #[error(transparent)]
    Storage(#[from] StoreError),
}

/// What a successful ingest returns to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReceipt {
    /// Persisted record id.
    pub id: RecordId,
    /// Frames counted in the batch.
    pub frame_count: u32,
    /// Approximate duration at the assumed sampling rate, not a measured
    /// value.
    pub duration_ms_approx: u64,
    /// Whether a live broadcast fired for this batch.
    pub broadcast: bool,
}

/// Orchestrates validation, persistence, throttling, and broadcast for
/// each incoming batch.
///
/// Safe under concurrent `ingest` calls for the same or different users;
/// persistence, throttle checks, and broadcasts for different batches
/// proceed in parallel, with only the per-key gate entry and the
/// subscriber registry synchronized.
pub struct IngestPipeline {
    store: Arc<dyn Store>,
    gate: RateGate,
    hub: Arc<Hub>,
    skeleton_mode: SkeletonMode,
}

impl IngestPipeline {
    /// Create a pipeline over `store` with default tuning.
    #[must_use]
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self::with_config(store, PipelineConfig::default())
    }

    /// Create a pipeline with explicit tuning.
    #[must_use]
    pub fn with_config(store: Arc<dyn Store>, config: PipelineConfig) -> Self {
        info!(
            interval_ms = config.broadcast_interval.as_millis() as u64,
            buffer = config.subscriber_buffer,
            "Creating ingest pipeline"
        );
        Self {
            store,
            gate: RateGate::new(config.broadcast_interval),
            hub: Arc::new(Hub::with_buffer(config.subscriber_buffer)),
            skeleton_mode: config.skeleton_mode,
        }
    }

    /// Ingest one batch: validate, persist, then broadcast if the
    /// per-user throttle allows.
    ///
    /// A suppressed broadcast is not an error: the batch is persisted and
    /// the receipt reports `broadcast: false`. Broadcast delivery failures
    /// to individual subscribers never affect the result.
    ///
    /// # Errors
    ///
    /// [`IngestError::Invalid`] when the batch shape is malformed (nothing
    /// persisted); [`IngestError::Storage`] when the durable layer fails
    /// (nothing broadcast).
    pub async fn ingest(&self, batch: LandmarkBatch) -> Result<IngestReceipt, IngestError> {
        let frame_count = validate_batch(&batch.landmarks, self.skeleton_mode)?;

        let record = self
            .store
            .append(NewRecord {
                user_id: batch.user_id,
                name: batch
                    .name
                    .unwrap_or_else(|| DEFAULT_RECORDING_NAME.to_string()),
                frame_count,
                landmarks: batch.landmarks,
            })
            .await?;

        let broadcast = self.gate.allow(record.user_id.as_deref(), unix_millis());
        if broadcast {
            self.hub.publish(LandmarkUpdate::from(&record));
        }

        debug!(
            id = record.id,
            frames = frame_count,
            broadcast,
            "Batch ingested"
        );

        Ok(IngestReceipt {
            id: record.id,
            frame_count,
            duration_ms_approx: record.duration_ms_approx(),
            broadcast,
        })
    }

    /// Page through one user's history, newest first.
    ///
    /// Pure delegation to the store: reflects every persisted record
    /// regardless of throttle outcome.
    ///
    /// # Errors
    ///
    /// Propagates any [`StoreError`] from the backend.
    pub async fn list(
        &self,
        user_id: Option<&str>,
        page: PageRequest,
    ) -> Result<RecordPage, StoreError> {
        self.store.query_by_user(user_id, page).await
    }

    /// Fetch one record by id.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] when no such record exists.
    pub async fn fetch(&self, id: RecordId) -> Result<LandmarkRecord, StoreError> {
        self.store.fetch(id).await
    }

    /// Register a live subscriber; it sees every broadcast from now on.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        self.hub.subscribe()
    }

    /// Remove a live subscriber. Idempotent.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.hub.unsubscribe(id)
    }

    /// Remove one record. Idempotent; no retraction is broadcast.
    ///
    /// # Errors
    ///
    /// Propagates any [`StoreError`] from the backend.
    pub async fn delete(&self, id: RecordId) -> Result<bool, StoreError> {
        self.store.delete_by_id(id).await
    }

    /// Remove every record, returning the count removed.
    ///
    /// # Errors
    ///
    /// Propagates any [`StoreError`] from the backend.
    pub async fn clear(&self) -> Result<u64, StoreError> {
        self.store.delete_all().await
    }

    /// Aggregate statistics over all recordings.
    ///
    /// # Errors
    ///
    /// Propagates any [`StoreError`] from the backend.
    pub async fn stats(&self) -> Result<StoreStats, StoreError> {
        self.store.stats().await
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.hub.subscriber_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use kinema_store::MemoryStore;
    use serde_json::json;

    fn pipeline() -> IngestPipeline {
        // An interval far beyond test runtime, so back-to-back ingests
        // always land inside it.
        IngestPipeline::with_config(
            Arc::new(MemoryStore::new()),
            PipelineConfig {
                broadcast_interval: Duration::from_secs(60),
                ..PipelineConfig::default()
            },
        )
    }

    fn batch(user: Option<&str>, frames: usize) -> LandmarkBatch {
        LandmarkBatch {
            user_id: user.map(str::to_owned),
            name: None,
            landmarks: json!(vec![vec![json!({"x": 0.1, "y": 0.2, "z": 0.3})]; frames]),
        }
    }

    #[tokio::test]
    async fn test_end_to_end_throttled_second_ingest() {
        let pipeline = pipeline();
        let mut sub = pipeline.subscribe();

        let a = pipeline.ingest(batch(Some("7"), 3)).await.unwrap();
        assert_eq!(a.id, 1);
        assert_eq!(a.frame_count, 3);
        assert_eq!(a.duration_ms_approx, 100);
        assert!(a.broadcast);

        let b = pipeline.ingest(batch(Some("7"), 2)).await.unwrap();
        assert_eq!(b.id, 2);
        assert!(!b.broadcast);

        // Both records are retrievable, newest first.
        let page = pipeline
            .list(Some("7"), PageRequest::new(1, 10))
            .await
            .unwrap();
        assert_eq!(page.total, 2);
        let ids: Vec<_> = page.items.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![2, 1]);

        // Exactly one broadcast fired.
        assert_eq!(sub.try_recv().unwrap().id, 1);
        assert!(sub.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_validation_failure_writes_nothing() {
        let pipeline = pipeline();
        let bad = LandmarkBatch {
            user_id: Some("7".to_string()),
            name: None,
            landmarks: json!([[{"x": 0.1, "y": 0.2}]]),
        };

        match pipeline.ingest(bad).await {
            Err(IngestError::Invalid(err)) => assert_eq!(err.path(), "landmarks[0][0].z"),
            other => panic!("expected validation error, got {other:?}"),
        }

        let page = pipeline
            .list(Some("7"), PageRequest::default())
            .await
            .unwrap();
        assert_eq!(page.total, 0);
    }

    #[tokio::test]
    async fn test_users_are_throttled_independently() {
        let pipeline = pipeline();

        assert!(pipeline.ingest(batch(Some("7"), 1)).await.unwrap().broadcast);
        assert!(pipeline.ingest(batch(Some("8"), 1)).await.unwrap().broadcast);
        assert!(pipeline.ingest(batch(None, 1)).await.unwrap().broadcast);
        assert!(!pipeline.ingest(batch(None, 1)).await.unwrap().broadcast);
    }

    #[tokio::test]
    async fn test_suppressed_broadcast_still_persists() {
        let pipeline = pipeline();

        let first = pipeline.ingest(batch(Some("7"), 1)).await.unwrap();
        let second = pipeline.ingest(batch(Some("7"), 1)).await.unwrap();
        assert!(first.broadcast);
        assert!(!second.broadcast);

        let record = pipeline.fetch(second.id).await.unwrap();
        assert_eq!(record.id, second.id);
        assert_eq!(record.name, DEFAULT_RECORDING_NAME);
    }

    #[tokio::test]
    async fn test_explicit_name_is_kept() {
        let pipeline = pipeline();
        let named = LandmarkBatch {
            name: Some("warmup".to_string()),
            ..batch(Some("7"), 1)
        };

        let receipt = pipeline.ingest(named).await.unwrap();
        assert_eq!(pipeline.fetch(receipt.id).await.unwrap().name, "warmup");
    }

    #[tokio::test]
    async fn test_full_skeleton_mode_rejects_short_frames() {
        let pipeline = IngestPipeline::with_config(
            Arc::new(MemoryStore::new()),
            PipelineConfig {
                skeleton_mode: SkeletonMode::FullSkeleton,
                ..PipelineConfig::default()
            },
        );

        match pipeline.ingest(batch(Some("7"), 1)).await {
            Err(IngestError::Invalid(ValidationError::IncompleteSkeleton { count: 1, .. })) => {}
            other => panic!("expected incomplete skeleton, got {other:?}"),
        }
    }

    /// Store stub whose appends always fail.
    struct FailingStore;

    #[async_trait]
    impl Store for FailingStore {
        async fn append(&self, _new: NewRecord) -> Result<LandmarkRecord, StoreError> {
            Err(StoreError::Backend("disk full".to_string()))
        }

        async fn fetch(&self, id: RecordId) -> Result<LandmarkRecord, StoreError> {
            Err(StoreError::NotFound(id))
        }

        async fn query_by_user(
            &self,
            _user_id: Option<&str>,
            _page: PageRequest,
        ) -> Result<RecordPage, StoreError> {
            Err(StoreError::Backend("disk full".to_string()))
        }

        async fn delete_by_id(&self, _id: RecordId) -> Result<bool, StoreError> {
            Err(StoreError::Backend("disk full".to_string()))
        }

        async fn delete_all(&self) -> Result<u64, StoreError> {
            Err(StoreError::Backend("disk full".to_string()))
        }

        async fn stats(&self) -> Result<StoreStats, StoreError> {
            Err(StoreError::Backend("disk full".to_string()))
        }
    }

    #[tokio::test]
    async fn test_storage_failure_broadcasts_nothing() {
        let pipeline = IngestPipeline::new(Arc::new(FailingStore));
        let mut sub = pipeline.subscribe();

        match pipeline.ingest(batch(Some("7"), 1)).await {
            Err(IngestError::Storage(StoreError::Backend(msg))) => {
                assert_eq!(msg, "disk full");
            }
            other => panic!("expected storage error, got {other:?}"),
        }
        assert!(sub.try_recv().is_err());
    }
}
