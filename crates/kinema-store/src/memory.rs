//! In-memory store.
//!
//! Contract-identical to the SQLite backend minus durability: same id
//! assignment, same ordering, same clamping. Used as the pipeline's test
//! double and as a backend for ephemeral deployments.

use crate::traits::{PageRequest, RecordPage, Store, StoreError, StoreStats};
use async_trait::async_trait;
use kinema_model::{unix_millis, LandmarkRecord, NewRecord, RecordId};
use std::sync::Mutex;
use tracing::debug;

#[derive(Default)]
struct MemoryInner {
    rows: Vec<LandmarkRecord>,
    /// Highest id ever assigned; never decreases, so ids are never reused.
    next_id: RecordId,
    last_stamp_ms: i64,
}

/// Volatile [`Store`] backed by a `Vec` behind a mutex.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryInner>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Backend("store lock poisoned".into()))
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn append(&self, new: NewRecord) -> Result<LandmarkRecord, StoreError> {
        let mut inner = self.lock()?;
        inner.next_id += 1;
        let stamp = unix_millis().max(inner.last_stamp_ms);
        inner.last_stamp_ms = stamp;

        let record = LandmarkRecord {
            id: inner.next_id,
            user_id: new.user_id,
            name: new.name,
            frame_count: new.frame_count,
            landmarks: new.landmarks,
            created_at_ms: stamp,
        };
        inner.rows.push(record.clone());
        debug!(id = record.id, "Appended landmark record (memory)");
        Ok(record)
    }

    async fn fetch(&self, id: RecordId) -> Result<LandmarkRecord, StoreError> {
        let inner = self.lock()?;
        inner
            .rows
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    async fn query_by_user(
        &self,
        user_id: Option<&str>,
        page: PageRequest,
    ) -> Result<RecordPage, StoreError> {
        let inner = self.lock()?;
        let mut matches: Vec<&LandmarkRecord> = inner
            .rows
            .iter()
            .filter(|r| r.user_id.as_deref() == user_id)
            .collect();
        matches.sort_by(|a, b| {
            b.created_at_ms
                .cmp(&a.created_at_ms)
                .then(b.id.cmp(&a.id))
        });

        let total = matches.len() as u64;
        let items = matches
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.page_size() as usize)
            .cloned()
            .collect();

        Ok(RecordPage { items, total })
    }

    async fn delete_by_id(&self, id: RecordId) -> Result<bool, StoreError> {
        let mut inner = self.lock()?;
        let before = inner.rows.len();
        inner.rows.retain(|r| r.id != id);
        Ok(inner.rows.len() < before)
    }

    async fn delete_all(&self) -> Result<u64, StoreError> {
        let mut inner = self.lock()?;
        let removed = inner.rows.len() as u64;
        inner.rows.clear();
        Ok(removed)
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        let inner = self.lock()?;
        let total = inner.rows.len() as u64;
        let avg_frames = (total > 0).then(|| {
            inner
                .rows
                .iter()
                .map(|r| f64::from(r.frame_count))
                .sum::<f64>()
                / total as f64
        });
        let first_ms = inner.rows.iter().map(|r| r.created_at_ms).min();
        let latest_ms = inner.rows.iter().map(|r| r.created_at_ms).max();

        Ok(StoreStats::from_aggregates(
            total, avg_frames, first_ms, latest_ms,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn new_record(user: Option<&str>) -> NewRecord {
        NewRecord {
            user_id: user.map(str::to_owned),
            name: "capture".to_string(),
            frame_count: 2,
            landmarks: json!([[{"x": 0.0, "y": 0.0, "z": 0.0}]]),
        }
    }

    #[tokio::test]
    async fn test_append_and_fetch() {
        let store = MemoryStore::new();
        let record = store.append(new_record(Some("7"))).await.unwrap();
        assert_eq!(record.id, 1);
        assert_eq!(store.fetch(1).await.unwrap(), record);
    }

    #[tokio::test]
    async fn test_ids_not_reused_after_delete() {
        let store = MemoryStore::new();
        let first = store.append(new_record(None)).await.unwrap();
        assert!(store.delete_by_id(first.id).await.unwrap());
        assert!(!store.delete_by_id(first.id).await.unwrap());

        let second = store.append(new_record(None)).await.unwrap();
        assert!(second.id > first.id);
    }

    #[tokio::test]
    async fn test_query_matches_contract() {
        let store = MemoryStore::new();
        for _ in 0..3 {
            store.append(new_record(Some("7"))).await.unwrap();
        }
        store.append(new_record(None)).await.unwrap();

        let page = store
            .query_by_user(Some("7"), PageRequest::new(1, 2))
            .await
            .unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.items.len(), 2);
        assert!(page.items[0].id > page.items[1].id);

        let beyond = store
            .query_by_user(Some("7"), PageRequest::new(5, 2))
            .await
            .unwrap();
        assert!(beyond.items.is_empty());
        assert_eq!(beyond.total, 3);
    }

    #[tokio::test]
    async fn test_stats() {
        let store = MemoryStore::new();
        assert_eq!(store.stats().await.unwrap().total_recordings, 0);

        store.append(new_record(None)).await.unwrap();
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total_recordings, 1);
        assert_eq!(stats.avg_frame_count, 2.0);
    }
}
