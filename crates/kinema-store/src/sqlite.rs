//! SQLite-backed store.
//!
//! The connection is synchronous, so every call moves onto the blocking
//! pool; no async task ever holds the connection lock across an await.
//! `created_at_ms` stamps are taken under the same lock that serializes
//! appends and never decrease, even if the wall clock steps backwards.

use crate::traits::{PageRequest, RecordPage, Store, StoreError, StoreStats};
use async_trait::async_trait;
use kinema_model::{unix_millis, LandmarkRecord, NewRecord, RecordId};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

// AUTOINCREMENT keeps deleted ids from ever being reassigned.
const SCHEMA: &str = "\
CREATE TABLE IF NOT EXISTS landmark_records (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id       TEXT,
    name          TEXT NOT NULL,
    frame_count   INTEGER NOT NULL,
    landmarks     TEXT NOT NULL,
    created_at_ms INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_records_user_created
    ON landmark_records (user_id, created_at_ms);
";

const RECORD_COLUMNS: &str = "id, user_id, name, frame_count, landmarks, created_at_ms";

struct Inner {
    conn: Connection,
    /// Last stamp handed out by `append`.
    last_stamp_ms: i64,
}

/// SQLite-backed [`Store`].
pub struct SqliteStore {
    inner: Arc<Mutex<Inner>>,
}

impl SqliteStore {
    /// Open (or create) a database file and bootstrap the schema.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or the schema cannot
    /// be applied.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let conn = Connection::open(path).map_err(db_err)?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(db_err)?;
        conn.pragma_update(None, "busy_timeout", 5000)
            .map_err(db_err)?;
        info!(path = %path.display(), "Opened SQLite store");
        Self::bootstrap(conn)
    }

    /// Open an in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be applied.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        debug!("Opened in-memory SQLite store");
        Self::bootstrap(conn)
    }

    fn bootstrap(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        Ok(Self {
            inner: Arc::new(Mutex::new(Inner {
                conn,
                last_stamp_ms: 0,
            })),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Inner) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || {
            let mut guard = inner
                .lock()
                .map_err(|_| StoreError::Backend("connection lock poisoned".into()))?;
            f(&mut guard)
        })
        .await
        .map_err(|_| StoreError::Interrupted)?
    }
}

fn db_err(err: rusqlite::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<LandmarkRecord> {
    let landmarks: String = row.get(4)?;
    let landmarks = serde_json::from_str(&landmarks).map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(err))
    })?;

    Ok(LandmarkRecord {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        frame_count: row.get(3)?,
        landmarks,
        created_at_ms: row.get(5)?,
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn append(&self, new: NewRecord) -> Result<LandmarkRecord, StoreError> {
        self.with_conn(move |inner| {
            let stamp = unix_millis().max(inner.last_stamp_ms);
            let payload =
                serde_json::to_string(&new.landmarks).map_err(|e| StoreError::Backend(e.to_string()))?;

            inner
                .conn
                .execute(
                    "INSERT INTO landmark_records (user_id, name, frame_count, landmarks, created_at_ms)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![new.user_id, new.name, new.frame_count, payload, stamp],
                )
                .map_err(db_err)?;

            let id = inner.conn.last_insert_rowid();
            inner.last_stamp_ms = stamp;
            debug!(id, frames = new.frame_count, "Appended landmark record");

            Ok(LandmarkRecord {
                id,
                user_id: new.user_id,
                name: new.name,
                frame_count: new.frame_count,
                landmarks: new.landmarks,
                created_at_ms: stamp,
            })
        })
        .await
    }

    async fn fetch(&self, id: RecordId) -> Result<LandmarkRecord, StoreError> {
        self.with_conn(move |inner| {
            inner
                .conn
                .query_row(
                    &format!("SELECT {RECORD_COLUMNS} FROM landmark_records WHERE id = ?1"),
                    params![id],
                    row_to_record,
                )
                .optional()
                .map_err(db_err)?
                .ok_or(StoreError::NotFound(id))
        })
        .await
    }

    async fn query_by_user(
        &self,
        user_id: Option<&str>,
        page: PageRequest,
    ) -> Result<RecordPage, StoreError> {
        let user_id = user_id.map(str::to_owned);
        self.with_conn(move |inner| {
            // `IS` gives null-safe equality, so one query serves both the
            // anonymous bucket and named users.
            let total: u64 = inner
                .conn
                .query_row(
                    "SELECT COUNT(*) FROM landmark_records WHERE user_id IS ?1",
                    params![user_id],
                    |row| row.get(0),
                )
                .map_err(db_err)?;

            let mut stmt = inner
                .conn
                .prepare(&format!(
                    "SELECT {RECORD_COLUMNS} FROM landmark_records
                     WHERE user_id IS ?1
                     ORDER BY created_at_ms DESC, id DESC
                     LIMIT ?2 OFFSET ?3"
                ))
                .map_err(db_err)?;

            let items = stmt
                .query_map(
                    params![user_id, page.page_size(), page.offset() as i64],
                    row_to_record,
                )
                .map_err(db_err)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(db_err)?;

            Ok(RecordPage { items, total })
        })
        .await
    }

    async fn delete_by_id(&self, id: RecordId) -> Result<bool, StoreError> {
        self.with_conn(move |inner| {
            let changed = inner
                .conn
                .execute("DELETE FROM landmark_records WHERE id = ?1", params![id])
                .map_err(db_err)?;
            if changed > 0 {
                debug!(id, "Deleted landmark record");
            }
            Ok(changed > 0)
        })
        .await
    }

    async fn delete_all(&self) -> Result<u64, StoreError> {
        self.with_conn(|inner| {
            let removed = inner
                .conn
                .execute("DELETE FROM landmark_records", [])
                .map_err(db_err)?;
            info!(removed, "Cleared landmark records");
            Ok(removed as u64)
        })
        .await
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        self.with_conn(|inner| {
            let (total, avg_frames, first_ms, latest_ms) = inner
                .conn
                .query_row(
                    "SELECT COUNT(*), AVG(frame_count), MIN(created_at_ms), MAX(created_at_ms)
                     FROM landmark_records",
                    [],
                    |row| {
                        Ok((
                            row.get::<_, u64>(0)?,
                            row.get::<_, Option<f64>>(1)?,
                            row.get::<_, Option<i64>>(2)?,
                            row.get::<_, Option<i64>>(3)?,
                        ))
                    },
                )
                .map_err(db_err)?;

            Ok(StoreStats::from_aggregates(
                total, avg_frames, first_ms, latest_ms,
            ))
        })
        .await
    }
}
