//! Persisted video records.
//!
//! The store is the only state shared between concurrently running source
//! pipelines, and its unique index on `video_id` is what guarantees each
//! video is stored once. Existence checks done by callers only save work;
//! [`RecordStore::insert_if_absent`] is the atomic backstop.

use chrono::Utc;
use rusqlite::{Connection, params};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, instrument};

use crate::error::StoreError;
use crate::models::{PendingRecord, VideoRecord};

/// Persistence contract used by the pipeline and the submitter.
pub trait RecordStore {
    async fn exists(&self, source_id: &str) -> Result<bool, StoreError>;

    /// Insert `record` unless its `source_id` is already stored.
    ///
    /// Returns `false` when an existing row was kept; that is not an error.
    async fn insert_if_absent(&self, record: &VideoRecord) -> Result<bool, StoreError>;

    /// Up to `limit` records without an analysis id, most recently ingested first.
    async fn list_without_analysis_id(&self, limit: usize)
    -> Result<Vec<PendingRecord>, StoreError>;

    async fn set_analysis_id(&self, source_id: &str, job_id: &str) -> Result<(), StoreError>;

    #[cfg(test)]
    async fn get(&self, source_id: &str) -> Result<Option<VideoRecord>, StoreError>;
}

/// SQLite-backed record store.
pub struct SqliteRecordStore {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for SqliteRecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteRecordStore").finish_non_exhaustive()
    }
}

impl SqliteRecordStore {
    /// Open (or create) the database file and make sure the schema exists.
    #[instrument(level = "info", skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path.as_ref())?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        let store = Self::with_connection(conn)?;
        info!("Record store initialized");
        Ok(store)
    }

    /// A private in-memory database.
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS videos (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                video_id TEXT NOT NULL UNIQUE,
                content_provider TEXT NOT NULL,
                published_date TEXT NOT NULL,
                title TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                personalities TEXT NOT NULL DEFAULT '',
                duration TEXT NOT NULL,
                download_url TEXT NOT NULL,
                analysis_id TEXT,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS videos_pending_idx ON videos(analysis_id);
            "#,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl RecordStore for SqliteRecordStore {
    async fn exists(&self, source_id: &str) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM videos WHERE video_id = ?1",
            params![source_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    #[instrument(level = "debug", skip_all, fields(source_id = %record.source_id))]
    async fn insert_if_absent(&self, record: &VideoRecord) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let written = conn.execute(
            r#"
            INSERT INTO videos (
                video_id, content_provider, published_date, title, description,
                personalities, duration, download_url, analysis_id, created_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(video_id) DO NOTHING
            "#,
            params![
                record.source_id,
                record.content_provider,
                record.published_date,
                record.title,
                record.description,
                record.personalities,
                record.duration,
                record.download_url,
                record.analysis_id,
                Utc::now().to_rfc3339(),
            ],
        )?;
        debug!(written, "Insert-or-ignore executed");
        Ok(written > 0)
    }

    async fn list_without_analysis_id(
        &self,
        limit: usize,
    ) -> Result<Vec<PendingRecord>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT video_id, title, download_url FROM videos
             WHERE analysis_id IS NULL ORDER BY id DESC LIMIT ?1",
        )?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt
            .query_map(params![limit], |row| {
                Ok(PendingRecord {
                    source_id: row.get(0)?,
                    title: row.get(1)?,
                    download_url: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    #[instrument(level = "debug", skip(self))]
    async fn set_analysis_id(&self, source_id: &str, job_id: &str) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let updated = conn.execute(
            "UPDATE videos SET analysis_id = ?1 WHERE video_id = ?2",
            params![job_id, source_id],
        )?;
        debug!(updated, "Analysis id recorded");
        Ok(())
    }

    #[cfg(test)]
    async fn get(&self, source_id: &str) -> Result<Option<VideoRecord>, StoreError> {
        use rusqlite::OptionalExtension;

        let conn = self.lock()?;
        let record = conn
            .query_row(
                "SELECT video_id, content_provider, published_date, title, description,
                        personalities, duration, download_url, analysis_id
                 FROM videos WHERE video_id = ?1",
                params![source_id],
                |row| {
                    Ok(VideoRecord {
                        source_id: row.get(0)?,
                        content_provider: row.get(1)?,
                        published_date: row.get(2)?,
                        title: row.get(3)?,
                        description: row.get(4)?,
                        personalities: row.get(5)?,
                        duration: row.get(6)?,
                        download_url: row.get(7)?,
                        analysis_id: row.get(8)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn record(source_id: &str, title: &str) -> VideoRecord {
        VideoRecord {
            source_id: source_id.to_string(),
            content_provider: "EU Commission".to_string(),
            published_date: "07/03/2025".to_string(),
            title: title.to_string(),
            description: String::new(),
            personalities: String::new(),
            duration: "00:01:30".to_string(),
            download_url: format!("https://example.org/{source_id}.mp4"),
            analysis_id: None,
        }
    }

    #[tokio::test]
    async fn test_insert_is_idempotent_and_keeps_first() {
        let store = SqliteRecordStore::open_in_memory().unwrap();

        assert!(store.insert_if_absent(&record("I-1", "first")).await.unwrap());
        assert!(!store.insert_if_absent(&record("I-1", "second")).await.unwrap());

        let stored = store.get("I-1").await.unwrap().unwrap();
        assert_eq!(stored.title, "first");
        assert_eq!(store.list_without_analysis_id(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_exists() {
        let store = SqliteRecordStore::open_in_memory().unwrap();
        assert!(!store.exists("I-1").await.unwrap());
        store.insert_if_absent(&record("I-1", "t")).await.unwrap();
        assert!(store.exists("I-1").await.unwrap());
        assert!(store.get("I-2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_pending_excludes_submitted() {
        let store = SqliteRecordStore::open_in_memory().unwrap();
        store.insert_if_absent(&record("I-1", "one")).await.unwrap();
        store.insert_if_absent(&record("I-2", "two")).await.unwrap();

        store.set_analysis_id("I-1", "job-1").await.unwrap();

        let pending = store.list_without_analysis_id(10).await.unwrap();
        assert_eq!(
            pending,
            vec![PendingRecord {
                source_id: "I-2".to_string(),
                title: "two".to_string(),
                download_url: "https://example.org/I-2.mp4".to_string(),
            }]
        );
        assert_eq!(
            store.get("I-1").await.unwrap().unwrap().analysis_id.as_deref(),
            Some("job-1")
        );
    }

    #[tokio::test]
    async fn test_pending_newest_first_and_limited() {
        let store = SqliteRecordStore::open_in_memory().unwrap();
        for id in ["a", "b", "c"] {
            store.insert_if_absent(&record(id, id)).await.unwrap();
        }
        let ids: Vec<String> = store
            .list_without_analysis_id(2)
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.source_id)
            .collect();
        assert_eq!(ids, vec!["c".to_string(), "b".to_string()]);
    }
}
