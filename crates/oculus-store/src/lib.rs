//! oculus-store — SQLite-backed detection record store.
//!
//! One table per collection. Result sequences live in nullable JSON columns so that
//! "capability never ran" (NULL) stays distinct from "ran and found nothing" (`[]`).
//! History search, distinct labels, and label counts use SQLite's JSON functions.

mod row;

use async_trait::async_trait;
use oculus_core::store::{ClassCount, HistoryQuery};
use oculus_core::{
    CapabilitySet, Detection, DetectionRecord, Fingerprint, NewRecord, RecordStore, StoreError,
};
use row::{encode_column, encode_timestamp, like_pattern, RecordRow, RECORD_COLUMNS};
use rusqlite::{params, OptionalExtension};
use std::path::{Path, PathBuf};
use tokio_rusqlite::Connection;

/// Connection target for the in-memory database.
pub const MEMORY_URI: &str = ":memory:";

/// Record store backed by a single SQLite table.
pub struct SqliteRecordStore {
    conn: Connection,
    table: String,
    db_path: Option<PathBuf>,
}

impl SqliteRecordStore {
    /// Open `<uri>/<database>.db` and ensure `table` exists.
    ///
    /// `uri` is a directory, created if absent, or [`MEMORY_URI`].
    pub async fn open(uri: &str, database: &str, table: &str) -> Result<Self, StoreError> {
        validate_identifier("collection", table)?;

        if uri == MEMORY_URI {
            let conn = Connection::open_in_memory().await.map_err(unavailable)?;
            return Self::init(conn, table, None).await;
        }

        validate_database_name(database)?;
        let dir = Path::new(uri);
        std::fs::create_dir_all(dir).map_err(|e| {
            StoreError::Unavailable(format!("cannot create {}: {e}", dir.display()))
        })?;
        let path = dir.join(format!("{database}.db"));
        let conn = Connection::open(&path).await.map_err(unavailable)?;
        Self::init(conn, table, Some(path)).await
    }

    /// In-memory store, used by tests.
    pub async fn in_memory(table: &str) -> Result<Self, StoreError> {
        Self::open(MEMORY_URI, "", table).await
    }

    /// Database file path (None for in-memory).
    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    async fn init(
        conn: Connection,
        table: &str,
        db_path: Option<PathBuf>,
    ) -> Result<Self, StoreError> {
        let t = table.to_string();
        conn.call(move |conn| {
            conn.execute_batch(&format!(
                "PRAGMA journal_mode = WAL;
                 PRAGMA busy_timeout = 5000;
                 CREATE TABLE IF NOT EXISTS {t} (
                     id TEXT PRIMARY KEY,
                     filename TEXT NOT NULL,
                     result_filename TEXT NOT NULL,
                     timestamp TEXT NOT NULL,
                     file_hash TEXT NOT NULL,
                     detected_objects TEXT,
                     poses TEXT,
                     emotions TEXT
                 );
                 CREATE INDEX IF NOT EXISTS idx_{t}_file_hash ON {t}(file_hash);
                 CREATE INDEX IF NOT EXISTS idx_{t}_timestamp ON {t}(timestamp DESC);"
            ))?;
            Ok(())
        })
        .await
        .map_err(unavailable)?;

        tracing::info!(
            table,
            path = ?db_path.as_ref().map(|p| p.display().to_string()),
            "record store ready"
        );

        Ok(Self {
            conn,
            table: table.to_string(),
            db_path,
        })
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn find_cached(
        &self,
        fingerprint: &Fingerprint,
        requested: CapabilitySet,
    ) -> Result<Option<DetectionRecord>, StoreError> {
        if requested.is_empty() {
            return Ok(None);
        }

        let mut sql = format!(
            "SELECT {RECORD_COLUMNS} FROM {} WHERE file_hash = ?1",
            self.table
        );
        for capability in requested.iter() {
            sql.push_str(&format!(" AND {} IS NOT NULL", capability.field_name()));
        }
        sql.push_str(" ORDER BY timestamp DESC, rowid DESC LIMIT 1");

        let hash = fingerprint.to_hex();
        let row = self
            .conn
            .call(move |conn| {
                Ok(conn
                    .query_row(&sql, params![hash], RecordRow::from_row)
                    .optional()?)
            })
            .await
            .map_err(query)?;

        row.map(RecordRow::into_record).transpose()
    }

    async fn insert(&self, record: NewRecord) -> Result<String, StoreError> {
        let id = uuid::Uuid::new_v4().to_string();
        let sql = format!(
            "INSERT INTO {} ({RECORD_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            self.table
        );

        let detected_objects = encode_column(record.results.detected_objects.as_ref())?;
        let poses = encode_column(record.results.poses.as_ref())?;
        let emotions = encode_column(record.results.emotions.as_ref())?;
        let values = (
            id.clone(),
            record.filename,
            record.result_filename,
            encode_timestamp(&record.timestamp),
            record.file_hash.to_hex(),
        );

        self.conn
            .call(move |conn| {
                conn.execute(
                    &sql,
                    params![
                        values.0,
                        values.1,
                        values.2,
                        values.3,
                        values.4,
                        detected_objects,
                        poses,
                        emotions
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(query)?;

        tracing::debug!(id = %id, "inserted detection record");
        Ok(id)
    }

    async fn mark_verified(&self, record_id: &str, index: usize) -> Result<(), StoreError> {
        let select = format!("SELECT detected_objects FROM {} WHERE id = ?1", self.table);
        let update = format!(
            "UPDATE {} SET detected_objects = ?2 WHERE id = ?1",
            self.table
        );
        let id = record_id.to_string();

        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let current: Option<Option<String>> = tx
                    .query_row(&select, params![id], |row| row.get(0))
                    .optional()?;

                let updated = match current {
                    None => return Ok(Err(StoreError::RecordNotFound(id))),
                    Some(raw) => set_verified(&id, raw.as_deref(), index),
                };
                let encoded = match updated {
                    Ok(encoded) => encoded,
                    Err(e) => return Ok(Err(e)),
                };

                tx.execute(&update, params![id, encoded])?;
                tx.commit()?;
                Ok(Ok(()))
            })
            .await
            .map_err(query)?
    }

    async fn recent(&self, history_query: &HistoryQuery) -> Result<Vec<DetectionRecord>, StoreError> {
        let limit = i64::try_from(history_query.limit).unwrap_or(i64::MAX);
        let pattern = history_query.search.as_deref().map(like_pattern);
        let t = self.table.clone();

        let rows = self
            .conn
            .call(move |conn| {
                let rows = match pattern {
                    Some(pattern) => {
                        let sql = format!(
                            "SELECT {RECORD_COLUMNS} FROM {t}
                             WHERE EXISTS (
                                 SELECT 1 FROM json_each({t}.detected_objects) AS d
                                 WHERE lower(json_extract(d.value, '$.class_name')) LIKE ?1 ESCAPE '\\'
                             )
                             ORDER BY timestamp DESC, rowid DESC LIMIT ?2"
                        );
                        let mut stmt = conn.prepare(&sql)?;
                        let rows = stmt
                            .query_map(params![pattern, limit], RecordRow::from_row)?
                            .collect::<Result<Vec<_>, _>>()?;
                        rows
                    }
                    None => {
                        let sql = format!(
                            "SELECT {RECORD_COLUMNS} FROM {t}
                             ORDER BY timestamp DESC, rowid DESC LIMIT ?1"
                        );
                        let mut stmt = conn.prepare(&sql)?;
                        let rows = stmt
                            .query_map(params![limit], RecordRow::from_row)?
                            .collect::<Result<Vec<_>, _>>()?;
                        rows
                    }
                };
                Ok(rows)
            })
            .await
            .map_err(query)?;

        rows.into_iter().map(RecordRow::into_record).collect()
    }

    async fn class_names(&self) -> Result<Vec<String>, StoreError> {
        let t = self.table.clone();
        self.conn
            .call(move |conn| {
                let sql = format!(
                    "SELECT DISTINCT json_extract(d.value, '$.class_name') AS name
                     FROM {t}, json_each({t}.detected_objects) AS d
                     WHERE name IS NOT NULL
                     ORDER BY name"
                );
                let mut stmt = conn.prepare(&sql)?;
                let names = stmt
                    .query_map([], |row| row.get(0))?
                    .collect::<Result<Vec<String>, _>>()?;
                Ok(names)
            })
            .await
            .map_err(query)
    }

    async fn class_counts(&self, limit: Option<usize>) -> Result<Vec<ClassCount>, StoreError> {
        // SQLite treats a negative LIMIT as unbounded.
        let limit = limit.map_or(-1, |n| i64::try_from(n).unwrap_or(i64::MAX));
        let t = self.table.clone();
        self.conn
            .call(move |conn| {
                let sql = format!(
                    "SELECT json_extract(d.value, '$.class_name') AS name, COUNT(*) AS n
                     FROM {t}, json_each({t}.detected_objects) AS d
                     WHERE name IS NOT NULL
                     GROUP BY name
                     ORDER BY n DESC, name ASC
                     LIMIT ?1"
                );
                let mut stmt = conn.prepare(&sql)?;
                let counts = stmt
                    .query_map(params![limit], |row| {
                        Ok(ClassCount {
                            class_name: row.get(0)?,
                            count: row.get::<_, i64>(1)?.max(0) as u64,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(counts)
            })
            .await
            .map_err(query)
    }

    async fn result_filenames(&self) -> Result<Vec<String>, StoreError> {
        let sql = format!("SELECT result_filename FROM {}", self.table);
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let names = stmt
                    .query_map([], |row| row.get(0))?
                    .collect::<Result<Vec<String>, _>>()?;
                Ok(names)
            })
            .await
            .map_err(query)
    }

    async fn delete_all(&self) -> Result<u64, StoreError> {
        let sql = format!("DELETE FROM {}", self.table);
        let deleted = self
            .conn
            .call(move |conn| Ok(conn.execute(&sql, [])?))
            .await
            .map_err(query)?;
        tracing::info!(deleted, "deleted all detection records");
        Ok(deleted as u64)
    }
}

/// Flip `verified` on one detection and re-encode the sequence.
fn set_verified(record_id: &str, raw: Option<&str>, index: usize) -> Result<String, StoreError> {
    let not_found = || StoreError::DetectionNotFound {
        record_id: record_id.to_string(),
        index,
    };
    let raw = raw.ok_or_else(not_found)?;
    let mut detections: Vec<Detection> =
        serde_json::from_str(raw).map_err(|e| StoreError::Corrupt {
            record_id: record_id.to_string(),
            reason: format!("detected_objects: {e}"),
        })?;
    detections.get_mut(index).ok_or_else(not_found)?.verified = true;
    serde_json::to_string(&detections).map_err(|e| StoreError::Query(e.to_string()))
}

/// Table names are interpolated into SQL, so only identifier characters are accepted.
fn validate_identifier(kind: &str, name: &str) -> Result<(), StoreError> {
    let mut chars = name.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(StoreError::Unavailable(format!(
            "invalid {kind} name {name:?}: use letters, digits and underscores"
        )))
    }
}

fn validate_database_name(name: &str) -> Result<(), StoreError> {
    if name.is_empty() || name.contains(['/', '\\', '\0']) || name == "." || name == ".." {
        return Err(StoreError::Unavailable(format!(
            "invalid database name {name:?}"
        )));
    }
    Ok(())
}

fn unavailable(e: tokio_rusqlite::Error) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

fn query(e: tokio_rusqlite::Error) -> StoreError {
    StoreError::Query(e.to_string())
}

impl std::fmt::Debug for SqliteRecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteRecordStore")
            .field("table", &self.table)
            .field("db_path", &self.db_path)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use oculus_core::{Capability, CapabilityResults, EmotionMark, FaceRegion, PixelBox, Pose};

    fn det(name: &str, class_id: usize) -> Detection {
        Detection::new(class_id, name, 0.9, PixelBox::from([0, 0, 10, 10]))
    }

    fn record(content: &[u8], minutes: i64, results: CapabilityResults) -> NewRecord {
        let base = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        NewRecord {
            filename: "photo.jpg".into(),
            result_filename: "photo.jpg".into(),
            timestamp: base + Duration::minutes(minutes),
            file_hash: Fingerprint::of(content),
            results,
        }
    }

    fn objects(names: &[&str]) -> CapabilityResults {
        CapabilityResults {
            detected_objects: Some(names.iter().enumerate().map(|(i, n)| det(n, i)).collect()),
            ..Default::default()
        }
    }

    async fn store() -> SqliteRecordStore {
        SqliteRecordStore::in_memory("detections").await.unwrap()
    }

    #[tokio::test]
    async fn test_insert_then_find_cached_roundtrip() {
        let store = store().await;
        let results = CapabilityResults {
            detected_objects: Some(vec![det("dog", 16)]),
            poses: None,
            emotions: Some(vec![EmotionMark {
                emotion: "happy".into(),
                region: FaceRegion::from([1, 2, 3, 4]),
            }]),
        };
        let id = store.insert(record(b"img", 0, results.clone())).await.unwrap();

        let requested = CapabilitySet::from([Capability::ObjectDetection]);
        let found = store
            .find_cached(&Fingerprint::of(b"img"), requested)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, id);
        assert_eq!(found.results, results);
        assert_eq!(found.file_hash, Fingerprint::of(b"img"));
    }

    #[tokio::test]
    async fn test_find_cached_requires_every_capability() {
        let store = store().await;
        store.insert(record(b"img", 0, objects(&["cat"]))).await.unwrap();

        let both = CapabilitySet::from([Capability::ObjectDetection, Capability::PoseEstimation]);
        assert!(store
            .find_cached(&Fingerprint::of(b"img"), both)
            .await
            .unwrap()
            .is_none());
        assert!(store
            .find_cached(&Fingerprint::of(b"other"), CapabilitySet::from([Capability::ObjectDetection]))
            .await
            .unwrap()
            .is_none());
        assert!(store
            .find_cached(&Fingerprint::of(b"img"), CapabilitySet::empty())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_find_cached_empty_sequence_counts_as_present() {
        let store = store().await;
        let results = CapabilityResults {
            poses: Some(vec![]),
            ..Default::default()
        };
        store.insert(record(b"img", 0, results)).await.unwrap();
        let hit = store
            .find_cached(&Fingerprint::of(b"img"), CapabilitySet::from([Capability::PoseEstimation]))
            .await
            .unwrap();
        assert_eq!(hit.unwrap().results.poses, Some(Vec::<Pose>::new()));
    }

    #[tokio::test]
    async fn test_find_cached_prefers_most_recent() {
        let store = store().await;
        store.insert(record(b"img", 0, objects(&["cat"]))).await.unwrap();
        let newer = store.insert(record(b"img", 5, objects(&["dog"]))).await.unwrap();
        let hit = store
            .find_cached(&Fingerprint::of(b"img"), CapabilitySet::from([Capability::ObjectDetection]))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hit.id, newer);
    }

    #[tokio::test]
    async fn test_mark_verified_sets_only_that_index() {
        let store = store().await;
        let id = store.insert(record(b"img", 0, objects(&["cat", "dog"]))).await.unwrap();
        store.mark_verified(&id, 1).await.unwrap();

        let rec = store
            .recent(&HistoryQuery { search: None, limit: 10 })
            .await
            .unwrap()
            .remove(0);
        let dets = rec.results.detected_objects.unwrap();
        assert!(!dets[0].verified);
        assert!(dets[1].verified);
    }

    #[tokio::test]
    async fn test_mark_verified_unknown_record_and_index() {
        let store = store().await;
        let id = store.insert(record(b"img", 0, objects(&["cat"]))).await.unwrap();

        assert!(matches!(
            store.mark_verified("nope", 0).await,
            Err(StoreError::RecordNotFound(_))
        ));
        assert!(matches!(
            store.mark_verified(&id, 3).await,
            Err(StoreError::DetectionNotFound { index: 3, .. })
        ));

        let poses_only = CapabilityResults {
            poses: Some(vec![]),
            ..Default::default()
        };
        let id = store.insert(record(b"p", 0, poses_only)).await.unwrap();
        assert!(matches!(
            store.mark_verified(&id, 0).await,
            Err(StoreError::DetectionNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_recent_orders_and_limits() {
        let store = store().await;
        for minute in 0..5 {
            store
                .insert(record(format!("img{minute}").as_bytes(), minute, objects(&["cat"])))
                .await
                .unwrap();
        }
        let recs = store
            .recent(&HistoryQuery { search: None, limit: 3 })
            .await
            .unwrap();
        assert_eq!(recs.len(), 3);
        assert!(recs[0].timestamp > recs[1].timestamp);
        assert!(recs[1].timestamp > recs[2].timestamp);
        assert_eq!(recs[0].file_hash, Fingerprint::of(b"img4"));
    }

    #[tokio::test]
    async fn test_recent_search_is_case_insensitive_substring() {
        let store = store().await;
        store.insert(record(b"a", 0, objects(&["Hot Dog"]))).await.unwrap();
        store.insert(record(b"b", 1, objects(&["cat"]))).await.unwrap();
        store
            .insert(record(b"c", 2, CapabilityResults { poses: Some(vec![]), ..Default::default() }))
            .await
            .unwrap();

        let hits = store
            .recent(&HistoryQuery { search: Some("DOG".into()), limit: 50 })
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].file_hash, Fingerprint::of(b"a"));

        let none = store
            .recent(&HistoryQuery { search: Some("%".into()), limit: 50 })
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_class_names_distinct_sorted() {
        let store = store().await;
        store.insert(record(b"a", 0, objects(&["dog", "cat"]))).await.unwrap();
        store.insert(record(b"b", 1, objects(&["cat", "bird"]))).await.unwrap();
        assert_eq!(store.class_names().await.unwrap(), vec!["bird", "cat", "dog"]);
    }

    #[tokio::test]
    async fn test_class_counts_sorted_and_limited() {
        let store = store().await;
        store.insert(record(b"a", 0, objects(&["dog", "cat", "cat"]))).await.unwrap();
        store.insert(record(b"b", 1, objects(&["cat", "bird", "dog"]))).await.unwrap();
        store.insert(record(b"c", 2, objects(&[]))).await.unwrap();

        let counts = store.class_counts(None).await.unwrap();
        let pairs: Vec<(&str, u64)> = counts
            .iter()
            .map(|c| (c.class_name.as_str(), c.count))
            .collect();
        assert_eq!(pairs, vec![("cat", 3), ("dog", 2), ("bird", 1)]);

        let top = store.class_counts(Some(1)).await.unwrap();
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].class_name, "cat");
    }

    #[tokio::test]
    async fn test_delete_all_and_result_filenames() {
        let store = store().await;
        store.insert(record(b"a", 0, objects(&["dog"]))).await.unwrap();
        store.insert(record(b"b", 1, objects(&["cat"]))).await.unwrap();

        assert_eq!(store.result_filenames().await.unwrap().len(), 2);
        assert_eq!(store.delete_all().await.unwrap(), 2);
        assert!(store.result_filenames().await.unwrap().is_empty());
        assert_eq!(store.delete_all().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_open_on_disk_persists() {
        let dir = tempfile::tempdir().unwrap();
        let uri = dir.path().join("db");
        let uri = uri.to_str().unwrap();

        let id = {
            let store = SqliteRecordStore::open(uri, "oculus", "detections").await.unwrap();
            assert_eq!(store.db_path(), Some(dir.path().join("db").join("oculus.db").as_path()));
            store.insert(record(b"a", 0, objects(&["dog"]))).await.unwrap()
        };

        let reopened = SqliteRecordStore::open(uri, "oculus", "detections").await.unwrap();
        let recs = reopened
            .recent(&HistoryQuery { search: None, limit: 10 })
            .await
            .unwrap();
        assert_eq!(recs[0].id, id);
    }

    #[tokio::test]
    async fn test_open_rejects_bad_names() {
        assert!(SqliteRecordStore::in_memory("drop table; --").await.is_err());
        assert!(SqliteRecordStore::in_memory("1abc").await.is_err());
        let dir = tempfile::tempdir().unwrap();
        let uri = dir.path().to_str().unwrap();
        assert!(SqliteRecordStore::open(uri, "../escape", "t").await.is_err());
    }
}
