//! SQLite-backed descriptor store.
//!
//! All database work runs on the `tokio-rusqlite` connection thread; every
//! public method is one transaction against it, so concurrent callers are
//! serialized there rather than locked here.

use crate::schema::{self, Migration, SCHEMA_VERSION};
use facematch_core::{BoundingBox, Descriptor, FaceRecord, NewFaceRecord, Point, RecordId};
use rusqlite::{params, OptionalExtension};
use std::path::Path;
use thiserror::Error;
use tokio_rusqlite::Connection;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("storage unavailable during {operation}: {reason}")]
    StorageUnavailable {
        operation: &'static str,
        reason: String,
    },
    #[error("write failed during {operation}: {reason}")]
    WriteFailed {
        operation: &'static str,
        reason: String,
    },
    #[error("read failed during {operation}: {reason}")]
    ReadFailed {
        operation: &'static str,
        reason: String,
    },
    #[error("record {0} not found")]
    NotFound(RecordId),
}

impl StoreError {
    /// A missing id is an ordinary outcome for callers probing one record.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

fn unavailable(operation: &'static str) -> impl FnOnce(tokio_rusqlite::Error) -> StoreError {
    move |e| StoreError::StorageUnavailable {
        operation,
        reason: e.to_string(),
    }
}

fn read_failed(operation: &'static str) -> impl FnOnce(tokio_rusqlite::Error) -> StoreError {
    move |e| match e {
        tokio_rusqlite::Error::ConnectionClosed => StoreError::StorageUnavailable {
            operation,
            reason: "connection closed".into(),
        },
        other => StoreError::ReadFailed {
            operation,
            reason: other.to_string(),
        },
    }
}

fn write_failed(operation: &'static str) -> impl FnOnce(tokio_rusqlite::Error) -> StoreError {
    move |e| match e {
        tokio_rusqlite::Error::ConnectionClosed => StoreError::StorageUnavailable {
            operation,
            reason: "connection closed".into(),
        },
        other => StoreError::WriteFailed {
            operation,
            reason: other.to_string(),
        },
    }
}

/// ISO-8601 UTC with millisecond precision, e.g. `2024-05-01T10:20:30.123Z`.
pub fn now_timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

const SELECT_COLUMNS: &str = "SELECT id, descriptor, landmarks, detection, timestamp, kind FROM research_data";

/// One row as SQLite holds it: descriptor as little-endian f32 bytes,
/// landmarks and detection as JSON text.
struct RawRecord {
    id: RecordId,
    descriptor: Option<Vec<u8>>,
    landmarks: Option<String>,
    detection: Option<String>,
    timestamp: String,
    kind: Option<String>,
}

impl RawRecord {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            descriptor: row.get(1)?,
            landmarks: row.get(2)?,
            detection: row.get(3)?,
            timestamp: row.get(4)?,
            kind: row.get(5)?,
        })
    }

    fn encode(record: FaceRecord) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: record.id,
            descriptor: record.descriptor.as_ref().map(descriptor_to_blob),
            landmarks: record
                .landmarks
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
            detection: record
                .detection
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
            timestamp: record.timestamp,
            kind: record.kind,
        })
    }

    fn decode(self) -> Result<FaceRecord, String> {
        let id = self.id;
        let descriptor = self
            .descriptor
            .as_deref()
            .map(blob_to_descriptor)
            .transpose()
            .map_err(|e| format!("record {id}: {e}"))?;
        let landmarks: Option<Vec<Point>> = self
            .landmarks
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| format!("record {id} landmarks: {e}"))?;
        let detection: Option<BoundingBox> = self
            .detection
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| format!("record {id} detection: {e}"))?;

        Ok(FaceRecord {
            id,
            descriptor,
            landmarks,
            detection,
            timestamp: self.timestamp,
            kind: self.kind,
        })
    }
}

fn descriptor_to_blob(descriptor: &Descriptor) -> Vec<u8> {
    descriptor
        .values()
        .iter()
        .flat_map(|v| v.to_le_bytes())
        .collect()
}

fn blob_to_descriptor(bytes: &[u8]) -> Result<Descriptor, String> {
    if bytes.len() % 4 != 0 {
        return Err(format!(
            "descriptor blob of {} bytes is not a whole number of f32 values",
            bytes.len()
        ));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect::<Vec<_>>()
        .into())
}

/// Durable keyed storage of face records.
#[derive(Clone)]
pub struct DescriptorStore {
    conn: Connection,
    location: String,
}

impl DescriptorStore {
    /// Open (or create) the database at `path` and bring its schema up to date.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::StorageUnavailable {
                operation: "open",
                reason: format!("{}: {e}", parent.display()),
            })?;
        }

        let conn = Connection::open(path).await.map_err(unavailable("open"))?;
        let store = Self {
            conn,
            location: path.display().to_string(),
        };
        store.migrate().await?;

        tracing::info!(path = %store.location, "descriptor store opened");
        Ok(store)
    }

    /// Open a private in-memory database.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(unavailable("open"))?;
        let store = Self {
            conn,
            location: ":memory:".into(),
        };
        store.migrate().await?;
        Ok(store)
    }

    /// Where the database lives, for display.
    pub fn location(&self) -> &str {
        &self.location
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        let outcome = self
            .conn
            .call(|conn| Ok(schema::migrate(conn)?))
            .await
            .map_err(unavailable("migrate"))?;

        match outcome {
            Migration::Current(version) => {
                tracing::debug!(version, "schema up to date");
            }
            Migration::Upgraded { from, to } => {
                tracing::info!(from, to, "schema migrated");
            }
            Migration::TooNew(version) => {
                return Err(StoreError::StorageUnavailable {
                    operation: "migrate",
                    reason: format!(
                        "database schema version {version} is newer than supported version {SCHEMA_VERSION}"
                    ),
                });
            }
        }
        Ok(())
    }

    /// On-disk schema version.
    pub async fn schema_version(&self) -> Result<u32, StoreError> {
        self.conn
            .call(|conn| Ok(schema::read_version(conn)?))
            .await
            .map_err(read_failed("schema_version"))
    }

    /// Persist a new record, returning its freshly assigned id.
    pub async fn create(&self, record: NewFaceRecord) -> Result<RecordId, StoreError> {
        let kind = record.kind.clone();
        let raw = RawRecord::encode(record.into_record(0, now_timestamp())).map_err(|e| {
            StoreError::WriteFailed {
                operation: "create",
                reason: e.to_string(),
            }
        })?;

        let id = self
            .conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO research_data (descriptor, landmarks, detection, timestamp, kind)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![raw.descriptor, raw.landmarks, raw.detection, raw.timestamp, raw.kind],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await
            .map_err(write_failed("create"))?;

        tracing::info!(id, kind = kind.as_deref().unwrap_or("-"), "record created");
        Ok(id)
    }

    /// Every stored record. Callers sort as they need.
    pub async fn get_all(&self) -> Result<Vec<FaceRecord>, StoreError> {
        let rows = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(&format!("{SELECT_COLUMNS} ORDER BY id"))?;
                let rows = stmt
                    .query_map([], RawRecord::from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
            .map_err(read_failed("get_all"))?;

        let records = rows
            .into_iter()
            .map(RawRecord::decode)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|reason| StoreError::ReadFailed {
                operation: "get_all",
                reason,
            })?;

        tracing::debug!(count = records.len(), "records loaded");
        Ok(records)
    }

    /// Look up a single record; a missing id is `StoreError::NotFound`.
    pub async fn get_by_id(&self, id: RecordId) -> Result<FaceRecord, StoreError> {
        let row = self
            .conn
            .call(move |conn| {
                Ok(conn
                    .query_row(
                        &format!("{SELECT_COLUMNS} WHERE id = ?1"),
                        [id],
                        RawRecord::from_row,
                    )
                    .optional()?)
            })
            .await
            .map_err(read_failed("get_by_id"))?;

        row.ok_or(StoreError::NotFound(id))?
            .decode()
            .map_err(|reason| StoreError::ReadFailed {
                operation: "get_by_id",
                reason,
            })
    }

    pub async fn count(&self) -> Result<usize, StoreError> {
        let count: i64 = self
            .conn
            .call(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM research_data", [], |row| row.get(0))?)
            })
            .await
            .map_err(read_failed("count"))?;
        Ok(count as usize)
    }

    /// Remove every record. Restore only.
    pub async fn clear(&self) -> Result<usize, StoreError> {
        let removed = self
            .conn
            .call(|conn| Ok(conn.execute("DELETE FROM research_data", [])?))
            .await
            .map_err(write_failed("clear"))?;

        tracing::info!(removed, "records cleared");
        Ok(removed)
    }

    /// Insert records keeping their ids, replacing any row with the same id.
    /// All rows go in one transaction.
    pub async fn bulk_put(&self, records: Vec<FaceRecord>) -> Result<usize, StoreError> {
        let rows = encode_all(records, "bulk_put")?;

        let written = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                put_rows(&tx, &rows)?;
                tx.commit()?;
                Ok(rows.len())
            })
            .await
            .map_err(write_failed("bulk_put"))?;

        tracing::info!(written, "records written");
        Ok(written)
    }

    /// Swap the whole store for `records`, ids kept. The delete and the
    /// inserts share one transaction: on failure the old contents remain.
    ///
    /// Returns `(removed, written)`.
    pub async fn replace_all(&self, records: Vec<FaceRecord>) -> Result<(usize, usize), StoreError> {
        let rows = encode_all(records, "replace_all")?;

        let (removed, written) = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let removed = tx.execute("DELETE FROM research_data", [])?;
                put_rows(&tx, &rows)?;
                tx.commit()?;
                Ok((removed, rows.len()))
            })
            .await
            .map_err(write_failed("replace_all"))?;

        tracing::info!(removed, written, "store contents replaced");
        Ok((removed, written))
    }
}

fn encode_all(records: Vec<FaceRecord>, operation: &'static str) -> Result<Vec<RawRecord>, StoreError> {
    records
        .into_iter()
        .map(RawRecord::encode)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| StoreError::WriteFailed {
            operation,
            reason: e.to_string(),
        })
}

fn put_rows(tx: &rusqlite::Transaction<'_>, rows: &[RawRecord]) -> rusqlite::Result<()> {
    let mut stmt = tx.prepare(
        "INSERT OR REPLACE INTO research_data
         (id, descriptor, landmarks, detection, timestamp, kind)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?;
    for raw in rows {
        stmt.execute(params![
            raw.id,
            raw.descriptor,
            raw.landmarks,
            raw.detection,
            raw.timestamp,
            raw.kind
        ])?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use facematch_core::DEFAULT_DESCRIPTOR_LEN;

    fn descriptor(prefix: &[f32]) -> Descriptor {
        let mut v = prefix.to_vec();
        v.resize(DEFAULT_DESCRIPTOR_LEN, 0.0);
        Descriptor::new(v)
    }

    fn new_record(prefix: &[f32], kind: &str) -> NewFaceRecord {
        NewFaceRecord {
            descriptor: Some(descriptor(prefix)),
            landmarks: Some(vec![Point { x: 1.5, y: 2.5 }, Point { x: 3.0, y: 4.0 }]),
            detection: Some(BoundingBox {
                x: 10.0,
                y: 20.0,
                width: 100.0,
                height: 120.0,
            }),
            kind: Some(kind.into()),
        }
    }

    #[tokio::test]
    async fn test_create_and_get_by_id() {
        let store = DescriptorStore::open_in_memory().await.unwrap();
        let id = store.create(new_record(&[0.25, -0.5], "scan")).await.unwrap();

        let record = store.get_by_id(id).await.unwrap();
        assert_eq!(record.id, id);
        assert_eq!(record.descriptor, Some(descriptor(&[0.25, -0.5])));
        assert_eq!(record.landmarks.as_ref().unwrap().len(), 2);
        assert_eq!(record.detection.unwrap().height, 120.0);
        assert_eq!(record.kind.as_deref(), Some("scan"));
        assert!(record.timestamp.ends_with('Z'));
        assert!(chrono::DateTime::parse_from_rfc3339(&record.timestamp).is_ok());
    }

    #[tokio::test]
    async fn test_missing_id_is_not_found() {
        let store = DescriptorStore::open_in_memory().await.unwrap();
        let err = store.get_by_id(42).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(matches!(err, StoreError::NotFound(42)));
    }

    #[tokio::test]
    async fn test_record_without_descriptor_round_trips() {
        let store = DescriptorStore::open_in_memory().await.unwrap();
        let id = store
            .create(NewFaceRecord {
                kind: Some("upload".into()),
                ..Default::default()
            })
            .await
            .unwrap();

        let record = store.get_by_id(id).await.unwrap();
        assert!(record.descriptor.is_none());
        assert!(record.landmarks.is_none());
        assert!(record.detection.is_none());
    }

    #[tokio::test]
    async fn test_concurrent_creates_get_distinct_ids() {
        let store = DescriptorStore::open_in_memory().await.unwrap();
        let (a, b) = tokio::join!(
            store.create(new_record(&[0.1], "scan")),
            store.create(new_record(&[0.2], "upload")),
        );
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_ne!(a, b);

        let all = store.get_all().await.unwrap();
        let mut ids: Vec<_> = all.iter().map(|r| r.id).collect();
        ids.sort_unstable();
        let mut expected = vec![a, b];
        expected.sort_unstable();
        assert_eq!(ids, expected);
    }

    #[tokio::test]
    async fn test_ids_increase_and_are_not_reused() {
        let store = DescriptorStore::open_in_memory().await.unwrap();
        let first = store.create(new_record(&[0.1], "scan")).await.unwrap();
        let second = store.create(new_record(&[0.2], "scan")).await.unwrap();
        assert!(second > first);

        store.clear().await.unwrap();
        let third = store.create(new_record(&[0.3], "scan")).await.unwrap();
        assert!(third > second);
    }

    #[tokio::test]
    async fn test_clear_and_bulk_put_preserve_ids() {
        let store = DescriptorStore::open_in_memory().await.unwrap();
        store.create(new_record(&[0.1], "scan")).await.unwrap();
        store.create(new_record(&[0.2], "upload")).await.unwrap();
        let before = store.get_all().await.unwrap();

        assert_eq!(store.clear().await.unwrap(), 2);
        assert_eq!(store.count().await.unwrap(), 0);

        assert_eq!(store.bulk_put(before.clone()).await.unwrap(), 2);
        assert_eq!(store.get_all().await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_bulk_put_replaces_same_id() {
        let store = DescriptorStore::open_in_memory().await.unwrap();
        let id = store.create(new_record(&[0.1], "scan")).await.unwrap();
        let mut record = store.get_by_id(id).await.unwrap();
        record.kind = Some("upload".into());

        store.bulk_put(vec![record]).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 1);
        assert_eq!(
            store.get_by_id(id).await.unwrap().kind.as_deref(),
            Some("upload")
        );
    }

    #[tokio::test]
    async fn test_replace_all_swaps_contents() {
        let store = DescriptorStore::open_in_memory().await.unwrap();
        store.create(new_record(&[0.1], "scan")).await.unwrap();
        store.create(new_record(&[0.2], "scan")).await.unwrap();

        let mut kept = store.get_by_id(1).await.unwrap();
        kept.id = 40;
        let (removed, written) = store.replace_all(vec![kept]).await.unwrap();

        assert_eq!((removed, written), (2, 1));
        let ids: Vec<_> = store.get_all().await.unwrap().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![40]);
    }

    #[tokio::test]
    async fn test_failed_replace_all_keeps_old_contents() {
        let store = DescriptorStore::open_in_memory().await.unwrap();
        store.create(new_record(&[0.1], "scan")).await.unwrap();
        store.create(new_record(&[0.2], "upload")).await.unwrap();
        let before = store.get_all().await.unwrap();

        store
            .conn
            .call(|conn| {
                conn.execute_batch(
                    "CREATE TRIGGER reject_rejected BEFORE INSERT ON research_data
                     WHEN NEW.kind = 'rejected'
                     BEGIN SELECT RAISE(ABORT, 'rejected row'); END;",
                )?;
                Ok(())
            })
            .await
            .unwrap();

        let mut good = before[0].clone();
        good.id = 10;
        let mut bad = before[1].clone();
        bad.id = 11;
        bad.kind = Some("rejected".into());

        let err = store.replace_all(vec![good, bad]).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::WriteFailed {
                operation: "replace_all",
                ..
            }
        ));
        assert_eq!(store.get_all().await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_reopen_keeps_records_and_schema() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested").join("faces.db");

        let id = {
            let store = DescriptorStore::open(&path).await.unwrap();
            store.create(new_record(&[0.5], "scan")).await.unwrap()
        };

        let store = DescriptorStore::open(&path).await.unwrap();
        assert_eq!(store.schema_version().await.unwrap(), SCHEMA_VERSION);
        assert_eq!(store.get_by_id(id).await.unwrap().id, id);
    }

    #[tokio::test]
    async fn test_refuses_newer_schema() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("faces.db");
        {
            let conn = rusqlite::Connection::open(&path).unwrap();
            conn.pragma_update(None, "user_version", SCHEMA_VERSION + 1)
                .unwrap();
        }

        let err = DescriptorStore::open(&path).await.err().unwrap();
        assert!(matches!(
            err,
            StoreError::StorageUnavailable {
                operation: "migrate",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_corrupt_descriptor_blob_is_read_failure() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("faces.db");
        let store = DescriptorStore::open(&path).await.unwrap();
        {
            let conn = rusqlite::Connection::open(&path).unwrap();
            conn.execute(
                "INSERT INTO research_data (id, descriptor, timestamp) VALUES (9, x'000102', '2024-01-01T00:00:00.000Z')",
                [],
            )
            .unwrap();
        }

        let err = store.get_by_id(9).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::ReadFailed {
                operation: "get_by_id",
                ..
            }
        ));
    }

    #[test]
    fn test_blob_encoding() {
        let d = Descriptor::new(vec![1.0, -2.5, 0.0]);
        let blob = descriptor_to_blob(&d);
        assert_eq!(blob.len(), 12);
        assert_eq!(blob_to_descriptor(&blob).unwrap(), d);
        assert!(blob_to_descriptor(&blob[..5]).is_err());
    }
}
