//! SQLite adapter: Implementation of RecordStore.
//!
//! Two tables:
//! - `patients`: one row per patient holding the current record
//! - `health_records`: upload history, one row per change of the current record
//!
//! Timestamps are stored as fixed-width RFC 3339 (microseconds, `Z`), so
//! text ordering is chronological.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};

use crate::domain::{canonical_payload, SignedRecord, StoredRecord, VerificationOutcome};
use crate::ports::{Connector, RecordStore, StoreError, UpsertOutcome};

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Backend(e.to_string())
    }
}

/// SQLite record store.
pub struct SqliteRecordStore {
    conn: Mutex<Connection>,
}

impl SqliteRecordStore {
    /// Open (or create) a database file.
    ///
    /// # Errors
    /// Returns error if database cannot be opened or initialized.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory SQLite database (for testing).
    ///
    /// # Errors
    /// Returns error if database cannot be created.
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);

        conn.execute_batch(
            r"
            CREATE TABLE IF NOT EXISTS patients (
                patient_id TEXT PRIMARY KEY,
                record_id TEXT NOT NULL,
                payload TEXT NOT NULL,
                payload_sha256 TEXT NOT NULL,
                signature TEXT NOT NULL,
                public_key TEXT NOT NULL,
                verification TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS health_records (
                record_id TEXT PRIMARY KEY,
                patient_id TEXT NOT NULL,
                payload TEXT NOT NULL,
                payload_sha256 TEXT NOT NULL,
                verification TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_health_records_patient_created
                ON health_records(patient_id, created_at DESC);
            ",
        )?;

        Ok(())
    }

    /// Run a trivial query.
    #[must_use]
    pub fn ping(&self) -> bool {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .is_ok()
    }
}

fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn payload_digest(payload: &[u8]) -> String {
    Sha256::digest(payload)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

impl RecordStore for SqliteRecordStore {
    fn upsert(&self, record: &SignedRecord) -> Result<UpsertOutcome, StoreError> {
        let payload = canonical_payload(&record.payload)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let digest = payload_digest(&payload);
        let payload = String::from_utf8(payload)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let now = timestamp(&record.received_at);
        let verification = record.verification.as_str();

        let mut conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let tx = conn.transaction()?;

        let existing: Option<(String, String, String)> = tx
            .query_row(
                "SELECT payload_sha256, verification, record_id FROM patients WHERE patient_id = ?1",
                params![record.patient_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let outcome = match existing {
            None => {
                tx.execute(
                    r"
                    INSERT INTO patients (
                        patient_id, record_id, payload, payload_sha256, signature,
                        public_key, verification, created_at, updated_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
                    ",
                    params![
                        record.patient_id,
                        record.record_id,
                        payload,
                        digest,
                        record.signature,
                        record.public_key,
                        verification,
                        now,
                    ],
                )?;
                UpsertOutcome::Inserted
            }
            Some((current, stored, current_record_id)) if current == digest => {
                let stored = VerificationOutcome::parse(&stored).ok_or_else(|| {
                    StoreError::Serialization(format!("unknown verification {stored}"))
                })?;
                if !record.verification.is_stronger_than(stored) {
                    tx.commit()?;
                    tracing::debug!("Patient record unchanged");
                    return Ok(UpsertOutcome::Unchanged);
                }
                tx.execute(
                    r"
                    UPDATE patients
                    SET signature = ?2, public_key = ?3, verification = ?4, updated_at = ?5
                    WHERE patient_id = ?1
                    ",
                    params![
                        record.patient_id,
                        record.signature,
                        record.public_key,
                        verification,
                        now,
                    ],
                )?;
                tx.execute(
                    "UPDATE health_records SET verification = ?2 WHERE record_id = ?1",
                    params![current_record_id, verification],
                )?;
                tx.commit()?;
                tracing::debug!(verification, "Patient record reverified");
                return Ok(UpsertOutcome::Reverified);
            }
            Some(_) => {
                tx.execute(
                    r"
                    UPDATE patients
                    SET record_id = ?2, payload = ?3, payload_sha256 = ?4, signature = ?5,
                        public_key = ?6, verification = ?7, updated_at = ?8
                    WHERE patient_id = ?1
                    ",
                    params![
                        record.patient_id,
                        record.record_id,
                        payload,
                        digest,
                        record.signature,
                        record.public_key,
                        verification,
                        now,
                    ],
                )?;
                UpsertOutcome::Updated
            }
        };

        tx.execute(
            r"
            INSERT INTO health_records (
                record_id, patient_id, payload, payload_sha256, verification, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ",
            params![record.record_id, record.patient_id, payload, digest, verification, now],
        )?;

        tx.commit()?;

        tracing::debug!(outcome = ?outcome, "Upserted patient record");
        Ok(outcome)
    }

    fn list_by_patient(&self, patient_id: &str, limit: usize) -> Result<Vec<StoredRecord>, StoreError> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);

        let mut stmt = conn.prepare(
            r"
            SELECT record_id, patient_id, payload, verification, created_at
            FROM health_records
            WHERE patient_id = ?1
            ORDER BY created_at DESC, rowid DESC
            LIMIT ?2
            ",
        )?;

        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt
            .query_map(params![patient_id, limit], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(record_id, patient_id, payload, verification, created_at)| {
                let payload = serde_json::from_str(&payload)
                    .map_err(|e| StoreError::Serialization(e.to_string()))?;
                let verification = VerificationOutcome::parse(&verification).ok_or_else(|| {
                    StoreError::Serialization(format!("unknown verification {verification}"))
                })?;
                let created_at = DateTime::parse_from_rfc3339(&created_at)
                    .map(|dt| dt.with_timezone(&Utc))
                    .map_err(|e| StoreError::Serialization(e.to_string()))?;

                Ok(StoredRecord {
                    record_id,
                    patient_id,
                    payload,
                    verification,
                    created_at,
                })
            })
            .collect()
    }

    fn is_connected(&self) -> bool {
        self.ping()
    }
}

/// Opens [`SqliteRecordStore`]s at a fixed path.
#[derive(Debug, Clone)]
pub struct SqliteConnector {
    path: PathBuf,
}

impl SqliteConnector {
    /// `":memory:"` opens a private in-memory database per connection.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Connector for SqliteConnector {
    type Handle = SqliteRecordStore;
    type Error = StoreError;

    fn service(&self) -> &'static str {
        "sqlite-record-store"
    }

    fn connect(&self) -> Result<SqliteRecordStore, StoreError> {
        if self.path.as_os_str() == ":memory:" {
            return SqliteRecordStore::in_memory();
        }
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Backend(e.to_string()))?;
        }
        SqliteRecordStore::open(&self.path)
    }

    fn ping(&self, handle: &SqliteRecordStore) -> bool {
        handle.ping()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::ManagedConnection;
    use chrono::Duration;
    use serde_json::json;

    fn record(patient_id: &str, payload: serde_json::Value, at: DateTime<Utc>) -> SignedRecord {
        SignedRecord::new(
            patient_id,
            payload,
            "c2ln",
            "cGs=",
            VerificationOutcome::Verified,
            at,
        )
    }

    #[test]
    fn test_upsert_is_idempotent_per_patient() {
        let store = SqliteRecordStore::in_memory().expect("Should create db");
        let now = Utc::now();

        let first = record("p1", json!({"age": 40}), now);
        assert_eq!(store.upsert(&first).unwrap(), UpsertOutcome::Inserted);

        let again = record("p1", json!({"age": 40}), now + Duration::seconds(1));
        assert_eq!(store.upsert(&again).unwrap(), UpsertOutcome::Unchanged);
        assert_eq!(store.list_by_patient("p1", 10).unwrap().len(), 1);

        let changed = record("p1", json!({"age": 41}), now + Duration::seconds(2));
        assert_eq!(store.upsert(&changed).unwrap(), UpsertOutcome::Updated);
        assert_eq!(store.list_by_patient("p1", 10).unwrap().len(), 2);
    }

    #[test]
    fn test_returning_to_earlier_payload_is_newest() {
        let store = SqliteRecordStore::in_memory().expect("Should create db");
        let t0 = Utc::now();

        store.upsert(&record("p1", json!({"v": "A"}), t0)).unwrap();
        let b = record("p1", json!({"v": "B"}), t0 + Duration::seconds(1));
        assert_eq!(store.upsert(&b).unwrap(), UpsertOutcome::Updated);
        let a_again = record("p1", json!({"v": "A"}), t0 + Duration::seconds(2));
        assert_eq!(store.upsert(&a_again).unwrap(), UpsertOutcome::Updated);

        let history = store.list_by_patient("p1", 10).unwrap();
        let values: Vec<&str> = history.iter().map(|r| r.payload["v"].as_str().unwrap()).collect();
        assert_eq!(values, vec!["A", "B", "A"]);
        assert_eq!(history[0].record_id, a_again.record_id);
    }

    #[test]
    fn test_stronger_verification_upgrades_unchanged_payload() {
        let store = SqliteRecordStore::in_memory().expect("Should create db");
        let now = Utc::now();

        let mut unverified = record("p1", json!({"x": 1}), now);
        unverified.verification = VerificationOutcome::Unverifiable;
        store.upsert(&unverified).unwrap();

        let verified = record("p1", json!({"x": 1}), now + Duration::seconds(1));
        assert_eq!(store.upsert(&verified).unwrap(), UpsertOutcome::Reverified);

        let loaded = store.list_by_patient("p1", 10).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].verification, VerificationOutcome::Verified);
        assert_eq!(loaded[0].record_id, unverified.record_id);

        // Weaker outcome never downgrades.
        let mut weaker = record("p1", json!({"x": 1}), now + Duration::seconds(2));
        weaker.verification = VerificationOutcome::Unverifiable;
        assert_eq!(store.upsert(&weaker).unwrap(), UpsertOutcome::Unchanged);
        assert_eq!(
            store.list_by_patient("p1", 1).unwrap()[0].verification,
            VerificationOutcome::Verified
        );
    }

    #[test]
    fn test_key_order_does_not_change_identity() {
        let store = SqliteRecordStore::in_memory().expect("Should create db");
        let a: serde_json::Value = serde_json::from_str(r#"{"a":1,"b":2}"#).unwrap();
        let b: serde_json::Value = serde_json::from_str(r#"{"b":2,"a":1}"#).unwrap();

        store.upsert(&record("p1", a, Utc::now())).unwrap();
        assert_eq!(
            store.upsert(&record("p1", b, Utc::now())).unwrap(),
            UpsertOutcome::Unchanged
        );
    }

    #[test]
    fn test_list_is_newest_first_and_limited() {
        let store = SqliteRecordStore::in_memory().expect("Should create db");
        let start = Utc::now();
        for i in 0..5 {
            let at = start + Duration::minutes(i);
            store.upsert(&record("p1", json!({"visit": i}), at)).unwrap();
        }
        store.upsert(&record("p2", json!({"visit": 99}), start)).unwrap();

        let records = store.list_by_patient("p1", 3).unwrap();
        let visits: Vec<i64> = records
            .iter()
            .map(|r| r.payload["visit"].as_i64().unwrap())
            .collect();
        assert_eq!(visits, vec![4, 3, 2]);
        assert!(records.iter().all(|r| r.patient_id == "p1"));
        assert!(store.list_by_patient("nobody", 10).unwrap().is_empty());
    }

    #[test]
    fn test_verification_outcome_is_persisted() {
        let store = SqliteRecordStore::in_memory().expect("Should create db");
        let mut rec = record("p1", json!({"x": 1}), Utc::now());
        rec.verification = VerificationOutcome::Unverifiable;
        store.upsert(&rec).unwrap();

        let loaded = store.list_by_patient("p1", 1).unwrap();
        assert_eq!(loaded[0].verification, VerificationOutcome::Unverifiable);
        assert_eq!(loaded[0].record_id, rec.record_id);
    }

    #[test]
    fn test_file_store_via_connector() {
        let dir = tempfile::tempdir().expect("Should create temp dir");
        let path = dir.path().join("nested").join("records.db");
        let conn = ManagedConnection::new(SqliteConnector::new(&path));

        assert!(RecordStore::is_connected(&conn));
        conn.upsert(&record("p1", json!({"x": 1}), Utc::now())).unwrap();
        assert!(path.exists());

        conn.close();
        assert_eq!(conn.list_by_patient("p1", 5).unwrap().len(), 1, "Reopened after close");
    }
}
