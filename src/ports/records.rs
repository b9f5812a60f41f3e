//! Record store port: persistence of signed health-record uploads.

use std::sync::Arc;

use thiserror::Error;

use crate::domain::{SignedRecord, StoredRecord};

/// Errors from a record store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Record store not connected")]
    Unavailable,

    #[error("Record store error: {0}")]
    Backend(String),

    #[error("Record serialization failed: {0}")]
    Serialization(String),
}

/// What an upsert did to the patient's current record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// First record for this patient
    Inserted,
    /// Patient existed, payload changed
    Updated,
    /// Patient existed with an identical payload
    Unchanged,
    /// Identical payload, stronger verification outcome recorded
    Reverified,
}

/// Trait for record persistence.
pub trait RecordStore: Send + Sync {
    /// Insert or replace the current record for `record.patient_id`.
    ///
    /// Idempotent per patient: repeating the same upload changes nothing.
    ///
    /// # Errors
    /// Returns error if the store is unreachable or the write fails.
    fn upsert(&self, record: &SignedRecord) -> Result<UpsertOutcome, StoreError>;

    /// Up to `limit` records for a patient, newest first.
    ///
    /// # Errors
    /// Returns error if the store is unreachable or the read fails.
    fn list_by_patient(&self, patient_id: &str, limit: usize) -> Result<Vec<StoredRecord>, StoreError>;

    /// Liveness check.
    fn is_connected(&self) -> bool {
        true
    }

    /// Release backend resources.
    fn close(&self) {}
}

impl<T: RecordStore + ?Sized> RecordStore for Arc<T> {
    fn upsert(&self, record: &SignedRecord) -> Result<UpsertOutcome, StoreError> {
        (**self).upsert(record)
    }

    fn list_by_patient(&self, patient_id: &str, limit: usize) -> Result<Vec<StoredRecord>, StoreError> {
        (**self).list_by_patient(patient_id, limit)
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    fn close(&self) {
        (**self).close();
    }
}
