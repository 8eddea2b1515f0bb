use crate::capability::CapabilitySet;
use crate::fingerprint::Fingerprint;
use crate::types::{DetectionRecord, NewRecord};
use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("record store unavailable: {0}")]
    Unavailable(String),
    #[error("record store query failed: {0}")]
    Query(String),
    #[error("record not found: {0}")]
    RecordNotFound(String),
    #[error("record {record_id} has no detection at index {index}")]
    DetectionNotFound { record_id: String, index: usize },
    #[error("record {record_id} is corrupt: {reason}")]
    Corrupt { record_id: String, reason: String },
}

/// How often a class label occurs across all stored detections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassCount {
    pub class_name: String,
    pub count: u64,
}

/// Filter for the history listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryQuery {
    /// Case-insensitive substring matched against detection class names.
    pub search: Option<String>,
    pub limit: usize,
}

/// Persistence for detection records.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// A record for `fingerprint` that already holds results for every capability
    /// in `requested`. Most recent first when several qualify.
    async fn find_cached(
        &self,
        fingerprint: &Fingerprint,
        requested: CapabilitySet,
    ) -> Result<Option<DetectionRecord>, StoreError>;

    /// Persist a record and return its id.
    async fn insert(&self, record: NewRecord) -> Result<String, StoreError>;

    /// Set `verified` on the detection at `index` of the record's detection sequence.
    async fn mark_verified(&self, record_id: &str, index: usize) -> Result<(), StoreError>;

    /// Most recent records first.
    async fn recent(&self, query: &HistoryQuery) -> Result<Vec<DetectionRecord>, StoreError>;

    /// Every class label seen in any record, sorted.
    async fn class_names(&self) -> Result<Vec<String>, StoreError>;

    /// Label frequencies over records with at least one detection, highest first.
    async fn class_counts(&self, limit: Option<usize>) -> Result<Vec<ClassCount>, StoreError>;

    /// `result_filename` of every stored record.
    async fn result_filenames(&self) -> Result<Vec<String>, StoreError>;

    /// Delete every record, returning how many were removed.
    async fn delete_all(&self) -> Result<u64, StoreError>;
}
