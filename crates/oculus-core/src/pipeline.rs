//! The upload pipeline: fingerprint, cache lookup, inference, persistence.
//!
//! ```text
//! RECEIVED → FINGERPRINTED → CACHE_HIT ─────────────────────────────→ RESPONDED
//!                          → CACHE_MISS → PROCESSING → PERSISTED → RESPONDED
//! ```

use crate::capability::{Capability, CapabilitySet};
use crate::filter::threshold_fraction;
use crate::fingerprint::Fingerprint;
use crate::frame::{Frame, FrameError};
use crate::provider::{InferenceProvider, ProviderError};
use crate::store::{ClassCount, HistoryQuery, RecordStore, StoreError};
use crate::types::{CapabilityResults, DetectionRecord, NewRecord};
use crate::uploads::{UploadArea, UploadError};
use chrono::Utc;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

/// Default number of records returned by a history query.
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("invalid upload filename: {0:?}")]
    InvalidFilename(String),
    #[error("could not read image file: {0}")]
    Decode(#[source] FrameError),
    #[error("{capability} failed: {source}")]
    Capability {
        capability: Capability,
        #[source]
        source: ProviderError,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("upload storage failed: {0}")]
    Upload(#[source] std::io::Error),
    #[error("worker task failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

impl From<UploadError> for PipelineError {
    fn from(err: UploadError) -> Self {
        match err {
            UploadError::InvalidFilename(name) => PipelineError::InvalidFilename(name),
            UploadError::Io(e) => PipelineError::Upload(e),
        }
    }
}

/// One upload as received from a client.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub filename: String,
    pub content: Vec<u8>,
    pub capabilities: CapabilitySet,
    /// Object-detection threshold as an integer percentage.
    pub confidence_percent: i64,
}

/// What the client gets back for an upload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadResponse {
    pub result_image: String,
    #[serde(flatten)]
    pub results: CapabilityResults,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub cached: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryPage {
    pub records: Vec<DetectionRecord>,
    pub all_object_names: Vec<String>,
    pub search_term: Option<String>,
}

/// Outcome of a history clear. The two counts are independent and may differ.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ClearSummary {
    pub deleted_count: u64,
    pub deleted_files: u64,
}

/// The cache/dedup orchestrator.
///
/// Holds the long-lived inference provider and record store it was constructed
/// with; it keeps no mutable state of its own between requests.
#[derive(Clone)]
pub struct Pipeline {
    provider: Arc<dyn InferenceProvider>,
    store: Arc<dyn RecordStore>,
    uploads: UploadArea,
    history_limit: usize,
}

impl Pipeline {
    pub fn new(
        provider: Arc<dyn InferenceProvider>,
        store: Arc<dyn RecordStore>,
        uploads: UploadArea,
    ) -> Self {
        Self {
            provider,
            store,
            uploads,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    pub fn uploads(&self) -> &UploadArea {
        &self.uploads
    }

    /// Handle one upload end to end.
    #[tracing::instrument(
        skip_all,
        fields(filename = %request.filename, capabilities = ?request.capabilities)
    )]
    pub async fn process_upload(
        &self,
        request: UploadRequest,
    ) -> Result<UploadResponse, PipelineError> {
        let UploadRequest {
            filename,
            content,
            capabilities,
            confidence_percent,
        } = request;

        let fingerprint = Fingerprint::of(&content);
        tracing::debug!(%fingerprint, bytes = content.len(), "upload fingerprinted");

        if !capabilities.is_empty() {
            if let Some(record) = self.store.find_cached(&fingerprint, capabilities).await? {
                tracing::info!(record_id = %record.id, "cache hit");
                return Ok(UploadResponse {
                    result_image: UploadArea::public_path(&record.result_filename),
                    results: record.results.project(capabilities),
                    record_id: Some(record.id),
                    cached: true,
                });
            }
            tracing::info!("cache miss");
        }

        let path = self.uploads.save(&filename, &content).await?;
        let frame = tokio::task::spawn_blocking(move || Frame::decode(&content))
            .await?
            .map_err(PipelineError::Decode)?;
        tracing::debug!(width = frame.width, height = frame.height, "upload decoded");

        let result_image = UploadArea::public_path(&filename);
        if capabilities.is_empty() {
            return Ok(UploadResponse {
                result_image,
                results: CapabilityResults::default(),
                record_id: None,
                cached: false,
            });
        }

        let threshold = threshold_fraction(confidence_percent);
        let results = self
            .run_capabilities(&frame, &path, capabilities, threshold)
            .await?;

        let record = NewRecord {
            filename: filename.clone(),
            result_filename: filename,
            timestamp: Utc::now(),
            file_hash: fingerprint,
            results: results.clone(),
        };
        let record_id = self.store.insert(record).await?;
        tracing::info!(%record_id, "record persisted");

        Ok(UploadResponse {
            result_image,
            results,
            record_id: Some(record_id),
            cached: false,
        })
    }

    /// Run every requested capability in processing order, each on its own frame copy.
    async fn run_capabilities(
        &self,
        frame: &Frame,
        path: &Path,
        capabilities: CapabilitySet,
        threshold: f32,
    ) -> Result<CapabilityResults, PipelineError> {
        let mut results = CapabilityResults::default();

        for capability in capabilities.iter() {
            let started = Instant::now();
            let found = match capability {
                Capability::ObjectDetection => {
                    let detections = self
                        .provider
                        .detect_objects(frame.clone(), threshold)
                        .await
                        .map_err(|source| PipelineError::Capability { capability, source })?;
                    let n = detections.len();
                    results.detected_objects = Some(detections);
                    n
                }
                Capability::EmotionDetection => {
                    // Emotion failures degrade to "no faces" instead of failing the upload.
                    let emotions = match self.provider.detect_emotions(path.to_path_buf()).await {
                        Ok(emotions) => emotions,
                        Err(e) => {
                            tracing::warn!(error = %e, "emotion detection failed; recording no emotions");
                            Vec::new()
                        }
                    };
                    let n = emotions.len();
                    results.emotions = Some(emotions);
                    n
                }
                Capability::PoseEstimation => {
                    let poses = self
                        .provider
                        .estimate_poses(frame.clone())
                        .await
                        .map_err(|source| PipelineError::Capability { capability, source })?;
                    let n = poses.len();
                    results.poses = Some(poses);
                    n
                }
            };
            tracing::info!(
                %capability,
                results = found,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "capability finished"
            );
        }

        Ok(results)
    }

    /// Mark one detection of a record as verified by the user.
    pub async fn verify_detection(&self, record_id: &str, index: usize) -> Result<(), PipelineError> {
        self.store.mark_verified(record_id, index).await?;
        tracing::info!(record_id, index, "detection verified");
        Ok(())
    }

    /// Most recent records, optionally filtered by a class-name substring.
    pub async fn history(&self, search: Option<&str>) -> Result<HistoryPage, PipelineError> {
        let search = search
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        let query = HistoryQuery {
            search: search.clone(),
            limit: self.history_limit,
        };
        let records = self.store.recent(&query).await?;
        let all_object_names = self.store.class_names().await?;
        Ok(HistoryPage {
            records,
            all_object_names,
            search_term: search,
        })
    }

    pub async fn analytics(&self, limit: Option<usize>) -> Result<Vec<ClassCount>, PipelineError> {
        Ok(self.store.class_counts(limit).await?)
    }

    /// Delete every record, then best-effort delete each record's stored file.
    ///
    /// File failures are logged and skipped; they never undo the record deletion.
    pub async fn clear_history(&self) -> Result<ClearSummary, PipelineError> {
        let filenames = self.store.result_filenames().await?;
        let deleted_count = self.store.delete_all().await?;

        let mut deleted_files = 0;
        for name in &filenames {
            match self.uploads.remove(name).await {
                Ok(true) => deleted_files += 1,
                Ok(false) => tracing::debug!(file = %name, "stored file already missing"),
                Err(e) => tracing::warn!(file = %name, error = %e, "failed to delete stored file"),
            }
        }

        tracing::info!(deleted_count, deleted_files, "history cleared");
        Ok(ClearSummary {
            deleted_count,
            deleted_files,
        })
    }
}
