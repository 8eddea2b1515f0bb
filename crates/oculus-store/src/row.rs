//! Mapping between SQLite rows and detection records.

use chrono::{DateTime, SecondsFormat, Utc};
use oculus_core::{CapabilityResults, DetectionRecord, Fingerprint, StoreError};
use rusqlite::Row;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Column list shared by every record query, in [`RecordRow::from_row`] order.
pub(crate) const RECORD_COLUMNS: &str =
    "id, filename, result_filename, timestamp, file_hash, detected_objects, poses, emotions";

/// A record as read from SQLite, before JSON decoding.
#[derive(Debug)]
pub(crate) struct RecordRow {
    id: String,
    filename: String,
    result_filename: String,
    timestamp: String,
    file_hash: String,
    detected_objects: Option<String>,
    poses: Option<String>,
    emotions: Option<String>,
}

impl RecordRow {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            filename: row.get(1)?,
            result_filename: row.get(2)?,
            timestamp: row.get(3)?,
            file_hash: row.get(4)?,
            detected_objects: row.get(5)?,
            poses: row.get(6)?,
            emotions: row.get(7)?,
        })
    }

    pub fn into_record(self) -> Result<DetectionRecord, StoreError> {
        let corrupt = |reason: String| StoreError::Corrupt {
            record_id: self.id.clone(),
            reason,
        };

        let timestamp = DateTime::parse_from_rfc3339(&self.timestamp)
            .map_err(|e| corrupt(format!("timestamp: {e}")))?
            .with_timezone(&Utc);
        let file_hash = self
            .file_hash
            .parse::<Fingerprint>()
            .map_err(|e| corrupt(format!("file_hash: {e}")))?;
        let results = CapabilityResults {
            detected_objects: decode_column(self.detected_objects.as_deref())
                .map_err(|e| corrupt(format!("detected_objects: {e}")))?,
            poses: decode_column(self.poses.as_deref())
                .map_err(|e| corrupt(format!("poses: {e}")))?,
            emotions: decode_column(self.emotions.as_deref())
                .map_err(|e| corrupt(format!("emotions: {e}")))?,
        };

        Ok(DetectionRecord {
            id: self.id,
            filename: self.filename,
            result_filename: self.result_filename,
            timestamp,
            file_hash,
            results,
        })
    }
}

/// SQL NULL means the capability never ran.
pub(crate) fn decode_column<T: DeserializeOwned>(
    raw: Option<&str>,
) -> Result<Option<T>, serde_json::Error> {
    raw.map(serde_json::from_str).transpose()
}

pub(crate) fn encode_column<T: Serialize>(
    value: Option<&T>,
) -> Result<Option<String>, StoreError> {
    value
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| StoreError::Query(format!("encode results: {e}")))
}

/// Fixed-width UTC timestamps so that text order matches time order.
pub(crate) fn encode_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Escape `%`, `_` and the escape character itself for a `LIKE ... ESCAPE '\'` pattern.
pub(crate) fn like_pattern(search: &str) -> String {
    let mut pattern = String::with_capacity(search.len() + 2);
    pattern.push('%');
    for ch in search.to_lowercase().chars() {
        if matches!(ch, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(ch);
    }
    pattern.push('%');
    pattern
}
