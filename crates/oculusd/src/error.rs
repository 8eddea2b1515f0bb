//! Mapping from pipeline failures to JSON error responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use oculus_core::{PipelineError, StoreError};
use serde_json::json;

pub type ApiResult<T> = Result<T, ApiError>;

/// A request-fatal error, rendered as `{"error": "..."}` with its status code.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> &str {
        match self {
            Self::BadRequest(msg) | Self::NotFound(msg) | Self::Internal(msg) => msg,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "error": self.message() }))).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::RecordNotFound(_) | StoreError::DetectionNotFound { .. } => {
                Self::NotFound(err.to_string())
            }
            other => {
                tracing::error!(error = %other, "record store error");
                Self::Internal("Record store error".into())
            }
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::InvalidFilename(_) => Self::BadRequest(err.to_string()),
            PipelineError::Decode(_) => {
                tracing::info!(error = %err, "rejected undecodable upload");
                Self::BadRequest("Could not read image file.".into())
            }
            PipelineError::Store(e) => e.into(),
            other => {
                tracing::error!(error = %other, "processing error");
                Self::Internal("Processing failed".into())
            }
        }
    }
}
