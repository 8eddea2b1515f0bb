//! HTTP API over the upload pipeline.

use crate::error::{ApiError, ApiResult};
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Multipart, Query, State};
use axum::handler::HandlerWithoutStateExt;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use oculus_core::filter::DEFAULT_CONFIDENCE_PERCENT;
use oculus_core::uploads::UPLOAD_ROUTE;
use oculus_core::pipeline::HistoryPage;
use oculus_core::{Capability, CapabilitySet, Pipeline, UploadRequest, UploadResponse};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Pipeline,
}

pub fn router(state: AppState) -> Router {
    let uploads = ServeDir::new(state.pipeline.uploads().root())
        .not_found_service(upload_not_found.into_service());

    Router::new()
        .route("/upload", post(upload))
        .route("/verify_detection", post(verify_detection))
        .route("/history", get(history))
        .route("/history/clear", post(clear_history))
        .route("/analytics", get(analytics))
        .route("/health", get(health))
        .nest_service(UPLOAD_ROUTE, uploads)
        // No request body cap on uploads.
        .layer(DefaultBodyLimit::disable())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn upload_not_found() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "File not found")
}

/// `POST /upload`: multipart `file` plus capability flags and a confidence threshold.
async fn upload(
    State(state): State<AppState>,
    multipart: Multipart,
) -> ApiResult<Json<UploadResponse>> {
    let request = read_upload_form(multipart).await?;
    let response = state.pipeline.process_upload(request).await?;
    Ok(Json(response))
}

async fn read_upload_form(mut multipart: Multipart) -> ApiResult<UploadRequest> {
    let mut file: Option<(String, Vec<u8>)> = None;
    let mut capabilities = CapabilitySet::empty();
    let mut confidence_percent = DEFAULT_CONFIDENCE_PERCENT;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("malformed multipart body: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let content = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("could not read file: {e}")))?;
                file = Some((filename, content.to_vec()));
            }
            "detect_objects" | "detect_poses" | "detect_emotions" => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("could not read {name}: {e}")))?;
                if let Some(capability) = flag_capability(&name).filter(|_| !value.is_empty()) {
                    capabilities.insert(capability);
                }
            }
            "confidence_threshold" => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("could not read {name}: {e}")))?;
                confidence_percent = value.trim().parse().map_err(|_| {
                    ApiError::BadRequest(format!("confidence_threshold must be an integer, got {value:?}"))
                })?;
            }
            other => tracing::debug!(field = other, "ignoring unknown form field"),
        }
    }

    let (filename, content) = file.ok_or_else(|| ApiError::BadRequest("No file uploaded".into()))?;
    Ok(UploadRequest {
        filename,
        content,
        capabilities,
        confidence_percent,
    })
}

fn flag_capability(field: &str) -> Option<Capability> {
    match field {
        "detect_objects" => Some(Capability::ObjectDetection),
        "detect_poses" => Some(Capability::PoseEstimation),
        "detect_emotions" => Some(Capability::EmotionDetection),
        _ => None,
    }
}

/// `POST /verify_detection` with JSON `{"record_id": "...", "object_index": N}`.
async fn verify_detection(State(state): State<AppState>, body: Bytes) -> ApiResult<Json<Value>> {
    let data: Value = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("invalid JSON body: {e}")))?;
    let (record_id, index) = verify_target(&data)?;
    state.pipeline.verify_detection(record_id, index).await?;
    Ok(Json(json!({ "status": "success" })))
}

/// Accepts `object_index` as a JSON integer or a numeric string.
fn verify_target(data: &Value) -> ApiResult<(&str, usize)> {
    let missing = || ApiError::BadRequest("Missing record_id or object_index".into());
    let record_id = data
        .get("record_id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .ok_or_else(missing)?;
    let index = match data.get("object_index") {
        None | Some(Value::Null) => return Err(missing()),
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        Some(_) => None,
    }
    .and_then(|i| usize::try_from(i).ok())
    .ok_or_else(|| ApiError::BadRequest("object_index must be a non-negative integer".into()))?;
    Ok((record_id, index))
}

#[derive(Debug, Deserialize)]
struct HistoryParams {
    search: Option<String>,
}

async fn history(
    State(state): State<AppState>,
    Query(params): Query<HistoryParams>,
) -> ApiResult<Json<HistoryPage>> {
    let page = state.pipeline.history(params.search.as_deref()).await?;
    Ok(Json(page))
}

/// Clear failures use their own body shape: `{"status": "error", "error": ...}`.
async fn clear_history(State(state): State<AppState>) -> Response {
    match state.pipeline.clear_history().await {
        Ok(summary) => Json(json!({
            "status": "success",
            "deleted_count": summary.deleted_count,
            "deleted_files": summary.deleted_files,
        }))
        .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "clearing history failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "status": "error", "error": "Failed to clear history" })),
            )
                .into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
struct AnalyticsParams {
    limit: Option<usize>,
}

async fn analytics(
    State(state): State<AppState>,
    Query(params): Query<AnalyticsParams>,
) -> ApiResult<Json<Value>> {
    let counts = state.pipeline.analytics(params.limit).await?;
    Ok(Json(json!({ "analytics": counts })))
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
