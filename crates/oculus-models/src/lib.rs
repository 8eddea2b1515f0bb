//! oculus-models — Pretrained inference models behind the Oculus capabilities.
//!
//! YOLOv8 for object detection, YOLOv8-pose for keypoints, and SCRFD face
//! detection feeding a FER+ emotion classifier, all on ONNX Runtime.

pub mod emotion;
pub mod face;
pub mod objects;
pub mod pose;
mod preprocess;

pub use emotion::{EmotionClassifier, EmotionRecognizer};
pub use face::FaceDetector;
pub use objects::ObjectDetector;
pub use pose::PoseEstimator;

use ort::session::Session;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("model file not found: {0}; place the ONNX export in the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("{model} produced an unexpected output shape {shape:?}")]
    UnexpectedShape { model: &'static str, shape: Vec<i64> },
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Open an ONNX session, failing early when the file is missing.
pub(crate) fn load_session(
    model_path: &Path,
    intra_threads: usize,
    model: &'static str,
) -> Result<Session, ModelError> {
    if !model_path.exists() {
        return Err(ModelError::ModelNotFound(model_path.display().to_string()));
    }

    let session = Session::builder()?
        .with_intra_threads(intra_threads)?
        .commit_from_file(model_path)?;

    tracing::info!(
        model,
        path = %model_path.display(),
        inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
        outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
        "loaded ONNX model"
    );

    Ok(session)
}
