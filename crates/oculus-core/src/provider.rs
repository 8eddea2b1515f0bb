use crate::frame::{Frame, FrameError};
use crate::types::{Detection, EmotionMark, Pose};
use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("model unavailable: {0}")]
    Unavailable(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("image load failed: {0}")]
    Frame(#[from] FrameError),
}

/// The three inference capabilities behind the cache pipeline.
///
/// Implementations apply their own confidence filtering: detections scoring above
/// `threshold`, poses above [`POSE_MIN_SCORE`](crate::filter::POSE_MIN_SCORE), faces
/// above [`FACE_MIN_CONFIDENCE`](crate::filter::FACE_MIN_CONFIDENCE).
#[async_trait]
pub trait InferenceProvider: Send + Sync {
    async fn detect_objects(
        &self,
        frame: Frame,
        threshold: f32,
    ) -> Result<Vec<Detection>, ProviderError>;

    async fn estimate_poses(&self, frame: Frame) -> Result<Vec<Pose>, ProviderError>;

    /// Emotion detection reads the stored upload itself rather than a decoded frame.
    async fn detect_emotions(&self, image_path: PathBuf)
        -> Result<Vec<EmotionMark>, ProviderError>;
}
