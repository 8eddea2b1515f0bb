use async_trait::async_trait;
use oculus_core::{
    Detection, EmotionMark, Frame, FrameError, InferenceProvider, Pose, ProviderError,
};
use oculus_models::{EmotionRecognizer, ModelError, ObjectDetector, PoseEstimator};
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("model error: {0}")]
    Model(#[from] ModelError),
    #[error("image error: {0}")]
    Frame(#[from] FrameError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

impl From<EngineError> for ProviderError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Frame(e) => ProviderError::Frame(e),
            EngineError::ChannelClosed | EngineError::Spawn(_) => {
                ProviderError::Unavailable(err.to_string())
            }
            EngineError::Model(e) => ProviderError::InferenceFailed(e.to_string()),
        }
    }
}

/// Model file locations handed to [`spawn_engine`].
#[derive(Debug, Clone)]
pub struct ModelPaths {
    pub objects: PathBuf,
    pub poses: PathBuf,
    pub faces: PathBuf,
    pub emotions: PathBuf,
}

/// Messages sent from request handlers to the engine thread.
enum EngineRequest {
    DetectObjects {
        frame: Frame,
        threshold: f32,
        reply: oneshot::Sender<Result<Vec<Detection>, EngineError>>,
    },
    EstimatePoses {
        frame: Frame,
        reply: oneshot::Sender<Result<Vec<Pose>, EngineError>>,
    },
    DetectEmotions {
        image_path: PathBuf,
        reply: oneshot::Sender<Result<Vec<EmotionMark>, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T, EngineError>>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

#[async_trait]
impl InferenceProvider for EngineHandle {
    async fn detect_objects(
        &self,
        frame: Frame,
        threshold: f32,
    ) -> Result<Vec<Detection>, ProviderError> {
        Ok(self
            .request(|reply| EngineRequest::DetectObjects {
                frame,
                threshold,
                reply,
            })
            .await?)
    }

    async fn estimate_poses(&self, frame: Frame) -> Result<Vec<Pose>, ProviderError> {
        Ok(self
            .request(|reply| EngineRequest::EstimatePoses { frame, reply })
            .await?)
    }

    async fn detect_emotions(
        &self,
        image_path: PathBuf,
    ) -> Result<Vec<EmotionMark>, ProviderError> {
        Ok(self
            .request(|reply| EngineRequest::DetectEmotions { image_path, reply })
            .await?)
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// Loads every ONNX model up front and fails fast if any is missing, then serves
/// requests one at a time. ONNX sessions are never shared across threads.
pub fn spawn_engine(paths: &ModelPaths, intra_threads: usize) -> Result<EngineHandle, EngineError> {
    let mut objects = ObjectDetector::load(&paths.objects, intra_threads)?;
    tracing::info!(path = %paths.objects.display(), "YOLOv8 object detector loaded");

    let mut poses = PoseEstimator::load(&paths.poses, intra_threads)?;
    tracing::info!(path = %paths.poses.display(), "YOLOv8 pose estimator loaded");

    let mut emotions = EmotionRecognizer::load(&paths.faces, &paths.emotions, intra_threads)?;
    tracing::info!(
        faces = %paths.faces.display(),
        emotions = %paths.emotions.display(),
        "SCRFD + FER+ emotion recognizer loaded"
    );

    let (tx, mut rx) = mpsc::channel::<EngineRequest>(16);

    std::thread::Builder::new()
        .name("oculus-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::DetectObjects {
                        frame,
                        threshold,
                        reply,
                    } => {
                        let started = Instant::now();
                        let result = objects.detect(&frame, threshold).map_err(EngineError::from);
                        tracing::debug!(elapsed = ?started.elapsed(), "object detection finished");
                        let _ = reply.send(result);
                    }
                    EngineRequest::EstimatePoses { frame, reply } => {
                        let started = Instant::now();
                        let result = poses.estimate(&frame).map_err(EngineError::from);
                        tracing::debug!(elapsed = ?started.elapsed(), "pose estimation finished");
                        let _ = reply.send(result);
                    }
                    EngineRequest::DetectEmotions { image_path, reply } => {
                        let started = Instant::now();
                        let result = run_emotions(&mut emotions, &image_path);
                        tracing::debug!(elapsed = ?started.elapsed(), "emotion detection finished");
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}

/// Emotion detection reads the stored upload from disk.
fn run_emotions(
    recognizer: &mut EmotionRecognizer,
    image_path: &Path,
) -> Result<Vec<EmotionMark>, EngineError> {
    let frame = Frame::open(image_path)?;
    Ok(recognizer.detect(&frame)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A handle whose engine thread echoes canned replies.
    fn fake_engine() -> EngineHandle {
        let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);
        std::thread::spawn(move || {
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::DetectObjects { threshold, reply, .. } => {
                        let det = Detection::new(
                            0,
                            "person",
                            threshold + 0.1,
                            oculus_core::PixelBox::from([0, 0, 5, 5]),
                        );
                        let _ = reply.send(Ok(vec![det]));
                    }
                    EngineRequest::EstimatePoses { reply, .. } => {
                        let _ = reply.send(Err(EngineError::Model(ModelError::InferenceFailed(
                            "boom".into(),
                        ))));
                    }
                    EngineRequest::DetectEmotions { image_path, reply } => {
                        let _ = reply.send(Frame::open(&image_path).map(|_| vec![]).map_err(Into::into));
                    }
                }
            }
        });
        EngineHandle { tx }
    }

    fn frame() -> Frame {
        Frame::from_rgb(vec![0; 2 * 2 * 3], 2, 2).unwrap()
    }

    #[tokio::test]
    async fn test_handle_round_trips_requests() {
        let engine = fake_engine();
        let dets = engine.detect_objects(frame(), 0.5).await.unwrap();
        assert_eq!(dets.len(), 1);
        assert!((dets[0].score - 0.6).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_model_errors_become_inference_failures() {
        let engine = fake_engine();
        let err = engine.estimate_poses(frame()).await.unwrap_err();
        assert!(matches!(err, ProviderError::InferenceFailed(_)));
    }

    #[tokio::test]
    async fn test_unreadable_image_is_frame_error() {
        let engine = fake_engine();
        let err = engine
            .detect_emotions(PathBuf::from("/nonexistent/oculus.png"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Frame(_)));
    }

    #[tokio::test]
    async fn test_closed_engine_is_unavailable() {
        let (tx, rx) = mpsc::channel::<EngineRequest>(1);
        drop(rx);
        let engine = EngineHandle { tx };
        let err = engine.estimate_poses(frame()).await.unwrap_err();
        assert!(matches!(err, ProviderError::Unavailable(_)));
    }

    #[test]
    fn test_spawn_fails_fast_without_models() {
        let paths = ModelPaths {
            objects: PathBuf::from("/nonexistent/yolov8m.onnx"),
            poses: PathBuf::from("/nonexistent/yolov8m-pose.onnx"),
            faces: PathBuf::from("/nonexistent/det_10g.onnx"),
            emotions: PathBuf::from("/nonexistent/emotion-ferplus-8.onnx"),
        };
        assert!(matches!(
            spawn_engine(&paths, 1),
            Err(EngineError::Model(ModelError::ModelNotFound(_)))
        ));
    }
}
