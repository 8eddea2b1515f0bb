//! Facial emotion recognition: SCRFD faces classified by a FER+ network.

use crate::face::{Face, FaceDetector};
use crate::{load_session, ModelError};
use image::imageops::{self, FilterType};
use image::GrayImage;
use ndarray::Array4;
use oculus_core::filter::retain_emotions;
use oculus_core::{EmotionMark, EmotionObservation, FaceRegion, Frame};
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

const FERPLUS_INPUT_SIZE: u32 = 64;

/// FER+ output classes in model order.
pub const EMOTION_LABELS: [&str; 8] = [
    "neutral", "happy", "surprise", "sad", "angry", "disgust", "fear", "contempt",
];

/// FER+ emotion classifier over a single grayscale face crop.
pub struct EmotionClassifier {
    session: Session,
}

impl EmotionClassifier {
    pub fn load(model_path: &Path, intra_threads: usize) -> Result<Self, ModelError> {
        let session = load_session(model_path, intra_threads, "ferplus")?;
        Ok(Self { session })
    }

    /// Dominant emotion label for a face crop.
    pub fn classify(&mut self, face: &GrayImage) -> Result<&'static str, ModelError> {
        let input = face_tensor(face);
        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, logits) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ModelError::InferenceFailed(format!("ferplus output: {e}")))?;

        dominant_emotion(logits).ok_or_else(|| {
            ModelError::InferenceFailed(format!(
                "ferplus produced {} scores, expected {}",
                logits.len(),
                EMOTION_LABELS.len()
            ))
        })
    }
}

/// Face detection followed by per-face emotion classification.
pub struct EmotionRecognizer {
    faces: FaceDetector,
    classifier: EmotionClassifier,
}

impl EmotionRecognizer {
    pub fn new(faces: FaceDetector, classifier: EmotionClassifier) -> Self {
        Self { faces, classifier }
    }

    pub fn load(
        face_model: &Path,
        emotion_model: &Path,
        intra_threads: usize,
    ) -> Result<Self, ModelError> {
        Ok(Self::new(
            FaceDetector::load(face_model, intra_threads)?,
            EmotionClassifier::load(emotion_model, intra_threads)?,
        ))
    }

    /// One mark per face whose detection confidence clears the cutoff.
    pub fn detect(&mut self, frame: &Frame) -> Result<Vec<EmotionMark>, ModelError> {
        let gray = GrayImage::from_raw(frame.width, frame.height, frame.to_luma()).ok_or_else(
            || ModelError::InferenceFailed("frame buffer does not match its dimensions".into()),
        )?;

        let faces = self.faces.detect(frame)?;
        let mut observations = Vec::with_capacity(faces.len());
        for face in faces {
            let region = face_region(&face);
            if region.w <= 0 || region.h <= 0 {
                continue;
            }
            let crop = imageops::crop_imm(
                &gray,
                region.x as u32,
                region.y as u32,
                region.w as u32,
                region.h as u32,
            )
            .to_image();
            let emotion = self.classifier.classify(&crop)?;
            observations.push(EmotionObservation {
                emotion: emotion.to_string(),
                region,
                face_confidence: face.confidence,
            });
        }

        tracing::debug!(faces = observations.len(), "emotion: classified faces");
        Ok(retain_emotions(observations))
    }
}

/// `[1, 1, 64, 64]` tensor of raw 0..255 gray values.
fn face_tensor(face: &GrayImage) -> Array4<f32> {
    let resized = imageops::resize(face, FERPLUS_INPUT_SIZE, FERPLUS_INPUT_SIZE, FilterType::Triangle);
    let size = FERPLUS_INPUT_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 1, size, size));
    for (x, y, px) in resized.enumerate_pixels() {
        tensor[[0, 0, y as usize, x as usize]] = px.0[0] as f32;
    }
    tensor
}

/// Argmax over the label scores. Softmax is monotonic, so raw logits suffice.
fn dominant_emotion(scores: &[f32]) -> Option<&'static str> {
    if scores.len() != EMOTION_LABELS.len() {
        return None;
    }
    scores
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f32)>, (i, &s)| match best {
            Some((_, b)) if b >= s => best,
            _ => Some((i, s)),
        })
        .map(|(i, _)| EMOTION_LABELS[i])
}

/// Integer `[x, y, w, h]` region of an already-clamped face box.
fn face_region(face: &Face) -> FaceRegion {
    let x = face.x1.floor() as i32;
    let y = face.y1.floor() as i32;
    FaceRegion {
        x,
        y,
        w: face.x2.ceil() as i32 - x,
        h: face.y2.ceil() as i32 - y,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dominant_emotion_argmax() {
        let scores = [0.1, 0.2, 3.5, 0.0, -1.0, 0.3, 0.2, 0.1];
        assert_eq!(dominant_emotion(&scores), Some("surprise"));
    }

    #[test]
    fn test_dominant_emotion_first_wins_ties() {
        let scores = [1.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0];
        assert_eq!(dominant_emotion(&scores), Some("neutral"));
    }

    #[test]
    fn test_dominant_emotion_rejects_wrong_length() {
        assert_eq!(dominant_emotion(&[0.5; 7]), None);
        assert_eq!(dominant_emotion(&[]), None);
    }

    #[test]
    fn test_face_region_covers_fractional_box() {
        let face = Face { x1: 10.4, y1: 20.6, x2: 50.2, y2: 80.0, confidence: 0.9 };
        assert_eq!(face_region(&face), FaceRegion { x: 10, y: 20, w: 41, h: 60 });
    }

    #[test]
    fn test_face_tensor_keeps_raw_gray_values() {
        let face = GrayImage::from_pixel(32, 48, image::Luma([200u8]));
        let tensor = face_tensor(&face);
        assert_eq!(tensor.shape(), &[1, 1, 64, 64]);
        assert_eq!(tensor[[0, 0, 0, 0]], 200.0);
        assert_eq!(tensor[[0, 0, 63, 63]], 200.0);
    }

    #[test]
    fn test_labels() {
        assert_eq!(EMOTION_LABELS.len(), 8);
        assert_eq!(EMOTION_LABELS[1], "happy");
    }
}
