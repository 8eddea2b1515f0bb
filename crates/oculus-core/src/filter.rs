//! Confidence filters applied to raw model output.
//!
//! All comparisons are strict: a result scoring exactly at the cutoff is dropped.

use crate::types::{Detection, EmotionMark, EmotionObservation, Pose};

/// Default object-detection threshold, as an integer percentage.
pub const DEFAULT_CONFIDENCE_PERCENT: i64 = 60;

/// Poses scoring at or below this are discarded.
pub const POSE_MIN_SCORE: f32 = 0.8;

/// Emotion results whose face confidence is at or below this are discarded.
pub const FACE_MIN_CONFIDENCE: f32 = 0.2;

/// Convert an integer percentage into a score fraction. Out-of-range values pass through.
pub fn threshold_fraction(percent: i64) -> f32 {
    percent as f32 / 100.0
}

pub fn retain_detections(detections: Vec<Detection>, threshold: f32) -> Vec<Detection> {
    detections
        .into_iter()
        .filter(|d| d.score > threshold)
        .collect()
}

pub fn retain_poses(poses: Vec<Pose>) -> Vec<Pose> {
    poses.into_iter().filter(|p| p.score > POSE_MIN_SCORE).collect()
}

pub fn retain_emotions(observations: Vec<EmotionObservation>) -> Vec<EmotionMark> {
    observations
        .into_iter()
        .filter(|o| o.face_confidence > FACE_MIN_CONFIDENCE)
        .map(EmotionMark::from)
        .collect()
}
