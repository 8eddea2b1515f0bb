//! YOLOv8-pose keypoint estimator via ONNX Runtime.
//!
//! Head layout per anchor: (cx, cy, w, h), person score, then 17 × (x, y, visibility).

use crate::preprocess::{letterbox_tensor, nms, yolo_dims, Candidate, Letterbox, Normalize, Rect};
use crate::{load_session, ModelError};
use oculus_core::filter::retain_poses;
use oculus_core::{Frame, Pose};
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

const POSE_INPUT_SIZE: usize = 640;
const POSE_NORMALIZE: Normalize = Normalize {
    mean: 0.0,
    std: 255.0,
    pad: 114.0,
};
const POSE_CANDIDATE_FLOOR: f32 = 0.25;
const POSE_IOU_THRESHOLD: f32 = 0.7;
/// COCO skeleton: nose, eyes, ears, shoulders, elbows, wrists, hips, knees, ankles.
pub const POSE_KEYPOINTS: usize = 17;
const POSE_CHANNELS: usize = 5 + POSE_KEYPOINTS * 3;

#[derive(Debug, Clone, PartialEq)]
struct PersonCandidate {
    rect: Rect,
    score: f32,
    keypoints: [(f32, f32); POSE_KEYPOINTS],
}

impl Candidate for PersonCandidate {
    fn rect(&self) -> Rect {
        self.rect
    }
    fn score(&self) -> f32 {
        self.score
    }
}

/// YOLOv8-pose based human pose estimator.
pub struct PoseEstimator {
    session: Session,
}

impl PoseEstimator {
    pub fn load(model_path: &Path, intra_threads: usize) -> Result<Self, ModelError> {
        let session = load_session(model_path, intra_threads, "yolov8-pose")?;
        Ok(Self { session })
    }

    /// Estimate the pose of the most confident person, kept only above the pose cutoff.
    pub fn estimate(&mut self, frame: &Frame) -> Result<Vec<Pose>, ModelError> {
        let (input, letterbox) = letterbox_tensor(frame, POSE_INPUT_SIZE, &POSE_NORMALIZE)?;

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ModelError::InferenceFailed(format!("yolov8-pose output: {e}")))?;
        let (_, anchors) = yolo_dims(shape, "yolov8-pose", POSE_CHANNELS)?;

        let people = nms(decode_people(data, anchors, POSE_CANDIDATE_FLOOR), POSE_IOU_THRESHOLD);
        tracing::debug!(people = people.len(), "yolov8-pose: decoded people");

        Ok(select_poses(people, &letterbox))
    }
}

/// At most one pose per image: the highest-scoring NMS survivor, if it clears the cutoff.
fn select_poses(people: Vec<PersonCandidate>, letterbox: &Letterbox) -> Vec<Pose> {
    let poses = people
        .into_iter()
        .max_by(|a, b| a.score.partial_cmp(&b.score).unwrap_or(std::cmp::Ordering::Equal))
        .map(|p| to_pose(&p, letterbox))
        .into_iter()
        .collect();
    retain_poses(poses)
}

fn decode_people(data: &[f32], anchors: usize, floor: f32) -> Vec<PersonCandidate> {
    let at = |c: usize, i: usize| data.get(c * anchors + i).copied().unwrap_or(0.0);

    (0..anchors)
        .filter(|&i| at(4, i) > floor)
        .map(|i| PersonCandidate {
            rect: Rect::from_center(at(0, i), at(1, i), at(2, i), at(3, i)),
            score: at(4, i),
            keypoints: std::array::from_fn(|k| (at(5 + k * 3, i), at(6 + k * 3, i))),
        })
        .collect()
}

fn to_pose(person: &PersonCandidate, letterbox: &Letterbox) -> Pose {
    let keypoints = person
        .keypoints
        .iter()
        .map(|&(x, y)| {
            let (ox, oy) = letterbox.unmap(x, y);
            [ox.round() as i32, oy.round() as i32]
        })
        .collect();
    Pose {
        keypoints,
        score: person.score,
    }
}
