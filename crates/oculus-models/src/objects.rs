//! YOLOv8 object detector via ONNX Runtime.
//!
//! Decodes the anchor-free `[1, 4 + classes, anchors]` head into COCO-labelled
//! boxes, then applies class-aware NMS.

use crate::preprocess::{letterbox_tensor, nms, yolo_dims, Candidate, Letterbox, Normalize, Rect};
use crate::{load_session, ModelError};
use oculus_core::filter::retain_detections;
use oculus_core::{Detection, Frame};
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

const YOLO_INPUT_SIZE: usize = 640;
const YOLO_NORMALIZE: Normalize = Normalize {
    mean: 0.0,
    std: 255.0,
    pad: 114.0,
};
/// Floor applied before the caller's threshold, matching the exporter's predictor default.
const YOLO_MIN_CONFIDENCE: f32 = 0.25;
const YOLO_IOU_THRESHOLD: f32 = 0.7;
const YOLO_MAX_DETECTIONS: usize = 300;

/// COCO class labels in model output order.
pub const COCO_CLASSES: [&str; 80] = [
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat", "dog",
    "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack", "umbrella",
    "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball", "kite",
    "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket", "bottle",
    "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich", "orange",
    "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch", "potted plant",
    "bed", "dining table", "toilet", "tv", "laptop", "mouse", "remote", "keyboard", "cell phone",
    "microwave", "oven", "toaster", "sink", "refrigerator", "book", "clock", "vase", "scissors",
    "teddy bear", "hair drier", "toothbrush",
];

#[derive(Debug, Clone, PartialEq)]
struct BoxCandidate {
    rect: Rect,
    score: f32,
    class_id: usize,
}

impl Candidate for BoxCandidate {
    fn rect(&self) -> Rect {
        self.rect
    }
    fn score(&self) -> f32 {
        self.score
    }
    fn class_id(&self) -> usize {
        self.class_id
    }
}

/// YOLOv8-based object detector.
pub struct ObjectDetector {
    session: Session,
}

impl ObjectDetector {
    pub fn load(model_path: &Path, intra_threads: usize) -> Result<Self, ModelError> {
        let session = load_session(model_path, intra_threads, "yolov8")?;
        Ok(Self { session })
    }

    /// Detect objects scoring strictly above `threshold`, highest score first.
    pub fn detect(&mut self, frame: &Frame, threshold: f32) -> Result<Vec<Detection>, ModelError> {
        let (input, letterbox) = letterbox_tensor(frame, YOLO_INPUT_SIZE, &YOLO_NORMALIZE)?;

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ModelError::InferenceFailed(format!("yolov8 output: {e}")))?;
        let (channels, anchors) = yolo_dims(shape, "yolov8", 5)?;

        let candidates = decode_boxes(data, channels, anchors, YOLO_MIN_CONFIDENCE);
        let mut kept = nms(candidates, YOLO_IOU_THRESHOLD);
        kept.truncate(YOLO_MAX_DETECTIONS);

        let detections = to_detections(kept, &letterbox, frame.width, frame.height);
        tracing::debug!(
            candidates = detections.len(),
            threshold,
            "yolov8: decoded detections"
        );
        Ok(retain_detections(detections, threshold))
    }
}

/// Decode a channel-major head: rows 0..4 are (cx, cy, w, h), the rest class scores.
fn decode_boxes(data: &[f32], channels: usize, anchors: usize, floor: f32) -> Vec<BoxCandidate> {
    let at = |c: usize, i: usize| data.get(c * anchors + i).copied().unwrap_or(0.0);
    let num_classes = channels - 4;

    (0..anchors)
        .filter_map(|i| {
            let (class_id, score) = (0..num_classes)
                .map(|c| (c, at(4 + c, i)))
                .fold((0, f32::MIN), |best, cur| if cur.1 > best.1 { cur } else { best });
            if score <= floor {
                return None;
            }
            Some(BoxCandidate {
                rect: Rect::from_center(at(0, i), at(1, i), at(2, i), at(3, i)),
                score,
                class_id,
            })
        })
        .collect()
}

fn to_detections(
    kept: Vec<BoxCandidate>,
    letterbox: &Letterbox,
    width: u32,
    height: u32,
) -> Vec<Detection> {
    kept.into_iter()
        .filter_map(|c| {
            let bbox = c.rect.unmap(letterbox).clamp(width, height).to_pixel_box();
            if !bbox.is_proper() {
                return None;
            }
            let label = COCO_CLASSES.get(c.class_id).copied().unwrap_or("unknown");
            Some(Detection::new(c.class_id, label, c.score, bbox))
        })
        .collect()
}
