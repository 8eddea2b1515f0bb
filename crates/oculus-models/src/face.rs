//! SCRFD face detector via ONNX Runtime.
//!
//! Anchor-free decoding over three strides, two anchors per cell, followed by NMS.
//! Only boxes are decoded; landmark heads, when exported, are ignored.

use crate::preprocess::{letterbox_tensor, nms, Candidate, Letterbox, Normalize, Rect};
use crate::{load_session, ModelError};
use oculus_core::filter::FACE_MIN_CONFIDENCE;
use oculus_core::Frame;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

const SCRFD_INPUT_SIZE: usize = 640;
const SCRFD_NORMALIZE: Normalize = Normalize {
    mean: 127.5,
    std: 128.0,
    pad: 127.5,
};
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

/// (score output index, bbox output index) for one stride.
type StrideOutputs = (usize, usize);

/// A detected face in source-frame coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Face {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
}

impl Candidate for Face {
    fn rect(&self) -> Rect {
        Rect {
            x1: self.x1,
            y1: self.y1,
            x2: self.x2,
            y2: self.y2,
        }
    }
    fn score(&self) -> f32 {
        self.confidence
    }
}

/// SCRFD-based face detector.
pub struct FaceDetector {
    session: Session,
    stride_outputs: [StrideOutputs; 3],
}

impl FaceDetector {
    pub fn load(model_path: &Path, intra_threads: usize) -> Result<Self, ModelError> {
        let session = load_session(model_path, intra_threads, "scrfd")?;

        let names: Vec<String> = session
            .outputs()
            .iter()
            .map(|o| o.name().to_string())
            .collect();
        if names.len() < 6 {
            return Err(ModelError::InferenceFailed(format!(
                "SCRFD needs score and bbox outputs for 3 strides, got {} outputs",
                names.len()
            )));
        }
        let stride_outputs = discover_outputs(&names);
        tracing::debug!(?stride_outputs, "SCRFD output mapping");

        Ok(Self {
            session,
            stride_outputs,
        })
    }

    /// Faces with confidence above the emotion cutoff, most confident first.
    pub fn detect(&mut self, frame: &Frame) -> Result<Vec<Face>, ModelError> {
        let (input, letterbox) = letterbox_tensor(frame, SCRFD_INPUT_SIZE, &SCRFD_NORMALIZE)?;
        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut faces = Vec::new();
        for (pos, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx) = self.stride_outputs[pos];
            let (_, scores) = outputs[score_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| ModelError::InferenceFailed(format!("scores stride {stride}: {e}")))?;
            let (_, bboxes) = outputs[bbox_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| ModelError::InferenceFailed(format!("bboxes stride {stride}: {e}")))?;
            faces.extend(decode_stride(
                scores,
                bboxes,
                stride,
                &letterbox,
                FACE_MIN_CONFIDENCE,
            ));
        }

        let faces = nms(faces, SCRFD_NMS_THRESHOLD)
            .into_iter()
            .map(|f| clamp_face(f, frame.width, frame.height))
            .collect();
        Ok(faces)
    }
}

/// Map stride slots to output tensors by name (`score_8`, `bbox_8`, ...), falling
/// back to the standard positional layout `[scores 8/16/32, bboxes 8/16/32, ...]`.
fn discover_outputs(names: &[String]) -> [StrideOutputs; 3] {
    let find = |prefix: &str, stride: usize| {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| *n == target)
    };

    let named: Option<Vec<StrideOutputs>> = SCRFD_STRIDES
        .iter()
        .map(|&s| Some((find("score", s)?, find("bbox", s)?)))
        .collect();

    match named {
        Some(found) => [found[0], found[1], found[2]],
        None => {
            tracing::info!(?names, "SCRFD: output names not recognized, using positional mapping");
            [(0, 3), (1, 4), (2, 5)]
        }
    }
}

fn decode_stride(
    scores: &[f32],
    bboxes: &[f32],
    stride: usize,
    letterbox: &Letterbox,
    threshold: f32,
) -> Vec<Face> {
    let grid = SCRFD_INPUT_SIZE / stride;
    let s = stride as f32;

    (0..grid * grid * SCRFD_ANCHORS_PER_CELL)
        .filter_map(|idx| {
            let score = scores.get(idx).copied().unwrap_or(0.0);
            if score <= threshold {
                return None;
            }
            let d = bboxes.get(idx * 4..idx * 4 + 4)?;
            let cell = idx / SCRFD_ANCHORS_PER_CELL;
            let cx = (cell % grid) as f32 * s;
            let cy = (cell / grid) as f32 * s;

            let rect = Rect {
                x1: cx - d[0] * s,
                y1: cy - d[1] * s,
                x2: cx + d[2] * s,
                y2: cy + d[3] * s,
            }
            .unmap(letterbox);

            Some(Face {
                x1: rect.x1,
                y1: rect.y1,
                x2: rect.x2,
                y2: rect.y2,
                confidence: score,
            })
        })
        .collect()
}

fn clamp_face(face: Face, width: u32, height: u32) -> Face {
    let r = face.rect().clamp(width, height);
    Face {
        x1: r.x1,
        y1: r.y1,
        x2: r.x2,
        y2: r.y2,
        ..face
    }
}
