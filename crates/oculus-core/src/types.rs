use crate::capability::{Capability, CapabilitySet};
use crate::fingerprint::Fingerprint;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Overlay colors for detections, indexed by class id modulo the palette length.
pub const DETECTION_PALETTE: [&str; 16] = [
    "#FF3838", "#FF9D97", "#FF701F", "#FFB21D", "#CFD231", "#48F21D", "#1FE045", "#1DFF70",
    "#1DFFB2", "#1D97FF", "#3838FF", "#9D97FF", "#FF1DFF", "#FF1D70", "#8E44AD", "#3498DB",
];

/// Display color for a detector class id.
pub fn detection_color(class_id: usize) -> &'static str {
    DETECTION_PALETTE[class_id % DETECTION_PALETTE.len()]
}

/// Axis-aligned rectangle in pixel coordinates, serialized as `[x1, y1, x2, y2]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "[i32; 4]", into = "[i32; 4]")]
pub struct PixelBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl PixelBox {
    /// True when the box has positive area (`x1 < x2` and `y1 < y2`).
    pub fn is_proper(&self) -> bool {
        self.x1 < self.x2 && self.y1 < self.y2
    }
}

impl From<[i32; 4]> for PixelBox {
    fn from([x1, y1, x2, y2]: [i32; 4]) -> Self {
        Self { x1, y1, x2, y2 }
    }
}

impl From<PixelBox> for [i32; 4] {
    fn from(b: PixelBox) -> Self {
        [b.x1, b.y1, b.x2, b.y2]
    }
}

/// Face region as origin plus size, serialized as `[x, y, w, h]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "[i32; 4]", into = "[i32; 4]")]
pub struct FaceRegion {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

impl From<[i32; 4]> for FaceRegion {
    fn from([x, y, w, h]: [i32; 4]) -> Self {
        Self { x, y, w, h }
    }
}

impl From<FaceRegion> for [i32; 4] {
    fn from(r: FaceRegion) -> Self {
        [r.x, r.y, r.w, r.h]
    }
}

/// One detected object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class_name: String,
    pub score: f32,
    #[serde(rename = "box")]
    pub bbox: PixelBox,
    pub color: String,
    /// Set by a user confirming the detection after the fact.
    #[serde(default)]
    pub verified: bool,
}

impl Detection {
    pub fn new(class_id: usize, class_name: impl Into<String>, score: f32, bbox: PixelBox) -> Self {
        Self {
            class_name: class_name.into(),
            score,
            bbox,
            color: detection_color(class_id).to_string(),
            verified: false,
        }
    }
}

/// One estimated human pose: a fixed-length skeleton of integer keypoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub keypoints: Vec<[i32; 2]>,
    pub score: f32,
}

/// Dominant emotion of one detected face.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmotionMark {
    pub emotion: String,
    #[serde(rename = "box")]
    pub region: FaceRegion,
}

/// Raw emotion classifier output before face-confidence filtering.
#[derive(Debug, Clone, PartialEq)]
pub struct EmotionObservation {
    pub emotion: String,
    pub region: FaceRegion,
    pub face_confidence: f32,
}

impl From<EmotionObservation> for EmotionMark {
    fn from(obs: EmotionObservation) -> Self {
        Self {
            emotion: obs.emotion,
            region: obs.region,
        }
    }
}

/// Per-capability results. `None` means the capability was not run; `Some(vec![])`
/// means it ran and found nothing.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CapabilityResults {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detected_objects: Option<Vec<Detection>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poses: Option<Vec<Pose>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emotions: Option<Vec<EmotionMark>>,
}

impl CapabilityResults {
    /// Whether results for `capability` are present.
    pub fn has(&self, capability: Capability) -> bool {
        match capability {
            Capability::ObjectDetection => self.detected_objects.is_some(),
            Capability::PoseEstimation => self.poses.is_some(),
            Capability::EmotionDetection => self.emotions.is_some(),
        }
    }

    /// Copy of the results restricted to `requested`.
    pub fn project(&self, requested: CapabilitySet) -> Self {
        Self {
            detected_objects: self
                .detected_objects
                .clone()
                .filter(|_| requested.contains(Capability::ObjectDetection)),
            poses: self
                .poses
                .clone()
                .filter(|_| requested.contains(Capability::PoseEstimation)),
            emotions: self
                .emotions
                .clone()
                .filter(|_| requested.contains(Capability::EmotionDetection)),
        }
    }
}

/// A processing event about to be persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRecord {
    pub filename: String,
    pub result_filename: String,
    pub timestamp: DateTime<Utc>,
    pub file_hash: Fingerprint,
    pub results: CapabilityResults,
}

impl NewRecord {
    pub fn with_id(self, id: impl Into<String>) -> DetectionRecord {
        DetectionRecord {
            id: id.into(),
            filename: self.filename,
            result_filename: self.result_filename,
            timestamp: self.timestamp,
            file_hash: self.file_hash,
            results: self.results,
        }
    }
}

/// A persisted processing event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionRecord {
    pub id: String,
    pub filename: String,
    pub result_filename: String,
    pub timestamp: DateTime<Utc>,
    pub file_hash: Fingerprint,
    #[serde(flatten)]
    pub results: CapabilityResults,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_detection() -> Detection {
        Detection::new(0, "person", 0.91, PixelBox::from([10, 20, 110, 220]))
    }

    #[test]
    fn test_detection_color_wraps_palette() {
        assert_eq!(detection_color(0), "#FF3838");
        assert_eq!(detection_color(16), detection_color(0));
        assert_eq!(detection_color(79), DETECTION_PALETTE[79 % 16]);
    }

    #[test]
    fn test_detection_serializes_box_as_array() {
        let json = serde_json::to_value(sample_detection()).unwrap();
        assert_eq!(json["box"], serde_json::json!([10, 20, 110, 220]));
        assert_eq!(json["class_name"], "person");
        assert_eq!(json["verified"], false);
    }

    #[test]
    fn test_detection_verified_defaults_false() {
        let json = r##"{"class_name":"dog","score":0.7,"box":[1,2,3,4],"color":"#FF3838"}"##;
        let det: Detection = serde_json::from_str(json).unwrap();
        assert!(!det.verified);
        assert_eq!((det.bbox.x1, det.bbox.x2), (1, 3));
    }

    #[test]
    fn test_pixel_box_proper() {
        assert!(PixelBox::from([0, 0, 1, 1]).is_proper());
        assert!(!PixelBox::from([5, 0, 5, 1]).is_proper());
    }

    #[test]
    fn test_emotion_mark_box_is_xywh() {
        let mark = EmotionMark {
            emotion: "happy".into(),
            region: FaceRegion { x: 4, y: 5, w: 40, h: 50 },
        };
        let json = serde_json::to_value(mark).unwrap();
        assert_eq!(json["box"], serde_json::json!([4, 5, 40, 50]));
    }

    #[test]
    fn test_results_project_drops_unrequested() {
        let results = CapabilityResults {
            detected_objects: Some(vec![sample_detection()]),
            poses: Some(vec![]),
            emotions: None,
        };
        let projected = results.project(CapabilitySet::from([Capability::ObjectDetection]));
        assert_eq!(projected.detected_objects, results.detected_objects);
        assert!(projected.poses.is_none());
        assert!(projected.emotions.is_none());
    }

    #[test]
    fn test_results_serialization_omits_absent_fields() {
        let results = CapabilityResults {
            detected_objects: None,
            poses: Some(vec![]),
            emotions: None,
        };
        let json = serde_json::to_value(results).unwrap();
        assert!(json.get("detected_objects").is_none());
        assert_eq!(json["poses"], serde_json::json!([]));
    }

    #[test]
    fn test_results_presence_per_capability() {
        let results = CapabilityResults {
            detected_objects: Some(vec![]),
            poses: None,
            emotions: Some(vec![]),
        };
        assert!(results.has(Capability::ObjectDetection));
        assert!(results.has(Capability::EmotionDetection));
        assert!(!results.has(Capability::PoseEstimation));
    }
}
