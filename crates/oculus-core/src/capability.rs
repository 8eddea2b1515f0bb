use crate::fingerprint::Fingerprint;
use crate::types::DetectionRecord;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One independently requestable inference operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    ObjectDetection,
    PoseEstimation,
    EmotionDetection,
}

impl Capability {
    /// Order in which capabilities run on a cache miss.
    pub const PROCESSING_ORDER: [Capability; 3] = [
        Capability::ObjectDetection,
        Capability::EmotionDetection,
        Capability::PoseEstimation,
    ];

    /// Record field holding this capability's results.
    pub fn field_name(self) -> &'static str {
        match self {
            Capability::ObjectDetection => "detected_objects",
            Capability::PoseEstimation => "poses",
            Capability::EmotionDetection => "emotions",
        }
    }

    fn bit(self) -> u8 {
        match self {
            Capability::ObjectDetection => 0b001,
            Capability::PoseEstimation => 0b010,
            Capability::EmotionDetection => 0b100,
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Capability::ObjectDetection => "object detection",
            Capability::PoseEstimation => "pose estimation",
            Capability::EmotionDetection => "emotion detection",
        })
    }
}

/// A set of requested capabilities. Zero, one, two or all three may be set.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct CapabilitySet(u8);

impl CapabilitySet {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn all() -> Self {
        Capability::PROCESSING_ORDER.into_iter().collect()
    }

    pub fn insert(&mut self, capability: Capability) {
        self.0 |= capability.bit();
    }

    pub fn with(mut self, capability: Capability) -> Self {
        self.insert(capability);
        self
    }

    pub fn contains(self, capability: Capability) -> bool {
        self.0 & capability.bit() != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    /// Members in processing order.
    pub fn iter(self) -> impl Iterator<Item = Capability> {
        Capability::PROCESSING_ORDER
            .into_iter()
            .filter(move |&c| self.contains(c))
    }
}

impl fmt::Debug for CapabilitySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        let mut set = Self::empty();
        for capability in iter {
            set.insert(capability);
        }
        set
    }
}

impl<const N: usize> From<[Capability; N]> for CapabilitySet {
    fn from(capabilities: [Capability; N]) -> Self {
        capabilities.into_iter().collect()
    }
}

/// Whether `record` can answer a request for `requested` on content `fingerprint`.
///
/// The match is conjunctive: every requested capability must already be present on
/// the record. An empty request never hits, since it bypasses the cache entirely.
pub fn is_cache_hit(
    record: &DetectionRecord,
    fingerprint: &Fingerprint,
    requested: CapabilitySet,
) -> bool {
    !requested.is_empty()
        && record.file_hash == *fingerprint
        && requested.iter().all(|c| record.results.has(c))
}
