//! oculus-core — Detection records and the result cache pipeline.
//!
//! Uploaded images are fingerprinted by content, matched against stored
//! detection records, and only run through the inference models when no
//! stored record already covers every requested capability.

pub mod capability;
pub mod filter;
pub mod fingerprint;
pub mod frame;
pub mod pipeline;
pub mod provider;
pub mod store;
pub mod types;
pub mod uploads;

pub use capability::{is_cache_hit, Capability, CapabilitySet};
pub use fingerprint::Fingerprint;
pub use frame::{Frame, FrameError};
pub use pipeline::{Pipeline, PipelineError, UploadRequest, UploadResponse};
pub use provider::{InferenceProvider, ProviderError};
pub use store::{RecordStore, StoreError};
pub use types::{
    CapabilityResults, Detection, DetectionRecord, EmotionMark, EmotionObservation, FaceRegion,
    NewRecord, PixelBox, Pose,
};
pub use uploads::UploadArea;
