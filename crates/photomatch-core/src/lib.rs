//! photomatch-core — Find the photos a reference face appears in.
//!
//! Uses SCRFD for face detection and ArcFace for face embeddings, both
//! running via ONNX Runtime for CPU inference. A candidate photo matches
//! when any of its faces lies within a Euclidean distance tolerance of the
//! reference face.

pub mod alignment;
pub mod detector;
pub mod encoder;
pub mod export;
pub mod photo;
pub mod pipeline;
pub mod recognizer;
pub mod scan;
pub mod types;

pub use detector::FaceDetector;
pub use encoder::{EncodeError, EncodedFace, FaceEncoder, OnnxFaceEncoder};
pub use export::{export_matches, write_report, ExportError, ExportSummary};
pub use photo::{has_photo_extension, load_photo, PhotoError};
pub use pipeline::{
    CandidateOutcome, CandidateReport, MatchPipeline, MatchReport, PipelineError, PipelineOptions,
    ReportSummary,
};
pub use recognizer::FaceRecognizer;
pub use scan::{collect_candidates, ScanError, ScanOptions};
pub use types::{BoundingBox, DistanceMatcher, Embedding, MatchResult, Matcher, DEFAULT_TOLERANCE};

use std::path::PathBuf;

/// SCRFD detection model file name inside the model directory.
pub const SCRFD_MODEL_FILE: &str = "det_10g.onnx";
/// ArcFace recognition model file name inside the model directory.
pub const ARCFACE_MODEL_FILE: &str = "w600k_r50.onnx";

/// Default model directory: `$XDG_DATA_HOME/photomatch/models`,
/// falling back to `~/.local/share/photomatch/models`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("photomatch")
        .join("models")
}
