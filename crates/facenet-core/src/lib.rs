//! facenet-core — Face embedding pipeline.
//!
//! Detects faces with an SCRFD model, gates them on confidence and sharpness,
//! crops and prewhitens them, and extracts FaceNet embeddings, both models
//! running via ONNX Runtime. Detector and embedder sit behind traits so the
//! pipeline can run against mocks.

pub mod alignment;
pub mod compare;
pub mod decode;
pub mod detector;
pub mod enhance;
pub mod normalize;
pub mod pipeline;
pub mod quality;
pub mod recognizer;
pub mod types;

pub use compare::{CompareConfig, CompareError, Comparison};
pub use decode::DecodeError;
pub use detector::{DetectorError, FaceDetector, ScrfdDetector};
pub use normalize::NormalizedFace;
pub use pipeline::{FacePipeline, PipelineConfig, PipelineError};
pub use quality::{ConfidencePolicy, DetectionReport, QualityGate, Rejection};
pub use recognizer::{FaceEmbedder, FacenetEmbedder, RecognizerError};
pub use types::{Detection, Embedding, FaceBox};

use std::path::PathBuf;

/// Default detector model file name inside the model directory.
pub const DETECTOR_MODEL_FILE: &str = "det_500m.onnx";
/// Default FaceNet model file name inside the model directory.
pub const EMBEDDER_MODEL_FILE: &str = "facenet.onnx";

/// `$XDG_DATA_HOME/facenet/models`, falling back to `~/.local/share`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facenet")
        .join("models")
}
