//! Placeholder results served when no model could be loaded.

use facenet_core::compare::DEFAULT_SAME_THRESHOLD;
use facenet_core::{Comparison, DetectionReport, Embedding, FaceBox};
use rand::Rng;

pub const STUB_DIMENSION: usize = 128;

/// Random unit-length embedding.
pub fn embedding() -> Embedding {
    let mut rng = rand::thread_rng();
    let values: Vec<f32> = (0..STUB_DIMENSION).map(|_| rng.gen_range(-1.0..=1.0)).collect();
    Embedding::new(values).l2_normalized()
}

/// Random "probably the same person" comparison.
pub fn comparison() -> Comparison {
    let similarity: f32 = 0.7 + rand::thread_rng().gen::<f32>() * 0.3;
    Comparison {
        similarity,
        is_same: similarity > DEFAULT_SAME_THRESHOLD,
        distance: 1.0 - similarity,
        threshold: DEFAULT_SAME_THRESHOLD,
    }
}

/// Fixed single-face detection result.
pub fn detection_report() -> DetectionReport {
    DetectionReport {
        face_detected: true,
        score: 92.5,
        face_count: 1,
        confidence: None,
        clarity: None,
        face_box: Some(FaceBox { top: 50, left: 50, width: 200, height: 200 }),
        message: None,
    }
}
