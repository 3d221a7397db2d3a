//! Quality gating and the detect-endpoint scoring heuristic.
//!
//! Sharpness is the variance of the 3×3 Laplacian of the grayscale crop; low
//! variance means few edges, i.e. a blurry or featureless face.

use crate::types::{Detection, FaceBox};
use image::{GrayImage, Luma, RgbImage};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_MIN_CONFIDENCE: f32 = 0.95;
pub const DEFAULT_MIN_SHARPNESS: f64 = 100.0;

// Detect-endpoint score weights.
const CONFIDENCE_WEIGHT: f32 = 0.7;
const CLARITY_WEIGHT: f32 = 0.3;
const CLARITY_DIVISOR: f64 = 10.0;
const CLARITY_MAX: f64 = 100.0;

/// Why a face was not usable. Callers only ever see "no usable face"; the
/// cause is kept for logging.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Rejection {
    #[error("no face detected")]
    NoFace,
    #[error("detection confidence {confidence:.3} below {min:.3}")]
    LowConfidence { confidence: f32, min: f32 },
    #[error("face too blurry: laplacian variance {variance:.1} below {min:.1}")]
    Blurry { variance: f64, min: f64 },
    #[error("empty crop region")]
    EmptyCrop,
}

/// How strictly detector confidence is enforced.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum ConfidencePolicy {
    /// Reject detections below `min_confidence`.
    Strict { min_confidence: f32 },
    /// Accept any detection with positive confidence.
    Lenient,
}

impl Default for ConfidencePolicy {
    fn default() -> Self {
        Self::Strict { min_confidence: DEFAULT_MIN_CONFIDENCE }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityGate {
    pub confidence: ConfidencePolicy,
    /// Minimum Laplacian variance of the grayscale crop.
    pub min_sharpness: f64,
}

impl Default for QualityGate {
    fn default() -> Self {
        Self {
            confidence: ConfidencePolicy::default(),
            min_sharpness: DEFAULT_MIN_SHARPNESS,
        }
    }
}

impl QualityGate {
    /// Pre-crop check on detector confidence alone.
    pub fn check_confidence(&self, detection: &Detection) -> Result<(), Rejection> {
        let min = match self.confidence {
            ConfidencePolicy::Strict { min_confidence } => min_confidence,
            ConfidencePolicy::Lenient => 0.0,
        };
        let accepted = match self.confidence {
            ConfidencePolicy::Strict { .. } => detection.confidence >= min,
            ConfidencePolicy::Lenient => detection.confidence > 0.0,
        };
        if accepted {
            Ok(())
        } else {
            Err(Rejection::LowConfidence { confidence: detection.confidence, min })
        }
    }

    /// Post-crop sharpness check. Returns the measured variance on success.
    pub fn check_sharpness(&self, crop: &RgbImage) -> Result<f64, Rejection> {
        let variance = laplacian_variance(&to_gray(crop));
        if variance < self.min_sharpness {
            return Err(Rejection::Blurry { variance, min: self.min_sharpness });
        }
        Ok(variance)
    }
}

/// BT.601 luma with the same fixed-point rounding as OpenCV's RGB2GRAY.
pub fn to_gray(image: &RgbImage) -> GrayImage {
    let (width, height) = image.dimensions();
    GrayImage::from_fn(width, height, |x, y| {
        let [r, g, b] = image.get_pixel(x, y).0;
        let luma = (r as u32 * 4899 + g as u32 * 9617 + b as u32 * 1868 + 8192) >> 14;
        Luma([luma as u8])
    })
}

/// Population variance of the 3×3 Laplacian `[0,1,0; 1,-4,1; 0,1,0]`.
///
/// Borders use reflect-101 so every pixel contributes. Empty images yield 0.
pub fn laplacian_variance(gray: &GrayImage) -> f64 {
    let (w, h) = (gray.width() as i64, gray.height() as i64);
    if w == 0 || h == 0 {
        return 0.0;
    }

    let at = |x: i64, y: i64| -> f64 {
        gray.get_pixel(reflect101(x, w) as u32, reflect101(y, h) as u32).0[0] as f64
    };

    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;
    for y in 0..h {
        for x in 0..w {
            let lap = at(x, y - 1) + at(x, y + 1) + at(x - 1, y) + at(x + 1, y) - 4.0 * at(x, y);
            sum += lap;
            sum_sq += lap * lap;
        }
    }

    let n = (w * h) as f64;
    let mean = sum / n;
    (sum_sq / n - mean * mean).max(0.0)
}

fn reflect101(i: i64, n: i64) -> i64 {
    if n == 1 {
        return 0;
    }
    if i < 0 {
        -i
    } else if i >= n {
        2 * n - 2 - i
    } else {
        i
    }
}

/// Caller-facing result of the detect-only endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionReport {
    pub face_detected: bool,
    /// 0–100 blended score.
    pub score: f32,
    pub face_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    /// Raw Laplacian variance of the face region (single-face case only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clarity: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub face_box: Option<FaceBox>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Blend detector confidence with face-region sharpness into a 0–100 score.
///
/// `detections` must be sorted by descending confidence.
pub fn score_detections(image: &RgbImage, detections: &[Detection]) -> DetectionReport {
    let Some(first) = detections.first() else {
        return DetectionReport {
            face_detected: false,
            score: 0.0,
            face_count: 0,
            confidence: None,
            clarity: None,
            face_box: None,
            message: Some("No face detected in the image".to_string()),
        };
    };

    let confidence_pct = first.confidence * 100.0;

    if detections.len() > 1 {
        return DetectionReport {
            face_detected: true,
            score: confidence_pct,
            face_count: detections.len(),
            confidence: None,
            clarity: None,
            face_box: Some(first.raw_face_box()),
            message: Some(format!(
                "Found {} faces, please use an image with a single face",
                detections.len()
            )),
        };
    }

    let clarity = face_region(image, first).map(|roi| laplacian_variance(&to_gray(&roi)));
    let score = match clarity {
        Some(variance) => {
            let clarity_score = (variance / CLARITY_DIVISOR).clamp(0.0, CLARITY_MAX) as f32;
            CONFIDENCE_WEIGHT * confidence_pct + CLARITY_WEIGHT * clarity_score
        }
        None => confidence_pct,
    };

    DetectionReport {
        face_detected: true,
        score,
        face_count: 1,
        confidence: Some(confidence_pct),
        clarity,
        face_box: Some(first.face_box()),
        message: None,
    }
}

/// The detector box itself (no margin), clipped to the image.
fn face_region(image: &RgbImage, detection: &Detection) -> Option<RgbImage> {
    let (width, height) = image.dimensions();
    let b = detection.raw_face_box();
    let x0 = b.left.max(0) as i64;
    let y0 = b.top.max(0) as i64;
    let x1 = (b.left as i64 + b.width as i64).min(width as i64);
    let y1 = (b.top as i64 + b.height as i64).min(height as i64);
    if x1 <= x0 || y1 <= y0 {
        return None;
    }
    Some(
        image::imageops::crop_imm(image, x0 as u32, y0 as u32, (x1 - x0) as u32, (y1 - y0) as u32)
            .to_image(),
    )
}
