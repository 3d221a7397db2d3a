//! The face-quality-gated embedding pipeline.
//!
//! detect → confidence gate → crop → sharpness gate → normalize → embed,
//! with an optional CLAHE pass before detection.

use crate::alignment::{self, DEFAULT_MARGIN_FACTOR};
use crate::compare::{self, CompareConfig, CompareError, Comparison};
use crate::detector::{DetectorError, FaceDetector, ScrfdDetector};
use crate::enhance::{self, ClaheParams};
use crate::normalize::{self, ResizeFilter};
use crate::quality::{self, DetectionReport, QualityGate, Rejection};
use crate::recognizer::{FaceEmbedder, FacenetEmbedder, RecognizerError};
use crate::types::{Detection, Embedding};
use image::{Rgb, RgbImage};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// Externally a single outcome; the cause is kept for logs.
    #[error("no usable face: {0}")]
    NoUsableFace(Rejection),
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
}

impl From<Rejection> for PipelineError {
    fn from(rejection: Rejection) -> Self {
        Self::NoUsableFace(rejection)
    }
}

/// Tunables of the pipeline. Defaults follow the strict production variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub quality: QualityGate,
    /// Half-side of the square crop relative to the larger box side.
    pub margin_factor: f32,
    pub resize_filter: ResizeFilter,
    /// Run CLAHE on the image before detection.
    pub contrast_enhancement: bool,
    pub clahe: ClaheParams,
    pub compare: CompareConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            quality: QualityGate::default(),
            margin_factor: DEFAULT_MARGIN_FACTOR,
            resize_filter: ResizeFilter::default(),
            contrast_enhancement: false,
            clahe: ClaheParams::default(),
            compare: CompareConfig::default(),
        }
    }
}

/// Detector + embedder + configuration, shared read-only across requests.
#[derive(Clone)]
pub struct FacePipeline {
    detector: Arc<dyn FaceDetector>,
    embedder: Arc<dyn FaceEmbedder>,
    config: PipelineConfig,
}

impl FacePipeline {
    pub fn new(
        detector: Arc<dyn FaceDetector>,
        embedder: Arc<dyn FaceEmbedder>,
        config: PipelineConfig,
    ) -> Self {
        Self { detector, embedder, config }
    }

    /// Load the ONNX detector and FaceNet embedder from disk.
    pub fn load(
        detector_path: &Path,
        embedder_path: &Path,
        config: PipelineConfig,
        intra_threads: usize,
    ) -> Result<Self, PipelineError> {
        let detector = ScrfdDetector::load(detector_path, intra_threads)?;
        let embedder = FacenetEmbedder::load(embedder_path, intra_threads)?;
        Ok(Self::new(Arc::new(detector), Arc::new(embedder), config))
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    fn prepare<'a>(&self, image: &'a RgbImage) -> Cow<'a, RgbImage> {
        if self.config.contrast_enhancement {
            Cow::Owned(enhance::enhance_contrast(image, self.config.clahe))
        } else {
            Cow::Borrowed(image)
        }
    }

    /// Run the full pipeline on one image and return the face embedding.
    pub fn extract_embedding(&self, image: &RgbImage) -> Result<Embedding, PipelineError> {
        let image = self.prepare(image);
        let detections = self.detector.detect(&image)?;
        tracing::debug!(faces = detections.len(), "detection finished");

        let result = self.embed_first(&image, detections.first());
        if let Err(PipelineError::NoUsableFace(cause)) = &result {
            tracing::info!(%cause, faces = detections.len(), "no usable face");
        }
        result
    }

    fn embed_first(
        &self,
        image: &RgbImage,
        detection: Option<&Detection>,
    ) -> Result<Embedding, PipelineError> {
        let detection = detection.ok_or(Rejection::NoFace)?;
        self.config.quality.check_confidence(detection)?;

        let crop = alignment::crop_face(image, detection, self.config.margin_factor)?;
        let sharpness = self.config.quality.check_sharpness(&crop)?;
        tracing::debug!(
            confidence = detection.confidence,
            sharpness,
            crop_width = crop.width(),
            crop_height = crop.height(),
            "face accepted"
        );

        let face = normalize::normalize_face(&crop, self.config.resize_filter);
        Ok(self.embedder.embed(&face)?)
    }

    /// Detect faces and build the caller-facing detection score.
    pub fn detect_report(&self, image: &RgbImage) -> Result<DetectionReport, PipelineError> {
        let image = self.prepare(image);
        let detections = self.detector.detect(&image)?;
        Ok(quality::score_detections(&image, &detections))
    }

    pub fn compare_embeddings(&self, a: &Embedding, b: &Embedding) -> Result<Comparison, CompareError> {
        compare::compare(a, b, &self.config.compare)
    }

    /// Run the detector on a drawn 160×160 face and report whether it fired.
    pub fn smoke_test(&self) -> Result<bool, DetectorError> {
        let faces = self.detector.detect(&synthetic_face())?;
        tracing::debug!(faces = faces.len(), "detector smoke test");
        Ok(!faces.is_empty())
    }
}

/// White canvas with a grey face disc, two dark eyes and a mouth arc.
pub fn synthetic_face() -> RgbImage {
    let mut img = RgbImage::from_pixel(160, 160, Rgb([255, 255, 255]));
    fill_disc(&mut img, (80.0, 80.0), 60.0, Rgb([200, 200, 200]));
    fill_disc(&mut img, (60.0, 65.0), 10.0, Rgb([0, 0, 0]));
    fill_disc(&mut img, (100.0, 65.0), 10.0, Rgb([0, 0, 0]));

    // Lower half of an ellipse (20 × 10 radii), 2px stroke.
    for (x, y, pixel) in img.enumerate_pixels_mut() {
        let dx = (x as f32 - 80.0) / 20.0;
        let dy = (y as f32 - 100.0) / 10.0;
        let r = (dx * dx + dy * dy).sqrt();
        if y as f32 >= 100.0 && (r - 1.0).abs() < 0.08 {
            *pixel = Rgb([0, 0, 0]);
        }
    }
    img
}

fn fill_disc(img: &mut RgbImage, center: (f32, f32), radius: f32, color: Rgb<u8>) {
    for (x, y, pixel) in img.enumerate_pixels_mut() {
        let dx = x as f32 - center.0;
        let dy = y as f32 - center.1;
        if dx * dx + dy * dy <= radius * radius {
            *pixel = color;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::NormalizedFace;
    use crate::quality::ConfidencePolicy;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Returns a fixed list of detections.
    struct FixedDetector(Vec<Detection>);

    impl FaceDetector for FixedDetector {
        fn detect(&self, _image: &RgbImage) -> Result<Vec<Detection>, DetectorError> {
            Ok(self.0.clone())
        }
    }

    struct FailingDetector;

    impl FaceDetector for FailingDetector {
        fn detect(&self, _image: &RgbImage) -> Result<Vec<Detection>, DetectorError> {
            Err(DetectorError::InferenceFailed("boom".into()))
        }
    }

    /// Summarizes the face tensor into 4 values and records every call.
    #[derive(Default)]
    struct RecordingEmbedder {
        calls: AtomicUsize,
        last_shape: Mutex<Vec<usize>>,
    }

    impl FaceEmbedder for RecordingEmbedder {
        fn embed(&self, face: &NormalizedFace) -> Result<Embedding, RecognizerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_shape.lock().unwrap() = face.tensor().shape().to_vec();
            let t = face.tensor();
            let q = |c: usize| t.iter().skip(c).step_by(4).sum::<f32>();
            Ok(Embedding::new(vec![q(0), q(1), q(2), q(3)]).l2_normalized())
        }
    }

    fn det(confidence: f32) -> Detection {
        Detection { x: 60.0, y: 60.0, width: 80.0, height: 80.0, confidence, landmarks: None }
    }

    fn textured(w: u32, h: u32) -> RgbImage {
        RgbImage::from_fn(w, h, |x, y| {
            let v = if (x / 3 + y / 3) % 2 == 0 { 30 } else { 220 };
            Rgb([v, v / 2, 255 - v])
        })
    }

    fn pipeline(dets: Vec<Detection>, config: PipelineConfig) -> (FacePipeline, Arc<RecordingEmbedder>) {
        let embedder = Arc::new(RecordingEmbedder::default());
        let p = FacePipeline::new(Arc::new(FixedDetector(dets)), embedder.clone(), config);
        (p, embedder)
    }

    #[test]
    fn test_embedding_success() {
        let (p, embedder) = pipeline(vec![det(0.99)], PipelineConfig::default());
        let e = p.extract_embedding(&textured(200, 200)).unwrap();
        assert_eq!(e.len(), 4);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
        assert_eq!(*embedder.last_shape.lock().unwrap(), vec![160, 160, 3]);
    }

    #[test]
    fn test_no_detection_is_no_usable_face() {
        let (p, embedder) = pipeline(vec![], PipelineConfig::default());
        let err = p.extract_embedding(&textured(200, 200)).unwrap_err();
        assert!(matches!(err, PipelineError::NoUsableFace(Rejection::NoFace)));
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_low_confidence_rejected() {
        let (p, embedder) = pipeline(vec![det(0.9)], PipelineConfig::default());
        let err = p.extract_embedding(&textured(200, 200)).unwrap_err();
        assert!(matches!(err, PipelineError::NoUsableFace(Rejection::LowConfidence { .. })));
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_lenient_policy_accepts_low_confidence() {
        let mut config = PipelineConfig::default();
        config.quality.confidence = ConfidencePolicy::Lenient;
        let (p, _) = pipeline(vec![det(0.3)], config);
        assert!(p.extract_embedding(&textured(200, 200)).is_ok());
    }

    #[test]
    fn test_blurry_face_rejected() {
        let (p, _) = pipeline(vec![det(0.99)], PipelineConfig::default());
        let flat = RgbImage::from_pixel(200, 200, Rgb([120, 110, 100]));
        let err = p.extract_embedding(&flat).unwrap_err();
        assert!(matches!(err, PipelineError::NoUsableFace(Rejection::Blurry { .. })));
    }

    #[test]
    fn test_detection_outside_image_is_empty_crop() {
        let mut d = det(0.99);
        d.x = 1000.0;
        d.y = 1000.0;
        let (p, _) = pipeline(vec![d], PipelineConfig::default());
        let err = p.extract_embedding(&textured(200, 200)).unwrap_err();
        assert!(matches!(err, PipelineError::NoUsableFace(Rejection::EmptyCrop)));
        assert_eq!(err.to_string(), "no usable face: empty crop region");
    }

    #[test]
    fn test_detector_failure_propagates() {
        let p = FacePipeline::new(
            Arc::new(FailingDetector),
            Arc::new(RecordingEmbedder::default()),
            PipelineConfig::default(),
        );
        assert!(matches!(
            p.extract_embedding(&textured(200, 200)),
            Err(PipelineError::Detector(_))
        ));
        assert!(p.smoke_test().is_err());
    }

    #[test]
    fn test_uses_first_detection_only() {
        let mut second = det(0.2);
        second.x = 5000.0;
        let (p, embedder) = pipeline(vec![det(0.99), second], PipelineConfig::default());
        assert!(p.extract_embedding(&textured(200, 200)).is_ok());
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_identical_images_compare_as_same() {
        let (p, _) = pipeline(vec![det(0.99)], PipelineConfig::default());
        let img = textured(220, 200);
        let a = p.extract_embedding(&img).unwrap();
        let b = p.extract_embedding(&img).unwrap();
        let c = p.compare_embeddings(&a, &b).unwrap();
        assert!((c.similarity - 1.0).abs() < 1e-6);
        assert!(c.is_same);
    }

    #[test]
    fn test_contrast_enhancement_still_embeds() {
        let config = PipelineConfig { contrast_enhancement: true, ..Default::default() };
        let (p, _) = pipeline(vec![det(0.99)], config);
        assert!(p.extract_embedding(&textured(200, 200)).is_ok());
    }

    #[test]
    fn test_detect_report_uses_detector_output() {
        let (p, _) = pipeline(vec![det(0.9)], PipelineConfig::default());
        let report = p.detect_report(&textured(200, 200)).unwrap();
        assert!(report.face_detected);
        assert_eq!(report.face_count, 1);
        assert!(report.score > 60.0);
    }

    #[test]
    fn test_smoke_test_reports_detection() {
        let (p, _) = pipeline(vec![det(0.9)], PipelineConfig::default());
        assert!(p.smoke_test().unwrap());
        let (p, _) = pipeline(vec![], PipelineConfig::default());
        assert!(!p.smoke_test().unwrap());
    }

    #[test]
    fn test_synthetic_face_features() {
        let img = synthetic_face();
        assert_eq!(img.dimensions(), (160, 160));
        assert_eq!(img.get_pixel(0, 0).0, [255, 255, 255]);
        assert_eq!(img.get_pixel(80, 80).0, [200, 200, 200]);
        assert_eq!(img.get_pixel(60, 65).0, [0, 0, 0]);
        assert_eq!(img.get_pixel(100, 65).0, [0, 0, 0]);
    }

    #[test]
    fn test_config_deserializes_with_defaults() {
        let config: PipelineConfig = serde_json::from_str(
            r#"{"margin_factor": 0.5, "quality": {"confidence": {"mode": "lenient"}}}"#,
        )
        .unwrap();
        assert_eq!(config.margin_factor, 0.5);
        assert_eq!(config.quality.confidence, ConfidencePolicy::Lenient);
        assert_eq!(config.quality.min_sharpness, quality::DEFAULT_MIN_SHARPNESS);
        assert_eq!(config.resize_filter, ResizeFilter::Cubic);
    }
}
