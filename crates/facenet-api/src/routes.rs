use crate::error::{ApiError, Result};
use crate::state::{AppState, Backend};
use crate::stub;
use axum::extract::rejection::{FormRejection, QueryRejection};
use axum::extract::{DefaultBodyLimit, Multipart, Query, State};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use facenet_core::decode;
use facenet_core::{Comparison, DetectionReport, FacePipeline};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

const STUB_MESSAGE: &str = "FaceNet API is running in dummy mode (model not found)";

pub fn router(state: AppState, body_limit: usize) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/generate-embeddings/file/", post(embed_file))
        .route("/generate-embeddings/base64/", post(embed_base64))
        .route("/detect", post(detect))
        .route("/compare", post(compare))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Serialize)]
struct EmbeddingResponse {
    embeddings: Vec<f32>,
}

/// Stub payloads are the normal shape plus `isDummy: true`.
#[derive(Serialize)]
struct Dummy<T> {
    #[serde(flatten)]
    inner: T,
    #[serde(rename = "isDummy")]
    is_dummy: bool,
}

impl<T> Dummy<T> {
    fn new(inner: T) -> Self {
        Self { inner, is_dummy: true }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ImageForm {
    image_data: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CompareForm {
    image1: Option<String>,
    image2: Option<String>,
}

async fn root(State(state): State<AppState>) -> Json<Value> {
    let message = if state.backend.is_stub() {
        STUB_MESSAGE
    } else {
        "FaceNet API is ready"
    };
    Json(json!({ "message": message }))
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    let Backend::Model { pipeline, model_name } = state.backend.as_ref() else {
        return Json(json!({ "status": "dummy_mode", "message": STUB_MESSAGE }));
    };

    let probe = pipeline.clone();
    let outcome = tokio::task::spawn_blocking(move || probe.smoke_test().map_err(|e| e.to_string()))
        .await
        .unwrap_or_else(|e| Err(e.to_string()));

    match outcome {
        Ok(detected) => Json(json!({
            "status": "ok",
            "model": model_name,
            "face_detection_test": detected,
            // Sessions are built with the CPU execution provider only.
            "gpu_available": false,
        })),
        Err(e) => {
            tracing::warn!(error = %e, "health smoke test failed");
            Json(json!({
                "status": "warning",
                "message": format!("API is running but the self-test failed: {e}"),
                "model": model_name,
            }))
        }
    }
}

async fn embed_file(State(state): State<AppState>, mut multipart: Multipart) -> Result<Json<Value>> {
    let Backend::Model { pipeline, .. } = state.backend.as_ref() else {
        return Ok(Json(json!(EmbeddingResponse { embeddings: stub::embedding().values })));
    };

    let mut upload = None;
    while let Some(field) = multipart.next_field().await? {
        if field.name() == Some("file") {
            tracing::debug!(file_name = ?field.file_name(), content_type = ?field.content_type(), "upload received");
            upload = Some(field.bytes().await?);
            break;
        }
    }
    let bytes = upload.ok_or(ApiError::MissingField("file"))?;

    let pipeline = pipeline.clone();
    let min = state.min_image_size;
    let embedding = run_blocking(move || {
        let image = decode::decode_image(&bytes)?;
        embed(&pipeline, &image, min)
    })
    .await?;
    Ok(Json(json!(EmbeddingResponse { embeddings: embedding })))
}

async fn embed_base64(
    State(state): State<AppState>,
    form: std::result::Result<Form<ImageForm>, FormRejection>,
) -> Result<Json<Value>> {
    let Backend::Model { pipeline, .. } = state.backend.as_ref() else {
        return Ok(Json(json!(EmbeddingResponse { embeddings: stub::embedding().values })));
    };

    let payload = image_field(form)?;
    let pipeline = pipeline.clone();
    let min = state.min_image_size;
    let embedding = run_blocking(move || {
        let image = decode::decode_base64_image(&payload)?;
        embed(&pipeline, &image, min)
    })
    .await?;
    Ok(Json(json!(EmbeddingResponse { embeddings: embedding })))
}

async fn detect(
    State(state): State<AppState>,
    form: std::result::Result<Form<ImageForm>, FormRejection>,
) -> Result<Json<Value>> {
    let Backend::Model { pipeline, .. } = state.backend.as_ref() else {
        return Ok(Json(json!(Dummy::new(stub::detection_report()))));
    };

    let payload = image_field(form)?;
    let pipeline = pipeline.clone();
    let min = state.min_image_size;
    let report: DetectionReport = run_blocking(move || {
        let image = decode::decode_base64_image(&payload)?;
        decode::ensure_min_size(&image, min)?;
        Ok(pipeline.detect_report(&image)?)
    })
    .await?;
    tracing::debug!(faces = report.face_count, score = report.score, "detect finished");
    Ok(Json(json!(report)))
}

/// Accepts `image1`/`image2` from a urlencoded body, falling back to the query string.
async fn compare(
    State(state): State<AppState>,
    query: std::result::Result<Query<CompareForm>, QueryRejection>,
    form: std::result::Result<Form<CompareForm>, FormRejection>,
) -> Result<Json<Value>> {
    let Backend::Model { pipeline, .. } = state.backend.as_ref() else {
        return Ok(Json(json!(Dummy::new(stub::comparison()))));
    };

    let query = query.map(|Query(q)| q).unwrap_or_default();
    let body = form.map(|Form(f)| f).unwrap_or_default();
    let first = body.image1.or(query.image1).ok_or(ApiError::MissingField("image1"))?;
    let second = body.image2.or(query.image2).ok_or(ApiError::MissingField("image2"))?;
    let (first, second) = (restore_plus(&first), restore_plus(&second));

    let pipeline = pipeline.clone();
    let min = state.min_image_size;
    let comparison: Comparison = run_blocking(move || {
        let a = embed_base64_nth(&pipeline, &first, min, 1)?;
        let b = embed_base64_nth(&pipeline, &second, min, 2)?;
        pipeline
            .compare_embeddings(&a, &b)
            .map_err(|e| ApiError::Internal(e.into()))
    })
    .await?;
    tracing::debug!(similarity = comparison.similarity, same = comparison.is_same, "compare finished");
    Ok(Json(json!(comparison)))
}

fn image_field(form: std::result::Result<Form<ImageForm>, FormRejection>) -> Result<String> {
    let Form(form) = form.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    form.image_data
        .map(|s| restore_plus(&s))
        .ok_or(ApiError::MissingField("image_data"))
}

/// Urlencoded decoding turns an unescaped `+` into a space. Base64 never
/// contains spaces, so put them back.
fn restore_plus(value: &str) -> String {
    value.replace(' ', "+")
}

fn embed(pipeline: &FacePipeline, image: &RgbImage, min: u32) -> Result<Vec<f32>> {
    decode::ensure_min_size(image, min)?;
    Ok(pipeline.extract_embedding(image)?.values)
}

fn embed_base64_nth(
    pipeline: &FacePipeline,
    payload: &str,
    min: u32,
    index: u8,
) -> Result<facenet_core::Embedding> {
    let run = || -> Result<facenet_core::Embedding> {
        let image = decode::decode_base64_image(payload)?;
        decode::ensure_min_size(&image, min)?;
        Ok(pipeline.extract_embedding(&image)?)
    };
    run().map_err(|e| e.for_image(index))
}

async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await?
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use facenet_core::decode::MIN_IMAGE_SIZE;
    use facenet_core::{
        Detection, DetectorError, Embedding, FaceDetector, FaceEmbedder, NormalizedFace,
        PipelineConfig, RecognizerError,
    };
    use http_body_util::BodyExt;
    use image::{ImageFormat, Rgb};
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tower::ServiceExt;

    /// Reports one centered face on any image with pixel variation.
    #[derive(Default)]
    struct CountingDetector {
        calls: AtomicUsize,
    }

    impl FaceDetector for CountingDetector {
        fn detect(&self, image: &RgbImage) -> std::result::Result<Vec<Detection>, DetectorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let first = image.get_pixel(0, 0);
            if image.pixels().all(|p| p == first) {
                return Ok(vec![]);
            }
            let (w, h) = (image.width() as f32, image.height() as f32);
            Ok(vec![Detection {
                x: w * 0.2,
                y: h * 0.2,
                width: w * 0.6,
                height: h * 0.6,
                confidence: 0.99,
                landmarks: None,
            }])
        }
    }

    /// Channel means of the face tensor, L2-normalized.
    struct MeanEmbedder;

    impl FaceEmbedder for MeanEmbedder {
        fn embed(&self, face: &NormalizedFace) -> std::result::Result<Embedding, RecognizerError> {
            let t = face.tensor();
            let q = |c: usize| t.iter().skip(c).step_by(4).sum::<f32>();
            Ok(Embedding::new(vec![q(0), q(1), q(2), q(3)]).l2_normalized())
        }
    }

    fn model_app() -> (Router, Arc<CountingDetector>) {
        let detector = Arc::new(CountingDetector::default());
        let pipeline = FacePipeline::new(detector.clone(), Arc::new(MeanEmbedder), PipelineConfig::default());
        let backend = Backend::Model { pipeline, model_name: "test-model".into() };
        (router(AppState::new(backend, MIN_IMAGE_SIZE), 1 << 20), detector)
    }

    fn stub_app() -> Router {
        router(AppState::new(Backend::Stub, MIN_IMAGE_SIZE), 1 << 20)
    }

    fn textured(w: u32, h: u32) -> RgbImage {
        RgbImage::from_fn(w, h, |x, y| {
            let v = if (x / 3 + y / 3) % 2 == 0 { 30 } else { 220 };
            Rgb([v, v / 2, 255 - v])
        })
    }

    fn png(image: &RgbImage) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        image.write_to(&mut buf, ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    fn b64(image: &RgbImage) -> String {
        STANDARD.encode(png(image))
    }

    fn urlencode(value: &str) -> String {
        value.replace('+', "%2B").replace('/', "%2F").replace('=', "%3D")
    }

    fn form_request(uri: &str, body: String) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body))
            .unwrap()
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_root_and_health_stub() {
        let (status, body) = send(stub_app(), get_request("/")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], STUB_MESSAGE);

        let (_, body) = send(stub_app(), get_request("/health")).await;
        assert_eq!(body["status"], "dummy_mode");
    }

    #[tokio::test]
    async fn test_health_runs_smoke_test() {
        let (app, detector) = model_app();
        let (status, body) = send(app, get_request("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["model"], "test-model");
        assert_eq!(body["face_detection_test"], true);
        assert_eq!(body["gpu_available"], false);
        assert_eq!(detector.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_base64_embedding() {
        let (app, _) = model_app();
        let body = format!("image_data={}", urlencode(&b64(&textured(200, 200))));
        let (status, body) = send(app, form_request("/generate-embeddings/base64/", body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["embeddings"].as_array().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_data_url_with_unescaped_plus() {
        let (app, _) = model_app();
        // The raw payload is sent without percent-encoding `+`.
        let payload = format!("data:image/png;base64,{}", b64(&textured(200, 200)));
        let body = format!("image_data={}", payload.replace('/', "%2F").replace('=', "%3D"));
        let (status, _) = send(app, form_request("/generate-embeddings/base64/", body)).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_grey_image_is_face_quality_error() {
        let (app, _) = model_app();
        let grey = RgbImage::from_pixel(160, 160, Rgb([128, 128, 128]));
        let body = format!("image_data={}", urlencode(&b64(&grey)));
        let (status, body) = send(app, form_request("/generate-embeddings/base64/", body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["detail"]["error_code"], "FACE_QUALITY_ERROR");
        assert!(body["request_id"].is_string());
    }

    #[tokio::test]
    async fn test_undersized_image_rejected_before_detection() {
        let (app, detector) = model_app();
        let body = format!("image_data={}", urlencode(&b64(&textured(100, 100))));
        let (status, body) = send(app, form_request("/generate-embeddings/base64/", body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["detail"].as_str().unwrap().contains("160x160"));
        assert_eq!(detector.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_invalid_base64() {
        let (app, _) = model_app();
        let (status, body) =
            send(app, form_request("/generate-embeddings/base64/", "image_data=%25%25%25".into())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["detail"], "Invalid base64 data for the image");
    }

    #[tokio::test]
    async fn test_missing_form_field() {
        let (app, _) = model_app();
        let (status, body) = send(app, form_request("/detect", "other=1".into())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["detail"], "Missing form field 'image_data'");
    }

    #[tokio::test]
    async fn test_file_upload_embedding() {
        let (app, _) = model_app();
        let boundary = "XBOUNDARYX";
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"face.png\"\r\nContent-Type: image/png\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(&png(&textured(200, 200)));
        body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

        let request = Request::builder()
            .method("POST")
            .uri("/generate-embeddings/file/")
            .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={boundary}"))
            .body(Body::from(body))
            .unwrap();
        let (status, body) = send(app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["embeddings"].as_array().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_detect_report() {
        let (app, _) = model_app();
        let body = format!("image_data={}", urlencode(&b64(&textured(200, 200))));
        let (status, body) = send(app, form_request("/detect", body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["faceDetected"], true);
        assert_eq!(body["faceCount"], 1);
        assert_eq!(body["faceBox"]["top"], 40);
        assert!(body.get("isDummy").is_none());
    }

    #[tokio::test]
    async fn test_compare_identical_images() {
        let (app, _) = model_app();
        let image = urlencode(&b64(&textured(200, 200)));
        let body = format!("image1={image}&image2={image}");
        let (status, body) = send(app, form_request("/compare", body)).await;
        assert_eq!(status, StatusCode::OK);
        assert!((body["similarity"].as_f64().unwrap() - 1.0).abs() < 1e-5);
        assert_eq!(body["isSame"], true);
        assert_eq!(body["threshold"].as_f64().unwrap() as f32, 0.8);
    }

    #[tokio::test]
    async fn test_compare_from_query_names_failing_image() {
        let (app, _) = model_app();
        let good = urlencode(&b64(&textured(200, 200)));
        let grey = urlencode(&b64(&RgbImage::from_pixel(200, 200, Rgb([90, 90, 90]))));
        let request = Request::builder()
            .method("POST")
            .uri(format!("/compare?image1={good}&image2={grey}"))
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(app, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["detail"]["message"].as_str().unwrap().contains("image 2"));
    }

    #[tokio::test]
    async fn test_compare_missing_image() {
        let (app, _) = model_app();
        let (status, body) = send(app, form_request("/compare", "image1=abc".into())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["detail"], "Missing form field 'image2'");
    }

    #[tokio::test]
    async fn test_stub_responses() {
        let (_, body) = send(stub_app(), form_request("/detect", "image_data=x".into())).await;
        assert_eq!(body["isDummy"], true);
        assert_eq!(body["score"], 92.5);
        assert_eq!(body["faceBox"]["width"], 200);

        let (_, body) = send(stub_app(), form_request("/compare", "image1=a&image2=b".into())).await;
        assert_eq!(body["isDummy"], true);
        let similarity = body["similarity"].as_f64().unwrap();
        assert!((0.7..=1.0).contains(&similarity));

        let (status, body) =
            send(stub_app(), form_request("/generate-embeddings/base64/", "image_data=x".into())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["embeddings"].as_array().unwrap().len(), 128);
    }
}
