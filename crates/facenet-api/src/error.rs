use axum::extract::multipart::MultipartError;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use facenet_core::{DecodeError, PipelineError, Rejection};
use serde_json::{json, Value};
use thiserror::Error;
use uuid::Uuid;

pub const FACE_QUALITY_ERROR: &str = "FACE_QUALITY_ERROR";
pub const REQUEST_ID_HEADER: &str = "x-request-id";

const QUALITY_SUGGESTIONS: [&str; 4] = [
    "Take the photo in a well-lit place",
    "Keep the face centered and clearly visible",
    "Face the camera directly without tilting too much",
    "Remove glasses or anything covering the face",
];

pub type Result<T> = std::result::Result<T, ApiError>;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("missing field: {0}")]
    MissingField(&'static str),
    #[error("multipart: {0}")]
    Multipart(#[from] MultipartError),
    /// `image` is set when the request carries more than one image.
    #[error("decode: {source}")]
    Decode { image: Option<u8>, source: DecodeError },
    #[error("no usable face: {cause}")]
    NoUsableFace { image: Option<u8>, cause: Rejection },
    #[error("{0:#}")]
    Internal(#[from] anyhow::Error),
}

impl From<DecodeError> for ApiError {
    fn from(source: DecodeError) -> Self {
        Self::Decode { image: None, source }
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::NoUsableFace(cause) => Self::NoUsableFace { image: None, cause },
            other => Self::Internal(other.into()),
        }
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Internal(anyhow::anyhow!("pipeline task failed: {err}"))
    }
}

impl ApiError {
    /// Attach the 1-based image index for multi-image requests.
    pub fn for_image(self, index: u8) -> Self {
        match self {
            Self::Decode { source, .. } => Self::Decode { image: Some(index), source },
            Self::NoUsableFace { cause, .. } => Self::NoUsableFace { image: Some(index), cause },
            other => other,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    /// The `detail` member of the response body.
    fn detail(&self) -> Value {
        match self {
            Self::BadRequest(msg) => json!(msg),
            Self::MissingField(field) => json!(format!("Missing form field '{field}'")),
            Self::Multipart(err) => json!(format!("Invalid multipart body: {}", err.body_text())),
            Self::Decode { image, source } => json!(decode_message(source, *image)),
            Self::NoUsableFace { image, .. } => {
                let message = match image {
                    Some(n) => format!("No face found in image {n} or the image quality is insufficient"),
                    None => "No face found in the image or the image quality is insufficient".to_string(),
                };
                json!({
                    "message": message,
                    "error_code": FACE_QUALITY_ERROR,
                    "suggestions": QUALITY_SUGGESTIONS,
                })
            }
            Self::Internal(err) => json!(format!("Internal server error: {err:#}")),
        }
    }
}

fn decode_message(err: &DecodeError, image: Option<u8>) -> String {
    let subject = match image {
        Some(n) => format!("image {n}"),
        None => "the image".to_string(),
    };
    match err {
        DecodeError::Empty => format!("Empty file for {subject}"),
        DecodeError::Base64(_) => format!("Invalid base64 data for {subject}"),
        DecodeError::Image(_) => format!("Could not read {subject}, check the file format"),
        DecodeError::TooSmall { min, .. } => {
            format!("Image is too small ({subject}), at least {min}x{min} pixels are required")
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let request_id = Uuid::new_v4();
        let status = self.status();

        match &self {
            Self::Internal(err) => tracing::error!(%request_id, error = ?err, "request failed"),
            Self::NoUsableFace { image, cause } => {
                tracing::info!(%request_id, ?image, %cause, "rejected: no usable face")
            }
            other => tracing::info!(%request_id, error = %other, "bad request"),
        }

        let body = json!({
            "detail": self.detail(),
            "request_id": request_id.to_string(),
        });
        let mut response = (status, Json(body)).into_response();
        if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
            response.headers_mut().insert(REQUEST_ID_HEADER, value);
        }
        response
    }
}
