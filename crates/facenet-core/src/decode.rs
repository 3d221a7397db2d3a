//! Image decoding — raw upload bytes or base64 payloads into RGB pixels.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use image::RgbImage;
use thiserror::Error;

/// Smallest width/height accepted by the pipeline (the FaceNet input size).
pub const MIN_IMAGE_SIZE: u32 = 160;

const DATA_URL_MARKER: &str = "data:";
const BASE64_MARKER: &str = ";base64,";

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("empty image payload")]
    Empty,
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("unreadable image: {0}")]
    Image(#[from] image::ImageError),
    #[error("image too small: {width}x{height} (minimum {min}x{min} pixels)")]
    TooSmall { width: u32, height: u32, min: u32 },
}

/// Decode an encoded image (PNG, JPEG, ...) into 8-bit RGB.
///
/// Alpha is dropped and grayscale is expanded to three channels.
pub fn decode_image(bytes: &[u8]) -> Result<RgbImage, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }
    let image = image::load_from_memory(bytes)?;
    tracing::debug!(
        width = image.width(),
        height = image.height(),
        color = ?image.color(),
        "decoded image"
    );
    Ok(image.to_rgb8())
}

/// Decode a base64 image, accepting both bare payloads and `data:` URLs.
pub fn decode_base64_image(payload: &str) -> Result<RgbImage, DecodeError> {
    let bytes = decode_base64(payload)?;
    decode_image(&bytes)
}

/// Strip an optional data-URL prefix and whitespace, then decode base64.
pub fn decode_base64(payload: &str) -> Result<Vec<u8>, DecodeError> {
    let body = strip_data_url(payload);
    let compact: String = body.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    if compact.is_empty() {
        return Err(DecodeError::Empty);
    }
    Ok(STANDARD.decode(compact.as_bytes())?)
}

fn strip_data_url(payload: &str) -> &str {
    if payload.contains(DATA_URL_MARKER) {
        if let Some((_, body)) = payload.split_once(BASE64_MARKER) {
            return body;
        }
    }
    payload
}

/// Reject images smaller than `min` on either axis.
pub fn ensure_min_size(image: &RgbImage, min: u32) -> Result<(), DecodeError> {
    let (width, height) = image.dimensions();
    if width < min || height < min {
        return Err(DecodeError::TooSmall { width, height, min });
    }
    Ok(())
}
