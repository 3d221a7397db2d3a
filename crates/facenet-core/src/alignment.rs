//! Face cropping.
//!
//! Expands the detector box into a square around its center so the crop keeps
//! some context (hairline, chin) and clamps the result to the image.

use crate::quality::Rejection;
use crate::types::Detection;
use image::RgbImage;

/// Half the side of the square crop, relative to the larger box side.
/// 0.65 equals a 30% margin over the tighter axis span.
pub const DEFAULT_MARGIN_FACTOR: f32 = 0.65;

/// Pixel region inside an image, always within bounds and non-empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Compute the clamped square crop region for a detection.
pub fn crop_region(
    detection: &Detection,
    image_width: u32,
    image_height: u32,
    margin_factor: f32,
) -> Result<CropRegion, Rejection> {
    let (cx, cy) = detection.center();
    let half = margin_factor * detection.width.max(detection.height);

    let clamp = |v: f32, max: u32| -> u32 {
        if v.is_nan() {
            0
        } else {
            v.clamp(0.0, max as f32) as u32
        }
    };

    let x0 = clamp((cx - half).floor(), image_width);
    let y0 = clamp((cy - half).floor(), image_height);
    let x1 = clamp((cx + half).ceil(), image_width);
    let y1 = clamp((cy + half).ceil(), image_height);

    if x1 <= x0 || y1 <= y0 {
        return Err(Rejection::EmptyCrop);
    }

    Ok(CropRegion { x: x0, y: y0, width: x1 - x0, height: y1 - y0 })
}

/// Crop the face for a detection out of the source image.
pub fn crop_face(
    image: &RgbImage,
    detection: &Detection,
    margin_factor: f32,
) -> Result<RgbImage, Rejection> {
    let region = crop_region(detection, image.width(), image.height(), margin_factor)?;
    tracing::debug!(?region, "cropping face");
    Ok(image::imageops::crop_imm(image, region.x, region.y, region.width, region.height).to_image())
}
