//! Contrast enhancement — CLAHE on luma, applied before detection when enabled.

use image::{Rgb, RgbImage};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClaheParams {
    /// Tiles per axis (square grid).
    pub tiles: u32,
    /// Histogram clip limit as a fraction of tile pixel count.
    pub clip_limit: f32,
}

impl Default for ClaheParams {
    fn default() -> Self {
        Self { tiles: 8, clip_limit: 0.02 }
    }
}

/// Equalize the luma channel of an RGB image and rescale each channel by the
/// per-pixel luma gain, so hue is preserved.
pub fn enhance_contrast(image: &RgbImage, params: ClaheParams) -> RgbImage {
    let (width, height) = image.dimensions();
    let luma: Vec<u8> = image
        .pixels()
        .map(|p| {
            let [r, g, b] = p.0;
            ((r as u32 * 4899 + g as u32 * 9617 + b as u32 * 1868 + 8192) >> 14) as u8
        })
        .collect();

    let mut equalized = luma.clone();
    clahe(&mut equalized, width, height, params.tiles, params.clip_limit);

    let mut out = image.clone();
    for (i, pixel) in out.pixels_mut().enumerate() {
        let before = luma[i] as f32;
        let after = equalized[i] as f32;
        *pixel = if before > 0.0 {
            let gain = after / before;
            Rgb(pixel.0.map(|c| (c as f32 * gain).round().clamp(0.0, 255.0) as u8))
        } else {
            Rgb([equalized[i]; 3])
        };
    }
    out
}

/// Contrast-Limited Adaptive Histogram Equalization, in place.
///
/// Builds a clipped CDF per tile and blends neighbouring tile CDFs
/// bilinearly for each pixel.
pub fn clahe(gray: &mut [u8], width: u32, height: u32, tiles: u32, clip_limit: f32) {
    let w = width as usize;
    let h = height as usize;
    if w == 0 || h == 0 || tiles == 0 || gray.len() < w * h {
        return;
    }

    let t = tiles as usize;
    let tile_w = w / t;
    let tile_h = h / t;
    if tile_w == 0 || tile_h == 0 {
        return;
    }
    let tile_pixels = tile_w * tile_h;

    let mut cdfs: Vec<[f32; 256]> = Vec::with_capacity(t * t);

    for row in 0..t {
        for col in 0..t {
            let mut hist = [0u32; 256];
            for y in row * tile_h..(row + 1) * tile_h {
                for x in col * tile_w..(col + 1) * tile_w {
                    hist[gray[y * w + x] as usize] += 1;
                }
            }

            let clip = ((clip_limit * tile_pixels as f32) as u32).max(1);
            let mut excess = 0u32;
            for bin in hist.iter_mut() {
                if *bin > clip {
                    excess += *bin - clip;
                    *bin = clip;
                }
            }
            let redist = excess / 256;
            let leftover = (excess % 256) as usize;
            for (i, bin) in hist.iter_mut().enumerate() {
                *bin += redist + u32::from(i < leftover);
            }

            let mut cdf = [0f32; 256];
            let mut acc = 0f32;
            for (slot, &count) in cdf.iter_mut().zip(hist.iter()) {
                acc += count as f32;
                *slot = acc;
            }
            let cdf_min = cdf.iter().find(|&&v| v > 0.0).copied().unwrap_or(0.0);
            let denom = tile_pixels as f32 - cdf_min;
            if denom > 0.0 {
                for v in cdf.iter_mut() {
                    *v = ((*v - cdf_min) / denom * 255.0).clamp(0.0, 255.0);
                }
            }
            cdfs.push(cdf);
        }
    }

    for y in 0..h {
        for x in 0..w {
            let pixel = gray[y * w + x] as usize;

            let fy = (y as f32 / tile_h as f32 - 0.5).clamp(0.0, (t - 1) as f32);
            let fx = (x as f32 / tile_w as f32 - 0.5).clamp(0.0, (t - 1) as f32);

            let r0 = fy as usize;
            let c0 = fx as usize;
            let r1 = (r0 + 1).min(t - 1);
            let c1 = (c0 + 1).min(t - 1);
            let dy = fy - r0 as f32;
            let dx = fx - c0 as f32;

            let top = cdfs[r0 * t + c0][pixel] * (1.0 - dx) + cdfs[r0 * t + c1][pixel] * dx;
            let bot = cdfs[r1 * t + c0][pixel] * (1.0 - dx) + cdfs[r1 * t + c1][pixel] * dx;

            gray[y * w + x] = (top * (1.0 - dy) + bot * dy).round().clamp(0.0, 255.0) as u8;
        }
    }
}
