//! Resize and prewhiten face crops into the FaceNet input tensor.

use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array3;
use serde::{Deserialize, Serialize};

/// FaceNet input side length.
pub const FACE_SIZE: usize = 160;
/// Values in one normalized face (160 × 160 × 3).
pub const FACE_VALUES: usize = FACE_SIZE * FACE_SIZE * 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResizeFilter {
    #[default]
    Cubic,
    Linear,
    Nearest,
}

impl ResizeFilter {
    fn filter_type(self) -> FilterType {
        match self {
            Self::Cubic => FilterType::CatmullRom,
            Self::Linear => FilterType::Triangle,
            Self::Nearest => FilterType::Nearest,
        }
    }
}

impl std::str::FromStr for ResizeFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cubic" => Ok(Self::Cubic),
            "linear" => Ok(Self::Linear),
            "nearest" => Ok(Self::Nearest),
            other => Err(format!("unknown resize filter: {other}")),
        }
    }
}

/// A prewhitened 160×160×3 (HWC) face tensor.
///
/// Only [`normalize_face`] constructs it, so the shape is always exact.
#[derive(Debug, Clone)]
pub struct NormalizedFace(Array3<f32>);

impl NormalizedFace {
    pub fn tensor(&self) -> &Array3<f32> {
        &self.0
    }

    pub fn into_tensor(self) -> Array3<f32> {
        self.0
    }
}

/// Resize a crop to 160×160 and whiten it: `(x - mean) / max(std, 1/sqrt(n))`.
pub fn normalize_face(crop: &RgbImage, filter: ResizeFilter) -> NormalizedFace {
    let resized = if crop.dimensions() == (FACE_SIZE as u32, FACE_SIZE as u32) {
        crop.clone()
    } else {
        imageops::resize(crop, FACE_SIZE as u32, FACE_SIZE as u32, filter.filter_type())
    };

    let mut tensor = Array3::<f32>::zeros((FACE_SIZE, FACE_SIZE, 3));
    for (x, y, pixel) in resized.enumerate_pixels() {
        for c in 0..3 {
            tensor[[y as usize, x as usize, c]] = pixel.0[c] as f32;
        }
    }

    prewhiten(&mut tensor);
    NormalizedFace(tensor)
}

/// Per-image whitening in place. The std floor keeps constant images finite.
fn prewhiten(tensor: &mut Array3<f32>) {
    let n = tensor.len() as f64;
    if n == 0.0 {
        return;
    }
    let mean = tensor.iter().map(|&v| v as f64).sum::<f64>() / n;
    let variance = tensor.iter().map(|&v| (v as f64 - mean).powi(2)).sum::<f64>() / n;
    let std_adj = variance.sqrt().max(1.0 / n.sqrt());

    tensor.mapv_inplace(|v| ((v as f64 - mean) / std_adj) as f32);
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn stats(t: &Array3<f32>) -> (f64, f64) {
        let n = t.len() as f64;
        let mean = t.iter().map(|&v| v as f64).sum::<f64>() / n;
        let var = t.iter().map(|&v| (v as f64 - mean).powi(2)).sum::<f64>() / n;
        (mean, var.sqrt())
    }

    #[test]
    fn test_output_shape_from_any_crop() {
        for (w, h) in [(37, 91), (160, 160), (400, 300), (1, 1)] {
            let crop = RgbImage::from_fn(w, h, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 9]));
            let face = normalize_face(&crop, ResizeFilter::Cubic);
            assert_eq!(face.tensor().shape(), &[FACE_SIZE, FACE_SIZE, 3]);
            assert_eq!(face.tensor().len(), FACE_VALUES);
        }
    }

    #[test]
    fn test_whitened_mean_zero_std_one() {
        let crop = RgbImage::from_fn(90, 120, |x, y| {
            Rgb([(x * 3 % 256) as u8, (y * 7 % 256) as u8, ((x * y) % 256) as u8])
        });
        for filter in [ResizeFilter::Cubic, ResizeFilter::Linear, ResizeFilter::Nearest] {
            let face = normalize_face(&crop, filter);
            let (mean, std) = stats(face.tensor());
            assert!(mean.abs() < 1e-4, "{filter:?} mean = {mean}");
            assert!((std - 1.0).abs() < 1e-3, "{filter:?} std = {std}");
        }
    }

    #[test]
    fn test_constant_crop_is_all_zero() {
        let crop = RgbImage::from_pixel(50, 70, Rgb([123, 123, 123]));
        let face = normalize_face(&crop, ResizeFilter::Cubic);
        assert!(face.tensor().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_std_floor_constant() {
        let floor = 1.0 / (FACE_VALUES as f64).sqrt();
        assert!((floor - 0.003608).abs() < 1e-6);
    }

    #[test]
    fn test_layout_is_hwc() {
        let crop = RgbImage::from_fn(160, 160, |x, _| if x < 80 { Rgb([0, 0, 0]) } else { Rgb([255, 255, 255]) });
        let face = normalize_face(&crop, ResizeFilter::Nearest);
        let t = face.tensor();
        assert!(t[[0, 0, 0]] < 0.0);
        assert!(t[[0, 159, 2]] > 0.0);
        assert_eq!(t[[5, 10, 0]], t[[5, 10, 2]]);
    }

    #[test]
    fn test_resize_filter_from_str() {
        assert_eq!("Cubic".parse::<ResizeFilter>(), Ok(ResizeFilter::Cubic));
        assert_eq!("linear".parse::<ResizeFilter>(), Ok(ResizeFilter::Linear));
        assert!("lanczos".parse::<ResizeFilter>().is_err());
    }
}
