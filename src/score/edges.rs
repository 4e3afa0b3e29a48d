//! Edge complexity: how much fine detail an image carries.
//!
//! The image is resized to a fixed square, converted to 8-bit luma, smoothed
//! with a Gaussian and run through Sobel filters. The score is the sum of
//! gradient magnitudes, so it is comparable across source resolutions.

use crate::core::Raster;
use image::{GrayImage, Luma};
use imageproc::filter::gaussian_blur_f32;
use imageproc::gradients::sobel_gradients;

/// Working resolution of the complexity transform.
pub const EDGE_SIDE: u32 = 256;

const BLUR_SIGMA: f32 = 1.0;

fn luma8(image: &Raster) -> GrayImage {
    let luma = image.resize(EDGE_SIDE, EDGE_SIDE).luminance();
    GrayImage::from_fn(EDGE_SIDE, EDGE_SIDE, |x, y| {
        let v = luma[(y * EDGE_SIDE + x) as usize];
        Luma([(v.clamp(0.0, 1.0) * 255.0).round() as u8])
    })
}

/// Sum of Sobel gradient magnitudes over a blurred `EDGE_SIDE²` luma copy,
/// in units of full-scale intensity.
pub fn edge_complexity(image: &Raster) -> f32 {
    let smooth = gaussian_blur_f32(&luma8(image), BLUR_SIGMA);
    let magnitude = sobel_gradients(&smooth);
    let total: u64 = magnitude.pixels().map(|p| u64::from(p[0])).sum();
    total as f32 / 255.0
}

/// Index of the lowest finite complexity score.
pub fn select_simplest(complexities: &[f32]) -> Option<usize> {
    complexities
        .iter()
        .enumerate()
        .filter(|(_, c)| c.is_finite())
        .min_by(|(_, a), (_, b)| a.total_cmp(b))
        .map(|(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;

    #[test]
    fn test_flat_image_has_no_edges() {
        let flat = Raster::filled(64, 48, Vector3::new(0.3, 0.6, 0.2));
        assert!(edge_complexity(&flat) < 1e-3);
    }

    #[test]
    fn test_stripes_are_more_complex_than_one_edge() {
        let white = Vector3::new(1.0, 1.0, 1.0);
        let black = Vector3::zeros();
        let half = Raster::from_fn(64, 64, |x, _| if x < 32 { white } else { black });
        let stripes = Raster::from_fn(64, 64, |x, _| if (x / 4) % 2 == 0 { white } else { black });
        assert!(edge_complexity(&half) > 0.0);
        assert!(edge_complexity(&stripes) > 2.0 * edge_complexity(&half));
    }

    #[test]
    fn test_complexity_ignores_source_resolution() {
        let white = Vector3::new(1.0, 1.0, 1.0);
        let small = Raster::from_fn(64, 64, |x, _| if x < 32 { white } else { Vector3::zeros() });
        let large = Raster::from_fn(512, 512, |x, _| if x < 256 { white } else { Vector3::zeros() });
        let (a, b) = (edge_complexity(&small), edge_complexity(&large));
        assert!((a - b).abs() < 0.25 * a.max(b), "small={a} large={b}");
    }

    #[test]
    fn test_select_simplest_skips_nan() {
        assert_eq!(select_simplest(&[3.0, f32::NAN, 1.5, 2.0]), Some(2));
        assert_eq!(select_simplest(&[]), None);
    }
}
