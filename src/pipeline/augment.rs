//! Random crops and color jitter for targets and backgrounds.

use crate::core::color::{hsv_to_rgb, rgb_to_hsv};
use crate::core::raster::luminance;
use crate::core::Raster;
use nalgebra::Vector3;
use rand::seq::SliceRandom;
use rand::Rng;

const CROP_ATTEMPTS: usize = 10;

#[derive(Clone, Debug)]
pub struct AugmentConfig {
    /// Crop area as a fraction of the source, for targets.
    pub target_scale: (f32, f32),
    /// Crop aspect ratio (width / height) range, for targets.
    pub target_ratio: (f32, f32),
    pub background_scale: (f32, f32),
    pub background_ratio: (f32, f32),
    /// Brightness factor range.
    pub brightness: (f32, f32),
    /// Contrast factor is drawn from `1 ± contrast`.
    pub contrast: f32,
    pub saturation: f32,
    /// Hue shift in turns, drawn from `±hue`.
    pub hue: f32,
}

impl Default for AugmentConfig {
    fn default() -> Self {
        Self {
            target_scale: (0.7, 1.0),
            target_ratio: (0.95, 1.05),
            background_scale: (0.7, 1.0),
            background_ratio: (0.75, 1.0),
            brightness: (0.5, 1.25),
            contrast: 0.1,
            saturation: 0.2,
            hue: 0.2,
        }
    }
}

fn uniform<R: Rng + ?Sized>(rng: &mut R, (lo, hi): (f32, f32)) -> f32 {
    if hi > lo {
        rng.gen_range(lo..hi)
    } else {
        lo
    }
}

/// Crop a random window of the given relative area and aspect ratio, then
/// resize it to `width × height`.
///
/// Falls back to the largest centered window within the ratio range when no
/// sampled window fits.
pub fn random_resized_crop<R: Rng + ?Sized>(
    src: &Raster,
    width: u32,
    height: u32,
    scale: (f32, f32),
    ratio: (f32, f32),
    rng: &mut R,
) -> Raster {
    let (sw, sh) = (src.width() as f32, src.height() as f32);
    let area = sw * sh;
    let log_ratio = (ratio.0.ln(), ratio.1.ln());

    for _ in 0..CROP_ATTEMPTS {
        let target_area = area * uniform(rng, scale);
        let aspect = uniform(rng, log_ratio).exp();
        let cw = (target_area * aspect).sqrt().round() as u32;
        let ch = (target_area / aspect).sqrt().round() as u32;
        if cw > 0 && ch > 0 && cw <= src.width() && ch <= src.height() {
            let x = rng.gen_range(0..=src.width() - cw);
            let y = rng.gen_range(0..=src.height() - ch);
            return src.crop(x, y, cw, ch).resize(width, height);
        }
    }

    let in_ratio = sw / sh;
    let (cw, ch) = if in_ratio < ratio.0 {
        (sw, sw / ratio.0)
    } else if in_ratio > ratio.1 {
        (sh * ratio.1, sh)
    } else {
        (sw, sh)
    };
    let (cw, ch) = (cw.round().max(1.0) as u32, ch.round().max(1.0) as u32);
    let x = (src.width().saturating_sub(cw)) / 2;
    let y = (src.height().saturating_sub(ch)) / 2;
    src.crop(x, y, cw, ch).resize(width, height)
}

#[derive(Clone, Copy, Debug)]
enum Jitter {
    Brightness(f32),
    Contrast(f32),
    Saturation(f32),
    Hue(f32),
}

fn blend(a: Vector3<f32>, b: Vector3<f32>, factor: f32) -> Vector3<f32> {
    (a * factor + b * (1.0 - factor)).map(|v| v.clamp(0.0, 1.0))
}

fn apply_jitter(img: &mut Raster, jitter: Jitter) {
    match jitter {
        Jitter::Brightness(f) => img
            .pixels_mut()
            .iter_mut()
            .for_each(|p| *p = blend(*p, Vector3::zeros(), f)),
        Jitter::Contrast(f) => {
            let mean = img.luminance().iter().sum::<f32>() / img.len().max(1) as f32;
            let gray = Vector3::repeat(mean);
            img.pixels_mut().iter_mut().for_each(|p| *p = blend(*p, gray, f));
        }
        Jitter::Saturation(f) => img
            .pixels_mut()
            .iter_mut()
            .for_each(|p| *p = blend(*p, Vector3::repeat(luminance(*p)), f)),
        Jitter::Hue(shift) => img.pixels_mut().iter_mut().for_each(|p| {
            let mut hsv = rgb_to_hsv(*p);
            hsv.x = (hsv.x + shift).rem_euclid(1.0);
            *p = hsv_to_rgb(hsv);
        }),
    }
}

/// Brightness, contrast, saturation and hue jitter, applied in random order.
pub fn color_jitter<R: Rng + ?Sized>(src: &Raster, cfg: &AugmentConfig, rng: &mut R) -> Raster {
    let mut ops = [
        Jitter::Brightness(uniform(rng, cfg.brightness)),
        Jitter::Contrast(uniform(rng, (1.0 - cfg.contrast, 1.0 + cfg.contrast)).max(0.0)),
        Jitter::Saturation(uniform(rng, (1.0 - cfg.saturation, 1.0 + cfg.saturation)).max(0.0)),
        Jitter::Hue(uniform(rng, (-cfg.hue, cfg.hue))),
    ];
    ops.shuffle(rng);

    let mut out = src.clone();
    for op in ops {
        apply_jitter(&mut out, op);
    }
    out
}

/// Target crop at `scale ×` the planning size and its planning-size copy.
pub fn prepare_target<R: Rng + ?Sized>(
    image: &Raster,
    height: u32,
    width: u32,
    scale: u32,
    cfg: &AugmentConfig,
    rng: &mut R,
) -> (Raster, Raster) {
    let full = random_resized_crop(image, width * scale, height * scale, cfg.target_scale, cfg.target_ratio, rng);
    let planning = full.resize(width, height);
    (full, planning)
}

/// Fresh background for the next painting: random crop of `canvas` plus
/// color jitter, at planning size.
pub fn augment_background<R: Rng + ?Sized>(
    canvas: &Raster,
    height: u32,
    width: u32,
    cfg: &AugmentConfig,
    rng: &mut R,
) -> Raster {
    let cropped = random_resized_crop(canvas, width, height, cfg.background_scale, cfg.background_ratio, rng);
    color_jitter(&cropped, cfg, rng)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn gradient(w: u32, h: u32) -> Raster {
        Raster::from_fn(w, h, |x, y| {
            Vector3::new(x as f32 / w as f32, y as f32 / h as f32, 0.5)
        })
    }

    #[test]
    fn test_crop_output_size() {
        let mut rng = StdRng::seed_from_u64(9);
        let src = gradient(90, 60);
        for _ in 0..10 {
            let out = random_resized_crop(&src, 48, 32, (0.7, 1.0), (0.75, 1.0), &mut rng);
            assert_eq!((out.width(), out.height()), (48, 32));
        }
    }

    #[test]
    fn test_crop_fallback_for_impossible_ratio() {
        let mut rng = StdRng::seed_from_u64(9);
        // A 4:1 strip cannot host a square crop with area 100%.
        let src = gradient(40, 10);
        let out = random_resized_crop(&src, 8, 8, (1.0, 1.0), (1.0, 1.0), &mut rng);
        assert_eq!((out.width(), out.height()), (8, 8));
    }

    #[test]
    fn test_neutral_jitter_is_identity() {
        let cfg = AugmentConfig {
            brightness: (1.0, 1.0),
            contrast: 0.0,
            saturation: 0.0,
            hue: 0.0,
            ..AugmentConfig::default()
        };
        let mut rng = StdRng::seed_from_u64(4);
        let src = gradient(16, 8);
        let out = color_jitter(&src, &cfg, &mut rng);
        for (a, b) in src.pixels().iter().zip(out.pixels()) {
            assert_relative_eq!(*a, *b, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let mut rng = StdRng::seed_from_u64(8);
        let src = gradient(16, 16);
        let out = color_jitter(&src, &AugmentConfig::default(), &mut rng);
        assert!(out
            .pixels()
            .iter()
            .all(|p| p.iter().all(|v| (0.0..=1.0).contains(v))));
    }

    #[test]
    fn test_prepare_target_sizes() {
        let mut rng = StdRng::seed_from_u64(1);
        let (full, planning) = prepare_target(&gradient(200, 150), 16, 24, 4, &AugmentConfig::default(), &mut rng);
        assert_eq!((full.width(), full.height()), (96, 64));
        assert_eq!((planning.width(), planning.height()), (24, 16));
    }
}
