//! Image losses with analytic gradients w.r.t. the rendered pixels.
//!
//! All losses take row-major RGB in [0,1] and return `(loss, dL/d(rendered))`.
//!
//! - `L2`: mean squared error.
//! - `L1Dssim`: `0.8 · L1 + 0.2 · (1 − SSIM)`, SSIM on luminance with an
//!   11×11 Gaussian window (σ = 1.5).
//! - `MultiScale`: the planner's default perceptual objective. It compares
//!   a 2×2 box-pooled pyramid in two spaces: RGB (L1) and oriented Sobel
//!   responses of luminance (L1 on the `(gx, gy)` feature maps). Coarse levels
//!   reward getting large color masses and outlines right, fine levels reward
//!   texture. DSSIM is taken at full resolution:
//!
//!     loss = mean_l [0.8 · L1(level_l) + 0.2 · L1(sobel(level_l))]
//!            + 0.2 · (1 − SSIM(level_0))

use crate::core::raster::luminance;
use crate::core::Raster;
use nalgebra::{Vector2, Vector3};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const L1_WEIGHT: f32 = 0.8;
const DSSIM_WEIGHT: f32 = 0.2;
const FEATURE_WEIGHT: f32 = 0.2;

/// Pyramid levels stop once the next level would be smaller than this.
const MIN_PYRAMID_SIDE: u32 = 8;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LossKind {
    L2,
    L1Dssim,
    #[default]
    MultiScale,
}

impl LossKind {
    /// Loss and per-pixel gradient of `rendered` against `target` (same size).
    pub fn evaluate(&self, rendered: &Raster, target: &Raster) -> (f32, Vec<Vector3<f32>>) {
        assert_eq!(
            (rendered.width(), rendered.height()),
            (target.width(), target.height())
        );
        match self {
            LossKind::L2 => l2_image_loss_and_grad(rendered.pixels(), target.pixels()),
            LossKind::L1Dssim => l1_dssim_image_loss_and_grad(
                rendered.pixels(),
                target.pixels(),
                rendered.width(),
                rendered.height(),
            ),
            LossKind::MultiScale => multiscale_image_loss_and_grad(
                rendered.pixels(),
                target.pixels(),
                rendered.width(),
                rendered.height(),
            ),
        }
    }
}

impl fmt::Display for LossKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LossKind::L2 => "l2",
            LossKind::L1Dssim => "l1-dssim",
            LossKind::MultiScale => "multiscale",
        })
    }
}

impl FromStr for LossKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "l2" => Ok(LossKind::L2),
            "l1-dssim" | "l1dssim" => Ok(LossKind::L1Dssim),
            "multiscale" | "multi-scale" => Ok(LossKind::MultiScale),
            other => Err(format!("unknown loss `{other}` (expected l2, l1-dssim or multiscale)")),
        }
    }
}

/// Mean squared error over an image, returning (loss, d_rendered).
pub fn l2_image_loss_and_grad(rendered: &[Vector3<f32>], target: &[Vector3<f32>]) -> (f32, Vec<Vector3<f32>>) {
    assert_eq!(rendered.len(), target.len());
    let n = rendered.len().max(1) as f32;
    let mut loss = 0.0f64;
    let mut d = vec![Vector3::<f32>::zeros(); rendered.len()];

    for i in 0..rendered.len() {
        let diff = rendered[i] - target[i];
        loss += f64::from(diff.dot(&diff));
        d[i] = diff * (2.0 / n);
    }

    ((loss / f64::from(n)) as f32, d)
}

/// Mean absolute error (mean over pixels and channels).
fn l1_loss_and_grad(rendered: &[Vector3<f32>], target: &[Vector3<f32>]) -> (f32, Vec<Vector3<f32>>) {
    let denom = (rendered.len().max(1) * 3) as f32;
    let mut loss = 0.0f64;
    let mut d = vec![Vector3::<f32>::zeros(); rendered.len()];
    for i in 0..rendered.len() {
        let diff = rendered[i] - target[i];
        loss += f64::from(diff.x.abs() + diff.y.abs() + diff.z.abs());
        d[i] = diff.map(f32::signum) / denom;
    }
    ((loss / f64::from(denom)) as f32, d)
}

fn d_luminance_to_rgb(dy: f32) -> Vector3<f32> {
    Vector3::new(0.299 * dy, 0.587 * dy, 0.114 * dy)
}

fn gaussian_kernel_offsets(radius: i32, sigma: f32) -> Vec<(i32, i32, f32)> {
    let mut out = Vec::new();
    let denom = 2.0 * sigma * sigma;
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            let r2 = (dx * dx + dy * dy) as f32;
            let w = (-r2 / denom).exp();
            out.push((dx, dy, w));
        }
    }
    out
}

/// 3×3 Sobel taps `(dx, dy, kx, ky)`, scaled by 1/8 so a unit luminance step
/// gives a peak response of 1/2.
fn sobel_taps() -> impl Iterator<Item = (i32, i32, f32, f32)> {
    (-1..=1).flat_map(|dy: i32| {
        (-1..=1).map(move |dx: i32| {
            let kx = (dx * (2 - dy.abs())) as f32 / 8.0;
            let ky = (dy * (2 - dx.abs())) as f32 / 8.0;
            (dx, dy, kx, ky)
        })
    })
}

/// Oriented luminance gradients `(gx, gy)` per pixel. Borders are clamped.
pub fn sobel_features(pixels: &[Vector3<f32>], width: u32, height: u32) -> Vec<Vector2<f32>> {
    assert_eq!(pixels.len(), (width * height) as usize);
    let luma: Vec<f32> = pixels.iter().copied().map(luminance).collect();
    let (w, h) = (width as i32, height as i32);
    let mut out = vec![Vector2::zeros(); pixels.len()];
    for y in 0..h {
        for x in 0..w {
            let mut g = Vector2::zeros();
            for (dx, dy, kx, ky) in sobel_taps() {
                let src = ((y + dy).clamp(0, h - 1) * w + (x + dx).clamp(0, w - 1)) as usize;
                g += Vector2::new(kx, ky) * luma[src];
            }
            out[(y * w + x) as usize] = g;
        }
    }
    out
}

/// Adjoint of `sobel_features`: pulls feature gradients back to RGB.
fn sobel_features_backward(d_features: &[Vector2<f32>], width: u32, height: u32) -> Vec<Vector3<f32>> {
    let (w, h) = (width as i32, height as i32);
    let mut d_luma = vec![0.0f32; d_features.len()];
    for y in 0..h {
        for x in 0..w {
            let g = d_features[(y * w + x) as usize];
            for (dx, dy, kx, ky) in sobel_taps() {
                let src = ((y + dy).clamp(0, h - 1) * w + (x + dx).clamp(0, w - 1)) as usize;
                d_luma[src] += kx * g.x + ky * g.y;
            }
        }
    }
    d_luma.into_iter().map(d_luminance_to_rgb).collect()
}

/// Mean L1 distance between the Sobel feature maps of two images.
pub fn gradient_feature_loss_and_grad(
    rendered: &[Vector3<f32>],
    target: &[Vector3<f32>],
    width: u32,
    height: u32,
) -> (f32, Vec<Vector3<f32>>) {
    assert_eq!(rendered.len(), target.len());
    let fr = sobel_features(rendered, width, height);
    let ft = sobel_features(target, width, height);

    let denom = (fr.len().max(1) * 2) as f32;
    let mut loss = 0.0f64;
    let mut d = vec![Vector2::<f32>::zeros(); fr.len()];
    for i in 0..fr.len() {
        let diff = fr[i] - ft[i];
        loss += f64::from(diff.x.abs() + diff.y.abs());
        d[i] = diff.map(f32::signum) / denom;
    }
    ((loss / f64::from(denom)) as f32, sobel_features_backward(&d, width, height))
}

/// Mean `1 − SSIM` over all pixels on luminance, returning the gradient w.r.t.
/// rendered luminance.
fn dssim_and_grad(rendered: &[Vector3<f32>], target: &[Vector3<f32>], width: u32, height: u32) -> (f32, Vec<f32>) {
    let rendered_y: Vec<f32> = rendered.iter().copied().map(luminance).collect();
    let target_y: Vec<f32> = target.iter().copied().map(luminance).collect();
    let mut d_dssim_y = vec![0.0f32; rendered.len()];

    let radius = 5i32; // 11x11
    let sigma = 1.5f32;
    let kernel = gaussian_kernel_offsets(radius, sigma);

    let c1 = 0.01f32 * 0.01f32;
    let c2 = 0.03f32 * 0.03f32;

    let w_i = width as i32;
    let h_i = height as i32;
    let denom = rendered.len().max(1) as f32;
    let in_bounds = |x: i32, y: i32| x >= 0 && x < w_i && y >= 0 && y < h_i;

    let mut dssim = 0.0f64;
    for py in 0..h_i {
        for px in 0..w_i {
            // Normalize kernel weights over the valid part of the window.
            let mut wsum_local = 0.0f32;
            for &(dx, dy, w) in &kernel {
                if in_bounds(px + dx, py + dy) {
                    wsum_local += w;
                }
            }
            if wsum_local <= 0.0 {
                continue;
            }

            let mut mu_x = 0.0f32;
            let mut mu_y = 0.0f32;
            for &(dx, dy, w) in &kernel {
                let (x, y) = (px + dx, py + dy);
                if !in_bounds(x, y) {
                    continue;
                }
                let wi = w / wsum_local;
                let idx = (y * w_i + x) as usize;
                mu_x += wi * rendered_y[idx];
                mu_y += wi * target_y[idx];
            }

            let mut var_x = 0.0f32;
            let mut var_y = 0.0f32;
            let mut cov = 0.0f32;
            for &(dx, dy, w) in &kernel {
                let (x, y) = (px + dx, py + dy);
                if !in_bounds(x, y) {
                    continue;
                }
                let wi = w / wsum_local;
                let idx = (y * w_i + x) as usize;
                let dxv = rendered_y[idx] - mu_x;
                let dyv = target_y[idx] - mu_y;
                var_x += wi * dxv * dxv;
                var_y += wi * dyv * dyv;
                cov += wi * dxv * dyv;
            }

            let a = 2.0 * mu_x * mu_y + c1;
            let b = 2.0 * cov + c2;
            let c = mu_x * mu_x + mu_y * mu_y + c1;
            let d = var_x + var_y + c2;
            let inv_cd = 1.0 / (c * d).max(1e-6);
            let ssim = (a * b) * inv_cd;

            dssim += f64::from(1.0 - ssim);

            let d_ssim_da = b * inv_cd;
            let d_ssim_db = a * inv_cd;
            let d_ssim_dc = -(ssim / c.max(1e-6));
            let d_ssim_dd = -(ssim / d.max(1e-6));

            let d_ssim_d_mu_x = d_ssim_da * (2.0 * mu_y) + d_ssim_dc * (2.0 * mu_x);
            let d_ssim_d_var_x = d_ssim_dd;
            let d_ssim_d_cov = d_ssim_db * 2.0;

            for &(dx, dy, w) in &kernel {
                let (x, y) = (px + dx, py + dy);
                if !in_bounds(x, y) {
                    continue;
                }
                let wi = w / wsum_local;
                let idx = (y * w_i + x) as usize;
                let dxv = rendered_y[idx] - mu_x;
                let dyv = target_y[idx] - mu_y;

                let d_ssim_dxq =
                    d_ssim_d_mu_x * wi + d_ssim_d_var_x * (2.0 * wi * dxv) + d_ssim_d_cov * (wi * dyv);

                // d(1 - ssim) = -d(ssim)
                d_dssim_y[idx] -= d_ssim_dxq / denom;
            }
        }
    }

    ((dssim / f64::from(denom)) as f32, d_dssim_y)
}

/// `0.8 · L1 + 0.2 · (1 − SSIM)`.
pub fn l1_dssim_image_loss_and_grad(
    rendered: &[Vector3<f32>],
    target: &[Vector3<f32>],
    width: u32,
    height: u32,
) -> (f32, Vec<Vector3<f32>>) {
    assert_eq!(rendered.len(), target.len());
    assert_eq!(rendered.len(), (width * height) as usize);

    let (l1, d_l1) = l1_loss_and_grad(rendered, target);
    let (dssim, d_dssim_y) = dssim_and_grad(rendered, target, width, height);

    let mut loss = L1_WEIGHT * l1 + DSSIM_WEIGHT * dssim;
    if !loss.is_finite() {
        loss = f32::NAN;
    }

    let d = d_l1
        .iter()
        .zip(d_dssim_y.iter())
        .map(|(g, &gy)| g * L1_WEIGHT + d_luminance_to_rgb(gy * DSSIM_WEIGHT))
        .collect();

    (loss, d)
}

/// 2×2 box pooling. Odd trailing rows/columns are dropped.
fn box_pool2(pixels: &[Vector3<f32>], width: u32, height: u32) -> (Vec<Vector3<f32>>, u32, u32) {
    let (w2, h2) = (width / 2, height / 2);
    let w = width as usize;
    let mut out = Vec::with_capacity((w2 * h2) as usize);
    for y in 0..h2 as usize {
        for x in 0..w2 as usize {
            let i = 2 * y * w + 2 * x;
            out.push((pixels[i] + pixels[i + 1] + pixels[i + w] + pixels[i + w + 1]) * 0.25);
        }
    }
    (out, w2, h2)
}

/// Adjoint of `box_pool2`: spread each pooled gradient over its 2×2 source block.
fn box_pool2_backward(d_pooled: &[Vector3<f32>], width: u32, height: u32, d_src: &mut [Vector3<f32>]) {
    let (w2, h2) = (width / 2, height / 2);
    let w = width as usize;
    for y in 0..h2 as usize {
        for x in 0..w2 as usize {
            let g = d_pooled[y * w2 as usize + x] * 0.25;
            let i = 2 * y * w + 2 * x;
            d_src[i] += g;
            d_src[i + 1] += g;
            d_src[i + w] += g;
            d_src[i + w + 1] += g;
        }
    }
}

/// Multi-scale color and Sobel-feature L1 plus full-resolution DSSIM (see
/// module docs).
pub fn multiscale_image_loss_and_grad(
    rendered: &[Vector3<f32>],
    target: &[Vector3<f32>],
    width: u32,
    height: u32,
) -> (f32, Vec<Vector3<f32>>) {
    assert_eq!(rendered.len(), target.len());
    assert_eq!(rendered.len(), (width * height) as usize);

    // Build both pyramids.
    let mut levels: Vec<(Vec<Vector3<f32>>, Vec<Vector3<f32>>, u32, u32)> =
        vec![(rendered.to_vec(), target.to_vec(), width, height)];
    loop {
        let (r, t, w, h) = &levels[levels.len() - 1];
        if w / 2 < MIN_PYRAMID_SIDE || h / 2 < MIN_PYRAMID_SIDE {
            break;
        }
        let (r2, w2, h2) = box_pool2(r, *w, *h);
        let (t2, _, _) = box_pool2(t, *w, *h);
        levels.push((r2, t2, w2, h2));
    }
    let n_levels = levels.len() as f32;

    // Color and feature L1 per level, gradients pulled back to level 0 from
    // the coarsest up.
    let mut level_total = 0.0f32;
    let mut d_level: Vec<Vector3<f32>> = Vec::new();
    for (k, (r, t, w, h)) in levels.iter().enumerate().rev() {
        let (l1, d_l1) = l1_loss_and_grad(r, t);
        let (feature, d_feature) = gradient_feature_loss_and_grad(r, t, *w, *h);
        level_total += L1_WEIGHT * l1 + FEATURE_WEIGHT * feature;

        let mut d: Vec<Vector3<f32>> = d_l1
            .iter()
            .zip(d_feature.iter())
            .map(|(a, b)| a * L1_WEIGHT + b * FEATURE_WEIGHT)
            .collect();
        if k + 1 < levels.len() {
            box_pool2_backward(&d_level, *w, *h, &mut d);
        }
        d_level = d;
    }

    let (dssim, d_dssim_y) = dssim_and_grad(rendered, target, width, height);

    let mut loss = level_total / n_levels + DSSIM_WEIGHT * dssim;
    if !loss.is_finite() {
        loss = f32::NAN;
    }

    let d = d_level
        .iter()
        .zip(d_dssim_y.iter())
        .map(|(g, &gy)| g / n_levels + d_luminance_to_rgb(gy * DSSIM_WEIGHT))
        .collect();

    (loss, d)
}
