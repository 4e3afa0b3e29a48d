//! Stroke-parameter gradients of the rendered canvas.
//!
//! Chain per pixel:
//!   dL/d(pixel) → composite backward → dL/d(alpha_i), dL/d(color_i)
//!   alpha_i = min(σ(opacity_i) · w_i, 0.99) → dL/d(opacity logit), dL/d(w_i)
//!   w_i(mean, Σ) → dL/d(mean_px), dL/d(Σ)
//! then per stroke:
//!   mean_px = (x·W, y·H)                 → dL/d(position)
//!   Σ(θ, log_len, log_thk)               → dL/d(shape)
//!
//! Rows are split into fixed blocks processed in parallel; each block owns its
//! accumulators and blocks are summed sequentially in block order, so the
//! result does not depend on thread scheduling.

use crate::core::{BrushStroke, Raster, MAX_ALPHA, MIN_ALPHA};
use crate::diff::blend_grad::{composite_backward, composite_forward};
use crate::diff::footprint_grad::footprint_evaluate_with_grads;
use crate::diff::math_grad::alpha_from_opacity_logit;
use crate::diff::shape_grad::{position_grad_from_mean, stroke_covariance_grad_shape};
use crate::render::rasterize::{prepare_footprints, strokes_in_row, AlphaMode};
use nalgebra::{Vector2, Vector3};
use rayon::prelude::*;

const ROWS_PER_BLOCK: usize = 8;

/// Per-stroke gradients, indexed like the painting's strokes.
#[derive(Clone, Debug, PartialEq)]
pub struct StrokeGrads {
    pub position: Vec<Vector2<f32>>,
    pub shape: Vec<Vector3<f32>>,
    pub color: Vec<Vector3<f32>>,
    pub opacity: Vec<f32>,
}

impl StrokeGrads {
    pub fn zeros(n: usize) -> Self {
        Self {
            position: vec![Vector2::zeros(); n],
            shape: vec![Vector3::zeros(); n],
            color: vec![Vector3::zeros(); n],
            opacity: vec![0.0; n],
        }
    }

    pub fn len(&self) -> usize {
        self.opacity.len()
    }

    pub fn is_empty(&self) -> bool {
        self.opacity.is_empty()
    }

    pub fn is_finite(&self) -> bool {
        self.position.iter().all(|g| g.iter().all(|v| v.is_finite()))
            && self.shape.iter().all(|g| g.iter().all(|v| v.is_finite()))
            && self.color.iter().all(|g| g.iter().all(|v| v.is_finite()))
            && self.opacity.iter().all(|v| v.is_finite())
    }
}

/// Accumulators in pixel space, before the per-stroke chain rule.
struct BlockGrads {
    d_mean_px: Vec<Vector2<f32>>,
    d_cov: Vec<Vector3<f32>>,
    d_color: Vec<Vector3<f32>>,
    d_opacity: Vec<f32>,
}

impl BlockGrads {
    fn new(n: usize) -> Self {
        Self {
            d_mean_px: vec![Vector2::zeros(); n],
            d_cov: vec![Vector3::zeros(); n],
            d_color: vec![Vector3::zeros(); n],
            d_opacity: vec![0.0; n],
        }
    }

    fn add(&mut self, other: &BlockGrads) {
        for i in 0..self.d_opacity.len() {
            self.d_mean_px[i] += other.d_mean_px[i];
            self.d_cov[i] += other.d_cov[i];
            self.d_color[i] += other.d_color[i];
            self.d_opacity[i] += other.d_opacity[i];
        }
    }
}

/// Gradients of `L` w.r.t. every stroke parameter given `d_image = dL/d(pixel)`.
///
/// `background` fixes the canvas size; `d_image` must have one entry per pixel.
/// Uses learned opacities (the mode the planner optimizes).
pub fn render_stroke_grads(background: &Raster, strokes: &[BrushStroke], d_image: &[Vector3<f32>]) -> StrokeGrads {
    let width = background.width() as usize;
    let height = background.height() as usize;
    assert_eq!(d_image.len(), width * height);

    let n = strokes.len();
    let footprints = prepare_footprints(strokes, width as u32, height as u32, AlphaMode::Learned);
    let n_blocks = height.div_ceil(ROWS_PER_BLOCK);

    let blocks: Vec<BlockGrads> = (0..n_blocks)
        .into_par_iter()
        .map(|block| {
            let mut local = BlockGrads::new(n);
            let y0 = block * ROWS_PER_BLOCK;
            let y1 = (y0 + ROWS_PER_BLOCK).min(height);

            let mut alphas: Vec<f32> = Vec::new();
            let mut colors: Vec<Vector3<f32>> = Vec::new();
            let mut d_alpha_d_logits: Vec<f32> = Vec::new();
            let mut d_alpha_d_weights: Vec<f32> = Vec::new();
            let mut d_weight_d_means: Vec<Vector2<f32>> = Vec::new();
            let mut d_weight_d_covs: Vec<Vector3<f32>> = Vec::new();
            let mut indices: Vec<usize> = Vec::new();

            for py in y0..y1 {
                let active = strokes_in_row(&footprints, py as i32, width as i32);
                if active.is_empty() {
                    continue;
                }
                let pixel_y = py as f32 + 0.5;

                for px in 0..width {
                    let upstream = d_image[py * width + px];
                    if upstream == Vector3::zeros() {
                        continue;
                    }
                    let pixel = Vector2::new(px as f32 + 0.5, pixel_y);

                    alphas.clear();
                    colors.clear();
                    d_alpha_d_logits.clear();
                    d_alpha_d_weights.clear();
                    d_weight_d_means.clear();
                    d_weight_d_covs.clear();
                    indices.clear();

                    for &k in &active {
                        let fp = &footprints[k];
                        if !fp.covers(px as i32, py as i32) {
                            continue;
                        }
                        let eval = footprint_evaluate_with_grads(fp.mean, fp.cov.x, fp.cov.y, fp.cov.z, pixel);
                        let (alpha, d_logit, d_weight) =
                            alpha_from_opacity_logit(strokes[k].opacity, eval.value, MAX_ALPHA);
                        if alpha < MIN_ALPHA {
                            continue;
                        }
                        alphas.push(alpha);
                        colors.push(fp.color);
                        d_alpha_d_logits.push(d_logit);
                        d_alpha_d_weights.push(d_weight);
                        d_weight_d_means.push(eval.d_mean);
                        d_weight_d_covs.push(Vector3::new(eval.d_cov_xx, eval.d_cov_xy, eval.d_cov_yy));
                        indices.push(k);
                    }
                    if indices.is_empty() {
                        continue;
                    }

                    let bg = background.pixels()[py * width + px];
                    let forward = composite_forward(&alphas, &colors, &bg);
                    let grads = composite_backward(&alphas, &colors, &forward, &upstream);

                    for (j, &k) in indices.iter().enumerate() {
                        local.d_color[k] += grads.d_colors[j];
                        local.d_opacity[k] += grads.d_alphas[j] * d_alpha_d_logits[j];
                        let d_weight = grads.d_alphas[j] * d_alpha_d_weights[j];
                        local.d_mean_px[k] += d_weight_d_means[j] * d_weight;
                        local.d_cov[k] += d_weight_d_covs[j] * d_weight;
                    }
                }
            }
            local
        })
        .collect();

    let mut total = BlockGrads::new(n);
    for block in &blocks {
        total.add(block);
    }

    let mut out = StrokeGrads::zeros(n);
    for (i, stroke) in strokes.iter().enumerate() {
        out.position[i] = position_grad_from_mean(&total.d_mean_px[i], width as f32, height as f32);
        out.shape[i] = stroke_covariance_grad_shape(&stroke.shape, height as f32, &total.d_cov[i]);
        out.color[i] = total.d_color[i];
        out.opacity[i] = total.d_opacity[i];
    }
    out
}
