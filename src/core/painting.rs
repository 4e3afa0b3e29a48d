//! A painting: an ordered stack of brush strokes over a background raster.
//!
//! Stroke order is z-order (later strokes render on top). Every operation
//! that removes strokes for a derived canvas is clone-then-mutate and leaves
//! `self` untouched.

use crate::core::color::{color_bucket, Palette};
use crate::core::raster::Raster;
use crate::core::stroke::{BrushStroke, StrokeBounds, StrokeInit};
use crate::optim::groups::{LearningRates, StrokeOptimizers};
use crate::render::{render_strokes, AlphaMode};
use nalgebra::Vector2;
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;
use std::collections::HashSet;
use std::f32::consts::{FRAC_PI_2, PI};

/// Gradient magnitude below which the stroke angle is drawn at random.
const FLAT_GRADIENT: f32 = 1e-3;

#[derive(Clone, Debug, PartialEq)]
pub struct Painting {
    strokes: Vec<BrushStroke>,
    background: Raster,
    bounds: StrokeBounds,
}

impl Painting {
    /// An empty painting over `background`, with default stroke bounds.
    pub fn new(background: Raster) -> Self {
        Self {
            strokes: Vec::new(),
            background,
            bounds: StrokeBounds::default(),
        }
    }

    pub fn with_bounds(mut self, bounds: StrokeBounds) -> Self {
        self.bounds = bounds;
        self
    }

    pub fn with_strokes(mut self, strokes: Vec<BrushStroke>) -> Self {
        self.strokes = strokes;
        self
    }

    pub fn strokes(&self) -> &[BrushStroke] {
        &self.strokes
    }

    pub fn strokes_mut(&mut self) -> &mut [BrushStroke] {
        &mut self.strokes
    }

    pub fn len(&self) -> usize {
        self.strokes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strokes.is_empty()
    }

    pub fn background(&self) -> &Raster {
        &self.background
    }

    pub fn bounds(&self) -> &StrokeBounds {
        &self.bounds
    }

    pub fn push(&mut self, stroke: BrushStroke) {
        self.strokes.push(stroke);
    }

    /// The background resized to `width × height`.
    pub fn background_at(&self, height: u32, width: u32) -> Raster {
        self.background.resize(width, height)
    }

    /// Render at `height × width`. Deterministic in (background, strokes, size, mode).
    pub fn render(&self, height: u32, width: u32, mode: AlphaMode) -> Raster {
        render_strokes(&self.background_at(height, width), &self.strokes, mode)
    }

    /// Append `n` strokes placed where the current canvas differs most from `target`.
    ///
    /// Each stroke center is drawn with probability ∝ residual² (uniform when
    /// the canvas already matches), takes the target color there (or the ink
    /// color), and is aligned with the local image edge. The residual is damped
    /// under every placed stroke so the batch spreads out.
    pub fn add_strokes<R: Rng + ?Sized>(
        &mut self,
        n: usize,
        target: &Raster,
        init: &StrokeInit,
        ink: bool,
        rng: &mut R,
    ) -> &mut Self {
        let width = target.width();
        let height = target.height();
        if n == 0 || target.is_empty() {
            return self;
        }

        let canvas = self.render(height, width, AlphaMode::Learned);
        let mut residual: Vec<f32> = target
            .pixels()
            .iter()
            .zip(canvas.pixels())
            .map(|(t, c)| {
                let d = t - c;
                d.x.abs() + d.y.abs() + d.z.abs()
            })
            .collect();
        let luma = target.luminance();

        for _ in 0..n {
            let idx = sample_pixel(&residual, rng);
            let px = (idx % width as usize) as u32;
            let py = (idx / width as usize) as u32;

            let (gx, gy) = luminance_gradient(&luma, width, height, px, py);
            let angle = if gx.hypot(gy) < FLAT_GRADIENT {
                rng.gen_range(-PI..PI)
            } else {
                gy.atan2(gx) + FRAC_PI_2
            };

            let half_length = rng.gen_range(init.half_length.0..=init.half_length.1);
            let half_thickness = half_length * rng.gen_range(init.thickness_ratio.0..=init.thickness_ratio.1);
            let color = if ink { init.ink_color } else { target.get(px, py) };

            let mut stroke = BrushStroke::new(
                Vector2::new(
                    (px as f32 + 0.5) / width as f32,
                    (py as f32 + 0.5) / height as f32,
                ),
                angle,
                half_length,
                half_thickness,
                color,
                init.opacity,
            );
            self.bounds.clamp(&mut stroke);
            damp_residual(&mut residual, &stroke, width, height);
            self.strokes.push(stroke);
        }
        self
    }

    /// Drop non-finite strokes and clamp the rest into bounds.
    ///
    /// Returns the original indices of the kept strokes, in their new order.
    pub fn validate(&mut self) -> Vec<usize> {
        let mut kept = Vec::with_capacity(self.strokes.len());
        let mut strokes = Vec::with_capacity(self.strokes.len());
        for (i, mut stroke) in std::mem::take(&mut self.strokes).into_iter().enumerate() {
            if !stroke.is_finite() {
                continue;
            }
            self.bounds.clamp(&mut stroke);
            kept.push(i);
            strokes.push(stroke);
        }
        self.strokes = strokes;
        kept
    }

    /// One Adam per learned parameter group. Color is absent in ink mode.
    pub fn optimizers(&self, rates: &LearningRates, lr_multiplier: f32, ink: bool) -> StrokeOptimizers {
        StrokeOptimizers::new(rates, lr_multiplier, ink)
    }

    /// A copy keeping only the strokes at `indices`, in the given order.
    pub fn keeping_strokes(&self, indices: &[usize]) -> Painting {
        Painting {
            strokes: indices
                .iter()
                .filter_map(|&i| self.strokes.get(i).cloned())
                .collect(),
            background: self.background.clone(),
            bounds: self.bounds.clone(),
        }
    }

    /// A copy without the strokes at `indices`.
    pub fn without_strokes(&self, indices: &[usize]) -> Painting {
        let removed: HashSet<usize> = indices.iter().copied().collect();
        let kept: Vec<usize> = (0..self.strokes.len()).filter(|i| !removed.contains(i)).collect();
        self.keeping_strokes(&kept)
    }

    /// Stable sort by coarse color bucket so similarly colored strokes are
    /// z-contiguous. Returns the applied permutation: new stroke `j` was old
    /// stroke `perm[j]`.
    pub fn sort_by_color(&mut self, bin_size: f32) -> Vec<usize> {
        let mut perm: Vec<usize> = (0..self.strokes.len()).collect();
        perm.sort_by_key(|&i| color_bucket(&self.strokes[i].color, bin_size));
        self.strokes = perm.iter().map(|&i| self.strokes[i].clone()).collect();
        perm
    }

    /// Snap every stroke color to its nearest palette color.
    pub fn discretize_colors(&mut self, palette: &Palette) {
        for stroke in &mut self.strokes {
            stroke.color = palette.nearest(&stroke.color);
        }
    }
}

fn sample_pixel<R: Rng + ?Sized>(residual: &[f32], rng: &mut R) -> usize {
    let weights = residual.iter().map(|r| r * r);
    match WeightedIndex::new(weights) {
        Ok(dist) => dist.sample(rng),
        // All zero: canvas already matches the target.
        Err(_) => rng.gen_range(0..residual.len()),
    }
}

/// Central-difference luminance gradient, clamped at the borders.
fn luminance_gradient(luma: &[f32], width: u32, height: u32, x: u32, y: u32) -> (f32, f32) {
    let at = |x: u32, y: u32| luma[(y as usize) * (width as usize) + (x as usize)];
    let (x0, x1) = (x.saturating_sub(1), (x + 1).min(width - 1));
    let (y0, y1) = (y.saturating_sub(1), (y + 1).min(height - 1));
    let gx = (at(x1, y) - at(x0, y)) / (x1 - x0).max(1) as f32;
    let gy = (at(x, y1) - at(x, y0)) / (y1 - y0).max(1) as f32;
    (gx, gy)
}

fn damp_residual(residual: &mut [f32], stroke: &BrushStroke, width: u32, height: u32) {
    let fp = stroke.footprint(width, height, Some(1.0));
    let x0 = fp.min_x.max(0);
    let x1 = fp.max_x.min(width as i32 - 1);
    let y0 = fp.min_y.max(0);
    let y1 = fp.max_y.min(height as i32 - 1);
    for y in y0..=y1 {
        for x in x0..=x1 {
            let w = fp.weight_at(Vector2::new(x as f32 + 0.5, y as f32 + 0.5));
            residual[(y as usize) * (width as usize) + x as usize] *= 1.0 - w;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn white(w: u32, h: u32) -> Raster {
        Raster::filled(w, h, Vector3::new(1.0, 1.0, 1.0))
    }

    fn red_square() -> Raster {
        Raster::from_fn(32, 32, |x, y| {
            if (8..24).contains(&x) && (8..24).contains(&y) {
                Vector3::new(1.0, 0.0, 0.0)
            } else {
                Vector3::new(1.0, 1.0, 1.0)
            }
        })
    }

    #[test]
    fn test_add_strokes_targets_residual() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut p = Painting::new(white(32, 32));
        p.add_strokes(10, &red_square(), &StrokeInit::default(), false, &mut rng);
        assert_eq!(p.len(), 10);
        for s in p.strokes() {
            // Only the square differs from the white canvas.
            assert!((0.2..0.8).contains(&s.position.x), "{:?}", s.position);
            assert!((0.2..0.8).contains(&s.position.y), "{:?}", s.position);
            assert_eq!(s.color, Vector3::new(1.0, 0.0, 0.0));
            assert!(p.bounds().contains(s));
        }
    }

    #[test]
    fn test_add_strokes_ink_mode_uses_ink_color() {
        let mut rng = StdRng::seed_from_u64(4);
        let mut p = Painting::new(white(16, 16));
        p.add_strokes(5, &red_square().resize(16, 16), &StrokeInit::default(), true, &mut rng);
        assert!(p.strokes().iter().all(|s| s.color == Vector3::zeros()));
    }

    #[test]
    fn test_add_strokes_on_matching_canvas_is_uniform() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut p = Painting::new(white(16, 16));
        p.add_strokes(3, &white(16, 16), &StrokeInit::default(), false, &mut rng);
        assert_eq!(p.len(), 3);
    }

    #[test]
    fn test_validate_drops_non_finite_and_reports_indices() {
        let mut rng = StdRng::seed_from_u64(6);
        let mut p = Painting::new(white(16, 16));
        p.add_strokes(4, &red_square(), &StrokeInit::default(), false, &mut rng);
        p.strokes_mut()[1].position.x = f32::NAN;
        p.strokes_mut()[3].color.y = 7.0;
        let kept = p.validate();
        assert_eq!(kept, vec![0, 2, 3]);
        assert_eq!(p.len(), 3);
        assert_eq!(p.strokes()[2].color.y, 1.0);
    }

    #[test]
    fn test_keeping_and_without_strokes_leave_source_intact() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut p = Painting::new(white(16, 16));
        p.add_strokes(5, &red_square(), &StrokeInit::default(), false, &mut rng);
        let before = p.clone();

        let kept = p.keeping_strokes(&[1, 3]);
        assert_eq!(kept.strokes(), &[p.strokes()[1].clone(), p.strokes()[3].clone()]);

        let without = p.without_strokes(&[0, 4]);
        assert_eq!(without.strokes(), &p.strokes()[1..4]);
        assert_eq!(p, before);
    }

    #[test]
    fn test_sort_by_color_groups_and_returns_permutation() {
        let red = Vector3::new(0.9, 0.1, 0.1);
        let blue = Vector3::new(0.1, 0.1, 0.9);
        let mk = |c: Vector3<f32>, x: f32| BrushStroke::new(Vector2::new(x, 0.5), 0.0, 0.05, 0.02, c, 0.9);
        let mut p = Painting::new(white(8, 8)).with_strokes(vec![
            mk(red, 0.1),
            mk(blue, 0.2),
            mk(red, 0.3),
            mk(blue, 0.4),
        ]);
        let perm = p.sort_by_color(64.0);
        assert_eq!(perm, vec![1, 3, 0, 2]);
        assert_eq!(p.strokes()[0].position.x, 0.2);
        assert_eq!(p.strokes()[3].position.x, 0.3);
    }

    #[test]
    fn test_discretize_colors_snaps_to_palette() {
        let palette = Palette::parse("255,0,0.0,0,255").unwrap();
        let mk = |c: Vector3<f32>| BrushStroke::new(Vector2::new(0.5, 0.5), 0.0, 0.05, 0.02, c, 0.9);
        let mut p = Painting::new(white(8, 8)).with_strokes(vec![
            mk(Vector3::new(0.7, 0.2, 0.3)),
            mk(Vector3::new(0.2, 0.1, 0.6)),
        ]);
        p.discretize_colors(&palette);
        assert_eq!(p.strokes()[0].color, Vector3::new(1.0, 0.0, 0.0));
        assert_eq!(p.strokes()[1].color, Vector3::new(0.0, 0.0, 1.0));
    }
}
