//! Stroke planning: fit a painting to a target image by gradient descent.
//!
//! One iteration:
//! 1. set learning rates from the linear ramp-down schedule
//! 2. render, evaluate the loss, backprop into stroke parameters
//! 3. step every present optimizer, then validate (drop/clamp strokes and
//!    remap optimizer state to the survivors)
//! 4. unless in ink mode: sort strokes by color bucket (optimizer state
//!    follows the permutation) and, late in the run, snap colors to the palette

use crate::core::{Painting, Palette, Raster, StrokeBounds, StrokeInit};
use crate::optim::groups::LearningRates;
use crate::optim::loss::LossKind;
use crate::render::{render_stroke_grads, AlphaMode};
use log::debug;
use rand::Rng;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum PlanError {
    #[error("target image is empty")]
    EmptyTarget,

    #[error("stroke budget is zero")]
    NoStrokes,

    #[error("loss became non-finite at iteration {iteration}")]
    NonFiniteLoss { iteration: usize },

    #[error("every stroke was dropped at iteration {iteration}")]
    AllStrokesDropped { iteration: usize },
}

#[derive(Clone, Debug)]
pub struct PlannerConfig {
    pub n_strokes: usize,
    pub n_iters: usize,
    pub lr_multiplier: f32,
    pub learning_rates: LearningRates,
    pub loss: LossKind,
    /// Ink-trace mode: fixed ink color, no color learning, sorting or snapping.
    pub ink: bool,
    /// Color bucket width for sorting, in 0-255 units.
    pub bin_size: f32,
    pub init: StrokeInit,
    pub bounds: StrokeBounds,
    /// Log progress every this many iterations (0 disables).
    pub log_interval: usize,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            n_strokes: 100,
            n_iters: 300,
            lr_multiplier: 1.0,
            learning_rates: LearningRates::default(),
            loss: LossKind::default(),
            ink: false,
            bin_size: 64.0,
            init: StrokeInit::default(),
            bounds: StrokeBounds::default(),
            log_interval: 50,
        }
    }
}

/// Learning-rate multiplier at iteration `it` of `n`: linear from ~1 down to 0.001.
pub fn lr_factor(it: usize, n: usize) -> f32 {
    (1.0 - it as f32 / n.max(1) as f32) + 0.001
}

/// Palette snapping: every 10th iteration in the second half, every
/// iteration in the last 10%.
pub fn should_snap_colors(it: usize, n: usize) -> bool {
    (it % 10 == 0 && it > n / 2) || (it as f32) > 0.9 * n as f32
}

/// Plan a painting of `target` over `background` (resized to the target's size).
///
/// `palette` is snapped to late in the run; `None` keeps continuous colors.
pub fn plan_from_image<R: Rng + ?Sized>(
    target: &Raster,
    background: &Raster,
    palette: Option<&Palette>,
    cfg: &PlannerConfig,
    rng: &mut R,
) -> Result<Painting, PlanError> {
    if target.is_empty() {
        return Err(PlanError::EmptyTarget);
    }
    if cfg.n_strokes == 0 {
        return Err(PlanError::NoStrokes);
    }
    let (width, height) = (target.width(), target.height());

    let mut painting = Painting::new(background.resize(width, height)).with_bounds(cfg.bounds.clone());
    painting.add_strokes(cfg.n_strokes, target, &cfg.init, cfg.ink, rng);
    let mut optimizers = painting.optimizers(&cfg.learning_rates, cfg.lr_multiplier, cfg.ink);

    let n = cfg.n_iters;
    for it in 0..n {
        let factor = lr_factor(it, n);
        optimizers.set_lr_factor(factor);

        let rendered = painting.render(height, width, AlphaMode::Learned);
        let (loss, d_image) = cfg.loss.evaluate(&rendered, target);
        if !loss.is_finite() {
            return Err(PlanError::NonFiniteLoss { iteration: it });
        }

        let grads = render_stroke_grads(painting.background(), painting.strokes(), &d_image);
        optimizers.step(painting.strokes_mut(), &grads);

        let kept = painting.validate();
        if kept.len() != grads.len() {
            debug!("iter {it}: dropped {} invalid strokes", grads.len() - kept.len());
            optimizers.remap(&kept);
        }
        if painting.is_empty() {
            return Err(PlanError::AllStrokesDropped { iteration: it });
        }

        if !cfg.ink {
            let perm = painting.sort_by_color(cfg.bin_size);
            optimizers.remap(&perm);
            if let Some(palette) = palette {
                if should_snap_colors(it, n) {
                    painting.discretize_colors(palette);
                }
            }
        }

        if cfg.log_interval > 0 && (it % cfg.log_interval == 0 || it + 1 == n) {
            debug!(
                "iter {it:4}  loss={loss:.6}  lr_factor={factor:.3}  strokes={}",
                painting.len()
            );
        }
    }

    Ok(painting)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_lr_schedule_ramps_down() {
        assert!((lr_factor(0, 100) - 1.001).abs() < 1e-6);
        assert!((lr_factor(50, 100) - 0.501).abs() < 1e-6);
        assert!(lr_factor(99, 100) < 0.02);
        assert!(lr_factor(99, 100) > 0.0);
    }

    #[test]
    fn test_snap_schedule() {
        let n = 100;
        assert!(!should_snap_colors(10, n));
        assert!(!should_snap_colors(50, n));
        assert!(should_snap_colors(60, n));
        assert!(!should_snap_colors(61, n));
        assert!(should_snap_colors(91, n));
        assert!(should_snap_colors(99, n));
    }

    #[test]
    fn test_plan_rejects_zero_budget() {
        let target = Raster::filled(8, 8, Vector3::zeros());
        let cfg = PlannerConfig {
            n_strokes: 0,
            ..PlannerConfig::default()
        };
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(
            plan_from_image(&target, &target, None, &cfg, &mut rng),
            Err(PlanError::NoStrokes)
        );
    }

    #[test]
    fn test_plan_snaps_to_palette() {
        let target = Raster::from_fn(24, 16, |x, _| {
            if x < 12 {
                Vector3::new(0.9, 0.1, 0.1)
            } else {
                Vector3::new(0.1, 0.2, 0.8)
            }
        });
        let background = Raster::filled(24, 16, Vector3::new(1.0, 1.0, 1.0));
        let palette = Palette::parse("230,25,25.25,50,205").unwrap();
        let cfg = PlannerConfig {
            n_strokes: 12,
            n_iters: 20,
            ..PlannerConfig::default()
        };
        let mut rng = StdRng::seed_from_u64(11);
        let painting = plan_from_image(&target, &background, Some(&palette), &cfg, &mut rng).unwrap();
        assert_eq!(painting.len(), 12);
        for s in painting.strokes() {
            assert!(palette.colors().contains(&s.color), "{:?} not in palette", s.color);
            assert!(painting.bounds().contains(s));
        }
    }
}
