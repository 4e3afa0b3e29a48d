//! One optimizer per learned stroke parameter group.

use crate::core::BrushStroke;
use crate::optim::adam::{AdamF32, AdamVec2, AdamVec3};
use crate::render::StrokeGrads;
use nalgebra::{Vector2, Vector3};

const BETA1: f32 = 0.9;
const BETA2: f32 = 0.999;
const EPS: f32 = 1e-8;

/// Base learning rates before the run multiplier and schedule.
#[derive(Clone, Debug, PartialEq)]
pub struct LearningRates {
    pub position: f32,
    pub shape: f32,
    pub color: f32,
    pub opacity: f32,
}

impl Default for LearningRates {
    fn default() -> Self {
        Self {
            position: 0.005,
            shape: 0.02,
            color: 0.01,
            opacity: 0.05,
        }
    }
}

/// Adam handles for position, shape, color and opacity. A `None` group is not
/// learned in this configuration (color in ink mode).
pub struct StrokeOptimizers {
    pub position: Option<AdamVec2>,
    pub shape: Option<AdamVec3>,
    pub color: Option<AdamVec3>,
    pub opacity: Option<AdamF32>,
    base: LearningRates,
}

impl StrokeOptimizers {
    pub fn new(rates: &LearningRates, lr_multiplier: f32, ink: bool) -> Self {
        let base = LearningRates {
            position: rates.position * lr_multiplier,
            shape: rates.shape * lr_multiplier,
            color: rates.color * lr_multiplier,
            opacity: rates.opacity * lr_multiplier,
        };
        Self {
            position: Some(AdamVec2::new(base.position, BETA1, BETA2, EPS)),
            shape: Some(AdamVec3::new(base.shape, BETA1, BETA2, EPS)),
            color: (!ink).then(|| AdamVec3::new(base.color, BETA1, BETA2, EPS)),
            opacity: Some(AdamF32::new(base.opacity, BETA1, BETA2, EPS)),
            base,
        }
    }

    /// Scale every group's base rate by the schedule factor.
    pub fn set_lr_factor(&mut self, factor: f32) {
        if let Some(opt) = &mut self.position {
            opt.lr = self.base.position * factor;
        }
        if let Some(opt) = &mut self.shape {
            opt.lr = self.base.shape * factor;
        }
        if let Some(opt) = &mut self.color {
            opt.lr = self.base.color * factor;
        }
        if let Some(opt) = &mut self.opacity {
            opt.lr = self.base.opacity * factor;
        }
    }

    /// Step every present group.
    pub fn step(&mut self, strokes: &mut [BrushStroke], grads: &StrokeGrads) {
        assert_eq!(strokes.len(), grads.len());

        if let Some(opt) = &mut self.position {
            let mut params: Vec<Vector2<f32>> = strokes.iter().map(|s| s.position).collect();
            opt.step(&mut params, &grads.position);
            for (s, p) in strokes.iter_mut().zip(params) {
                s.position = p;
            }
        }
        if let Some(opt) = &mut self.shape {
            let mut params: Vec<Vector3<f32>> = strokes.iter().map(|s| s.shape).collect();
            opt.step(&mut params, &grads.shape);
            for (s, p) in strokes.iter_mut().zip(params) {
                s.shape = p;
            }
        }
        if let Some(opt) = &mut self.color {
            let mut params: Vec<Vector3<f32>> = strokes.iter().map(|s| s.color).collect();
            opt.step(&mut params, &grads.color);
            for (s, p) in strokes.iter_mut().zip(params) {
                s.color = p;
            }
        }
        if let Some(opt) = &mut self.opacity {
            let mut params: Vec<f32> = strokes.iter().map(|s| s.opacity).collect();
            opt.step(&mut params, &grads.opacity);
            for (s, p) in strokes.iter_mut().zip(params) {
                s.opacity = p;
            }
        }
    }

    /// Follow a stroke drop or reorder (see `AdamVec::remap`).
    pub fn remap(&mut self, indices: &[usize]) {
        if let Some(opt) = &mut self.position {
            opt.remap(indices);
        }
        if let Some(opt) = &mut self.shape {
            opt.remap(indices);
        }
        if let Some(opt) = &mut self.color {
            opt.remap(indices);
        }
        if let Some(opt) = &mut self.opacity {
            opt.remap(indices);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_ink_mode_has_no_color_group() {
        let opts = StrokeOptimizers::new(&LearningRates::default(), 1.0, true);
        assert!(opts.color.is_none());
        assert!(opts.position.is_some() && opts.shape.is_some() && opts.opacity.is_some());
    }

    #[test]
    fn test_lr_factor_scales_multiplied_base() {
        let mut opts = StrokeOptimizers::new(&LearningRates::default(), 2.0, false);
        opts.set_lr_factor(0.5);
        assert_relative_eq!(opts.position.as_ref().unwrap().lr, 0.005, epsilon = 1e-9);
        assert_relative_eq!(opts.color.as_ref().unwrap().lr, 0.01, epsilon = 1e-9);
    }

    #[test]
    fn test_step_leaves_color_when_not_learned() {
        let mut opts = StrokeOptimizers::new(&LearningRates::default(), 1.0, true);
        let mut strokes = vec![BrushStroke::new(
            Vector2::new(0.5, 0.5),
            0.0,
            0.1,
            0.05,
            Vector3::zeros(),
            0.9,
        )];
        let mut grads = StrokeGrads::zeros(1);
        grads.color[0] = Vector3::new(1.0, 1.0, 1.0);
        grads.position[0] = Vector2::new(1.0, 0.0);
        opts.step(&mut strokes, &grads);
        assert_eq!(strokes[0].color, Vector3::zeros());
        assert!(strokes[0].position.x < 0.5);
    }
}
