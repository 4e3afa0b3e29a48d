//! Gradients of the stroke footprint weight.
//!
//! Forward (see `core::StrokeFootprint::weight_at`):
//!   w = exp(-0.5 q²),  q = dᵀ Σ⁻¹ d,  d = p - m
//!
//! With u = Σ⁻¹ d:
//!   ∂q/∂m = -2u
//!   ∂q/∂Σ = -u uᵀ   (the off-diagonal `b` appears twice, so ∂q/∂b = -2 u_x u_y)
//!   ∂w/∂q = -q w
//!
//! Σ is always well-conditioned here: stroke thickness is bounded below, so
//! det(Σ) ≥ (T_min · H)⁴ > 0.

use nalgebra::{Matrix2, Vector2};

#[derive(Clone, Copy, Debug)]
pub struct FootprintEvalGrads {
    pub value: f32,
    pub d_mean: Vector2<f32>,
    pub d_cov_xx: f32,
    pub d_cov_xy: f32,
    pub d_cov_yy: f32,
}

/// Footprint weight at `pixel` and its gradients w.r.t. the mean and the
/// covariance entries `Σ = [[a, b], [b, c]]` (all in pixels).
pub fn footprint_evaluate_with_grads(
    mean: Vector2<f32>,
    cov_xx: f32,
    cov_xy: f32,
    cov_yy: f32,
    pixel: Vector2<f32>,
) -> FootprintEvalGrads {
    let d = pixel - mean;
    let det = cov_xx * cov_yy - cov_xy * cov_xy;
    let inv = Matrix2::new(cov_yy, -cov_xy, -cov_xy, cov_xx) / det;

    let u = inv * d;
    let q = d.dot(&u);
    let value = (-0.5 * q * q).exp();
    let qw = q * value;

    FootprintEvalGrads {
        value,
        d_mean: u * (2.0 * qw),
        d_cov_xx: qw * u.x * u.x,
        d_cov_xy: 2.0 * qw * u.x * u.y,
        d_cov_yy: qw * u.y * u.y,
    }
}
