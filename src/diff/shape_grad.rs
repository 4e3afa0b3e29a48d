//! Gradients for stroke shape → pixel covariance.
//!
//! Forward (see `core::stroke_covariance`):
//!   L² = e^{2·log_len} H²,  T² = e^{2·log_thk} H²
//!   Σ  = R(θ) diag(L², T²) R(θ)ᵀ
//!   a = cos²θ L² + sin²θ T²
//!   b = cosθ sinθ (L² − T²)
//!   c = sin²θ L² + cos²θ T²

use nalgebra::{Vector2, Vector3};

/// Backprop `dL/d(a, b, c)` into `dL/d(θ, log_len, log_thk)`.
pub fn stroke_covariance_grad_shape(shape: &Vector3<f32>, height: f32, d_cov: &Vector3<f32>) -> Vector3<f32> {
    let (si, co) = shape.x.sin_cos();
    let l2 = (2.0 * shape.y).exp() * height * height;
    let t2 = (2.0 * shape.z).exp() * height * height;
    let diff = l2 - t2;

    // ∂(a, b, c)/∂θ
    let da_dtheta = -2.0 * co * si * diff;
    let db_dtheta = (co * co - si * si) * diff;
    let dc_dtheta = 2.0 * co * si * diff;

    // ∂L²/∂log_len = 2L², ∂T²/∂log_thk = 2T²
    let (da_dlen, db_dlen, dc_dlen) = (co * co * 2.0 * l2, co * si * 2.0 * l2, si * si * 2.0 * l2);
    let (da_dthk, db_dthk, dc_dthk) = (si * si * 2.0 * t2, -co * si * 2.0 * t2, co * co * 2.0 * t2);

    Vector3::new(
        d_cov.x * da_dtheta + d_cov.y * db_dtheta + d_cov.z * dc_dtheta,
        d_cov.x * da_dlen + d_cov.y * db_dlen + d_cov.z * dc_dlen,
        d_cov.x * da_dthk + d_cov.y * db_dthk + d_cov.z * dc_dthk,
    )
}

/// Backprop a pixel-space mean gradient into normalized canvas position.
///
/// μ = (x·W, y·H)
#[inline]
pub fn position_grad_from_mean(d_mean: &Vector2<f32>, width: f32, height: f32) -> Vector2<f32> {
    Vector2::new(d_mean.x * width, d_mean.y * height)
}
