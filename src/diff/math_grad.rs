//! Gradients for small scalar math utilities.

/// Derivative of sigmoid σ(x) = 1 / (1 + e^{-x}) with respect to x.
///
/// dσ/dx = σ(x) * (1 - σ(x))
pub fn sigmoid_grad_from_sigmoid(sigmoid_x: f32) -> f32 {
    sigmoid_x * (1.0 - sigmoid_x)
}

/// `(alpha, dα/d(logit), dα/dw)` for one footprint sample.
///
/// alpha = min(σ(logit) · w, max_alpha); both derivatives are zero once capped.
/// A NaN weight yields zero alpha.
pub fn alpha_from_opacity_logit(opacity_logit: f32, weight: f32, max_alpha: f32) -> (f32, f32, f32) {
    let opacity = crate::core::sigmoid(opacity_logit);
    let alpha_raw = opacity * weight;
    if alpha_raw.is_nan() {
        (0.0, 0.0, 0.0)
    } else if alpha_raw < max_alpha {
        (
            alpha_raw,
            weight * sigmoid_grad_from_sigmoid(opacity),
            opacity,
        )
    } else {
        (max_alpha, 0.0, 0.0)
    }
}
