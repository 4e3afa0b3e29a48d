//! Gradients for back-to-front "over" compositing onto a background.
//!
//! Forward (per pixel, RGB):
//!   out_0 = bg
//!   for i in 0..N:
//!     out_{i+1} = out_i (1 - a_i) + a_i c_i
//!
//! where `a_i` is the painted alpha of stroke i at this pixel (opacity × footprint,
//! capped) and `c_i` its color. Later strokes land on top.

use nalgebra::Vector3;

#[derive(Clone, Debug)]
pub struct CompositeForward {
    pub out: Vector3<f32>,
    /// out_i for i=0..N: the canvas color just before stroke i lands.
    pub under: Vec<Vector3<f32>>,
}

/// Forward compositing, saving the canvas color under every stroke.
pub fn composite_forward(alphas: &[f32], colors: &[Vector3<f32>], bg: &Vector3<f32>) -> CompositeForward {
    assert_eq!(alphas.len(), colors.len());

    let mut out = *bg;
    let mut under = Vec::with_capacity(alphas.len());
    for (a, c) in alphas.iter().copied().zip(colors.iter()) {
        under.push(out);
        out = out * (1.0 - a) + c * a;
    }

    CompositeForward { out, under }
}

#[derive(Clone, Debug)]
pub struct CompositeGrads {
    pub d_alphas: Vec<f32>,
    pub d_colors: Vec<Vector3<f32>>,
    pub d_bg: Vector3<f32>,
}

/// Backward pass for compositing.
///
/// Reverse scan with `g = dL/d(out_{i+1})`:
///   dL/dc_i = g a_i
///   dL/da_i = g · (c_i - out_i)
///   dL/d(out_i) = g (1 - a_i)
pub fn composite_backward(
    alphas: &[f32],
    colors: &[Vector3<f32>],
    forward: &CompositeForward,
    d_out: &Vector3<f32>,
) -> CompositeGrads {
    assert_eq!(alphas.len(), colors.len());
    assert_eq!(forward.under.len(), alphas.len());

    let n = alphas.len();
    let mut d_alphas = vec![0.0f32; n];
    let mut d_colors = vec![Vector3::<f32>::zeros(); n];

    let mut g = *d_out;
    for i in (0..n).rev() {
        let a = alphas[i];
        d_colors[i] = g * a;
        d_alphas[i] = g.dot(&(colors[i] - forward.under[i]));
        g *= 1.0 - a;
    }

    CompositeGrads {
        d_alphas,
        d_colors,
        d_bg: g,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_no_strokes_passes_background_through() {
        let bg = Vector3::new(0.2, 0.3, 0.4);
        let fwd = composite_forward(&[], &[], &bg);
        assert_eq!(fwd.out, bg);
        let grads = composite_backward(&[], &[], &fwd, &Vector3::new(1.0, 2.0, 3.0));
        assert_eq!(grads.d_bg, Vector3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn test_later_stroke_on_top() {
        let bg = Vector3::zeros();
        let red = Vector3::new(1.0, 0.0, 0.0);
        let blue = Vector3::new(0.0, 0.0, 1.0);
        let fwd = composite_forward(&[0.99, 0.99], &[red, blue], &bg);
        assert!(fwd.out.z > 0.98);
        assert!(fwd.out.x < 0.02);
    }

    #[test]
    fn test_alpha_gradient_matches_finite_difference() {
        let bg = Vector3::new(0.9, 0.9, 0.9);
        let colors = [Vector3::new(0.1, 0.5, 0.2), Vector3::new(0.7, 0.1, 0.3)];
        let alphas = [0.4f32, 0.6];
        let d_out = Vector3::new(0.3, -0.2, 0.5);

        let fwd = composite_forward(&alphas, &colors, &bg);
        let grads = composite_backward(&alphas, &colors, &fwd, &d_out);

        let eps = 1e-3f32;
        for i in 0..2 {
            let mut plus = alphas;
            plus[i] += eps;
            let mut minus = alphas;
            minus[i] -= eps;
            let lp = d_out.dot(&composite_forward(&plus, &colors, &bg).out);
            let lm = d_out.dot(&composite_forward(&minus, &colors, &bg).out);
            assert_relative_eq!((lp - lm) / (2.0 * eps), grads.d_alphas[i], epsilon = 1e-3);
        }
    }
}
