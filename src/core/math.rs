//! Scalar helpers shared by strokes, rendering and the backward passes.

use std::f32::consts::{PI, TAU};

/// Sigmoid activation function: σ(x) = 1 / (1 + e^(-x))
///
/// Maps R → (0, 1)
/// Used for stroke opacity (unbounded optimization, bounded result).
pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Inverse sigmoid (logit): logit(p) = log(p / (1-p))
///
/// Maps (0, 1) → R
pub fn inverse_sigmoid(p: f32) -> f32 {
    // Clamp to avoid log(0) or division by zero
    let p_clamped = p.clamp(1e-6, 1.0 - 1e-6);
    (p_clamped / (1.0 - p_clamped)).ln()
}

/// Wrap an angle into (-π, π].
pub fn wrap_angle(angle: f32) -> f32 {
    let mut a = angle % TAU;
    if a <= -PI {
        a += TAU;
    } else if a > PI {
        a -= TAU;
    }
    a
}

/// Largest eigenvalue of the symmetric 2×2 matrix [[a, b], [b, c]].
pub fn max_eigenvalue_sym2(a: f32, b: f32, c: f32) -> f32 {
    let trace = a + c;
    let disc = ((a - c) * (a - c) + 4.0 * b * b).sqrt();
    0.5 * (trace + disc).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_sigmoid() {
        assert_relative_eq!(sigmoid(0.0), 0.5, epsilon = 1e-6);
        assert!(sigmoid(10.0) > 0.99);
        assert!(sigmoid(-10.0) < 0.01);
    }

    #[test]
    fn test_sigmoid_inverse_roundtrip() {
        let p = 0.7;
        assert_relative_eq!(sigmoid(inverse_sigmoid(p)), p, epsilon = 1e-6);
    }

    #[test]
    fn test_wrap_angle_range() {
        for a in [-10.0f32, -PI, -1.0, 0.0, 1.0, PI, 4.0, 25.0] {
            let w = wrap_angle(a);
            assert!(w > -PI - 1e-6 && w <= PI + 1e-6, "{a} wrapped to {w}");
            // Same direction modulo 2π.
            assert_relative_eq!(w.cos(), a.cos(), epsilon = 1e-4);
            assert_relative_eq!(w.sin(), a.sin(), epsilon = 1e-4);
        }
    }

    #[test]
    fn test_max_eigenvalue_diagonal() {
        assert_relative_eq!(max_eigenvalue_sym2(4.0, 0.0, 1.0), 4.0, epsilon = 1e-6);
        assert_relative_eq!(max_eigenvalue_sym2(1.0, 0.0, 9.0), 9.0, epsilon = 1e-6);
    }
}
