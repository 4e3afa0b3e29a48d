//! Brush stroke parameters, their bounds, and rasterization-ready footprints.
//!
//! A stroke is an oriented, elongated blob of paint. Its coverage at a pixel is
//! a super-Gaussian of the Mahalanobis distance to the stroke center:
//!
//!   d = p - μ                       (pixels, μ = (x·W, y·H))
//!   Σ = R(θ) diag(L², T²) R(θ)ᵀ     (L = e^{log_len}·H, T = e^{log_thk}·H)
//!   q = dᵀ Σ⁻¹ d
//!   w = exp(-0.5 q²)
//!
//! Squaring `q` flattens the top of the profile, so a stroke looks like a
//! solid dab with a soft rim instead of a Gaussian splat. The painted alpha is
//! `min(opacity · w, 0.99)` and contributions below `1e-4` are skipped.
//!
//! Stroke lengths are expressed as fractions of the canvas height so a
//! painting can be rendered at any resolution with the same appearance.

use crate::core::math::{inverse_sigmoid, max_eigenvalue_sym2, sigmoid, wrap_angle};
use nalgebra::{Vector2, Vector3};
use serde::{Deserialize, Serialize};
use std::f32::consts::PI;

/// Alpha cap. Keeps every stroke slightly transparent so gradients reach
/// strokes underneath.
pub const MAX_ALPHA: f32 = 0.99;

/// Contributions below this alpha are skipped.
pub const MIN_ALPHA: f32 = 1e-4;

/// Bounding-box radius in units of the major-axis standard deviation.
/// `w(2.2σ) ≈ 8e-6`, well below `MIN_ALPHA`.
const BBOX_SIGMAS: f32 = 2.2;

/// One brush stroke.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BrushStroke {
    /// Center in normalized canvas coordinates: x across width, y across height.
    pub position: Vector2<f32>,
    /// (angle in radians, log half-length, log half-thickness); lengths are
    /// fractions of the canvas height.
    pub shape: Vector3<f32>,
    /// RGB in [0,1].
    pub color: Vector3<f32>,
    /// Opacity logit.
    pub opacity: f32,
}

impl BrushStroke {
    pub fn new(
        position: Vector2<f32>,
        angle: f32,
        half_length: f32,
        half_thickness: f32,
        color: Vector3<f32>,
        opacity: f32,
    ) -> Self {
        Self {
            position,
            shape: Vector3::new(angle, half_length.ln(), half_thickness.ln()),
            color,
            opacity: inverse_sigmoid(opacity),
        }
    }

    pub fn angle(&self) -> f32 {
        self.shape.x
    }

    pub fn half_length(&self) -> f32 {
        self.shape.y.exp()
    }

    pub fn half_thickness(&self) -> f32 {
        self.shape.z.exp()
    }

    /// Opacity in (0, 1).
    pub fn alpha(&self) -> f32 {
        sigmoid(self.opacity)
    }

    pub fn is_finite(&self) -> bool {
        self.position.iter().all(|v| v.is_finite())
            && self.shape.iter().all(|v| v.is_finite())
            && self.color.iter().all(|v| v.is_finite())
            && self.opacity.is_finite()
    }

    /// Rasterization data for a `width × height` canvas.
    ///
    /// `opacity_override` replaces the learned opacity (used for opaque renders).
    pub fn footprint(&self, width: u32, height: u32, opacity_override: Option<f32>) -> StrokeFootprint {
        let (a, b, c) = stroke_covariance(&self.shape, height as f32);
        let det = a * c - b * b;
        let inv_det = 1.0 / det;
        let mean = Vector2::new(self.position.x * width as f32, self.position.y * height as f32);

        let radius = BBOX_SIGMAS * max_eigenvalue_sym2(a, b, c).sqrt();
        StrokeFootprint {
            mean,
            cov: Vector3::new(a, b, c),
            inv: Vector3::new(c * inv_det, -b * inv_det, a * inv_det),
            opacity: opacity_override.unwrap_or_else(|| self.alpha()),
            color: self.color,
            min_x: (mean.x - radius).floor() as i32,
            max_x: (mean.x + radius).ceil() as i32,
            min_y: (mean.y - radius).floor() as i32,
            max_y: (mean.y + radius).ceil() as i32,
        }
    }
}

/// Covariance entries `(a, b, c)` of `Σ = [[a, b], [b, c]]` in pixels² for a
/// stroke shape on a canvas `height` pixels tall.
pub fn stroke_covariance(shape: &Vector3<f32>, height: f32) -> (f32, f32, f32) {
    let (si, co) = shape.x.sin_cos();
    let l2 = (2.0 * shape.y).exp() * height * height;
    let t2 = (2.0 * shape.z).exp() * height * height;
    let a = co * co * l2 + si * si * t2;
    let b = co * si * (l2 - t2);
    let c = si * si * l2 + co * co * t2;
    (a, b, c)
}

/// Per-stroke rasterization data at a fixed canvas size.
#[derive(Clone, Debug)]
pub struct StrokeFootprint {
    /// Center in pixels.
    pub mean: Vector2<f32>,
    /// Σ entries (a, b, c).
    pub cov: Vector3<f32>,
    /// Σ⁻¹ entries (xx, xy, yy).
    pub inv: Vector3<f32>,
    pub opacity: f32,
    pub color: Vector3<f32>,
    pub min_x: i32,
    pub max_x: i32,
    pub min_y: i32,
    pub max_y: i32,
}

impl StrokeFootprint {
    #[inline]
    pub fn covers(&self, px: i32, py: i32) -> bool {
        px >= self.min_x && px <= self.max_x && py >= self.min_y && py <= self.max_y
    }

    #[inline]
    pub fn overlaps_row(&self, py: i32) -> bool {
        py >= self.min_y && py <= self.max_y
    }

    /// Coverage weight `exp(-0.5 q²)` at a pixel center.
    #[inline]
    pub fn weight_at(&self, pixel: Vector2<f32>) -> f32 {
        let dx = pixel.x - self.mean.x;
        let dy = pixel.y - self.mean.y;
        let q = self.inv.x * dx * dx + 2.0 * self.inv.y * dx * dy + self.inv.z * dy * dy;
        (-0.5 * q * q).exp()
    }

    /// Painted alpha at a pixel center, or `None` when below `MIN_ALPHA`.
    #[inline]
    pub fn alpha_at(&self, pixel: Vector2<f32>) -> Option<f32> {
        let alpha = self.opacity * self.weight_at(pixel);
        // NaN fails the comparison, so non-finite strokes paint nothing.
        (alpha >= MIN_ALPHA).then(|| alpha.min(MAX_ALPHA))
    }
}

/// Per-parameter bounds enforced by `Painting::validate`.
#[derive(Clone, Debug, PartialEq)]
pub struct StrokeBounds {
    /// Half-length range, fraction of canvas height.
    pub half_length: (f32, f32),
    /// Half-thickness range, fraction of canvas height. Also capped by the
    /// stroke's own half-length.
    pub half_thickness: (f32, f32),
    /// Opacity range in (0, 1).
    pub opacity: (f32, f32),
}

impl Default for StrokeBounds {
    fn default() -> Self {
        Self {
            half_length: (0.01, 0.25),
            half_thickness: (0.005, 0.1),
            opacity: (0.05, 0.995),
        }
    }
}

impl StrokeBounds {
    /// Clamp a finite stroke into bounds in place.
    pub fn clamp(&self, stroke: &mut BrushStroke) {
        stroke.position.x = stroke.position.x.clamp(0.0, 1.0);
        stroke.position.y = stroke.position.y.clamp(0.0, 1.0);

        let log_len = stroke
            .shape
            .y
            .clamp(self.half_length.0.ln(), self.half_length.1.ln());
        let log_thk_hi = self.half_thickness.1.ln().min(log_len);
        let log_thk_lo = self.half_thickness.0.ln().min(log_thk_hi);
        stroke.shape.x = wrap_angle(stroke.shape.x);
        stroke.shape.y = log_len;
        stroke.shape.z = stroke.shape.z.clamp(log_thk_lo, log_thk_hi);

        stroke.color = stroke.color.map(|c| c.clamp(0.0, 1.0));

        stroke.opacity = stroke
            .opacity
            .clamp(inverse_sigmoid(self.opacity.0), inverse_sigmoid(self.opacity.1));
    }

    /// True when every parameter already lies within bounds.
    pub fn contains(&self, stroke: &BrushStroke) -> bool {
        const TOL: f32 = 1e-5;
        let within = |v: f32, lo: f32, hi: f32| v >= lo - TOL && v <= hi + TOL;

        let len = stroke.half_length();
        let thk = stroke.half_thickness();
        let alpha = stroke.alpha();
        stroke.is_finite()
            && stroke.position.iter().all(|&p| within(p, 0.0, 1.0))
            && stroke.angle().abs() <= PI + TOL
            && within(len, self.half_length.0, self.half_length.1)
            && thk <= len * (1.0 + TOL)
            && within(thk, self.half_thickness.0.min(len), self.half_thickness.1)
            && stroke.color.iter().all(|&c| within(c, 0.0, 1.0))
            && within(alpha, self.opacity.0, self.opacity.1)
    }
}

/// Initialization ranges for newly placed strokes.
#[derive(Clone, Debug, PartialEq)]
pub struct StrokeInit {
    /// Half-length range, fraction of canvas height.
    pub half_length: (f32, f32),
    /// Half-thickness as a fraction of the half-length.
    pub thickness_ratio: (f32, f32),
    pub opacity: f32,
    /// Color used for every stroke in ink mode.
    pub ink_color: Vector3<f32>,
}

impl Default for StrokeInit {
    fn default() -> Self {
        Self {
            half_length: (0.03, 0.12),
            thickness_ratio: (0.3, 0.6),
            opacity: 0.9,
            ink_color: Vector3::zeros(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn stroke() -> BrushStroke {
        BrushStroke::new(
            Vector2::new(0.5, 0.5),
            0.3,
            0.1,
            0.03,
            Vector3::new(0.8, 0.2, 0.1),
            0.9,
        )
    }

    #[test]
    fn test_covariance_axis_aligned() {
        let shape = Vector3::new(0.0, 0.1f32.ln(), 0.05f32.ln());
        let (a, b, c) = stroke_covariance(&shape, 100.0);
        assert_relative_eq!(a, 100.0, epsilon = 1e-3); // (0.1 * 100)^2
        assert_relative_eq!(b, 0.0, epsilon = 1e-4);
        assert_relative_eq!(c, 25.0, epsilon = 1e-3); // (0.05 * 100)^2
    }

    #[test]
    fn test_footprint_peak_at_center() {
        let fp = stroke().footprint(64, 64, None);
        assert_relative_eq!(fp.weight_at(fp.mean), 1.0, epsilon = 1e-6);
        let alpha = fp.alpha_at(fp.mean).unwrap();
        assert_relative_eq!(alpha, 0.9, epsilon = 1e-5);
    }

    #[test]
    fn test_footprint_vanishes_at_bbox_edge() {
        let fp = stroke().footprint(128, 128, Some(1.0));
        for (x, y) in [
            (fp.min_x, fp.min_y),
            (fp.max_x, fp.min_y),
            (fp.min_x, fp.max_y),
            (fp.max_x, fp.max_y),
        ] {
            let p = Vector2::new(x as f32 + 0.5, y as f32 + 0.5);
            assert!(fp.alpha_at(p).is_none(), "corner ({x},{y}) still painted");
        }
    }

    #[test]
    fn test_opaque_override_caps_alpha() {
        let fp = stroke().footprint(32, 32, Some(1.0));
        assert_relative_eq!(fp.alpha_at(fp.mean).unwrap(), MAX_ALPHA, epsilon = 1e-6);
    }

    #[test]
    fn test_bounds_clamp_enforces_thickness_below_length() {
        let bounds = StrokeBounds::default();
        let mut s = stroke();
        s.shape.y = 0.02f32.ln();
        s.shape.z = 0.09f32.ln();
        s.position = Vector2::new(-0.3, 1.7);
        s.color = Vector3::new(1.5, -0.2, 0.5);
        s.opacity = 50.0;
        s.shape.x = 7.0;

        assert!(!bounds.contains(&s));
        bounds.clamp(&mut s);
        assert!(bounds.contains(&s));
        assert!(s.half_thickness() <= s.half_length() + 1e-6);
    }
}
