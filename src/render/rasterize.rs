//! Forward stroke rasterizer (CPU).
//!
//! Strokes are composited back-to-front over the background in painting
//! order. Rows are rendered in parallel; every pixel is computed
//! independently with a fixed summation order, so output is bit-identical
//! across calls and thread counts.

use crate::core::{BrushStroke, Raster, StrokeFootprint};
use nalgebra::{Vector2, Vector3};
use rayon::prelude::*;

/// Which opacity strokes are rendered with.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AlphaMode {
    /// The stroke's learned opacity.
    #[default]
    Learned,
    /// Opacity 1 (footprint alpha still capped). Used for mask-based removal
    /// where partially transparent strokes would leak the background.
    Opaque,
}

/// Footprints for every stroke on a `width × height` canvas.
pub fn prepare_footprints(
    strokes: &[BrushStroke],
    width: u32,
    height: u32,
    mode: AlphaMode,
) -> Vec<StrokeFootprint> {
    let opacity = match mode {
        AlphaMode::Learned => None,
        AlphaMode::Opaque => Some(1.0),
    };
    strokes
        .iter()
        .map(|s| s.footprint(width, height, opacity))
        .collect()
}

/// Indices of footprints whose bounding box intersects row `py`, in painting order.
pub(crate) fn strokes_in_row(footprints: &[StrokeFootprint], py: i32, width: i32) -> Vec<usize> {
    footprints
        .iter()
        .enumerate()
        .filter(|(_, fp)| fp.overlaps_row(py) && fp.max_x >= 0 && fp.min_x < width)
        .map(|(i, _)| i)
        .collect()
}

/// Composite `strokes` over `background`. The output has the background's size.
pub fn render_strokes(background: &Raster, strokes: &[BrushStroke], mode: AlphaMode) -> Raster {
    let width = background.width();
    let height = background.height();
    let footprints = prepare_footprints(strokes, width, height, mode);

    let mut out = background.clone();
    if width == 0 || footprints.is_empty() {
        return out;
    }

    out.pixels_mut()
        .par_chunks_mut(width as usize)
        .enumerate()
        .for_each(|(py, row)| {
            let py = py as i32;
            let active = strokes_in_row(&footprints, py, width as i32);
            if active.is_empty() {
                return;
            }
            let pixel_y = py as f32 + 0.5;
            for (px, pixel) in row.iter_mut().enumerate() {
                let px = px as i32;
                let center = Vector2::new(px as f32 + 0.5, pixel_y);
                let mut color: Vector3<f32> = *pixel;
                for &k in &active {
                    let fp = &footprints[k];
                    if !fp.covers(px, py) {
                        continue;
                    }
                    if let Some(alpha) = fp.alpha_at(center) {
                        color = color * (1.0 - alpha) + fp.color * alpha;
                    }
                }
                *pixel = color;
            }
        });

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn red_stroke() -> BrushStroke {
        BrushStroke::new(
            Vector2::new(0.5, 0.5),
            0.0,
            0.2,
            0.1,
            Vector3::new(1.0, 0.0, 0.0),
            0.95,
        )
    }

    #[test]
    fn test_empty_painting_is_background() {
        let bg = Raster::filled(16, 8, Vector3::new(0.3, 0.3, 0.3));
        assert_eq!(render_strokes(&bg, &[], AlphaMode::Learned), bg);
    }

    #[test]
    fn test_stroke_paints_center_not_corner() {
        let bg = Raster::filled(32, 32, Vector3::new(1.0, 1.0, 1.0));
        let img = render_strokes(&bg, &[red_stroke()], AlphaMode::Learned);
        let center = img.get(16, 16);
        assert!(center.y < 0.1, "center should be red, got {center:?}");
        assert_eq!(img.get(0, 0), Vector3::new(1.0, 1.0, 1.0));
    }

    #[test]
    fn test_opaque_mode_hides_background_more() {
        let bg = Raster::filled(32, 32, Vector3::new(0.0, 0.0, 1.0));
        let mut s = red_stroke();
        s.opacity = crate::core::inverse_sigmoid(0.5);
        let learned = render_strokes(&bg, &[s.clone()], AlphaMode::Learned);
        let opaque = render_strokes(&bg, &[s], AlphaMode::Opaque);
        assert_relative_eq!(learned.get(16, 16).x, 0.5, epsilon = 1e-3);
        assert!(opaque.get(16, 16).x > 0.98);
    }

    #[test]
    fn test_stroke_off_canvas_is_harmless() {
        let bg = Raster::filled(8, 8, Vector3::zeros());
        let mut s = red_stroke();
        s.position = Vector2::new(5.0, -3.0);
        assert_eq!(render_strokes(&bg, &[s], AlphaMode::Learned), bg);
    }
}
