//! Stroke rendering: the deterministic forward rasterizer and the
//! forward+backward pass that produces per-stroke gradients.

pub mod backward;
pub mod rasterize;

pub use backward::{render_stroke_grads, StrokeGrads};
pub use rasterize::{prepare_footprints, render_strokes, AlphaMode};
