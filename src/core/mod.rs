//! Core data structures and mathematical operations.
//!
//! This module contains the fundamental types used throughout the system:
//! - `Raster`, `ScalarMap`, `Mask`: pixel buffers
//! - `BrushStroke`, `StrokeBounds`, `StrokeFootprint`: stroke parameters
//! - `Painting`: an ordered stroke stack over a background
//! - `Palette`: discrete paint colors
//!
//! Nothing here does file or network I/O.

pub mod color;
mod math;
mod painting;
pub mod raster;
mod stroke;

pub use color::{Palette, PaletteError};
pub use math::{inverse_sigmoid, max_eigenvalue_sym2, sigmoid, wrap_angle};
pub use painting::Painting;
pub use raster::{Mask, Raster, ScalarMap};
pub use stroke::{
    stroke_covariance, BrushStroke, StrokeBounds, StrokeFootprint, StrokeInit, MAX_ALPHA, MIN_ALPHA,
};
