//! # copaint-rs: co-painting training data from differentiable stroke paintings
//!
//! This crate turns (image, caption) pairs into training triples for a model
//! that continues a partially finished painting toward a text-described
//! target. Each target is approximated by an ordered stack of brush strokes
//! fitted by gradient descent, and earlier canvas states are synthesized by
//! removing strokes or regions from the finished painting.
//!
//! ## Architecture
//!
//! - `core`: rasters, masks, brush strokes, paintings, palettes
//! - `diff`: hand-written backward passes (footprint, shape, compositing)
//! - `render`: forward rasterizer and per-stroke gradient pass (CPU, rayon)
//! - `optim`: Adam, image losses, the stroke planner
//! - `removal`: random, saliency, object and full-reset start canvases
//! - `score`: alignment / saliency scorer traits and edge complexity
//! - `backend`: dataset, fetching, generation, fine-tuning and segmentation
//!   collaborators
//! - `io`: record index, sharded file layout, image saving
//! - `pipeline`: acquisition, augmentation and the assembly loop
//! - `config`: command-line options
//!
//! Gradients are checked against finite differences in `tests/`.

// Core data structures and math
pub mod core;

// Differentiable operations (backward passes)
pub mod diff;

// Forward and backward rasterization
pub mod render;

// Optimization (planner, losses, Adam)
pub mod optim;

pub mod removal;
pub mod score;
pub mod backend;
pub mod io;
pub mod pipeline;
pub mod config;

// Re-export commonly used types at crate root for convenience
pub use core::{BrushStroke, Painting, Raster};
pub use io::{DataRecord, DataStore};
pub use removal::RemovalMethod;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
