//! Similarity scorers: text-image alignment and caption-conditioned saliency,
//! plus the edge-complexity heuristic used for candidate selection.

pub mod edges;

use crate::backend::BackendError;
use crate::core::{Raster, ScalarMap};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

pub use edges::{edge_complexity, select_simplest};

/// What an alignment scorer looks at: a remote image or a saved file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ImageRef {
    Url(String),
    Path(PathBuf),
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageRef::Url(url) => f.write_str(url),
            ImageRef::Path(path) => write!(f, "{}", path.display()),
        }
    }
}

#[derive(Debug, Error)]
pub enum ScoreError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("scorer produced unusable output: {0}")]
    InvalidOutput(String),
}

pub trait AlignmentScorer {
    /// Alignment of `image` with `caption` on the model's native logit scale.
    fn score(&self, image: &ImageRef, caption: &str) -> Result<f32, ScoreError>;
}

pub trait SaliencyScorer {
    /// Per-pixel relevance of `image` regions to `caption`, roughly in [0,1].
    fn attention(&self, image: &Raster, caption: &str) -> Result<ScalarMap, ScoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_ref_display() {
        assert_eq!(ImageRef::Url("http://x/a.png".into()).to_string(), "http://x/a.png");
        assert_eq!(ImageRef::Path(PathBuf::from("out/0/id3_final.png")).to_string(), "out/0/id3_final.png");
    }
}
