//! Stroke-removal strategies: derive an earlier "start" canvas from a
//! finished painting.
//!
//! Every strategy works on a borrowed painting and never mutates it, so one
//! planned painting can feed a whole sweep of methods. Results are rendered at
//! `scale ×` the planning resolution.

mod object;
mod random;
mod saliency;

use crate::backend::{BackendError, SegmentationBackend};
use crate::core::{Mask, Painting, Raster, ScalarMap};
use crate::score::{SaliencyScorer, ScoreError};
use image::{DynamicImage, RgbaImage};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub use object::{object_overlay, objects_to_remove, remove_objects};
pub use random::{random_keep_indices, remove_random};
pub use saliency::remove_by_salience;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalMethod {
    Random,
    Salience,
    NotSalience,
    Object,
    All,
}

impl RemovalMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            RemovalMethod::Random => "random",
            RemovalMethod::Salience => "salience",
            RemovalMethod::NotSalience => "not_salience",
            RemovalMethod::Object => "object",
            RemovalMethod::All => "all",
        }
    }

    /// The default sweep, weighted toward random removal.
    pub fn default_sweep() -> Vec<RemovalMethod> {
        use RemovalMethod::*;
        vec![Random, Random, Random, Random, Salience, NotSalience, Object, Object, All]
    }

    /// Parse a comma-separated sweep such as `random,random,object,all`.
    pub fn parse_sweep(list: &str) -> Result<Vec<RemovalMethod>, String> {
        list.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::parse)
            .collect()
    }
}

impl fmt::Display for RemovalMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RemovalMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "random" => Ok(RemovalMethod::Random),
            "salience" => Ok(RemovalMethod::Salience),
            "not_salience" | "not-salience" => Ok(RemovalMethod::NotSalience),
            "object" => Ok(RemovalMethod::Object),
            "all" => Ok(RemovalMethod::All),
            other => Err(format!("unknown removal method '{other}'")),
        }
    }
}

#[derive(Clone, Debug)]
pub struct RemovalConfig {
    /// Render multiplier over the planning resolution.
    pub scale: u32,
    /// Attention values strictly above this are salient.
    pub saliency_threshold: f32,
}

impl Default for RemovalConfig {
    fn default() -> Self {
        Self {
            scale: 4,
            saliency_threshold: 0.25,
        }
    }
}

/// Everything a strategy may look at.
pub struct RemovalContext<'a> {
    pub painting: &'a Painting,
    /// Planning resolution.
    pub height: u32,
    pub width: u32,
    /// Target at planning resolution.
    pub target: &'a Raster,
    pub caption: &'a str,
    /// Strokes that should remain in the start canvas.
    pub partial: usize,
}

impl RemovalContext<'_> {
    fn scaled_size(&self, scale: u32) -> (u32, u32) {
        (self.height * scale, self.width * scale)
    }
}

/// Collaborators some strategies need.
pub struct RemovalBackends<'a> {
    pub saliency: &'a dyn SaliencyScorer,
    pub segmenter: &'a dyn SegmentationBackend,
}

/// Strategy-specific images saved next to a record.
#[derive(Clone, Debug)]
pub enum Diagnostic {
    Attention(ScalarMap),
    Salience(Mask),
    ObjectOverlay(RgbaImage),
    ObjectMask(Mask),
}

impl Diagnostic {
    /// File-name suffix of the saved image.
    pub fn suffix(&self) -> &'static str {
        match self {
            Diagnostic::Attention(_) => "attn",
            Diagnostic::Salience(_) => "salience",
            Diagnostic::ObjectOverlay(_) => "mask",
            Diagnostic::ObjectMask(_) => "bool_obj_mask",
        }
    }

    pub fn to_image(&self) -> DynamicImage {
        match self {
            Diagnostic::Attention(map) => DynamicImage::ImageRgb8(map.to_rgb8()),
            Diagnostic::Salience(mask) | Diagnostic::ObjectMask(mask) => DynamicImage::ImageRgb8(mask.to_rgb8()),
            Diagnostic::ObjectOverlay(img) => DynamicImage::ImageRgba8(img.clone()),
        }
    }
}

#[derive(Clone, Debug)]
pub struct RemovalOutcome {
    pub method: RemovalMethod,
    pub start: Raster,
    pub diagnostics: Vec<Diagnostic>,
    pub num_prev_strokes: usize,
    pub num_strokes_added: usize,
}

#[derive(Debug, Error)]
pub enum RemovalError {
    #[error("cannot keep {partial} of {full} strokes")]
    PartialExceedsFull { partial: usize, full: usize },

    #[error("saliency scorer failed: {0}")]
    Saliency(#[from] ScoreError),

    #[error("segmentation failed: {0}")]
    Segmentation(#[from] BackendError),
}

/// Number of strokes that remain in a partial canvas: uniform in
/// `[floor(0.25·full), floor(0.75·full)]`.
pub fn sample_partial_count<R: Rng + ?Sized>(full: usize, rng: &mut R) -> usize {
    let lo = full / 4;
    let hi = (full * 3) / 4;
    rng.gen_range(lo..=hi)
}

/// Run one strategy on `ctx.painting`.
pub fn apply_removal<R: Rng + ?Sized>(
    method: RemovalMethod,
    ctx: &RemovalContext<'_>,
    backends: &RemovalBackends<'_>,
    cfg: &RemovalConfig,
    rng: &mut R,
) -> Result<RemovalOutcome, RemovalError> {
    let full = ctx.painting.len();
    let (h, w) = ctx.scaled_size(cfg.scale);

    if method != RemovalMethod::All && ctx.partial > full {
        return Err(RemovalError::PartialExceedsFull {
            partial: ctx.partial,
            full,
        });
    }

    let (start, diagnostics) = match method {
        RemovalMethod::All => {
            return Ok(RemovalOutcome {
                method,
                start: ctx.painting.background_at(h, w),
                diagnostics: Vec::new(),
                num_prev_strokes: 0,
                num_strokes_added: full,
            })
        }
        RemovalMethod::Random => (remove_random(ctx, cfg.scale, rng)?, Vec::new()),
        RemovalMethod::Salience | RemovalMethod::NotSalience => {
            let keep_salient = method == RemovalMethod::NotSalience;
            let (start, attention, salient) = remove_by_salience(ctx, backends.saliency, cfg, keep_salient)?;
            (start, vec![Diagnostic::Attention(attention), Diagnostic::Salience(salient)])
        }
        RemovalMethod::Object => {
            let (start, overlay, removed) = remove_objects(ctx, backends.segmenter, cfg.scale, rng)?;
            (start, vec![Diagnostic::ObjectOverlay(overlay), Diagnostic::ObjectMask(removed)])
        }
    };

    Ok(RemovalOutcome {
        method,
        start,
        diagnostics,
        num_prev_strokes: ctx.partial,
        num_strokes_added: full - ctx.partial,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_method_names_round_trip() {
        for m in RemovalMethod::default_sweep() {
            assert_eq!(m.as_str().parse::<RemovalMethod>().unwrap(), m);
            let json = serde_json::to_string(&m).unwrap();
            assert_eq!(json, format!("\"{}\"", m.as_str()));
        }
        assert!("sideways".parse::<RemovalMethod>().is_err());
    }

    #[test]
    fn test_parse_sweep() {
        let sweep = RemovalMethod::parse_sweep("random, object,all").unwrap();
        assert_eq!(sweep, vec![RemovalMethod::Random, RemovalMethod::Object, RemovalMethod::All]);
        assert!(RemovalMethod::parse_sweep("random,bogus").is_err());
    }

    #[test]
    fn test_partial_count_range() {
        let mut rng = StdRng::seed_from_u64(3);
        for full in [0usize, 1, 4, 10, 150] {
            for _ in 0..50 {
                let p = sample_partial_count(full, &mut rng);
                assert!(p >= full / 4 && p <= full * 3 / 4, "{p} out of range for {full}");
            }
        }
    }
}
