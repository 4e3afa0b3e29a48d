//! Command-line adapters for the alignment and saliency scorers.

use crate::backend::{BackendError, CommandLine};
use crate::core::{Raster, ScalarMap};
use crate::score::{AlignmentScorer, ImageRef, SaliencyScorer, ScoreError};
use std::ffi::OsStr;

/// Runs `<cmd> <image-ref> <caption>` and reads a single number from the
/// last non-empty line of stdout.
pub struct CommandAlignmentScorer {
    pub cmd: CommandLine,
}

impl CommandAlignmentScorer {
    pub fn new(cmd: CommandLine) -> Self {
        Self { cmd }
    }
}

fn parse_score(stdout: &str) -> Result<f32, ScoreError> {
    let line = stdout
        .lines()
        .map(str::trim)
        .rfind(|l| !l.is_empty())
        .ok_or_else(|| ScoreError::InvalidOutput("empty output".to_string()))?;
    let value: f32 = line
        .parse()
        .map_err(|_| ScoreError::InvalidOutput(format!("not a number: {line:?}")))?;
    if !value.is_finite() {
        return Err(ScoreError::InvalidOutput(format!("non-finite score {value}")));
    }
    Ok(value)
}

impl AlignmentScorer for CommandAlignmentScorer {
    fn score(&self, image: &ImageRef, caption: &str) -> Result<f32, ScoreError> {
        let stdout = self.cmd.run(&[image.to_string().as_str(), caption])?;
        parse_score(&stdout)
    }
}

/// Runs `<cmd> <image.png> <caption> <attention.png>`; the attention map is
/// read back as grayscale in [0,1].
pub struct CommandSaliencyScorer {
    pub cmd: CommandLine,
}

impl CommandSaliencyScorer {
    pub fn new(cmd: CommandLine) -> Self {
        Self { cmd }
    }
}

impl SaliencyScorer for CommandSaliencyScorer {
    fn attention(&self, image: &Raster, caption: &str) -> Result<ScalarMap, ScoreError> {
        let dir = tempfile::tempdir().map_err(BackendError::from)?;
        let input = dir.path().join("image.png");
        let output = dir.path().join("attention.png");
        image.to_rgb8().save(&input).map_err(BackendError::from)?;

        self.cmd.run(&[input.as_os_str(), OsStr::new(caption), output.as_os_str()])?;

        let attention = image::open(&output).map_err(BackendError::from)?.to_luma8();
        Ok(ScalarMap::from_luma8(&attention))
    }
}
