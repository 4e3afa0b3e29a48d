//! External collaborators: dataset provider, image fetcher, text-to-image
//! generator with its fine-tuning job, and image segmentation.
//!
//! Each collaborator is a trait so the assembly loop can run against real
//! models (through command-line adapters) or test stubs. Command adapters
//! block until the child process exits.

pub mod dataset;
pub mod fetch;
pub mod generator;
pub mod scorer;
pub mod segment;

use std::ffi::OsStr;
use std::process::Command;
use thiserror::Error;

pub use dataset::{DatasetProvider, DatasetRecord, JsonDataset};
pub use fetch::{HttpImageFetcher, ImageFetcher};
pub use generator::{
    AccelerateFineTuner, CommandGenerator, CommandGeneratorFactory, FineTuneConfig, FineTuner, GenerativeBackend,
    GeneratorFactory,
};
pub use scorer::{CommandAlignmentScorer, CommandSaliencyScorer};
pub use segment::{ColorRegionSegmenter, CommandSegmenter, Segment, SegmentationBackend};

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to launch `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{program}` exited with {status}: {stderr}")]
    Command {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP status {status} for {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("image decode failed: {0}")]
    Image(#[from] image::ImageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid backend output: {0}")]
    InvalidOutput(String),

    #[error("dataset error: {0}")]
    Dataset(String),
}

/// A program plus leading arguments, parsed from a whitespace-separated
/// string such as `"python3 tools/clip_score.py"`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandLine {
    pub fn parse(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self {
            program,
            args: parts.collect(),
        })
    }

    /// Run with `extra` appended to the leading arguments; returns stdout.
    pub fn run<S: AsRef<OsStr>>(&self, extra: &[S]) -> Result<String, BackendError> {
        let mut args: Vec<&OsStr> = self.args.iter().map(OsStr::new).collect();
        args.extend(extra.iter().map(|a| a.as_ref()));
        run_command(&self.program, args)
    }
}

/// Run `program` to completion. Non-zero exit is `BackendError::Command`
/// carrying the captured stderr.
pub fn run_command<'a, I>(program: &str, args: I) -> Result<String, BackendError>
where
    I: IntoIterator<Item = &'a OsStr>,
{
    log::debug!("running `{program}`");
    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|source| BackendError::Spawn {
            program: program.to_string(),
            source,
        })?;

    if !output.status.success() {
        return Err(BackendError::Command {
            program: program.to_string(),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_line_parse() {
        let cmd = CommandLine::parse("  python3 tools/score.py --fast ").unwrap();
        assert_eq!(cmd.program, "python3");
        assert_eq!(cmd.args, vec!["tools/score.py", "--fast"]);
        assert!(CommandLine::parse("   ").is_none());
    }

    #[test]
    fn test_missing_program_is_spawn_error() {
        let cmd = CommandLine::parse("definitely-not-a-real-program-xyz").unwrap();
        let err = cmd.run(&["a"]).unwrap_err();
        assert!(matches!(err, BackendError::Spawn { .. }));
    }
}
