//! Command-line options and the plain config structs derived from them.
//!
//! `Options` is parsed once at startup, validated, and then split into the
//! per-component configs. Nothing reads options after setup.

use crate::backend::{CommandLine, FineTuneConfig};
use crate::core::{Palette, PaletteError};
use crate::io::OutputLayout;
use crate::optim::{LossKind, PlannerConfig};
use crate::pipeline::{AcquireConfig, AugmentConfig, PaletteSource, RetrainConfig, RunConfig};
use crate::removal::{RemovalConfig, RemovalMethod};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("--{name} {message}")]
    OutOfRange { name: &'static str, message: String },

    #[error("--min-strokes-added ({min}) exceeds --max-strokes-added ({max})")]
    StrokeRange { min: usize, max: usize },

    #[error("invalid --colors: {0}")]
    Palette(#[from] PaletteError),

    #[error("invalid --removal-methods: {0}")]
    RemovalMethods(String),

    #[error("--{0} is empty")]
    EmptyCommand(&'static str),
}

/// Generate (target, partial painting, prompt) training triples.
#[derive(Parser, Debug, Clone)]
#[command(name = "copaint-data", version, about)]
pub struct Options {
    /// Root directory of the generated dataset.
    #[arg(long)]
    pub output_parent_dir: PathBuf,

    /// JSON array or JSON-lines file of dataset records.
    #[arg(long)]
    pub dataset: PathBuf,

    #[arg(long, default_value = "URL")]
    pub url_field: String,

    #[arg(long, default_value = "TEXT")]
    pub caption_field: String,

    #[arg(long, default_value = "Prompt")]
    pub prompt_field: String,

    #[arg(long, default_value = "Challenge")]
    pub challenge_field: String,

    /// Comma-separated challenge categories used as prompts in generation mode.
    #[arg(long, default_value = "Basic,Simple Detail,Fine-Grained Detail")]
    pub prompt_challenges: String,

    /// Initial canvas image. A white canvas is used when absent or missing.
    #[arg(long)]
    pub background_image: Option<PathBuf>,

    #[arg(long, default_value_t = 0.3)]
    pub canvas_width_m: f32,

    #[arg(long, default_value_t = 0.2)]
    pub canvas_height_m: f32,

    /// Planning resolution height in pixels.
    #[arg(long, default_value_t = 128)]
    pub render_height: u32,

    #[arg(long, default_value_t = 50)]
    pub min_strokes_added: usize,

    #[arg(long, default_value_t = 150)]
    pub max_strokes_added: usize,

    #[arg(long, default_value_t = 300)]
    pub n_iters: usize,

    #[arg(long, default_value_t = 1.0)]
    pub lr_multiplier: f32,

    #[arg(long, default_value_t = LossKind::MultiScale)]
    pub loss: LossKind,

    /// Palette size when colors are extracted per image.
    #[arg(long, default_value_t = 6)]
    pub n_colors: usize,

    /// Fixed palette, `r,g,b.r,g,b...` in 0-255 units.
    #[arg(long)]
    pub colors: Option<String>,

    /// Color bucket width for stroke ordering, 0-255 units.
    #[arg(long, default_value_t = 64.0)]
    pub bin_size: f32,

    /// Ink-trace mode: black strokes, no color learning.
    #[arg(long)]
    pub ink: bool,

    /// Acquire images from the generative backend instead of the dataset.
    #[arg(long)]
    pub generate_training_data: bool,

    #[arg(long, default_value_t = 100)]
    pub retrain_interval: usize,

    #[arg(long, default_value_t = 100)]
    pub min_records_for_retrain: usize,

    /// Defaults to `<output-parent-dir>/lora_model`.
    #[arg(long)]
    pub lora_dir: Option<PathBuf>,

    #[arg(long, default_value_t = 1000)]
    pub max_images: usize,

    #[arg(long, default_value_t = 3)]
    pub num_images_to_consider_for_simplicity: usize,

    /// Reject dataset pairs scoring below this (alignment logit scale).
    #[arg(long, default_value_t = 30.0)]
    pub alignment_threshold: f32,

    #[arg(long, default_value_t = 0.25)]
    pub saliency_threshold: f32,

    /// Removal renders at this multiple of the planning resolution.
    #[arg(long, default_value_t = 4)]
    pub removal_scale: u32,

    #[arg(long, default_value_t = 10)]
    pub fetch_timeout_secs: u64,

    /// Ordered removal sweep run on every planned painting.
    #[arg(long, default_value = "random,random,random,random,salience,not_salience,object,object,all")]
    pub removal_methods: String,

    /// Alignment scorer: `<cmd> <image> <caption>` prints a score.
    #[arg(long)]
    pub scorer_cmd: String,

    /// Scores each saved final render against its caption for the record's
    /// `clip_score`, with the same calling convention as `--scorer-cmd`.
    /// Defaults to `--scorer-cmd`.
    #[arg(long)]
    pub clip_score_cmd: Option<String>,

    /// Saliency scorer: `<cmd> <image.png> <caption> <out.png>`.
    #[arg(long)]
    pub saliency_cmd: String,

    /// Segmenter: `<cmd> <image.png> <out_dir>` writes one PNG per mask.
    /// The built-in color-region segmenter is used when absent.
    #[arg(long)]
    pub segmenter_cmd: Option<String>,

    /// Generator: `<cmd> <prompt> <out.png> [<lora_dir>]`.
    #[arg(long)]
    pub generator_cmd: Option<String>,

    #[arg(long, default_value = "accelerate")]
    pub fine_tune_program: String,

    #[arg(long, default_value = "train_lora.py")]
    pub fine_tune_script: PathBuf,

    #[arg(long, default_value = "runwayml/stable-diffusion-v1-5")]
    pub pretrained_model: String,

    /// Worker threads for rendering (all cores when absent).
    #[arg(long)]
    pub threads: Option<usize>,

    #[arg(long)]
    pub seed: Option<u64>,

    /// Optimizer progress is logged every this many iterations.
    #[arg(long, default_value_t = 50)]
    pub log_interval: usize,

    /// Start every painting from the initial canvas instead of the last render.
    #[arg(long)]
    pub no_canvas_carry_over: bool,

    /// Hide the progress bar.
    #[arg(long)]
    pub quiet: bool,
}

fn positive(name: &'static str, value: f32) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            name,
            message: format!("must be positive, got {value}"),
        })
    }
}

fn nonzero(name: &'static str, value: usize) -> Result<(), ConfigError> {
    if value > 0 {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            name,
            message: "must be at least 1".to_string(),
        })
    }
}

fn command(name: &'static str, line: &str) -> Result<CommandLine, ConfigError> {
    CommandLine::parse(line).ok_or(ConfigError::EmptyCommand(name))
}

impl Options {
    /// Check ranges and formats before any work starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("canvas-width-m", self.canvas_width_m)?;
        positive("canvas-height-m", self.canvas_height_m)?;
        positive("lr-multiplier", self.lr_multiplier)?;
        positive("bin-size", self.bin_size)?;
        nonzero("render-height", self.render_height as usize)?;
        nonzero("removal-scale", self.removal_scale as usize)?;
        nonzero("min-strokes-added", self.min_strokes_added)?;
        nonzero("num-images-to-consider-for-simplicity", self.num_images_to_consider_for_simplicity)?;
        nonzero("fetch-timeout-secs", self.fetch_timeout_secs as usize)?;
        if self.colors.is_none() {
            nonzero("n-colors", self.n_colors)?;
        }
        if self.min_strokes_added > self.max_strokes_added {
            return Err(ConfigError::StrokeRange {
                min: self.min_strokes_added,
                max: self.max_strokes_added,
            });
        }
        if !(0.0..=1.0).contains(&self.saliency_threshold) {
            return Err(ConfigError::OutOfRange {
                name: "saliency-threshold",
                message: format!("must lie in [0, 1], got {}", self.saliency_threshold),
            });
        }
        if let Some(t) = self.threads {
            nonzero("threads", t)?;
        }
        if self.planning_size().1 == 0 {
            return Err(ConfigError::OutOfRange {
                name: "canvas-width-m",
                message: "gives a zero-width planning canvas".to_string(),
            });
        }

        self.palette_source()?;
        self.removal_sweep()?;
        command("scorer-cmd", &self.scorer_cmd)?;
        self.clip_score_command()?;
        command("saliency-cmd", &self.saliency_cmd)?;
        if let Some(cmd) = &self.segmenter_cmd {
            command("segmenter-cmd", cmd)?;
        }
        if self.generate_training_data {
            command("generator-cmd", self.generator_cmd.as_deref().unwrap_or(""))?;
        }
        Ok(())
    }

    /// Planning `(height, width)`: the render height and the width that keeps
    /// the physical canvas aspect ratio.
    pub fn planning_size(&self) -> (u32, u32) {
        let h = self.render_height;
        let w = (self.render_height as f32 * (self.canvas_width_m / self.canvas_height_m)).floor() as u32;
        (h, w)
    }

    pub fn layout(&self) -> OutputLayout {
        OutputLayout::new(&self.output_parent_dir)
    }

    pub fn lora_dir(&self) -> PathBuf {
        self.lora_dir.clone().unwrap_or_else(|| self.layout().default_lora_dir())
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn removal_sweep(&self) -> Result<Vec<RemovalMethod>, ConfigError> {
        let sweep = RemovalMethod::parse_sweep(&self.removal_methods).map_err(ConfigError::RemovalMethods)?;
        if sweep.is_empty() {
            return Err(ConfigError::RemovalMethods("no methods given".to_string()));
        }
        Ok(sweep)
    }

    pub fn palette_source(&self) -> Result<PaletteSource, ConfigError> {
        Ok(match &self.colors {
            Some(colors) => PaletteSource::Fixed(Palette::parse(colors)?),
            None => PaletteSource::Extracted {
                n_colors: self.n_colors,
            },
        })
    }

    pub fn scorer_command(&self) -> Result<CommandLine, ConfigError> {
        command("scorer-cmd", &self.scorer_cmd)
    }

    /// Scorer for saved final renders, when it differs from the dataset filter.
    pub fn clip_score_command(&self) -> Result<Option<CommandLine>, ConfigError> {
        self.clip_score_cmd
            .as_deref()
            .map(|cmd| command("clip-score-cmd", cmd))
            .transpose()
    }

    pub fn saliency_command(&self) -> Result<CommandLine, ConfigError> {
        command("saliency-cmd", &self.saliency_cmd)
    }

    pub fn segmenter_command(&self) -> Result<Option<CommandLine>, ConfigError> {
        self.segmenter_cmd
            .as_deref()
            .map(|cmd| command("segmenter-cmd", cmd))
            .transpose()
    }

    pub fn generator_command(&self) -> Result<CommandLine, ConfigError> {
        command("generator-cmd", self.generator_cmd.as_deref().unwrap_or(""))
    }

    pub fn planner_config(&self) -> PlannerConfig {
        PlannerConfig {
            n_strokes: self.max_strokes_added,
            n_iters: self.n_iters,
            lr_multiplier: self.lr_multiplier,
            loss: self.loss,
            ink: self.ink,
            bin_size: self.bin_size,
            log_interval: self.log_interval,
            ..PlannerConfig::default()
        }
    }

    pub fn removal_config(&self) -> RemovalConfig {
        RemovalConfig {
            scale: self.removal_scale,
            saliency_threshold: self.saliency_threshold,
        }
    }

    pub fn acquire_config(&self) -> AcquireConfig {
        AcquireConfig {
            url_field: self.url_field.clone(),
            caption_field: self.caption_field.clone(),
            prompt_field: self.prompt_field.clone(),
            challenge_field: self.challenge_field.clone(),
            challenges: self
                .prompt_challenges
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            alignment_threshold: self.alignment_threshold,
            num_candidates: self.num_images_to_consider_for_simplicity,
            ..AcquireConfig::default()
        }
    }

    pub fn fine_tune_config(&self) -> FineTuneConfig {
        FineTuneConfig {
            program: self.fine_tune_program.clone(),
            script: self.fine_tune_script.clone(),
            pretrained_model: self.pretrained_model.clone(),
            ..FineTuneConfig::default()
        }
    }

    pub fn retrain_config(&self) -> Option<RetrainConfig> {
        self.generate_training_data.then(|| RetrainConfig {
            interval: self.retrain_interval,
            min_records: self.min_records_for_retrain,
            lora_dir: self.lora_dir(),
        })
    }

    /// Everything the assembly loop needs.
    pub fn run_config(&self) -> Result<RunConfig, ConfigError> {
        let (height, width) = self.planning_size();
        Ok(RunConfig {
            height,
            width,
            max_images: self.max_images,
            min_strokes: self.min_strokes_added,
            max_strokes: self.max_strokes_added,
            planner: self.planner_config(),
            removal: self.removal_config(),
            acquire: self.acquire_config(),
            augment: AugmentConfig::default(),
            sweep: self.removal_sweep()?,
            palette: self.palette_source()?,
            retrain: self.retrain_config(),
            canvas_carry_over: !self.no_canvas_carry_over,
            show_progress: !self.quiet,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Options {
        let mut args = vec![
            "copaint-data",
            "--output-parent-dir",
            "/tmp/out",
            "--dataset",
            "data.jsonl",
            "--scorer-cmd",
            "python3 clip_score.py",
            "--saliency-cmd",
            "python3 clip_attn.py",
        ];
        args.extend_from_slice(extra);
        Options::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_defaults() {
        let opt = parse(&[]);
        opt.validate().unwrap();
        assert_eq!(opt.planning_size(), (128, 192));
        assert_eq!(opt.loss, LossKind::MultiScale);
        assert_eq!(opt.lora_dir(), PathBuf::from("/tmp/out/lora_model"));
        assert_eq!(opt.removal_sweep().unwrap(), RemovalMethod::default_sweep());
        assert!(opt.retrain_config().is_none());
        assert!(opt.clip_score_command().unwrap().is_none());

        let run = opt.run_config().unwrap();
        assert!(run.canvas_carry_over);
        assert_eq!(run.acquire.challenges.len(), 3);
        assert_eq!(run.removal.scale, 4);
    }

    #[test]
    fn test_clip_score_command_is_separate() {
        let opt = parse(&["--clip-score-cmd", "clipscore --json"]);
        opt.validate().unwrap();
        let cmd = opt.clip_score_command().unwrap().unwrap();
        assert_eq!(cmd, command("clip-score-cmd", "clipscore --json").unwrap());
        assert_ne!(cmd, opt.scorer_command().unwrap());

        let blank = parse(&["--clip-score-cmd", "  "]);
        assert!(blank.validate().is_err());
    }

    #[test]
    fn test_stroke_range_is_checked() {
        let opt = parse(&["--min-strokes-added", "200", "--max-strokes-added", "100"]);
        assert!(matches!(opt.validate(), Err(ConfigError::StrokeRange { min: 200, max: 100 })));
    }

    #[test]
    fn test_fixed_palette_and_loss_flags() {
        let opt = parse(&["--colors", "209,0,0.241,212,69", "--loss", "l1-dssim", "--ink"]);
        opt.validate().unwrap();
        match opt.palette_source().unwrap() {
            PaletteSource::Fixed(p) => assert_eq!(p.len(), 2),
            other => panic!("expected fixed palette, got {other:?}"),
        }
        assert_eq!(opt.planner_config().loss, LossKind::L1Dssim);
        assert!(opt.planner_config().ink);

        let bad = parse(&["--colors", "1,2"]);
        assert!(matches!(bad.validate(), Err(ConfigError::Palette(_))));
    }

    #[test]
    fn test_generation_mode_needs_generator() {
        let opt = parse(&["--generate-training-data"]);
        assert!(matches!(opt.validate(), Err(ConfigError::EmptyCommand("generator-cmd"))));

        let opt = parse(&["--generate-training-data", "--generator-cmd", "python3 gen.py"]);
        opt.validate().unwrap();
        let retrain = opt.retrain_config().unwrap();
        assert_eq!(retrain.interval, 100);
    }

    #[test]
    fn test_bad_removal_method() {
        let opt = parse(&["--removal-methods", "random,teleport"]);
        assert!(matches!(opt.validate(), Err(ConfigError::RemovalMethods(_))));
    }
}
