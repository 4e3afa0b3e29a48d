//! copaint-data: generate co-painting training triples
//!
//! Usage:
//!   copaint-data --output-parent-dir out --dataset captions.jsonl \
//!       --scorer-cmd "python3 clip_score.py" --saliency-cmd "python3 clip_attn.py" \
//!       [--clip-score-cmd "python3 clipscore.py"]

use anyhow::{bail, Context, Result};
use clap::Parser;
use copaint_rs::backend::{
    AccelerateFineTuner, ColorRegionSegmenter, CommandAlignmentScorer, CommandGeneratorFactory, CommandSaliencyScorer,
    CommandSegmenter, HttpImageFetcher, JsonDataset, SegmentationBackend,
};
use copaint_rs::config::Options;
use copaint_rs::core::Raster;
use copaint_rs::io::load_raster;
use copaint_rs::pipeline::{Backends, DatasetBuilder, GenerationBackends};
use copaint_rs::score::AlignmentScorer;
use nalgebra::Vector3;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::io::Write;
use std::path::Path;

/// Save the command line and seed next to the generated data.
fn save_run_metadata(out_dir: &Path, seed: u64) -> std::io::Result<()> {
    let mut file = std::fs::File::create(out_dir.join("run_metadata.txt"))?;
    let args: Vec<String> = std::env::args().collect();

    writeln!(file, "=== Data Generation Run ===")?;
    writeln!(file)?;
    writeln!(file, "Command:")?;
    writeln!(file, "{}", args.join(" "))?;
    writeln!(file)?;
    writeln!(file, "Started: {:?}", std::time::SystemTime::now())?;
    writeln!(file, "Seed: {seed}")?;
    writeln!(file, "Package version: {}", copaint_rs::VERSION)?;
    Ok(())
}

/// The configured background image at planning size, or a white canvas.
fn initial_canvas(opt: &Options, height: u32, width: u32) -> Result<Raster> {
    match &opt.background_image {
        Some(path) if path.exists() => {
            let canvas = load_raster(path).with_context(|| format!("reading background {}", path.display()))?;
            Ok(canvas.resize(width, height))
        }
        Some(path) => {
            log::warn!("background {} not found, using a white canvas", path.display());
            Ok(Raster::filled(width, height, Vector3::repeat(1.0)))
        }
        None => Ok(Raster::filled(width, height, Vector3::repeat(1.0))),
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let opt = Options::parse();
    opt.validate().context("invalid options")?;
    log::info!("copaint-data v{}", copaint_rs::VERSION);

    if let Some(threads) = opt.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .context("building the rayon thread pool")?;
    }

    std::fs::create_dir_all(&opt.output_parent_dir)
        .with_context(|| format!("creating {}", opt.output_parent_dir.display()))?;
    let seed = opt.seed.unwrap_or_else(rand::random);
    save_run_metadata(&opt.output_parent_dir, seed).context("writing run metadata")?;
    log::info!("seed {seed}");

    let (height, width) = opt.planning_size();
    log::info!("planning at {width}x{height}, removal at {}x", opt.removal_scale);
    let background = initial_canvas(&opt, height, width)?;

    let dataset = JsonDataset::open(&opt.dataset).with_context(|| format!("loading dataset {}", opt.dataset.display()))?;
    let fetcher = HttpImageFetcher::new(opt.fetch_timeout()).context("building HTTP client")?;
    let alignment = CommandAlignmentScorer::new(opt.scorer_command()?);
    let record_scorer = opt.clip_score_command()?.map(CommandAlignmentScorer::new);
    let saliency = CommandSaliencyScorer::new(opt.saliency_command()?);
    let segmenter: Box<dyn SegmentationBackend> = match opt.segmenter_command()? {
        Some(cmd) => Box::new(CommandSegmenter::new(cmd)),
        None => {
            log::info!("no --segmenter-cmd, using the built-in color-region segmenter");
            Box::new(ColorRegionSegmenter::default())
        }
    };

    let generation = if opt.generate_training_data {
        if !opt.fine_tune_script.exists() {
            bail!("fine-tune script {} not found", opt.fine_tune_script.display());
        }
        let lora_dir = opt.lora_dir();
        std::fs::create_dir_all(&lora_dir).with_context(|| format!("creating {}", lora_dir.display()))?;
        Some((
            CommandGeneratorFactory {
                cmd: opt.generator_command()?,
            },
            AccelerateFineTuner::new(opt.fine_tune_config()),
        ))
    } else {
        None
    };

    let backends = Backends {
        dataset: &dataset,
        fetcher: &fetcher,
        alignment: &alignment,
        record_scorer: record_scorer.as_ref().map(|s| s as &dyn AlignmentScorer),
        saliency: &saliency,
        segmenter: segmenter.as_ref(),
        generation: generation.as_ref().map(|(factory, tuner)| GenerationBackends {
            factory,
            fine_tuner: tuner,
        }),
    };

    let rng = StdRng::seed_from_u64(seed);
    let mut builder = DatasetBuilder::new(opt.run_config()?, backends, opt.layout(), background, rng)
        .context("setting up the dataset builder")?;
    let summary = builder.run();

    log::info!(
        "done: {} images attempted, {} planned, {} records written ({} total)",
        summary.images_attempted,
        summary.images_planned,
        summary.records_written,
        builder.store().len()
    );
    log::info!(
        "failures: acquire={} plan={} method={} retrain={}",
        summary.acquire_failures,
        summary.plan_failures,
        summary.method_failures,
        summary.retrain_failures
    );
    Ok(())
}
