//! The dataset assembly loop.
//!
//! One outer iteration acquires a datum, plans a painting of it over an
//! augmented copy of the running canvas, then sweeps the removal methods and
//! appends one record per successful method. Failures are isolated at three
//! levels: a failed acquisition or plan forfeits the image, a failed removal
//! forfeits only that method, and nothing is ever partially persisted.

pub mod acquire;
pub mod augment;

use crate::backend::generator::lora_weights_present;
use crate::backend::{
    BackendError, DatasetProvider, FineTuner, GenerativeBackend, GeneratorFactory, ImageFetcher, SegmentationBackend,
};
use crate::core::{Painting, Palette, PaletteError, Raster};
use crate::io::{save_image, save_raster, DataRecord, DataStore, OutputLayout, StoreError};
use crate::optim::{plan_from_image, PlanError, PlannerConfig};
use crate::removal::{
    apply_removal, sample_partial_count, RemovalBackends, RemovalConfig, RemovalContext, RemovalError, RemovalMethod,
};
use crate::render::AlphaMode;
use crate::score::{AlignmentScorer, ImageRef, SaliencyScorer};
use indicatif::{ProgressBar, ProgressStyle};
use rand::rngs::StdRng;
use rand::Rng;
use std::path::PathBuf;
use thiserror::Error;

pub use acquire::{acquire_from_dataset, acquire_generated, AcquireConfig, AcquireError, Datum, PromptPool};
pub use augment::{augment_background, color_jitter, prepare_target, random_resized_crop, AugmentConfig};

/// Side of the square copy used for palette extraction and start/final diffs.
const COMPARE_SIDE: u32 = 256;

/// Errors that stop the run before the loop starts.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("data store: {0}")]
    Store(#[from] StoreError),

    #[error("prompt pool: {0}")]
    Prompts(#[from] AcquireError),

    #[error("generator: {0}")]
    Generator(#[from] BackendError),

    #[error("generation mode needs a generator factory and a fine-tuner")]
    MissingGenerationBackends,
}

/// Why an image produced no records.
#[derive(Debug, Error)]
pub enum ImageFailure {
    #[error("acquisition failed: {0}")]
    Acquire(#[from] AcquireError),

    #[error("palette extraction failed: {0}")]
    Palette(#[from] PaletteError),

    #[error("planning failed: {0}")]
    Plan(#[from] PlanError),

    #[error("could not save final render: {0}")]
    Save(#[from] image::ImageError),
}

/// Why one removal method produced no record.
#[derive(Debug, Error)]
pub enum MethodError {
    #[error(transparent)]
    Removal(#[from] RemovalError),

    #[error("could not save image: {0}")]
    Save(#[from] image::ImageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not append record: {0}")]
    Store(#[from] StoreError),
}

#[derive(Clone, Debug)]
pub enum PaletteSource {
    Fixed(Palette),
    /// k-means over each planning target.
    Extracted { n_colors: usize },
}

#[derive(Clone, Debug)]
pub struct RetrainConfig {
    /// Retrain before image `i` when `(i + 1) % interval == 0`.
    pub interval: usize,
    /// Retrain only when the store holds more records than this.
    pub min_records: usize,
    pub lora_dir: PathBuf,
}

impl RetrainConfig {
    pub fn is_due(&self, iteration: usize, records: usize) -> bool {
        self.interval > 0 && (iteration + 1) % self.interval == 0 && records > self.min_records
    }
}

#[derive(Clone, Debug)]
pub struct RunConfig {
    /// Planning resolution.
    pub height: u32,
    pub width: u32,
    pub max_images: usize,
    pub min_strokes: usize,
    pub max_strokes: usize,
    /// `n_strokes` is replaced per image by a draw from the stroke range.
    pub planner: PlannerConfig,
    pub removal: RemovalConfig,
    pub acquire: AcquireConfig,
    pub augment: AugmentConfig,
    pub sweep: Vec<RemovalMethod>,
    pub palette: PaletteSource,
    /// Generation mode when set; dataset mode otherwise.
    pub retrain: Option<RetrainConfig>,
    pub canvas_carry_over: bool,
    pub show_progress: bool,
}

/// Generative backend and its fine-tuning job, for generation mode.
pub struct GenerationBackends<'a> {
    pub factory: &'a dyn GeneratorFactory,
    pub fine_tuner: &'a dyn FineTuner,
}

/// Every external collaborator the loop talks to.
pub struct Backends<'a> {
    pub dataset: &'a dyn DatasetProvider,
    pub fetcher: &'a dyn ImageFetcher,
    pub alignment: &'a dyn AlignmentScorer,
    /// Scores saved final renders for `clip_score`; `alignment` when unset.
    pub record_scorer: Option<&'a dyn AlignmentScorer>,
    pub saliency: &'a dyn SaliencyScorer,
    pub segmenter: &'a dyn SegmentationBackend,
    pub generation: Option<GenerationBackends<'a>>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum MethodOutcome {
    Recorded { method: RemovalMethod, id: usize },
    Failed { method: RemovalMethod, reason: String },
}

impl MethodOutcome {
    pub fn is_recorded(&self) -> bool {
        matches!(self, MethodOutcome::Recorded { .. })
    }
}

#[derive(Clone, Debug)]
pub struct ImageReport {
    pub iteration: usize,
    pub caption: String,
    pub n_strokes: usize,
    pub clip_score: Option<f32>,
    pub outcomes: Vec<MethodOutcome>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub images_attempted: usize,
    pub images_planned: usize,
    pub records_written: usize,
    pub acquire_failures: usize,
    pub plan_failures: usize,
    pub method_failures: usize,
    pub retrain_failures: usize,
}

pub struct DatasetBuilder<'a> {
    cfg: RunConfig,
    backends: Backends<'a>,
    layout: OutputLayout,
    store: DataStore,
    canvas: Raster,
    default_canvas: Raster,
    prompts: Option<PromptPool>,
    generator: Option<Box<dyn GenerativeBackend>>,
    rng: StdRng,
}

impl<'a> DatasetBuilder<'a> {
    /// Open the store and, in generation mode, build the prompt pool and load
    /// the generator (with LoRA weights when present).
    pub fn new(
        cfg: RunConfig,
        backends: Backends<'a>,
        layout: OutputLayout,
        background: Raster,
        rng: StdRng,
    ) -> Result<Self, SetupError> {
        let store = DataStore::open(&layout)?;
        let default_canvas = background.resize(cfg.width, cfg.height);

        let (prompts, generator) = match (&cfg.retrain, &backends.generation) {
            (Some(retrain), Some(generation)) => {
                let pool = PromptPool::from_dataset(backends.dataset, &cfg.acquire)?;
                let lora = lora_weights_present(&retrain.lora_dir).then_some(retrain.lora_dir.as_path());
                (Some(pool), Some(generation.factory.load(lora)?))
            }
            (Some(_), None) => return Err(SetupError::MissingGenerationBackends),
            (None, _) => (None, None),
        };

        Ok(Self {
            canvas: default_canvas.clone(),
            default_canvas,
            cfg,
            backends,
            layout,
            store,
            prompts,
            generator,
            rng,
        })
    }

    pub fn store(&self) -> &DataStore {
        &self.store
    }

    /// The running canvas the next background is cropped from.
    pub fn canvas(&self) -> &Raster {
        &self.canvas
    }

    pub fn run(&mut self) -> RunSummary {
        let pb = if self.cfg.show_progress {
            let pb = ProgressBar::new(self.cfg.max_images as u64);
            if let Ok(style) = ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos:>5}/{len:5} ({eta}) {msg}")
            {
                pb.set_style(style.progress_chars("##>-"));
            }
            pb
        } else {
            ProgressBar::hidden()
        };

        let mut summary = RunSummary::default();
        for i in 0..self.cfg.max_images {
            if !self.maybe_retrain(i) {
                summary.retrain_failures += 1;
            }

            summary.images_attempted += 1;
            match self.run_image(i) {
                Ok(report) => {
                    summary.images_planned += 1;
                    let recorded = report.outcomes.iter().filter(|o| o.is_recorded()).count();
                    summary.records_written += recorded;
                    summary.method_failures += report.outcomes.len() - recorded;
                    log::info!(
                        "image {i}: '{}' with {} strokes -> {recorded}/{} records",
                        report.caption,
                        report.n_strokes,
                        report.outcomes.len()
                    );
                }
                Err(ImageFailure::Acquire(e)) => {
                    summary.acquire_failures += 1;
                    log::warn!("image {i}: skipped, {e}");
                }
                Err(e) => {
                    summary.plan_failures += 1;
                    log::warn!("image {i}: abandoned, {e}");
                }
            }
            pb.set_message(format!("{} records", self.store.len()));
            pb.inc(1);
        }
        pb.finish_with_message(format!("{} records", self.store.len()));
        summary
    }

    /// Retrain the generator when due. Returns false when a due retraining failed.
    fn maybe_retrain(&mut self, iteration: usize) -> bool {
        let (Some(retrain), Some(generation)) = (&self.cfg.retrain, &self.backends.generation) else {
            return true;
        };
        if !retrain.is_due(iteration, self.store.len()) {
            return true;
        }

        log::info!("fine-tuning the generator on {} records", self.store.len());
        self.generator = None;
        let trained = generation
            .fine_tuner
            .fine_tune(self.store.index_path(), &retrain.lora_dir);
        if let Err(e) = &trained {
            log::warn!("fine-tuning failed: {e}");
        }

        let lora = lora_weights_present(&retrain.lora_dir).then_some(retrain.lora_dir.as_path());
        match generation.factory.load(lora) {
            Ok(generator) => self.generator = Some(generator),
            Err(e) => log::warn!("could not reload the generator: {e}"),
        }
        trained.is_ok() && self.generator.is_some()
    }

    fn acquire(&mut self) -> Result<Datum, AcquireError> {
        match (&self.prompts, &self.backends.generation) {
            (Some(pool), Some(generation)) => {
                if self.generator.is_none() {
                    let lora = self
                        .cfg
                        .retrain
                        .as_ref()
                        .filter(|r| lora_weights_present(&r.lora_dir))
                        .map(|r| r.lora_dir.as_path());
                    self.generator = Some(generation.factory.load(lora)?);
                }
                match self.generator.as_deref_mut() {
                    Some(generator) => acquire_generated(pool, generator, &mut self.rng),
                    None => Err(AcquireError::GeneratorUnavailable),
                }
            }
            _ => acquire_from_dataset(
                self.backends.dataset,
                self.backends.fetcher,
                self.backends.alignment,
                &self.cfg.acquire,
                &mut self.rng,
            ),
        }
    }

    /// Acquire, plan and sweep the removal methods for one image.
    pub fn run_image(&mut self, iteration: usize) -> Result<ImageReport, ImageFailure> {
        let (h, w) = (self.cfg.height, self.cfg.width);
        let scale = self.cfg.removal.scale;

        let datum = self.acquire()?;
        let (target_full, target) = prepare_target(&datum.image, h, w, scale, &self.cfg.augment, &mut self.rng);

        let palette = match &self.cfg.palette {
            PaletteSource::Fixed(p) => p.clone(),
            PaletteSource::Extracted { n_colors } => {
                Palette::from_image(&target.resize(COMPARE_SIDE, COMPARE_SIDE), *n_colors, &mut self.rng)?
            }
        };

        let source_canvas = if self.cfg.canvas_carry_over { &self.canvas } else { &self.default_canvas };
        let background = augment_background(source_canvas, h, w, &self.cfg.augment, &mut self.rng);

        let budget = self.rng.gen_range(self.cfg.min_strokes..=self.cfg.max_strokes);
        let planner = PlannerConfig {
            n_strokes: budget,
            ..self.cfg.planner.clone()
        };
        log::info!("planning {budget} strokes for '{}'", datum.caption);
        let painting = plan_from_image(&target, &background, Some(&palette), &planner, &mut self.rng)?;
        if painting.len() != budget {
            log::debug!("image {iteration}: {} of {budget} strokes survived planning", painting.len());
        }

        self.record_painting(iteration, datum, &target_full, &target, &painting)
    }

    /// Save the final render of a planned painting, then sweep the removal
    /// methods over it. Stroke counts and file names follow the strokes the
    /// painting actually holds.
    pub fn record_painting(
        &mut self,
        iteration: usize,
        datum: Datum,
        target_full: &Raster,
        target: &Raster,
        painting: &Painting,
    ) -> Result<ImageReport, ImageFailure> {
        let (h, w) = (target.height(), target.width());
        let scale = self.cfg.removal.scale;
        let n_strokes = painting.len();
        let final_render = painting.render(h * scale, w * scale, AlphaMode::Learned);

        let first_id = self.store.next_id();
        let final_rel = OutputLayout::final_render(first_id, n_strokes);
        let final_abs = self.layout.resolve(&final_rel);
        save_raster(&final_render, &final_abs)?;
        let scorer = self.backends.record_scorer.unwrap_or(self.backends.alignment);
        let clip_score = match scorer.score(&ImageRef::Path(final_abs), &datum.caption) {
            Ok(s) => Some(s),
            Err(e) => {
                log::warn!("could not score final render: {e}");
                None
            }
        };

        let removal_backends = RemovalBackends {
            saliency: self.backends.saliency,
            segmenter: self.backends.segmenter,
        };
        let mut target_rel: Option<PathBuf> = None;
        let mut outcomes = Vec::with_capacity(self.cfg.sweep.len());
        for method in self.cfg.sweep.clone() {
            let partial = sample_partial_count(n_strokes, &mut self.rng);
            let ctx = RemovalContext {
                painting,
                height: h,
                width: w,
                target,
                caption: &datum.caption,
                partial,
            };
            let sweep_item = SweepItem {
                method,
                n_strokes,
                final_render: &final_render,
                target_full,
                clip_score,
                datum: &datum,
            };
            let outcome = match self.record_method(&sweep_item, &ctx, &removal_backends, &mut target_rel) {
                Ok(id) => MethodOutcome::Recorded { method, id },
                Err(e) => {
                    log::warn!("image {iteration}: method {method} skipped, {e}");
                    MethodOutcome::Failed {
                        method,
                        reason: e.to_string(),
                    }
                }
            };
            outcomes.push(outcome);
        }

        if self.cfg.canvas_carry_over {
            self.canvas = final_render.resize(w, h);
        }

        Ok(ImageReport {
            iteration,
            caption: datum.caption,
            n_strokes,
            clip_score,
            outcomes,
        })
    }

    /// Run one removal method and append its record. Returns the record id.
    fn record_method(
        &mut self,
        item: &SweepItem<'_>,
        ctx: &RemovalContext<'_>,
        removal_backends: &RemovalBackends<'_>,
        target_rel: &mut Option<PathBuf>,
    ) -> Result<usize, MethodError> {
        let id = self.store.next_id();
        self.layout.ensure_shard(id)?;

        let target_img = match target_rel {
            Some(path) => path.clone(),
            None => {
                let path = OutputLayout::target(id);
                save_raster(item.target_full, &self.layout.resolve(&path))?;
                *target_rel = Some(path.clone());
                path
            }
        };

        let final_img = OutputLayout::final_render(id, item.n_strokes);
        save_raster(item.final_render, &self.layout.resolve(&final_img))?;

        let outcome = apply_removal(item.method, ctx, removal_backends, &self.cfg.removal, &mut self.rng)?;
        for diagnostic in &outcome.diagnostics {
            let path = OutputLayout::diagnostic(id, item.n_strokes, diagnostic.suffix());
            save_image(&diagnostic.to_image(), &self.layout.resolve(&path))?;
        }

        let start_img = OutputLayout::start(id);
        save_raster(&outcome.start, &self.layout.resolve(&start_img))?;
        let diff = outcome.start.mean_abs_difference(item.final_render, COMPARE_SIDE);

        self.store.append(DataRecord {
            id,
            num_strokes_added: outcome.num_strokes_added,
            num_prev_strokes: outcome.num_prev_strokes,
            start_img,
            final_img,
            target_img,
            method: item.method,
            text: item.datum.caption.clone(),
            photo_to_sketch_diff: diff,
            clip_score: item.clip_score,
            dataset_info: item.datum.dataset_info.clone(),
        })?;
        log::debug!("record {id}: {} diff={diff:.4}", item.method);
        Ok(id)
    }
}

/// Per-image values shared by every method of a sweep.
struct SweepItem<'s> {
    method: RemovalMethod,
    n_strokes: usize,
    final_render: &'s Raster,
    target_full: &'s Raster,
    clip_score: Option<f32>,
    datum: &'s Datum,
}
