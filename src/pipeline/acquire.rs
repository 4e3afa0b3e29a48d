//! Obtaining one (image, caption) datum per outer iteration.
//!
//! Dataset mode samples records, fetches and filters them by caption
//! alignment, then keeps the candidate with the least edge detail.
//! Generation mode renders a prompt drawn from a filtered prompt pool.

use crate::backend::dataset::field_str;
use crate::backend::{BackendError, DatasetProvider, DatasetRecord, GenerativeBackend, ImageFetcher};
use crate::core::Raster;
use crate::score::{edge_complexity, select_simplest, AlignmentScorer, ImageRef, ScoreError};
use rand::seq::SliceRandom;
use rand::Rng;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AcquireError {
    #[error("dataset is empty")]
    EmptyDataset,

    #[error("no candidate passed the filters after {draws} draws")]
    NoCandidates { draws: usize },

    #[error("no prompts match the configured challenges")]
    NoPrompts,

    #[error("generator is not loaded")]
    GeneratorUnavailable,

    #[error("generation failed: {0}")]
    Generation(#[from] BackendError),

    #[error("scoring failed: {0}")]
    Score(#[from] ScoreError),
}

/// One source image and its caption.
#[derive(Clone, Debug)]
pub struct Datum {
    pub image: Raster,
    pub caption: String,
    /// The source record's fields; the image payload is never included.
    pub dataset_info: DatasetRecord,
}

#[derive(Clone, Debug)]
pub struct AcquireConfig {
    pub url_field: String,
    pub caption_field: String,
    pub prompt_field: String,
    pub challenge_field: String,
    /// Challenge categories whose prompts enter the generation pool.
    pub challenges: Vec<String>,
    /// Candidates scoring below this are rejected.
    pub alignment_threshold: f32,
    /// Candidates collected before picking the simplest.
    pub num_candidates: usize,
    /// Draw budget per requested candidate.
    pub draws_per_candidate: usize,
}

impl Default for AcquireConfig {
    fn default() -> Self {
        Self {
            url_field: "URL".to_string(),
            caption_field: "TEXT".to_string(),
            prompt_field: "Prompt".to_string(),
            challenge_field: "Challenge".to_string(),
            challenges: vec![
                "Basic".to_string(),
                "Simple Detail".to_string(),
                "Fine-Grained Detail".to_string(),
            ],
            alignment_threshold: 30.0,
            num_candidates: 3,
            draws_per_candidate: 20,
        }
    }
}

struct Candidate {
    datum: Datum,
    complexity: f32,
}

/// Sample, fetch and filter dataset records; return the simplest survivor.
///
/// Unusable draws (missing fields, failed fetch or score, low alignment) are
/// skipped. When the draw budget runs out the best of the candidates found so
/// far is returned.
pub fn acquire_from_dataset<R: Rng + ?Sized>(
    dataset: &dyn DatasetProvider,
    fetcher: &dyn ImageFetcher,
    scorer: &dyn AlignmentScorer,
    cfg: &AcquireConfig,
    rng: &mut R,
) -> Result<Datum, AcquireError> {
    if dataset.is_empty() {
        return Err(AcquireError::EmptyDataset);
    }
    let wanted = cfg.num_candidates.max(1);
    let max_draws = wanted * cfg.draws_per_candidate.max(1);

    let mut candidates: Vec<Candidate> = Vec::with_capacity(wanted);
    let mut draws = 0;
    while candidates.len() < wanted && draws < max_draws {
        draws += 1;
        let index = rng.gen_range(0..dataset.len());
        let Some(record) = dataset.get(index) else { continue };
        let (Some(url), Some(caption)) = (field_str(record, &cfg.url_field), field_str(record, &cfg.caption_field))
        else {
            log::debug!("record {index} lacks '{}' or '{}'", cfg.url_field, cfg.caption_field);
            continue;
        };

        let image = match fetcher.fetch(url) {
            Ok(image) => image,
            Err(e) => {
                log::debug!("fetch failed for {url}: {e}");
                continue;
            }
        };
        let score = match scorer.score(&ImageRef::Url(url.to_string()), caption) {
            Ok(s) => s,
            Err(e) => {
                log::debug!("alignment scoring failed for {url}: {e}");
                continue;
            }
        };
        if score < cfg.alignment_threshold {
            log::debug!("rejected {url}: alignment {score:.1} < {}", cfg.alignment_threshold);
            continue;
        }

        let complexity = edge_complexity(&image);
        candidates.push(Candidate {
            datum: Datum {
                image,
                caption: caption.to_string(),
                dataset_info: record.clone(),
            },
            complexity,
        });
    }

    let complexities: Vec<f32> = candidates.iter().map(|c| c.complexity).collect();
    let best = select_simplest(&complexities).ok_or(AcquireError::NoCandidates { draws })?;
    log::debug!(
        "picked candidate {best} of {} (edge complexity {:.1}) after {draws} draws",
        candidates.len(),
        complexities[best]
    );
    Ok(candidates.swap_remove(best).datum)
}

/// Prompts for generation mode, each with its source record.
#[derive(Clone, Debug)]
pub struct PromptPool {
    entries: Vec<(String, DatasetRecord)>,
}

impl PromptPool {
    /// Records whose challenge field is one of `cfg.challenges`.
    pub fn from_dataset(dataset: &dyn DatasetProvider, cfg: &AcquireConfig) -> Result<Self, AcquireError> {
        let entries: Vec<_> = (0..dataset.len())
            .filter_map(|i| dataset.get(i))
            .filter(|r| {
                field_str(r, &cfg.challenge_field)
                    .map(|c| cfg.challenges.iter().any(|wanted| wanted == c))
                    .unwrap_or(false)
            })
            .filter_map(|r| field_str(r, &cfg.prompt_field).map(|p| (p.to_string(), r.clone())))
            .collect();
        if entries.is_empty() {
            return Err(AcquireError::NoPrompts);
        }
        log::info!("prompt pool holds {} prompts", entries.len());
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Uniformly chosen prompt and its record.
    pub fn choose<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<(&str, &DatasetRecord)> {
        self.entries.choose(rng).map(|(p, r)| (p.as_str(), r))
    }
}

/// Render a uniformly chosen prompt with the generative backend.
pub fn acquire_generated<R: Rng + ?Sized>(
    pool: &PromptPool,
    generator: &mut dyn GenerativeBackend,
    rng: &mut R,
) -> Result<Datum, AcquireError> {
    let (prompt, record) = pool.choose(rng).ok_or(AcquireError::NoPrompts)?;
    let image = generator.generate(prompt)?;
    Ok(Datum {
        image,
        caption: prompt.to_string(),
        dataset_info: record.clone(),
    })
}
