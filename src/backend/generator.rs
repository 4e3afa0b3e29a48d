//! Text-to-image generation and its out-of-band LoRA fine-tuning job.
//!
//! The generator is loaded through a `GeneratorFactory` so the assembly loop
//! can drop it before fine-tuning and load the new weights afterwards.

use crate::backend::{run_command, BackendError, CommandLine};
use crate::core::Raster;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// File the fine-tuning job writes into its output directory.
pub const LORA_WEIGHTS_FILE: &str = "pytorch_lora_weights.bin";

/// True when `dir` holds fine-tuned LoRA weights.
pub fn lora_weights_present(dir: &Path) -> bool {
    dir.join(LORA_WEIGHTS_FILE).is_file()
}

pub trait GenerativeBackend {
    fn generate(&mut self, prompt: &str) -> Result<Raster, BackendError>;
}

pub trait GeneratorFactory {
    /// Load the generator, applying LoRA weights from `lora_dir` when given.
    fn load(&self, lora_dir: Option<&Path>) -> Result<Box<dyn GenerativeBackend>, BackendError>;
}

pub trait FineTuner {
    /// Fine-tune on the persisted records at `data_dict`, writing weights to
    /// `output_dir`. Blocks until the job exits.
    fn fine_tune(&self, data_dict: &Path, output_dir: &Path) -> Result<(), BackendError>;
}

/// Runs `<cmd> <prompt> <output.png> [<lora_dir>]` per image.
pub struct CommandGenerator {
    cmd: CommandLine,
    lora_dir: Option<PathBuf>,
    scratch: TempDir,
}

impl CommandGenerator {
    pub fn new(cmd: CommandLine, lora_dir: Option<PathBuf>) -> Result<Self, BackendError> {
        Ok(Self {
            cmd,
            lora_dir,
            scratch: tempfile::tempdir()?,
        })
    }
}

impl GenerativeBackend for CommandGenerator {
    fn generate(&mut self, prompt: &str) -> Result<Raster, BackendError> {
        let out = self.scratch.path().join("generated.png");
        let mut args: Vec<&OsStr> = vec![OsStr::new(prompt), out.as_os_str()];
        if let Some(dir) = &self.lora_dir {
            args.push(dir.as_os_str());
        }
        self.cmd.run(&args)?;
        let img = image::open(&out)?;
        Ok(Raster::from_dynamic(&img))
    }
}

pub struct CommandGeneratorFactory {
    pub cmd: CommandLine,
}

impl GeneratorFactory for CommandGeneratorFactory {
    fn load(&self, lora_dir: Option<&Path>) -> Result<Box<dyn GenerativeBackend>, BackendError> {
        if let Some(dir) = lora_dir {
            log::info!("loading LoRA weights from {}", dir.display());
        }
        Ok(Box::new(CommandGenerator::new(
            self.cmd.clone(),
            lora_dir.map(Path::to_path_buf),
        )?))
    }
}

/// Hyper-parameters of the LoRA fine-tuning script.
#[derive(Clone, Debug)]
pub struct FineTuneConfig {
    pub program: String,
    pub script: PathBuf,
    pub pretrained_model: String,
    pub mixed_precision: String,
    pub dataloader_num_workers: u32,
    pub resolution: u32,
    pub train_batch_size: u32,
    pub gradient_accumulation_steps: u32,
    pub learning_rate: f32,
    pub num_train_epochs: u32,
    pub validation_prompts: Vec<String>,
    pub validation_steps: u32,
    pub num_validation_images: u32,
    pub tracker_project_name: String,
    pub seed: u64,
}

impl Default for FineTuneConfig {
    fn default() -> Self {
        Self {
            program: "accelerate".to_string(),
            script: PathBuf::from("train_lora.py"),
            pretrained_model: "runwayml/stable-diffusion-v1-5".to_string(),
            mixed_precision: "fp16".to_string(),
            dataloader_num_workers: 8,
            resolution: 512,
            train_batch_size: 1,
            gradient_accumulation_steps: 4,
            learning_rate: 5e-5,
            num_train_epochs: 1,
            validation_prompts: vec![
                "A frog astronaut.".to_string(),
                "The pittsburgh skyline".to_string(),
                "A drawing of the Pittsburgh skyline".to_string(),
                "A robot playing the piano".to_string(),
                "An avocado chair".to_string(),
                "Albert Einstein dancing".to_string(),
            ],
            validation_steps: 50,
            num_validation_images: 3,
            tracker_project_name: "lora_create_data2".to_string(),
            seed: 1337,
        }
    }
}

/// `accelerate launch` wrapper around the LoRA training script.
pub struct AccelerateFineTuner {
    pub config: FineTuneConfig,
}

impl AccelerateFineTuner {
    pub fn new(config: FineTuneConfig) -> Self {
        Self { config }
    }

    /// Full argument list after the program name.
    pub fn args(&self, data_dict: &Path, output_dir: &Path) -> Vec<String> {
        let c = &self.config;
        let mut args = vec![
            "launch".to_string(),
            format!("--mixed_precision={}", c.mixed_precision),
            c.script.display().to_string(),
            "--pretrained_model_name_or_path".to_string(),
            c.pretrained_model.clone(),
            "--data_dict".to_string(),
            data_dict.display().to_string(),
            "--dataloader_num_workers".to_string(),
            c.dataloader_num_workers.to_string(),
            "--resolution".to_string(),
            c.resolution.to_string(),
            "--center_crop".to_string(),
            "--random_flip".to_string(),
            "--train_batch_size".to_string(),
            c.train_batch_size.to_string(),
            "--gradient_accumulation_steps".to_string(),
            c.gradient_accumulation_steps.to_string(),
            "--learning_rate".to_string(),
            format!("{:e}", c.learning_rate),
            "--max_grad_norm".to_string(),
            "1".to_string(),
            "--lr_scheduler".to_string(),
            "cosine".to_string(),
            "--lr_warmup_steps".to_string(),
            "0".to_string(),
            "--output_dir".to_string(),
            output_dir.display().to_string(),
            "--report_to".to_string(),
            "tensorboard".to_string(),
            "--validation_prompt".to_string(),
        ];
        args.extend(c.validation_prompts.iter().cloned());
        args.extend([
            "--validation_steps".to_string(),
            c.validation_steps.to_string(),
            "--tracker_project_name".to_string(),
            c.tracker_project_name.clone(),
            "--num_validation_images".to_string(),
            c.num_validation_images.to_string(),
            "--seed".to_string(),
            c.seed.to_string(),
            "--num_train_epochs".to_string(),
            c.num_train_epochs.to_string(),
            "--resume_from_checkpoint".to_string(),
            "latest".to_string(),
        ]);
        args
    }
}

impl FineTuner for AccelerateFineTuner {
    fn fine_tune(&self, data_dict: &Path, output_dir: &Path) -> Result<(), BackendError> {
        let args = self.args(data_dict, output_dir);
        run_command(&self.config.program, args.iter().map(OsStr::new))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fine_tune_args_layout() {
        let tuner = AccelerateFineTuner::new(FineTuneConfig::default());
        let args = tuner.args(Path::new("/out/data_dict.json"), Path::new("/out/lora_model"));
        assert_eq!(&args[..3], &["launch", "--mixed_precision=fp16", "train_lora.py"]);

        let pos = |flag: &str| args.iter().position(|a| a == flag).unwrap();
        assert_eq!(args[pos("--data_dict") + 1], "/out/data_dict.json");
        assert_eq!(args[pos("--output_dir") + 1], "/out/lora_model");
        assert_eq!(args[pos("--learning_rate") + 1], "5e-5");
        assert_eq!(args.last().map(String::as_str), Some("latest"));
    }

    #[test]
    fn test_lora_weights_present() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!lora_weights_present(dir.path()));
        std::fs::write(dir.path().join(LORA_WEIGHTS_FILE), b"w").unwrap();
        assert!(lora_weights_present(dir.path()));
    }
}
