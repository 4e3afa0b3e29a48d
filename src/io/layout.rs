//! Sharded on-disk layout of a generated dataset.
//!
//! ```text
//! <root>/data_dict.json          index (JSON array of records)
//! <root>/data_dict_saved.json    previous index
//! <root>/<id / 100>/id<id>_...   per-record images
//! ```
//!
//! Record paths are stored relative to the root.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const RECORDS_PER_SHARD: usize = 100;
pub const INDEX_FILE: &str = "data_dict.json";
pub const BACKUP_FILE: &str = "data_dict_saved.json";

#[derive(Clone, Debug)]
pub struct OutputLayout {
    root: PathBuf,
}

impl OutputLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn index_path(&self) -> PathBuf {
        self.root.join(INDEX_FILE)
    }

    pub fn backup_path(&self) -> PathBuf {
        self.root.join(BACKUP_FILE)
    }

    pub fn default_lora_dir(&self) -> PathBuf {
        self.root.join("lora_model")
    }

    pub fn shard(id: usize) -> PathBuf {
        PathBuf::from((id / RECORDS_PER_SHARD).to_string())
    }

    pub fn target(id: usize) -> PathBuf {
        Self::shard(id).join(format!("id{id}_target.png"))
    }

    pub fn final_render(id: usize, strokes: usize) -> PathBuf {
        Self::shard(id).join(format!("id{id}_{strokes}strokes.png"))
    }

    pub fn start(id: usize) -> PathBuf {
        Self::shard(id).join(format!("id{id}_start.png"))
    }

    pub fn diagnostic(id: usize, strokes: usize, suffix: &str) -> PathBuf {
        Self::shard(id).join(format!("id{id}_{strokes}_{suffix}.png"))
    }

    /// `relative` resolved against the root.
    pub fn resolve(&self, relative: &Path) -> PathBuf {
        self.root.join(relative)
    }

    pub fn ensure_shard(&self, id: usize) -> io::Result<PathBuf> {
        let dir = self.root.join(Self::shard(id));
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }
}
