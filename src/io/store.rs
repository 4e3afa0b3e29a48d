//! The persisted index of generated records.
//!
//! Every append rewrites the whole index: the previous file is first copied
//! to the backup path, then the new contents go to a temporary file in the
//! same directory which is synced and renamed over the index. Readers only
//! ever see a complete old or complete new index.

use crate::io::layout::OutputLayout;
use crate::removal::RemovalMethod;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("index is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("could not replace index: {0}")]
    Persist(#[from] tempfile::PersistError),

    #[error("record id {found} does not follow {expected}")]
    IdMismatch { expected: usize, found: usize },
}

/// One training example. Paths are relative to the output root.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DataRecord {
    pub id: usize,
    pub num_strokes_added: usize,
    pub num_prev_strokes: usize,
    pub start_img: PathBuf,
    pub final_img: PathBuf,
    pub target_img: PathBuf,
    pub method: RemovalMethod,
    pub text: String,
    pub photo_to_sketch_diff: f32,
    #[serde(default)]
    pub clip_score: Option<f32>,
    #[serde(default)]
    pub dataset_info: Map<String, Value>,
}

#[derive(Debug)]
pub struct DataStore {
    index: PathBuf,
    backup: PathBuf,
    records: Vec<DataRecord>,
}

impl DataStore {
    /// Open the store under `layout`, loading the index when it exists.
    pub fn open(layout: &OutputLayout) -> Result<Self, StoreError> {
        let index = layout.index_path();
        let records = if index.exists() { Self::load(&index)? } else { Vec::new() };
        if !records.is_empty() {
            log::info!("resuming with {} records from {}", records.len(), index.display());
        }
        Ok(Self {
            index,
            backup: layout.backup_path(),
            records,
        })
    }

    pub fn load(path: &Path) -> Result<Vec<DataRecord>, StoreError> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn records(&self) -> &[DataRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Id the next appended record must carry.
    pub fn next_id(&self) -> usize {
        self.records.len()
    }

    pub fn index_path(&self) -> &Path {
        &self.index
    }

    /// Append and persist. On failure the record is not kept in memory
    /// either, so memory and disk stay in step.
    pub fn append(&mut self, record: DataRecord) -> Result<(), StoreError> {
        if record.id != self.next_id() {
            return Err(StoreError::IdMismatch {
                expected: self.next_id(),
                found: record.id,
            });
        }
        self.records.push(record);
        if let Err(e) = self.persist() {
            self.records.pop();
            return Err(e);
        }
        Ok(())
    }

    /// Backup the current index, then atomically replace it.
    pub fn persist(&self) -> Result<(), StoreError> {
        let dir = self.index.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)?;

        if self.index.exists() {
            fs::copy(&self.index, &self.backup)?;
        }

        let mut tmp = NamedTempFile::new_in(dir)?;
        {
            let mut writer = BufWriter::new(tmp.as_file_mut());
            serde_json::to_writer_pretty(&mut writer, &self.records)?;
            writer.flush()?;
        }
        tmp.as_file().sync_all()?;
        tmp.persist(&self.index)?;
        Ok(())
    }
}
