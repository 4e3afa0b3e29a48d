//! Dataset provider: an indexable collection of caption/URL records.

use crate::backend::BackendError;
use serde_json::{Map, Value};
use std::fs;
use std::path::Path;

/// One dataset row as loosely-typed JSON fields.
pub type DatasetRecord = Map<String, Value>;

pub trait DatasetProvider {
    fn len(&self) -> usize;

    fn get(&self, index: usize) -> Option<&DatasetRecord>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// String value of `field`, if present and a string.
pub fn field_str<'a>(record: &'a DatasetRecord, field: &str) -> Option<&'a str> {
    record.get(field).and_then(Value::as_str)
}

/// Records loaded from a JSON array or a JSON-lines file.
#[derive(Clone, Debug, Default)]
pub struct JsonDataset {
    records: Vec<DatasetRecord>,
}

impl JsonDataset {
    pub fn open(path: &Path) -> Result<Self, BackendError> {
        let text = fs::read_to_string(path)?;
        let dataset = Self::parse(&text)?;
        log::info!("loaded {} dataset records from {}", dataset.len(), path.display());
        Ok(dataset)
    }

    pub fn parse(text: &str) -> Result<Self, BackendError> {
        let trimmed = text.trim_start();
        let values: Vec<Value> = if trimmed.starts_with('[') {
            serde_json::from_str(trimmed)?
        } else {
            trimmed
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(serde_json::from_str)
                .collect::<Result<_, _>>()?
        };

        let records = values
            .into_iter()
            .enumerate()
            .map(|(i, v)| match v {
                Value::Object(map) => Ok(map),
                other => Err(BackendError::Dataset(format!(
                    "record {i} is not an object: {other}"
                ))),
            })
            .collect::<Result<_, _>>()?;
        Ok(Self { records })
    }

    pub fn from_records(records: Vec<DatasetRecord>) -> Self {
        Self { records }
    }

    pub fn records(&self) -> &[DatasetRecord] {
        &self.records
    }
}

impl DatasetProvider for JsonDataset {
    fn len(&self) -> usize {
        self.records.len()
    }

    fn get(&self, index: usize) -> Option<&DatasetRecord> {
        self.records.get(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_json_array() {
        let ds = JsonDataset::parse(r#"[{"URL": "http://a/1.png", "TEXT": "a cat"}, {"URL": "x", "TEXT": "b"}]"#)
            .unwrap();
        assert_eq!(ds.len(), 2);
        assert_eq!(field_str(ds.get(0).unwrap(), "TEXT"), Some("a cat"));
    }

    #[test]
    fn test_parse_json_lines() {
        let text = "{\"Prompt\": \"a frog\", \"Challenge\": \"Basic\"}\n\n{\"Prompt\": \"a dog\", \"Challenge\": \"Writing\"}\n";
        let ds = JsonDataset::parse(text).unwrap();
        assert_eq!(ds.len(), 2);
        assert_eq!(field_str(ds.get(1).unwrap(), "Challenge"), Some("Writing"));
        assert!(ds.get(2).is_none());
    }

    #[test]
    fn test_non_object_record_is_rejected() {
        assert!(matches!(JsonDataset::parse("[1, 2]"), Err(BackendError::Dataset(_))));
        assert!(matches!(JsonDataset::parse("{oops"), Err(BackendError::Json(_))));
    }
}
