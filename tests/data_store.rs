//! Persisted index behavior across restarts.

use std::path::PathBuf;

use copaint_rs::io::{layout::OutputLayout, DataRecord, DataStore, StoreError};
use copaint_rs::RemovalMethod;
use serde_json::{json, Map, Value};

fn record(id: usize, method: RemovalMethod) -> DataRecord {
    let mut info = Map::new();
    info.insert("URL".to_string(), Value::from(format!("https://example.org/{id}.jpg")));
    DataRecord {
        id,
        num_strokes_added: 30,
        num_prev_strokes: 20,
        start_img: OutputLayout::start(id),
        final_img: OutputLayout::final_render(id, 50),
        target_img: OutputLayout::target(id),
        method,
        text: format!("caption {id}"),
        photo_to_sketch_diff: 0.125,
        clip_score: Some(31.5),
        dataset_info: info,
    }
}

#[test]
fn test_reload_after_appends_preserves_order() {
    let dir = tempfile::tempdir().unwrap();
    let layout = OutputLayout::new(dir.path());
    let methods = RemovalMethod::default_sweep();

    {
        let mut store = DataStore::open(&layout).unwrap();
        for (id, method) in methods.iter().enumerate() {
            store.append(record(id, *method)).unwrap();
        }
        assert_eq!(store.len(), methods.len());
    }

    let reopened = DataStore::open(&layout).unwrap();
    assert_eq!(reopened.len(), methods.len());
    assert_eq!(reopened.next_id(), methods.len());
    for (i, r) in reopened.records().iter().enumerate() {
        assert_eq!(r, &record(i, methods[i]));
    }
}

#[test]
fn test_backup_holds_previous_index() {
    let dir = tempfile::tempdir().unwrap();
    let layout = OutputLayout::new(dir.path());
    let mut store = DataStore::open(&layout).unwrap();

    store.append(record(0, RemovalMethod::Random)).unwrap();
    assert!(!layout.backup_path().exists());
    store.append(record(1, RemovalMethod::All)).unwrap();

    let backup = DataStore::load(&layout.backup_path()).unwrap();
    assert_eq!(backup, vec![record(0, RemovalMethod::Random)]);
    assert_eq!(DataStore::load(&layout.index_path()).unwrap().len(), 2);
}

#[test]
fn test_id_gap_is_rejected_without_side_effects() {
    let dir = tempfile::tempdir().unwrap();
    let layout = OutputLayout::new(dir.path());
    let mut store = DataStore::open(&layout).unwrap();
    store.append(record(0, RemovalMethod::Object)).unwrap();

    let err = store.append(record(2, RemovalMethod::Object)).unwrap_err();
    assert!(matches!(err, StoreError::IdMismatch { expected: 1, found: 2 }));
    assert_eq!(store.len(), 1);
    assert_eq!(DataStore::load(&layout.index_path()).unwrap().len(), 1);
}

#[test]
fn test_index_field_names_and_optional_fields() {
    let dir = tempfile::tempdir().unwrap();
    let layout = OutputLayout::new(dir.path());
    let mut store = DataStore::open(&layout).unwrap();
    let mut r = record(0, RemovalMethod::NotSalience);
    r.clip_score = None;
    store.append(r).unwrap();

    let raw: Value = serde_json::from_str(&std::fs::read_to_string(layout.index_path()).unwrap()).unwrap();
    let entry = &raw[0];
    assert_eq!(entry["method"], json!("not_salience"));
    assert_eq!(entry["start_img"], json!("0/id0_start.png"));
    assert_eq!(entry["target_img"], json!("0/id0_target.png"));
    assert_eq!(entry["clip_score"], Value::Null);
    assert_eq!(entry["dataset_info"]["URL"], json!("https://example.org/0.jpg"));

    // Older indexes without the optional fields still load.
    let legacy = json!([{
        "id": 0,
        "num_strokes_added": 5,
        "num_prev_strokes": 0,
        "start_img": "0/id0_start.png",
        "final_img": "0/id0_5strokes.png",
        "target_img": "0/id0_target.png",
        "method": "all",
        "text": "a cat",
        "photo_to_sketch_diff": 0.3
    }]);
    let path: PathBuf = dir.path().join("legacy.json");
    std::fs::write(&path, legacy.to_string()).unwrap();
    let loaded = DataStore::load(&path).unwrap();
    assert_eq!(loaded[0].clip_score, None);
    assert!(loaded[0].dataset_info.is_empty());
}

#[test]
fn test_corrupt_index_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let layout = OutputLayout::new(dir.path());
    std::fs::write(layout.index_path(), b"{ not json").unwrap();
    assert!(matches!(DataStore::open(&layout), Err(StoreError::Json(_))));
}
