//! On-disk persistence of the transcript store.

use confab::store::{SqliteTranscriptStore, TranscriptRecord, TranscriptStore};

#[test]
fn records_survive_reopening_the_database() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("transcripts.db");

    let id = {
        let store = SqliteTranscriptStore::open(&path).unwrap();
        let id = store
            .save(&TranscriptRecord {
                title: Some("Design sync".to_string()),
                status: "capturing".to_string(),
                ..Default::default()
            })
            .unwrap();
        store
            .update(id, &|r| {
                r.status = "completed".to_string();
                r.transcript_text = Some("[Alice] Shipping on Friday.".to_string());
                r.summary = Some("Shipping decided.".to_string());
            })
            .unwrap();
        id
    };

    let store = SqliteTranscriptStore::open(&path).unwrap();
    let record = store.retrieve(id).unwrap().unwrap();
    assert_eq!(record.status, "completed");
    assert_eq!(record.title, Some("Design sync".to_string()));
    assert_eq!(
        record.transcript_text,
        Some("[Alice] Shipping on Friday.".to_string())
    );

    let hits = store.search("shipping", 10, 0).unwrap();
    assert_eq!(hits.len(), 1);
}

#[test]
fn open_creates_missing_parent_directories() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("deeper").join("t.db");

    let store = SqliteTranscriptStore::open(&path).unwrap();
    assert!(store.list(10, 0).unwrap().is_empty());
    assert!(path.exists());
}
