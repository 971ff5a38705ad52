//! Integration tests for the SQLite record store behind `RecordSource`.
//!
//! Run with:
//!   cargo test --features isqlite --test test_record_store

use std::fs;

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use admissions_rag::config::{self, Overrides};
use admissions_rag::embedding::HashedEmbedder;
use admissions_rag::engine::{AnswerEngine, Query};
use admissions_rag::retrieval::records::{CollegeRecord, RecordStore};
use admissions_rag::retrieval::{HitPayload, Origin, RecordSource};

// ── helpers ──────────────────────────────────────────────────────────────────

const DIMS: usize = 64;

fn college(unit_id: &str, name: &str, summary: &str) -> CollegeRecord {
    CollegeRecord {
        unit_id: unit_id.into(),
        name: name.into(),
        city: Some("Madison".into()),
        state: Some("WI".into()),
        admission_rate: Some(0.57),
        graduation_rate: Some(0.88),
        enrollment: Some(31_000),
        summary: summary.into(),
    }
}

/// Store seeded with three records embedded by the hashed embedder.
fn seeded_store(dir: &TempDir) -> RecordStore {
    let store = RecordStore::open(&dir.path().join("data").join("records.db")).expect("open store");
    let embedder = HashedEmbedder::new(DIMS);
    for r in [
        college("240444", "Lakeside University", "Large public research university with strong engineering."),
        college("240055", "Northwoods College", "Small liberal arts college known for nursing."),
        college("239105", "Prairie Tech", "Technical institute focused on agriculture and engineering."),
    ] {
        let text = format!("{} {}", r.name, r.summary);
        store.put_record(&r, Some(&embedder.embed(&text))).expect("put record");
    }
    store
}

// ── RecordSource over SQLite ─────────────────────────────────────────────────

#[test]
fn open_creates_parent_dirs() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("nested").join("deeper").join("records.db");
    let store = RecordStore::open(&path).unwrap();
    assert!(path.exists());
    assert_eq!(store.count().unwrap(), 0);
}

#[test]
fn reopen_keeps_records() {
    let tmp = TempDir::new().unwrap();
    let store = seeded_store(&tmp);
    let reopened = RecordStore::open(store.path()).unwrap();
    assert_eq!(reopened.count().unwrap(), 3);
    let r = reopened.get_record("240055").unwrap().unwrap();
    assert_eq!(r.name, "Northwoods College");
    assert_eq!(r.enrollment, Some(31_000));
}

#[tokio::test]
async fn keyword_search_through_record_source() {
    let tmp = TempDir::new().unwrap();
    let source = RecordSource::Sqlite(seeded_store(&tmp));

    let hits = source.search_by_keyword("Which college has nursing?", 5).await.unwrap();
    assert!(!hits.is_empty());
    assert_eq!(hits[0].identity_key, "240055");
    assert!(hits.iter().all(|h| h.origin == Origin::KeywordSearch));
    match &hits[0].payload {
        HitPayload::Record(summary) => {
            assert_eq!(summary.name, "Northwoods College");
            assert_eq!(summary.admission_rate, Some(0.57));
        }
        other => panic!("unexpected payload: {other:?}"),
    }

    let none = source.search_by_keyword("?? !!", 5).await.unwrap();
    assert!(none.is_empty());
}

#[tokio::test]
async fn vector_search_through_record_source() {
    let tmp = TempDir::new().unwrap();
    let source = RecordSource::Sqlite(seeded_store(&tmp));
    let query = HashedEmbedder::new(DIMS)
        .embed("Northwoods College Small liberal arts college known for nursing.");

    let hits = source.search_by_vector(&query, 2).await.unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].identity_key, "240055");
    assert!(hits[0].relevance_score > 0.99);
    assert!(hits.iter().all(|h| h.origin == Origin::VectorSearch));

    let wrong_width = source.search_by_vector(&[1.0, 0.0], 2).await.unwrap();
    assert!(wrong_width.is_empty());
}

// ── engine from config ───────────────────────────────────────────────────────

#[tokio::test]
async fn engine_from_config_uses_sqlite_records() {
    let tmp = TempDir::new().unwrap();
    let store = seeded_store(&tmp);

    let toml = format!(
        r#"
[embedding]
default = "hashed"
[embedding.hashed]
dimensions = {DIMS}

[llm]
default = "dummy"

[retrieval]
fanout = "best_effort"

[retrieval.records]
db_path = "{}"
"#,
        store.path().display()
    );
    let cfg_path = tmp.path().join("config.toml");
    fs::write(&cfg_path, toml).unwrap();

    let cfg = config::load_from(&cfg_path, &Overrides::default()).unwrap();
    let engine = AnswerEngine::from_config(&cfg).unwrap();
    let health = engine.health();
    assert_eq!(health.records_vector, "sqlite");
    assert_eq!(health.articles, "unconfigured");

    let prompt = engine
        .prepare(&Query::new("engineering programs", vec![]), &CancellationToken::new())
        .await
        .unwrap();
    let system = &prompt.as_slice()[0].content;
    assert!(system.contains("Database:"));
    assert!(system.contains("Lakeside University (Admission rate: 57%"));
    assert!(!system.contains("Articles:"));
}
