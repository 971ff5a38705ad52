//! `records`: SQLite store of structured college records.
//!
//! One `records` table holds the typed fields plus an optional embedding
//! (little-endian `f32` blob); an FTS5 table mirrors `name` and `summary` for
//! keyword search. Both search paths run on the blocking pool.

use std::fs;
use std::path::{Path, PathBuf};

use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{Origin, RecordSummary, RetrievalHit};
use crate::error::{AppError, EngineError, SourceName};

const SCHEMA_VERSION: i64 = 1;

/// A structured college record as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollegeRecord {
    pub unit_id: String,
    pub name: String,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    /// Fraction in `0.0..=1.0`.
    #[serde(default)]
    pub admission_rate: Option<f64>,
    /// Fraction in `0.0..=1.0`.
    #[serde(default)]
    pub graduation_rate: Option<f64>,
    #[serde(default)]
    pub enrollment: Option<u64>,
    #[serde(default)]
    pub summary: String,
}

impl CollegeRecord {
    fn validate(&self) -> Result<(), AppError> {
        if self.unit_id.trim().is_empty() {
            return Err(AppError::Store("record unit_id must not be empty".into()));
        }
        if self.name.trim().is_empty() {
            return Err(AppError::Store(format!("record {}: name must not be empty", self.unit_id)));
        }
        for (field, value) in [
            ("admission_rate", self.admission_rate),
            ("graduation_rate", self.graduation_rate),
        ] {
            if let Some(v) = value {
                if !(0.0..=1.0).contains(&v) {
                    return Err(AppError::Store(format!(
                        "record {}: {field} {v} outside 0..=1",
                        self.unit_id
                    )));
                }
            }
        }
        if let Some(n) = self.enrollment {
            if i64::try_from(n).is_err() {
                return Err(AppError::Store(format!(
                    "record {}: enrollment {n} does not fit the store",
                    self.unit_id
                )));
            }
        }
        Ok(())
    }

    fn summary_fields(&self) -> RecordSummary {
        RecordSummary {
            name: self.name.clone(),
            admission_rate: self.admission_rate,
            graduation_rate: self.graduation_rate,
            enrollment: self.enrollment,
        }
    }
}

/// Body text of a record as it appears in the prompt. The label with the
/// headline statistics is added by the context assembler.
pub fn render_record(record: &CollegeRecord) -> String {
    let location = match (record.city.as_deref(), record.state.as_deref()) {
        (Some(city), Some(state)) => format!("{city}, {state}"),
        (Some(city), None) => city.to_string(),
        (None, Some(state)) => state.to_string(),
        (None, None) => String::new(),
    };
    let summary = record.summary.trim();
    match (location.is_empty(), summary.is_empty()) {
        (true, true) => record.name.clone(),
        (true, false) => summary.to_string(),
        (false, true) => format!("Located in {location}."),
        (false, false) => format!("Located in {location}. {summary}"),
    }
}

#[derive(Debug, Clone)]
pub struct RecordStore {
    db_path: PathBuf,
}

impl RecordStore {
    /// Open (or create) the store at `db_path`.
    pub fn open(db_path: &Path) -> Result<Self, AppError> {
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                AppError::Store(format!("cannot create {}: {e}", parent.display()))
            })?;
        }
        let store = Self { db_path: db_path.to_path_buf() };
        store.init_db()?;
        debug!(path = %store.db_path.display(), "record store opened");
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    /// Insert or replace one record and its embedding.
    pub fn put_record(
        &self,
        record: &CollegeRecord,
        embedding: Option<&[f32]>,
    ) -> Result<(), AppError> {
        record.validate()?;
        let enrollment = record
            .enrollment
            .map(i64::try_from)
            .transpose()
            .map_err(|e| AppError::Store(format!("record {}: enrollment: {e}", record.unit_id)))?;
        let blob = embedding.map(encode_embedding);

        let mut conn = self.open_conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| AppError::Store(format!("begin put_record tx: {e}")))?;

        tx.execute(
            "INSERT OR REPLACE INTO records
                (unit_id, name, city, state, admission_rate, graduation_rate, enrollment, summary, embedding)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                record.unit_id,
                record.name,
                record.city,
                record.state,
                record.admission_rate,
                record.graduation_rate,
                enrollment,
                record.summary,
                blob,
            ],
        )
        .map_err(|e| AppError::Store(format!("upsert record {}: {e}", record.unit_id)))?;

        tx.execute("DELETE FROM records_fts WHERE unit_id = ?1", params![record.unit_id])
            .map_err(|e| AppError::Store(format!("clear fts row {}: {e}", record.unit_id)))?;
        tx.execute(
            "INSERT INTO records_fts (unit_id, name, summary) VALUES (?1, ?2, ?3)",
            params![record.unit_id, record.name, record.summary],
        )
        .map_err(|e| AppError::Store(format!("index record {}: {e}", record.unit_id)))?;

        tx.commit()
            .map_err(|e| AppError::Store(format!("commit put_record tx: {e}")))?;
        Ok(())
    }

    pub fn get_record(&self, unit_id: &str) -> Result<Option<CollegeRecord>, AppError> {
        let conn = self.open_conn()?;
        conn.query_row(
            &format!("SELECT {RECORD_COLUMNS} FROM records WHERE unit_id = ?1"),
            params![unit_id],
            read_record,
        )
        .optional()
        .map_err(|e| AppError::Store(format!("get record {unit_id}: {e}")))
    }

    pub fn count(&self) -> Result<usize, AppError> {
        let conn = self.open_conn()?;
        let n: i64 = conn
            .query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))
            .map_err(|e| AppError::Store(format!("count records: {e}")))?;
        Ok(n as usize)
    }

    // ── Async search surface ──────────────────────────────────────────────

    pub async fn search_by_vector(
        &self,
        vector: Vec<f32>,
        k: usize,
    ) -> Result<Vec<RetrievalHit>, EngineError> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.vector_search_blocking(&vector, k))
            .await
            .map_err(|e| unavailable(SourceName::RecordsVector, format!("search task failed: {e}")))?
            .map_err(|e| unavailable(SourceName::RecordsVector, e.to_string()))
    }

    pub async fn search_by_keyword(
        &self,
        question: String,
        k: usize,
    ) -> Result<Vec<RetrievalHit>, EngineError> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.keyword_search_blocking(&question, k))
            .await
            .map_err(|e| unavailable(SourceName::RecordsKeyword, format!("search task failed: {e}")))?
            .map_err(|e| unavailable(SourceName::RecordsKeyword, e.to_string()))
    }

    // ── Blocking internals ────────────────────────────────────────────────

    /// Cosine similarity against every stored embedding of matching width.
    pub fn vector_search_blocking(
        &self,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<RetrievalHit>, AppError> {
        if vector.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let conn = self.open_conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {RECORD_COLUMNS}, embedding FROM records
                 WHERE embedding IS NOT NULL
                 ORDER BY unit_id"
            ))
            .map_err(|e| AppError::Store(format!("prepare vector search: {e}")))?;

        let rows = stmt
            .query_map([], |row| {
                let record = read_record(row)?;
                let blob: Vec<u8> = row.get(8)?;
                Ok((record, blob))
            })
            .map_err(|e| AppError::Store(format!("execute vector search: {e}")))?;

        let mut scored = Vec::new();
        let mut skipped = 0usize;
        for row in rows {
            let (record, blob) =
                row.map_err(|e| AppError::Store(format!("map vector row: {e}")))?;
            let score = decode_embedding(&blob)
                .filter(|stored| stored.len() == vector.len())
                .and_then(|stored| cosine_similarity(vector, &stored));
            match score {
                Some(score) => scored.push((record, score)),
                None => skipped += 1,
            }
        }
        if skipped > 0 {
            debug!(skipped, dims = vector.len(), "records without a comparable embedding skipped");
        }

        // Stable sort keeps unit_id order among equal scores.
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(record, score)| to_hit(&record, score, Origin::VectorSearch))
            .collect())
    }

    /// FTS5 OR-match of the question's terms, best bm25 first.
    pub fn keyword_search_blocking(
        &self,
        question: &str,
        k: usize,
    ) -> Result<Vec<RetrievalHit>, AppError> {
        let Some(query) = fts_query(question) else {
            return Ok(Vec::new());
        };
        if k == 0 {
            return Ok(Vec::new());
        }

        let conn = self.open_conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT r.unit_id, r.name, r.city, r.state, r.admission_rate,
                        r.graduation_rate, r.enrollment, r.summary,
                        bm25(records_fts) AS rank
                 FROM records_fts
                 JOIN records r ON r.unit_id = records_fts.unit_id
                 WHERE records_fts MATCH ?1
                 ORDER BY rank
                 LIMIT ?2",
            )
            .map_err(|e| AppError::Store(format!("prepare keyword search: {e}")))?;

        let rows = stmt
            .query_map(params![query, k as i64], |row| {
                let record = read_record(row)?;
                let bm25: f64 = row.get(8)?;
                Ok((record, (-bm25) as f32))
            })
            .map_err(|e| AppError::Store(format!("execute keyword search: {e}")))?;

        let mut hits = Vec::new();
        for row in rows {
            let (record, score) =
                row.map_err(|e| AppError::Store(format!("map keyword row: {e}")))?;
            hits.push(to_hit(&record, score, Origin::KeywordSearch));
        }
        Ok(hits)
    }

    fn init_db(&self) -> Result<(), AppError> {
        let conn = self.open_conn()?;
        let version: i64 = conn
            .query_row("PRAGMA user_version;", [], |row| row.get(0))
            .map_err(|e| AppError::Store(format!("read schema version: {e}")))?;

        if version == 0 {
            conn.execute_batch(
                "
                CREATE TABLE IF NOT EXISTS records (
                    unit_id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    city TEXT,
                    state TEXT,
                    admission_rate REAL,
                    graduation_rate REAL,
                    enrollment INTEGER,
                    summary TEXT NOT NULL DEFAULT '',
                    embedding BLOB
                );

                CREATE VIRTUAL TABLE IF NOT EXISTS records_fts USING fts5(
                    unit_id UNINDEXED,
                    name,
                    summary
                );

                PRAGMA user_version = 1;
                ",
            )
            .map_err(|e| AppError::Store(format!("initialize schema: {e}")))?;
            return Ok(());
        }

        if version != SCHEMA_VERSION {
            return Err(AppError::Store(format!(
                "unsupported schema version {version}, expected {SCHEMA_VERSION}"
            )));
        }
        Ok(())
    }

    fn open_conn(&self) -> Result<Connection, AppError> {
        let conn = Connection::open(&self.db_path)
            .map_err(|e| AppError::Store(format!("open {}: {e}", self.db_path.display())))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| AppError::Store(format!("set journal_mode WAL: {e}")))?;
        conn.pragma_update(None, "busy_timeout", 5000)
            .map_err(|e| AppError::Store(format!("set busy_timeout: {e}")))?;
        Ok(conn)
    }
}

const RECORD_COLUMNS: &str =
    "unit_id, name, city, state, admission_rate, graduation_rate, enrollment, summary";

fn read_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<CollegeRecord> {
    let enrollment: Option<i64> = row.get(6)?;
    Ok(CollegeRecord {
        unit_id: row.get(0)?,
        name: row.get(1)?,
        city: row.get(2)?,
        state: row.get(3)?,
        admission_rate: row.get(4)?,
        graduation_rate: row.get(5)?,
        enrollment: enrollment.and_then(|n| u64::try_from(n).ok()),
        summary: row.get(7)?,
    })
}

fn to_hit(record: &CollegeRecord, score: f32, origin: Origin) -> RetrievalHit {
    RetrievalHit::record(
        record.unit_id.clone(),
        record.summary_fields(),
        render_record(record),
        score,
        origin,
    )
}

fn unavailable(source: SourceName, reason: String) -> EngineError {
    warn!(%source, %reason, "record search failed");
    EngineError::source_unavailable(source, reason)
}

/// Reduce free text to an FTS5 OR-query of quoted alphanumeric terms.
/// `None` when nothing searchable remains.
pub fn fts_query(text: &str) -> Option<String> {
    let mut terms: Vec<String> = Vec::new();
    for term in text.split(|c: char| !c.is_alphanumeric()) {
        if term.is_empty() {
            continue;
        }
        let term = term.to_lowercase();
        if !terms.contains(&term) {
            terms.push(term);
        }
    }
    if terms.is_empty() {
        return None;
    }
    Some(
        terms
            .iter()
            .map(|t| format!("\"{t}\""))
            .collect::<Vec<_>>()
            .join(" OR "),
    )
}

pub fn encode_embedding(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

pub fn decode_embedding(blob: &[u8]) -> Option<Vec<f32>> {
    if blob.is_empty() || blob.len() % 4 != 0 {
        return None;
    }
    Some(
        blob.chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect(),
    )
}

/// `None` when either vector has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    let (mut dot, mut na, mut nb) = (0.0f32, 0.0f32, 0.0f32);
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return None;
    }
    Some(dot / (na.sqrt() * nb.sqrt()))
}
