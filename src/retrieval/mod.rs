//! Retrieval sources and the hit model they all produce.
//!
//! Three independent capabilities feed the engine:
//!
//! ```text
//! ArticleSource::search_articles(question, vector, k)   → hits[Article]
//! RecordSource::search_by_vector(vector, k)             → hits[Record, VectorSearch]
//! RecordSource::search_by_keyword(question, k)          → hits[Record, KeywordSearch]
//! ```
//!
//! Each source is an enum over concrete backends, built once at startup and
//! cloned into every query. An `Unconfigured` backend fails fast with
//! [`EngineError::SourceUnavailable`] instead of returning an empty list, so
//! the caller decides whether absence is fatal.

pub mod articles;
#[cfg(feature = "isqlite")]
pub mod records;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde::Serialize;

use crate::error::{EngineError, SourceName};

// ── Hit model ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Article,
    StructuredRecord,
}

/// Which retrieval path produced a hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    VectorSearch,
    KeywordSearch,
}

/// Fields of a structured record needed to label it in the prompt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordSummary {
    pub name: String,
    /// Fraction in `0.0..=1.0`.
    pub admission_rate: Option<f64>,
    /// Fraction in `0.0..=1.0`.
    pub graduation_rate: Option<f64>,
    pub enrollment: Option<u64>,
}

/// Source-specific payload. The variant decides the hit's [`SourceKind`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HitPayload {
    Article { document_name: String },
    Record(RecordSummary),
}

/// One piece of evidence from one source.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalHit {
    /// Natural primary key of the underlying record: document name for
    /// articles, unit identifier for structured records.
    pub identity_key: String,
    pub rendered_text: String,
    pub relevance_score: f32,
    pub origin: Origin,
    pub payload: HitPayload,
}

impl RetrievalHit {
    pub fn article(
        document_name: impl Into<String>,
        content: impl Into<String>,
        relevance_score: f32,
    ) -> Self {
        let document_name = document_name.into();
        Self {
            identity_key: document_name.clone(),
            rendered_text: content.into(),
            relevance_score,
            origin: Origin::VectorSearch,
            payload: HitPayload::Article { document_name },
        }
    }

    pub fn record(
        unit_id: impl Into<String>,
        summary: RecordSummary,
        rendered_text: impl Into<String>,
        relevance_score: f32,
        origin: Origin,
    ) -> Self {
        Self {
            identity_key: unit_id.into(),
            rendered_text: rendered_text.into(),
            relevance_score,
            origin,
            payload: HitPayload::Record(summary),
        }
    }

    pub fn source_kind(&self) -> SourceKind {
        match self.payload {
            HitPayload::Article { .. } => SourceKind::Article,
            HitPayload::Record(_) => SourceKind::StructuredRecord,
        }
    }
}

// ── Fixed backend ─────────────────────────────────────────────────────────────

/// Preloaded hits served from memory.
///
/// Used for local development and tests: it counts every call and can be
/// told to fail, so callers can observe fan-out and fail-fast behaviour.
#[derive(Debug, Clone, Default)]
pub struct FixedHits {
    hits: Vec<RetrievalHit>,
    failure: Option<String>,
    /// Simulated latency before each answer.
    delay: Option<Duration>,
    calls: Arc<AtomicUsize>,
}

impl FixedHits {
    pub fn new(hits: Vec<RetrievalHit>) -> Self {
        Self { hits, ..Self::default() }
    }

    /// A backend whose every call fails with `reason`.
    pub fn failing(reason: impl Into<String>) -> Self {
        Self { failure: Some(reason.into()), ..Self::default() }
    }

    /// Wait `delay` before answering each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of searches issued so far, shared across clones.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn serve(&self, source: SourceName, k: usize) -> Result<Vec<RetrievalHit>, EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(reason) = &self.failure {
            return Err(EngineError::source_unavailable(source, reason.clone()));
        }
        Ok(self.hits.iter().take(k).cloned().collect())
    }
}

// ── Article source ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum ArticleSource {
    Search(articles::ArticleSearchClient),
    Fixed(FixedHits),
    Unconfigured,
}

impl ArticleSource {
    /// Ranked article hits for the question, blending lexical relevance on
    /// `question` with vector similarity on `vector`.
    pub async fn search_articles(
        &self,
        question: &str,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<RetrievalHit>, EngineError> {
        match self {
            ArticleSource::Search(client) => client.search(question, vector, k).await,
            ArticleSource::Fixed(fixed) => fixed.serve(SourceName::Articles, k).await,
            ArticleSource::Unconfigured => Err(EngineError::source_unavailable(
                SourceName::Articles,
                "article search is not configured",
            )),
        }
    }

    pub fn backend(&self) -> &'static str {
        match self {
            ArticleSource::Search(_) => "search",
            ArticleSource::Fixed(_) => "fixed",
            ArticleSource::Unconfigured => "unconfigured",
        }
    }
}

// ── Record source ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum RecordSource {
    #[cfg(feature = "isqlite")]
    Sqlite(records::RecordStore),
    Fixed(FixedHits),
    Unconfigured,
}

impl RecordSource {
    /// Structured records nearest to `vector`, most similar first.
    pub async fn search_by_vector(
        &self,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<RetrievalHit>, EngineError> {
        let hits = match self {
            #[cfg(feature = "isqlite")]
            RecordSource::Sqlite(store) => store.search_by_vector(vector.to_vec(), k).await,
            RecordSource::Fixed(fixed) => fixed.serve(SourceName::RecordsVector, k).await,
            RecordSource::Unconfigured => Err(EngineError::source_unavailable(
                SourceName::RecordsVector,
                "record store is not configured",
            )),
        }?;
        Ok(stamp(hits, Origin::VectorSearch))
    }

    /// Structured records matching the question's terms, limited to `k`.
    pub async fn search_by_keyword(
        &self,
        question: &str,
        k: usize,
    ) -> Result<Vec<RetrievalHit>, EngineError> {
        let hits = match self {
            #[cfg(feature = "isqlite")]
            RecordSource::Sqlite(store) => store.search_by_keyword(question.to_string(), k).await,
            RecordSource::Fixed(fixed) => fixed.serve(SourceName::RecordsKeyword, k).await,
            RecordSource::Unconfigured => Err(EngineError::source_unavailable(
                SourceName::RecordsKeyword,
                "record store is not configured",
            )),
        }?;
        Ok(stamp(hits, Origin::KeywordSearch))
    }

    pub fn backend(&self) -> &'static str {
        match self {
            #[cfg(feature = "isqlite")]
            RecordSource::Sqlite(_) => "sqlite",
            RecordSource::Fixed(_) => "fixed",
            RecordSource::Unconfigured => "unconfigured",
        }
    }
}

/// Record hits carry the origin of the path that produced them, whatever the
/// backend reported.
fn stamp(mut hits: Vec<RetrievalHit>, origin: Origin) -> Vec<RetrievalHit> {
    for hit in &mut hits {
        hit.origin = origin;
    }
    hits
}
