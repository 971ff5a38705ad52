//! Query orchestration.
//!
//! ```text
//! validate → embed → fan_out ─┬─ articles ──────┐
//!                             ├─ records/vector ├→ fuse → assemble → prompt → stream_chat
//!                             └─ records/keyword┘
//! ```
//!
//! Everything up to and including opening the upstream stream happens in
//! [`AnswerEngine::open_stream`], before any response headers exist, so each
//! failure maps to a conventional error response.

pub mod context;
pub mod fanout;
pub mod fusion;
pub mod prompt;

use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{Span, debug, info, info_span, warn};
use uuid::Uuid;

use crate::config::{Config, ContextConfig, FanoutPolicy};
use crate::embedding::{self, Embedder};
use crate::error::{AppError, EngineError};
use crate::llm::{FragmentStream, LlmProvider, Turn, providers};
use crate::retrieval::{ArticleSource, RecordSource, articles::ArticleSearchClient};

use self::context::AssembledContext;
use self::fanout::{FanoutParams, Sources};
use self::prompt::PromptMessages;

/// One incoming question plus the conversation so far.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    pub text: String,
    pub history: Vec<Turn>,
}

impl Query {
    pub fn new(text: impl Into<String>, history: Vec<Turn>) -> Self {
        Self { text: text.into(), history }
    }

    /// The question, or `Validation` when it is blank.
    pub fn question(&self) -> Result<&str, EngineError> {
        if self.text.trim().is_empty() {
            return Err(EngineError::Validation("question must not be empty".into()));
        }
        Ok(&self.text)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    pub top_k: usize,
    pub fanout: FanoutPolicy,
    pub retrieval_timeout: Duration,
    pub context: ContextConfig,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            top_k: 5,
            fanout: FanoutPolicy::AllOrNothing,
            retrieval_timeout: Duration::from_secs(30),
            context: ContextConfig { max_evidence_chars: 12_000, max_prompt_chars: 24_000 },
        }
    }
}

/// Which backend serves each capability.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Health {
    pub status: &'static str,
    pub embedding: &'static str,
    pub articles: &'static str,
    pub records_vector: &'static str,
    pub records_keyword: &'static str,
    pub llm: &'static str,
}

/// Shared, read-only client handles. Clone per request.
#[derive(Debug, Clone)]
pub struct AnswerEngine {
    embedder: Embedder,
    articles: ArticleSource,
    records_vector: RecordSource,
    records_keyword: RecordSource,
    llm: LlmProvider,
    settings: EngineSettings,
}

impl AnswerEngine {
    pub fn new(
        embedder: Embedder,
        articles: ArticleSource,
        records_vector: RecordSource,
        records_keyword: RecordSource,
        llm: LlmProvider,
        settings: EngineSettings,
    ) -> Self {
        Self { embedder, articles, records_vector, records_keyword, llm, settings }
    }

    /// Build every client from resolved config.
    pub fn from_config(config: &Config) -> Result<Self, AppError> {
        let embedder = embedding::build(&config.embedding, config.embedding_api_key.clone())
            .map_err(|e| AppError::Config(format!("embedding: {e}")))?;
        let llm = providers::build(&config.llm, config.llm_api_key.clone())
            .map_err(|e| AppError::Config(format!("llm: {e}")))?;

        let articles = match &config.retrieval.articles {
            Some(cfg) => ArticleSource::Search(
                ArticleSearchClient::new(cfg, config.article_search_api_key.clone())
                    .map_err(|e| AppError::Config(format!("article search: {e}")))?,
            ),
            None => ArticleSource::Unconfigured,
        };

        let records = open_records(config)?;

        let settings = EngineSettings {
            top_k: config.retrieval.top_k,
            fanout: config.retrieval.fanout,
            retrieval_timeout: Duration::from_secs(config.retrieval.timeout_seconds),
            context: config.context,
        };

        let engine = Self::new(embedder, articles, records.clone(), records, llm, settings);
        info!(health = ?engine.health(), "answer engine ready");
        Ok(engine)
    }

    pub fn health(&self) -> Health {
        Health {
            status: "ok",
            embedding: self.embedder.backend(),
            articles: self.articles.backend(),
            records_vector: self.records_vector.backend(),
            records_keyword: self.records_keyword.backend(),
            llm: self.llm.backend(),
        }
    }

    /// Run the query up to the finished prompt.
    pub async fn prepare(
        &self,
        query: &Query,
        cancel: &CancellationToken,
    ) -> Result<PromptMessages, EngineError> {
        let question = query.question()?;

        let vector = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(EngineError::Cancelled),
            v = self.embedder.embed(question) => v.map_err(|e| {
                warn!(error = %e, "embedding failed");
                EngineError::EmbeddingUnavailable(e.to_string())
            })?,
        };
        debug!(dims = vector.len(), "question embedded");

        let sources = Sources {
            articles: &self.articles,
            records_vector: &self.records_vector,
            records_keyword: &self.records_keyword,
        };
        let params = FanoutParams {
            k: self.settings.top_k,
            policy: self.settings.fanout,
            timeout: self.settings.retrieval_timeout,
        };
        let raw = fanout::fan_out(sources, question, &vector, params, cancel).await?;
        let evidence = fusion::fuse(raw.articles, raw.by_vector, raw.by_keyword);

        self.fit_prompt(&evidence, &query.history, question)
    }

    /// Assemble context and prompt within both budgets.
    fn fit_prompt(
        &self,
        evidence: &fusion::FusedEvidenceSet,
        history: &[Turn],
        question: &str,
    ) -> Result<PromptMessages, EngineError> {
        let ContextConfig { max_evidence_chars, max_prompt_chars } = self.settings.context;

        let overhead = prompt::build(&AssembledContext::empty(), history, question).char_count();
        if overhead > max_prompt_chars {
            warn!(size = overhead, max = max_prompt_chars, "prompt exceeds budget without evidence");
            return Err(EngineError::ContextOverflow { size: overhead, max: max_prompt_chars });
        }

        let budget = max_evidence_chars.min(max_prompt_chars - overhead);
        let context = context::assemble(evidence, budget);
        let messages = prompt::build(&context, history, question);
        info!(
            articles = context.articles_included,
            records = context.records_included,
            dropped = context.dropped,
            prompt_chars = messages.char_count(),
            "prompt assembled"
        );
        Ok(messages)
    }

    /// Prepare the prompt and open the upstream generation stream.
    ///
    /// Run it inside a [`query_span`], and hand the same span to the relay,
    /// so every log line of one query carries its `request_id`.
    pub async fn open_stream(
        &self,
        query: &Query,
        cancel: &CancellationToken,
    ) -> Result<FragmentStream, EngineError> {
        let messages = self.prepare(query, cancel).await?;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(EngineError::Cancelled),
            opened = self.llm.stream_chat(messages.as_slice()) => opened.map_err(|e| {
                warn!(error = %e, "failed to open generation stream");
                EngineError::UpstreamGeneration(e.to_string())
            }),
        }
    }
}

/// Span for one query, tagged with a fresh time-ordered `request_id`.
pub fn query_span() -> Span {
    info_span!("query", request_id = %Uuid::now_v7())
}

#[cfg(feature = "isqlite")]
fn open_records(config: &Config) -> Result<RecordSource, AppError> {
    use crate::retrieval::records::RecordStore;

    match &config.retrieval.records_db {
        Some(path) => Ok(RecordSource::Sqlite(RecordStore::open(path)?)),
        None => Ok(RecordSource::Unconfigured),
    }
}

#[cfg(not(feature = "isqlite"))]
fn open_records(config: &Config) -> Result<RecordSource, AppError> {
    if config.retrieval.records_db.is_some() {
        warn!("retrieval.records configured but built without the isqlite feature");
    }
    Ok(RecordSource::Unconfigured)
}
