//! Fan-out coordinator: the three retrieval calls for one query, run
//! concurrently and joined under a [`FanoutPolicy`].

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::FanoutPolicy;
use crate::error::{EngineError, SourceName};
use crate::retrieval::{ArticleSource, RecordSource, RetrievalHit};

/// Per-source hit lists, before fusion.
#[derive(Debug, Default)]
pub struct RawHits {
    pub articles: Vec<RetrievalHit>,
    pub by_vector: Vec<RetrievalHit>,
    pub by_keyword: Vec<RetrievalHit>,
}

/// Borrowed handles to the three sources.
#[derive(Debug, Clone, Copy)]
pub struct Sources<'a> {
    pub articles: &'a ArticleSource,
    pub records_vector: &'a RecordSource,
    pub records_keyword: &'a RecordSource,
}

#[derive(Debug, Clone, Copy)]
pub struct FanoutParams {
    pub k: usize,
    pub policy: FanoutPolicy,
    /// Bound on each call; a call that overruns is that source's failure.
    pub timeout: Duration,
}

/// Issue exactly three calls and join them.
///
/// `AllOrNothing` returns the first failure. `BestEffort` logs each failure,
/// substitutes an empty list and errors only when every source failed.
/// Cancellation of `cancel` abandons all in-flight calls.
pub async fn fan_out(
    sources: Sources<'_>,
    question: &str,
    vector: &[f32],
    params: FanoutParams,
    cancel: &CancellationToken,
) -> Result<RawHits, EngineError> {
    let FanoutParams { k, policy, timeout } = params;

    let articles = bounded(
        SourceName::Articles,
        timeout,
        sources.articles.search_articles(question, vector, k),
    );
    let by_vector = bounded(
        SourceName::RecordsVector,
        timeout,
        sources.records_vector.search_by_vector(vector, k),
    );
    let by_keyword = bounded(
        SourceName::RecordsKeyword,
        timeout,
        sources.records_keyword.search_by_keyword(question, k),
    );

    let joined = async {
        match policy {
            FanoutPolicy::AllOrNothing => {
                let (articles, by_vector, by_keyword) =
                    tokio::try_join!(articles, by_vector, by_keyword)?;
                Ok(RawHits { articles, by_vector, by_keyword })
            }
            FanoutPolicy::BestEffort => {
                let (a, v, kw) = tokio::join!(articles, by_vector, by_keyword);
                best_effort(a, v, kw)
            }
        }
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(EngineError::Cancelled),
        result = joined => result,
    }
}

async fn bounded<F>(
    source: SourceName,
    timeout: Duration,
    call: F,
) -> Result<Vec<RetrievalHit>, EngineError>
where
    F: Future<Output = Result<Vec<RetrievalHit>, EngineError>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(Ok(hits)) => {
            debug!(%source, hits = hits.len(), "source returned");
            Ok(hits)
        }
        Ok(Err(e)) => Err(e),
        Err(_) => {
            warn!(%source, timeout_ms = timeout.as_millis() as u64, "source timed out");
            Err(EngineError::source_unavailable(
                source,
                format!("timed out after {} ms", timeout.as_millis()),
            ))
        }
    }
}

fn best_effort(
    articles: Result<Vec<RetrievalHit>, EngineError>,
    by_vector: Result<Vec<RetrievalHit>, EngineError>,
    by_keyword: Result<Vec<RetrievalHit>, EngineError>,
) -> Result<RawHits, EngineError> {
    let mut first_error = None;
    let mut take = |result: Result<Vec<RetrievalHit>, EngineError>| match result {
        Ok(hits) => (hits, true),
        Err(e) => {
            warn!(error = %e, "source failed; continuing without it");
            if first_error.is_none() {
                first_error = Some(e);
            }
            (Vec::new(), false)
        }
    };

    let (articles, a_ok) = take(articles);
    let (by_vector, v_ok) = take(by_vector);
    let (by_keyword, k_ok) = take(by_keyword);

    match first_error {
        Some(e) if !(a_ok || v_ok || k_ok) => Err(e),
        _ => Ok(RawHits { articles, by_vector, by_keyword }),
    }
}
