//! Hosted article search (`POST /indexes/{index}/docs/search`).
//!
//! One request blends a full-text query on the raw question with a vector
//! query on the question embedding; the service ranks server-side and we
//! keep its order. Results missing content or a storage name are dropped at
//! this boundary.

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, trace, warn};

use super::RetrievalHit;
use crate::config::ArticleSearchConfig;
use crate::error::{EngineError, SourceName};

#[derive(Debug, Clone)]
pub struct ArticleSearchClient {
    client: Client,
    url: String,
    api_key: Option<String>,
    vector_field: String,
    content_field: String,
    name_field: String,
}

impl ArticleSearchClient {
    pub fn new(config: &ArticleSearchConfig, api_key: Option<String>) -> Result<Self, EngineError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| {
                EngineError::source_unavailable(
                    SourceName::Articles,
                    format!("failed to build HTTP client: {e}"),
                )
            })?;

        let url = format!(
            "{}/indexes/{}/docs/search?api-version={}",
            config.endpoint, config.index, config.api_version
        );

        Ok(Self {
            client,
            url,
            api_key,
            vector_field: config.vector_field.clone(),
            content_field: config.content_field.clone(),
            name_field: config.name_field.clone(),
        })
    }

    pub async fn search(
        &self,
        question: &str,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<RetrievalHit>, EngineError> {
        let body = SearchRequest {
            search: question,
            top: k,
            select: format!("{},{}", self.content_field, self.name_field),
            vector_queries: vec![VectorQuery {
                kind: "vector",
                vector,
                fields: &self.vector_field,
                k,
            }],
        };

        debug!(url = %self.url, k, "article search request");

        let mut req = self.client.post(&self.url).json(&body);
        if let Some(key) = &self.api_key {
            req = req.header("api-key", key);
        }

        let response = req.send().await.map_err(|e| unavailable(format!("transport: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(unavailable(format!("HTTP {status}: {text}")));
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| unavailable(format!("failed to parse response body: {e}")))?;

        let hits = parse_hits(parsed.value, &self.content_field, &self.name_field);
        debug!(hits = hits.len(), "article search complete");
        Ok(hits)
    }
}

fn unavailable(reason: String) -> EngineError {
    warn!(%reason, "article search failed");
    EngineError::source_unavailable(SourceName::Articles, reason)
}

/// Turn raw result documents into hits, skipping malformed ones.
fn parse_hits(docs: Vec<Map<String, Value>>, content_field: &str, name_field: &str) -> Vec<RetrievalHit> {
    docs.into_iter()
        .filter_map(|doc| {
            let content = doc.get(content_field).and_then(Value::as_str);
            let name = doc.get(name_field).and_then(Value::as_str);
            let score = doc.get("@search.score").and_then(Value::as_f64).unwrap_or(0.0);
            match (name, content) {
                (Some(name), Some(content)) if !name.is_empty() && !content.trim().is_empty() => {
                    Some(RetrievalHit::article(name, content.trim(), score as f32))
                }
                _ => {
                    trace!(?doc, "skipping malformed article result");
                    warn!("article result missing content or name; skipped");
                    None
                }
            }
        })
        .collect()
}

// ── Private wire types ────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchRequest<'a> {
    search: &'a str,
    top: usize,
    select: String,
    vector_queries: Vec<VectorQuery<'a>>,
}

#[derive(Debug, Serialize)]
struct VectorQuery<'a> {
    kind: &'static str,
    vector: &'a [f32],
    fields: &'a str,
    k: usize,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    value: Vec<Map<String, Value>>,
}
