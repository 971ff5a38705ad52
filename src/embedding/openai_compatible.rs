//! OpenAI-compatible embeddings endpoint (`/v1/embeddings`).

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use super::EmbeddingError;
use crate::config::OpenAiEmbeddingConfig;

#[derive(Debug, Clone)]
pub struct OpenAiEmbedder {
    client: Client,
    api_base_url: String,
    model: String,
    api_key: Option<String>,
}

impl OpenAiEmbedder {
    pub fn new(config: &OpenAiEmbeddingConfig, api_key: Option<String>) -> Result<Self, EmbeddingError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| EmbeddingError::Request(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_base_url: config.api_base_url.clone(),
            model: config.model.clone(),
            api_key,
        })
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let payload = EmbeddingRequest { model: &self.model, input: text };
        debug!(model = %self.model, input_len = text.len(), "sending embedding request");

        let mut req = self.client.post(&self.api_base_url).json(&payload);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let response = req.send().await.map_err(|e| {
            error!(url = %self.api_base_url, error = %e, "embedding HTTP request failed (transport)");
            EmbeddingError::Request(e.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read error body>".to_string());
            error!(%status, "embedding request returned HTTP error");
            return Err(EmbeddingError::Request(format!("HTTP {status}: {body}")));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::InvalidResponse(format!("failed to parse response body: {e}")))?;

        first_vector(parsed)
    }
}

fn first_vector(parsed: EmbeddingResponse) -> Result<Vec<f32>, EmbeddingError> {
    let vector = parsed
        .data
        .into_iter()
        .next()
        .map(|d| d.embedding)
        .ok_or_else(|| EmbeddingError::InvalidResponse("no embedding in response".into()))?;
    if vector.is_empty() {
        return Err(EmbeddingError::InvalidResponse("empty embedding vector".into()));
    }
    Ok(vector)
}

// ── Private wire types ────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_vector_takes_first_entry() {
        let parsed: EmbeddingResponse = serde_json::from_str(
            r#"{"data":[{"embedding":[0.1,0.2]},{"embedding":[0.9]}],"model":"m"}"#,
        )
        .unwrap();
        assert_eq!(first_vector(parsed).unwrap(), vec![0.1, 0.2]);
    }

    #[test]
    fn missing_or_empty_vector_is_invalid() {
        let parsed: EmbeddingResponse = serde_json::from_str(r#"{"data":[]}"#).unwrap();
        assert!(matches!(first_vector(parsed), Err(EmbeddingError::InvalidResponse(_))));
        let parsed: EmbeddingResponse =
            serde_json::from_str(r#"{"data":[{"embedding":[]}]}"#).unwrap();
        assert!(first_vector(parsed).is_err());
    }
}
