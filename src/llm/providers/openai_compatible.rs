//! OpenAI-compatible streaming chat completions (`/v1/chat/completions`).
//!
//! All OpenAI wire types are private to this module and [`crate::llm::sse`];
//! callers only see [`Turn`]s going in and text fragments coming out.

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, trace};

use crate::llm::{FragmentStream, ProviderError, Turn, sse};

/// Adapter for any HTTP endpoint implementing `/v1/chat/completions` with
/// `stream: true`.
///
/// Covers OpenAI, OpenAI-compatible local servers (Ollama, LM Studio…) and
/// hosted alternatives. Constructed once at startup, then cheaply cloned
/// because `reqwest::Client` is an `Arc` internally.
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleProvider {
    client: Client,
    api_base_url: String,
    model: String,
    temperature: f32,
    api_key: Option<String>,
}

impl OpenAiCompatibleProvider {
    /// `api_key` is `None` for keyless local models. When present it is sent
    /// as `Authorization: Bearer <key>` on every request.
    pub fn new(
        api_base_url: String,
        model: String,
        temperature: f32,
        timeout_seconds: u64,
        api_key: Option<String>,
    ) -> Result<Self, ProviderError> {
        // Bound connection setup and the gap between chunks, never the whole
        // body: a long answer streams for as long as fragments keep coming.
        let limit = Duration::from_secs(timeout_seconds);
        let client = Client::builder()
            .connect_timeout(limit)
            .read_timeout(limit)
            .build()
            .map_err(|e| ProviderError::Request(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, api_base_url, model, temperature, api_key })
    }

    /// Open the stream. Resolves after the response status is known; the
    /// body is decoded lazily as the returned stream is polled.
    pub async fn stream_chat(&self, messages: &[Turn]) -> Result<FragmentStream, ProviderError> {
        let payload = self.request(messages);

        debug!(
            model = %payload.model,
            temperature = ?payload.temperature,
            messages = messages.len(),
            "opening LLM stream"
        );
        if tracing::enabled!(tracing::Level::TRACE) {
            let json = serde_json::to_string_pretty(&payload)
                .unwrap_or_else(|e| format!("<serialization failed: {e}>"));
            trace!(payload = %json, "full LLM request payload");
        }

        let mut req = self
            .client
            .post(&self.api_base_url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(&payload);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let response = req.send().await.map_err(|e| {
            error!(url = %self.api_base_url, error = %e, "LLM HTTP request failed (transport)");
            ProviderError::Request(e.to_string())
        })?;

        let response = check_status(response).await?;
        Ok(sse::fragments(Box::pin(response.bytes_stream())))
    }

    fn request<'a>(&'a self, messages: &'a [Turn]) -> ChatCompletionRequest<'a> {
        // Some models (gpt-5 family) do not accept a temperature parameter.
        let temperature = if self.model.starts_with("gpt-5") {
            None
        } else {
            Some(self.temperature)
        };
        ChatCompletionRequest { model: &self.model, messages, temperature, stream: true }
    }
}

// ── Private wire types ────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [Turn],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
}

// Error envelope used by OpenAI and compatible APIs.
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
    #[serde(default)]
    code: Option<serde_json::Value>,
}

/// Return the response if successful, or a structured error.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<failed to read error body>".to_string());
    let message = error_message(status, &body);

    error!(%status, %message, "LLM request returned HTTP error");
    Err(ProviderError::Request(message))
}

fn error_message(status: reqwest::StatusCode, body: &str) -> String {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(env) => {
            let code = env
                .error
                .code
                .map(|v| match v {
                    serde_json::Value::String(s) => format!(" [code={s}]"),
                    other => format!(" [code={other}]"),
                })
                .unwrap_or_default();
            format!("HTTP {status}{code}: {}", env.error.message)
        }
        Err(_) => format!("HTTP {status}: {body}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(model: &str) -> OpenAiCompatibleProvider {
        OpenAiCompatibleProvider::new(
            "http://localhost:1/v1/chat/completions".into(),
            model.into(),
            0.3,
            5,
            None,
        )
        .unwrap()
    }

    #[test]
    fn request_sets_stream_and_roles() {
        let p = provider("gpt-4o-mini");
        let turns = [Turn::system("ctx"), Turn::user("Q")];
        let v = serde_json::to_value(p.request(&turns)).unwrap();
        assert_eq!(v["stream"], true);
        assert_eq!(v["messages"][0]["role"], "system");
        assert_eq!(v["messages"][1]["content"], "Q");
        assert!(v.get("temperature").is_some());
    }

    #[test]
    fn gpt5_omits_temperature() {
        let p = provider("gpt-5-mini");
        let v = serde_json::to_value(p.request(&[])).unwrap();
        assert!(v.get("temperature").is_none());
    }

    #[test]
    fn error_message_uses_envelope() {
        let msg = error_message(
            reqwest::StatusCode::TOO_MANY_REQUESTS,
            r#"{"error":{"message":"rate limited","code":"rate_limit_exceeded"}}"#,
        );
        assert!(msg.contains("429"));
        assert!(msg.contains("[code=rate_limit_exceeded]"));
        assert!(msg.contains("rate limited"));

        let msg = error_message(reqwest::StatusCode::BAD_GATEWAY, "upstream down");
        assert!(msg.ends_with("upstream down"));
    }
}
