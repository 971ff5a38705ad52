//! Handlers for `/api/*` routes.

use std::convert::Infallible;

use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::{HeaderName, HeaderValue, StatusCode, header},
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
};
use futures_util::stream::{BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{Instrument, debug, warn};

use super::AppState;
use crate::engine::{self, Query};
use crate::error::EngineError;
use crate::llm::Turn;
use crate::relay;

// ── Request types ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub(super) struct AskRequest {
    #[serde(default)]
    question: Option<String>,
    #[serde(default)]
    history: Vec<Turn>,
}

/// One SSE frame payload.
#[derive(Debug, Serialize)]
struct Frame<'a> {
    content: &'a str,
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Build a JSON error response body.
fn json_error(code: &str, msg: impl std::fmt::Display) -> Json<serde_json::Value> {
    Json(json!({ "error": code, "message": format!("{msg}") }))
}

impl EngineError {
    pub fn status(&self) -> StatusCode {
        match self {
            EngineError::Validation(_) => StatusCode::BAD_REQUEST,
            EngineError::EmbeddingUnavailable(_) | EngineError::SourceUnavailable { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            EngineError::UpstreamGeneration(_) => StatusCode::BAD_GATEWAY,
            EngineError::ContextOverflow { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            EngineError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        (self.status(), json_error(self.code(), &self)).into_response()
    }
}

fn sse_response(fragments: BoxStream<'static, String>) -> Response {
    let events = fragments.map(|fragment| {
        let event = Event::default()
            .json_data(Frame { content: &fragment })
            .unwrap_or_else(|_| Event::default().data(fragment.as_str()));
        Ok::<_, Infallible>(event)
    });

    (
        [
            (header::CACHE_CONTROL, HeaderValue::from_static("no-cache")),
            (HeaderName::from_static("x-accel-buffering"), HeaderValue::from_static("no")),
        ],
        Sse::new(events).keep_alive(KeepAlive::default()),
    )
        .into_response()
}

// ── Handlers ──────────────────────────────────────────────────────────────────

/// POST /api/ask
pub(super) async fn ask(
    State(state): State<AppState>,
    payload: Result<Json<AskRequest>, JsonRejection>,
) -> Response {
    let req = match payload {
        Ok(Json(req)) => req,
        Err(rejection) => {
            debug!(error = %rejection.body_text(), "rejected ask body");
            return EngineError::Validation(rejection.body_text()).into_response();
        }
    };

    let query = Query::new(req.question.unwrap_or_default(), req.history);
    let cancel = state.shutdown.child_token();
    // Cancels in-flight retrieval if the client disconnects before headers.
    let guard = cancel.clone().drop_guard();

    let span = engine::query_span();

    match state.engine.open_stream(&query, &cancel).instrument(span.clone()).await {
        Ok(upstream) => {
            guard.disarm();
            let handle = relay::spawn(upstream, cancel, span);
            sse_response(handle.fragments)
        }
        Err(e) => {
            if !matches!(e, EngineError::Validation(_)) {
                span.in_scope(|| warn!(code = e.code(), error = %e, "ask failed before streaming"));
            }
            e.into_response()
        }
    }
}

/// GET /api/health
pub(super) async fn health(State(state): State<AppState>) -> Response {
    (StatusCode::OK, Json(state.engine.health())).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_statuses() {
        assert_eq!(EngineError::Validation("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            EngineError::EmbeddingUnavailable("x".into()).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            EngineError::UpstreamGeneration("x".into()).status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            EngineError::ContextOverflow { size: 2, max: 1 }.status(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
    }

    #[test]
    fn ask_request_defaults_history() {
        let req: AskRequest = serde_json::from_str(r#"{"question":"hi"}"#).unwrap();
        assert_eq!(req.question.as_deref(), Some("hi"));
        assert!(req.history.is_empty());
        let req: AskRequest = serde_json::from_str("{}").unwrap();
        assert!(req.question.is_none());
    }
}
