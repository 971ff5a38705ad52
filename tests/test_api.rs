//! HTTP surface tests driving the axum router directly.
//!
//! Run with:
//!   cargo test --features channel-axum --test test_api

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use admissions_rag::config::{ContextConfig, FanoutPolicy};
use admissions_rag::embedding::{Embedder, HashedEmbedder};
use admissions_rag::engine::{AnswerEngine, EngineSettings};
use admissions_rag::llm::LlmProvider;
use admissions_rag::llm::providers::dummy::DummyProvider;
use admissions_rag::retrieval::{ArticleSource, FixedHits, RecordSource, RetrievalHit};
use admissions_rag::server::{AppState, build_router};

// ── helpers ──────────────────────────────────────────────────────────────────

struct Setup {
    articles: FixedHits,
    records: FixedHits,
    llm: DummyProvider,
}

impl Setup {
    fn new() -> Self {
        Self {
            articles: FixedHits::new(vec![RetrievalHit::article("aid.pdf", "FAFSA opens Oct 1.", 1.0)]),
            records: FixedHits::default(),
            llm: DummyProvider::scripted(["The ", "answer ", "is X."]),
        }
    }

    fn router(&self) -> Router {
        let engine = AnswerEngine::new(
            Embedder::Hashed(HashedEmbedder::new(16)),
            ArticleSource::Fixed(self.articles.clone()),
            RecordSource::Fixed(self.records.clone()),
            RecordSource::Fixed(self.records.clone()),
            LlmProvider::Dummy(self.llm.clone()),
            EngineSettings {
                fanout: FanoutPolicy::AllOrNothing,
                context: ContextConfig { max_evidence_chars: 4_000, max_prompt_chars: 8_000 },
                ..EngineSettings::default()
            },
        );
        build_router(AppState::new(engine, CancellationToken::new()))
    }
}

fn ask(body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/ask")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_string(body: Body) -> String {
    let bytes = to_bytes(body, usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn json_body(body: Body) -> Value {
    serde_json::from_str(&body_string(body).await).unwrap()
}

/// `content` of every `data:` frame, in order.
fn sse_contents(raw: &str) -> Vec<String> {
    raw.lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|data| {
            let v: Value = serde_json::from_str(data.trim_start()).unwrap();
            v["content"].as_str().unwrap().to_string()
        })
        .collect()
}

// ── /api/ask ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn ask_streams_frames_in_order() {
    let setup = Setup::new();
    let resp = setup.router().oneshot(ask(r#"{"question":"When does FAFSA open?"}"#)).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let headers = resp.headers();
    assert!(headers[header::CONTENT_TYPE].to_str().unwrap().starts_with("text/event-stream"));
    assert_eq!(headers[header::CACHE_CONTROL], "no-cache");
    assert_eq!(headers["x-accel-buffering"], "no");

    let raw = body_string(resp.into_body()).await;
    let frames = sse_contents(&raw);
    assert_eq!(frames, vec!["The ", "answer ", "is X."]);
    assert_eq!(frames.concat(), "The answer is X.");
    assert!(!raw.contains("[DONE]"), "no terminal sentinel frame");
}

#[tokio::test]
async fn empty_question_is_bad_request_without_calls() {
    let setup = Setup::new();
    for body in [r#"{"question":""}"#, r#"{}"#, r#"{"history":[]}"#] {
        let resp = setup.router().oneshot(ask(body)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "body {body}");
        let json = json_body(resp.into_body()).await;
        assert_eq!(json["error"], "bad_request");
    }
    assert_eq!(setup.articles.calls() + setup.records.calls() + setup.llm.calls(), 0);
}

#[tokio::test]
async fn malformed_json_is_bad_request() {
    let setup = Setup::new();
    let resp = setup.router().oneshot(ask("{not json")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let resp = setup.router().oneshot(ask(r#"{"question":"q","history":[{"role":"robot","content":"x"}]}"#)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn failing_source_is_service_unavailable_and_no_stream() {
    let mut setup = Setup::new();
    setup.records = FixedHits::failing("record store offline");
    let resp = setup.router().oneshot(ask(r#"{"question":"q"}"#)).await.unwrap();

    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    let json = json_body(resp.into_body()).await;
    assert_eq!(json["error"], "source_unavailable");
    assert!(json["message"].as_str().unwrap().contains("record store offline"));
    assert_eq!(setup.llm.calls(), 0);
}

#[tokio::test]
async fn upstream_open_failure_is_bad_gateway() {
    let mut setup = Setup::new();
    setup.llm = DummyProvider::unavailable("HTTP 401 Unauthorized");
    let resp = setup.router().oneshot(ask(r#"{"question":"q"}"#)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(json_body(resp.into_body()).await["error"], "upstream_generation");
}

#[tokio::test]
async fn mid_stream_failure_just_closes_the_stream() {
    let mut setup = Setup::new();
    setup.llm = DummyProvider::scripted(["partial "]).failing_after_script("connection reset");
    let resp = setup.router().oneshot(ask(r#"{"question":"q"}"#)).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let raw = body_string(resp.into_body()).await;
    assert_eq!(sse_contents(&raw), vec!["partial "]);
    assert!(!raw.contains("connection reset"));
}

// ── /api/health ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn health_names_each_backend() {
    let setup = Setup::new();
    let req = Request::builder().uri("/api/health").body(Body::empty()).unwrap();
    let resp = setup.router().oneshot(req).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let json = json_body(resp.into_body()).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["embedding"], "hashed");
    assert_eq!(json["articles"], "fixed");
    assert_eq!(json["records_keyword"], "fixed");
    assert_eq!(json["llm"], "dummy");
}
