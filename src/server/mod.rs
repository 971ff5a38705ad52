//! Axum HTTP channel.
//!
//! ```text
//! POST /api/ask      { question, history? } → text/event-stream of {"content": …}
//! GET  /api/health   backend name per capability
//! ```
//!
//! The process [`CancellationToken`] is wired to axum's graceful shutdown;
//! every request gets a child token so shutdown also stops open streams.

mod api;

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::engine::AnswerEngine;
use crate::error::AppError;

/// Router state injected into every handler via [`axum::extract::State`].
///
/// Cheap to clone, all fields are reference-counted.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<AnswerEngine>,
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(engine: AnswerEngine, shutdown: CancellationToken) -> Self {
        Self { engine: Arc::new(engine), shutdown }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/ask",    post(api::ask))
        .route("/api/health", get(api::health))
        .with_state(state)
}

/// Bind `bind_addr` and serve until `shutdown` is cancelled.
pub async fn run_server(
    bind_addr: &str,
    engine: AnswerEngine,
    shutdown: CancellationToken,
) -> Result<(), AppError> {
    let router = build_router(AppState::new(engine, shutdown.clone()));

    let listener = TcpListener::bind(bind_addr)
        .await
        .map_err(|e| AppError::Server(format!("bind failed on {bind_addr}: {e}")))?;

    info!(%bind_addr, "http server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| AppError::Server(format!("axum server error: {e}")))?;

    info!("http server shut down");
    Ok(())
}
