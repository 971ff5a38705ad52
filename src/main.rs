//! Admissions RAG HTTP entry point.
//!
//! Startup sequence:
//!   1. Load .env (if present)
//!   2. Load config
//!   3. Init logger once at the configured level
//!   4. Build the answer engine (all capability clients)
//!   5. Spawn Ctrl-C → shutdown signal watcher
//!   6. Serve until the shutdown token is cancelled

use admissions_rag::{config, engine::AnswerEngine, error::AppError, logger, server};
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), AppError> {
    // Load .env if present; the file is optional.
    let _ = dotenvy::dotenv();

    let config = config::load()?;
    logger::init(&config.server.log_level)?;

    info!(
        bind = %config.server.bind,
        log_level = %config.server.log_level,
        embedding = %config.embedding.provider,
        llm = %config.llm.provider,
        fanout = ?config.retrieval.fanout,
        "config loaded"
    );

    let engine = AnswerEngine::from_config(&config)?;

    let shutdown = CancellationToken::new();
    let ctrl_c_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received, shutting down");
            ctrl_c_token.cancel();
        }
    });

    server::run_server(&config.server.bind, engine, shutdown).await
}
