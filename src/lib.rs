//! Admissions RAG: grounded answers over hybrid retrieval.
//!
//! A question is embedded, searched concurrently against an article index
//! and a structured record store (vector and keyword), fused into a bounded
//! context, wrapped in a grounding prompt and answered as a token stream.

pub mod config;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod llm;
pub mod logger;
pub mod relay;
pub mod retrieval;
#[cfg(feature = "channel-axum")]
pub mod server;
