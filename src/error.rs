//! Application-wide error types.
//!
//! [`AppError`] covers process startup and the server loop. [`EngineError`]
//! is the per-query taxonomy: every failure that can happen before response
//! headers are committed maps to one of its variants and from there to an
//! HTTP status.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(String),

    #[error("logger error: {0}")]
    Logger(String),

    #[error("server error: {0}")]
    Server(String),

    #[error("record store error: {0}")]
    Store(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Which retrieval capability a [`EngineError::SourceUnavailable`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceName {
    Articles,
    RecordsVector,
    RecordsKeyword,
}

impl SourceName {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceName::Articles => "articles",
            SourceName::RecordsVector => "records-vector",
            SourceName::RecordsKeyword => "records-keyword",
        }
    }
}

impl std::fmt::Display for SourceName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    /// Bad or missing input. Raised before any capability is called.
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("source {source_name} unavailable: {reason}")]
    SourceUnavailable { source_name: SourceName, reason: String },

    #[error("generation failed: {0}")]
    UpstreamGeneration(String),

    #[error("prompt of {size} chars exceeds the {max} char limit")]
    ContextOverflow { size: usize, max: usize },

    #[error("query cancelled")]
    Cancelled,
}

impl EngineError {
    pub(crate) fn source_unavailable(source_name: SourceName, reason: impl Into<String>) -> Self {
        EngineError::SourceUnavailable { source_name, reason: reason.into() }
    }

    /// Short machine-readable code used in JSON error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "bad_request",
            EngineError::EmbeddingUnavailable(_) => "embedding_unavailable",
            EngineError::SourceUnavailable { .. } => "source_unavailable",
            EngineError::UpstreamGeneration(_) => "upstream_generation",
            EngineError::ContextOverflow { .. } => "context_overflow",
            EngineError::Cancelled => "cancelled",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn config_error_display() {
        let e = AppError::Config("missing field".into());
        assert!(e.to_string().contains("config error"));
        assert!(e.to_string().contains("missing field"));
    }

    #[test]
    fn io_error_converts() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        let e: AppError = io_err.into();
        assert!(e.to_string().contains("io error"));
        let _: &dyn Error = &e;
    }

    #[test]
    fn source_unavailable_names_the_source() {
        let e = EngineError::source_unavailable(SourceName::RecordsKeyword, "not configured");
        let msg = e.to_string();
        assert!(msg.contains("records-keyword"));
        assert!(msg.contains("not configured"));
        assert_eq!(e.code(), "source_unavailable");
    }

    #[test]
    fn context_overflow_reports_sizes() {
        let e = EngineError::ContextOverflow { size: 9000, max: 8000 };
        assert!(e.to_string().contains("9000"));
        assert!(e.to_string().contains("8000"));
    }
}
