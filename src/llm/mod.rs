//! Hosted completion capability, streaming side.
//!
//! `LlmProvider` is an enum over concrete provider implementations; add a
//! variant + module in `providers/` for each additional backend. Instances
//! are shared immutable capabilities, clone them freely.
//!
//! [`LlmProvider::stream_chat`] resolves once the upstream call is open (so
//! connection and HTTP-status failures surface before the caller commits
//! anything) and yields text fragments in upstream order.

pub mod providers;
pub mod sse;

use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ── Error ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("unknown provider: {0}")]
    UnknownProvider(String),
    /// Opening the call failed: transport error or non-2xx status.
    #[error("provider request failed: {0}")]
    Request(String),
    /// The call was open and then broke.
    #[error("provider stream failed: {0}")]
    Stream(String),
}

// ── Conversation turns ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One role-tagged message, as sent to the completion capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// Incremental answer text. Ends after the last fragment; an `Err` item is
/// always the final one.
pub type FragmentStream = BoxStream<'static, Result<String, ProviderError>>;

// ── Provider enum ─────────────────────────────────────────────────────────────

/// Enum dispatch avoids `dyn` trait objects and the `async-trait` dependency.
#[derive(Debug, Clone)]
pub enum LlmProvider {
    Dummy(providers::dummy::DummyProvider),
    OpenAiCompatible(providers::openai_compatible::OpenAiCompatibleProvider),
}

impl LlmProvider {
    /// Open a streaming chat completion over `messages`.
    pub async fn stream_chat(&self, messages: &[Turn]) -> Result<FragmentStream, ProviderError> {
        match self {
            LlmProvider::Dummy(p) => p.stream_chat(messages).await,
            LlmProvider::OpenAiCompatible(p) => p.stream_chat(messages).await,
        }
    }

    pub fn backend(&self) -> &'static str {
        match self {
            LlmProvider::Dummy(_) => "dummy",
            LlmProvider::OpenAiCompatible(_) => "openai",
        }
    }
}
