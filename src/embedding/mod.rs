//! Embedding provider: question text to a fixed-width vector.
//!
//! Same shape as [`crate::llm::LlmProvider`]: an enum over backends, built
//! once from config and cloned into every query.

pub mod openai_compatible;

use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::config::EmbeddingConfig;

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding provider is not configured")]
    Unconfigured,
    #[error("unknown embedding provider: {0}")]
    UnknownProvider(String),
    #[error("embedding request failed: {0}")]
    Request(String),
    #[error("embedding response invalid: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Clone)]
pub enum Embedder {
    OpenAiCompatible(openai_compatible::OpenAiEmbedder),
    Hashed(HashedEmbedder),
    Unconfigured,
}

impl Embedder {
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        match self {
            Embedder::OpenAiCompatible(p) => p.embed(text).await,
            Embedder::Hashed(h) => Ok(h.embed(text)),
            Embedder::Unconfigured => Err(EmbeddingError::Unconfigured),
        }
    }

    pub fn backend(&self) -> &'static str {
        match self {
            Embedder::OpenAiCompatible(_) => "openai",
            Embedder::Hashed(_) => "hashed",
            Embedder::Unconfigured => "unconfigured",
        }
    }
}

/// Construct an [`Embedder`] from config. `api_key` comes from
/// `EMBEDDING_API_KEY`.
pub fn build(config: &EmbeddingConfig, api_key: Option<String>) -> Result<Embedder, EmbeddingError> {
    match config.provider.as_str() {
        "none" => Ok(Embedder::Unconfigured),
        "hashed" => Ok(Embedder::Hashed(HashedEmbedder::new(config.hashed_dimensions))),
        "openai" | "openai-compatible" => {
            let p = openai_compatible::OpenAiEmbedder::new(&config.openai, api_key)?;
            Ok(Embedder::OpenAiCompatible(p))
        }
        other => Err(EmbeddingError::UnknownProvider(other.to_string())),
    }
}

// ── Hashed ────────────────────────────────────────────────────────────────────

/// Deterministic feature-hashing embedder for local runs and tests.
///
/// Each lowercase alphanumeric term lands in one bucket chosen by its
/// SHA-256 digest, with a digest-derived sign. The result is L2-normalised,
/// so texts sharing terms score a positive cosine similarity.
#[derive(Debug, Clone)]
pub struct HashedEmbedder {
    dimensions: usize,
}

impl HashedEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions: dimensions.max(1) }
    }

    pub fn embed(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dimensions];
        for term in text.split(|c: char| !c.is_alphanumeric()).filter(|t| !t.is_empty()) {
            let digest = Sha256::digest(term.to_lowercase().as_bytes());
            let bucket = u64::from_le_bytes([
                digest[0], digest[1], digest[2], digest[3],
                digest[4], digest[5], digest[6], digest[7],
            ]) % self.dimensions as u64;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            v[bucket as usize] += sign;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OpenAiEmbeddingConfig;

    fn config(provider: &str) -> EmbeddingConfig {
        EmbeddingConfig {
            provider: provider.to_string(),
            openai: OpenAiEmbeddingConfig {
                api_base_url: "http://localhost:1/v1/embeddings".into(),
                model: "m".into(),
                timeout_seconds: 1,
            },
            hashed_dimensions: 32,
        }
    }

    #[test]
    fn hashed_is_deterministic_and_normalised() {
        let e = HashedEmbedder::new(32);
        let a = e.embed("Tuition at State University");
        let b = e.embed("tuition at state university");
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn hashed_empty_text_is_zero_vector() {
        let v = HashedEmbedder::new(8).embed("  ?! ");
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[tokio::test]
    async fn unconfigured_fails() {
        let e = build(&config("none"), None).unwrap();
        assert!(matches!(e.embed("q").await, Err(EmbeddingError::Unconfigured)));
        assert_eq!(e.backend(), "unconfigured");
    }

    #[test]
    fn build_selects_backend() {
        assert_eq!(build(&config("hashed"), None).unwrap().backend(), "hashed");
        assert_eq!(build(&config("openai"), Some("k".into())).unwrap().backend(), "openai");
        assert!(matches!(
            build(&config("bogus"), None),
            Err(EmbeddingError::UnknownProvider(_))
        ));
    }
}
