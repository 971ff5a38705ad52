//! Configuration loading with env-var overrides.
//!
//! Reads `config/default.toml` relative to the current working directory
//! (or the path in `RAG_CONFIG`), then applies `RAG_BIND` and
//! `RAG_LOG_LEVEL` env overrides. API keys are read from the environment
//! only and never from TOML.

use std::{
    env, fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;

use crate::error::AppError;

/// HTTP channel configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address the axum listener binds to.
    pub bind: String,
    pub log_level: String,
}

/// OpenAI-compatible embeddings endpoint (`[embedding.openai]`).
#[derive(Debug, Clone)]
pub struct OpenAiEmbeddingConfig {
    /// Full embeddings endpoint URL.
    pub api_base_url: String,
    pub model: String,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    /// Active backend: `"openai"`, `"hashed"` or `"none"`.
    pub provider: String,
    pub openai: OpenAiEmbeddingConfig,
    /// Vector width for the local hashed embedder.
    pub hashed_dimensions: usize,
}

/// OpenAI / OpenAI-compatible chat provider (`[llm.openai]`).
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// Full chat completions endpoint URL.
    pub api_base_url: String,
    pub model: String,
    /// Sampling temperature (ignored for models that forbid it).
    pub temperature: f32,
    /// Seconds allowed to connect, and then between body chunks. A long
    /// answer that keeps streaming is never cut off.
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Which provider is active (`"dummy"`, `"openai"`).
    pub provider: String,
    pub openai: OpenAiConfig,
}

/// Hosted article search index (`[retrieval.articles]`).
#[derive(Debug, Clone)]
pub struct ArticleSearchConfig {
    pub endpoint: String,
    pub index: String,
    pub api_version: String,
    pub vector_field: String,
    pub content_field: String,
    pub name_field: String,
    pub timeout_seconds: u64,
}

/// How the fan-out coordinator treats a failing source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FanoutPolicy {
    /// Any failing source fails the whole query.
    #[default]
    AllOrNothing,
    /// Failing sources contribute nothing; the query fails only if all fail.
    BestEffort,
}

#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    /// Hits requested from each source.
    pub top_k: usize,
    pub fanout: FanoutPolicy,
    /// Upper bound on each fanned-out call.
    pub timeout_seconds: u64,
    /// `None` when `[retrieval.articles]` is absent or disabled.
    pub articles: Option<ArticleSearchConfig>,
    /// SQLite record store path (already expanded, no `~`).
    pub records_db: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy)]
pub struct ContextConfig {
    /// Budget for rendered evidence text.
    pub max_evidence_chars: usize,
    /// Budget for the whole prompt (instruction, context, history, question).
    pub max_prompt_chars: usize,
}

/// Fully-resolved configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub embedding: EmbeddingConfig,
    pub llm: LlmConfig,
    pub retrieval: RetrievalConfig,
    pub context: ContextConfig,
    /// Secrets from the environment, `None` for keyless local backends.
    pub llm_api_key: Option<String>,
    pub embedding_api_key: Option<String>,
    pub article_search_api_key: Option<String>,
}

/// Env-sourced values applied on top of the TOML file.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub bind: Option<String>,
    pub log_level: Option<String>,
    pub llm_api_key: Option<String>,
    pub embedding_api_key: Option<String>,
    pub article_search_api_key: Option<String>,
}

impl Overrides {
    pub fn from_env() -> Self {
        Self {
            bind: env::var("RAG_BIND").ok(),
            log_level: env::var("RAG_LOG_LEVEL").ok(),
            llm_api_key: env::var("LLM_API_KEY").ok(),
            embedding_api_key: env::var("EMBEDDING_API_KEY").ok(),
            article_search_api_key: env::var("ARTICLE_SEARCH_API_KEY").ok(),
        }
    }
}

// ── Raw TOML shape ────────────────────────────────────────────────────────────

#[derive(Deserialize, Default)]
struct RawConfig {
    #[serde(default)]
    server: RawServer,
    #[serde(default)]
    embedding: RawEmbedding,
    #[serde(default)]
    llm: RawLlm,
    #[serde(default)]
    retrieval: RawRetrieval,
    #[serde(default)]
    context: RawContext,
}

#[derive(Deserialize)]
struct RawServer {
    #[serde(default = "default_bind")]
    bind: String,
    #[serde(default = "default_log_level")]
    log_level: String,
}

impl Default for RawServer {
    fn default() -> Self {
        Self { bind: default_bind(), log_level: default_log_level() }
    }
}

#[derive(Deserialize)]
struct RawEmbedding {
    #[serde(rename = "default", default = "default_embedding_provider")]
    provider: String,
    #[serde(default)]
    openai: RawOpenAiEmbedding,
    #[serde(default)]
    hashed: RawHashedEmbedding,
}

impl Default for RawEmbedding {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            openai: RawOpenAiEmbedding::default(),
            hashed: RawHashedEmbedding::default(),
        }
    }
}

#[derive(Deserialize)]
struct RawOpenAiEmbedding {
    #[serde(default = "default_embedding_api_base_url")]
    api_base_url: String,
    #[serde(default = "default_embedding_model")]
    model: String,
    #[serde(default = "default_short_timeout")]
    timeout_seconds: u64,
}

impl Default for RawOpenAiEmbedding {
    fn default() -> Self {
        Self {
            api_base_url: default_embedding_api_base_url(),
            model: default_embedding_model(),
            timeout_seconds: default_short_timeout(),
        }
    }
}

#[derive(Deserialize)]
struct RawHashedEmbedding {
    #[serde(default = "default_hashed_dimensions")]
    dimensions: usize,
}

impl Default for RawHashedEmbedding {
    fn default() -> Self {
        Self { dimensions: default_hashed_dimensions() }
    }
}

#[derive(Deserialize)]
struct RawLlm {
    /// Maps to `default = "..."` in `[llm]`.
    #[serde(rename = "default", default = "default_llm_provider")]
    provider: String,
    #[serde(default)]
    openai: RawOpenAiConfig,
}

impl Default for RawLlm {
    fn default() -> Self {
        Self { provider: default_llm_provider(), openai: RawOpenAiConfig::default() }
    }
}

#[derive(Deserialize)]
struct RawOpenAiConfig {
    #[serde(default = "default_openai_api_base_url")]
    api_base_url: String,
    #[serde(default = "default_openai_model")]
    model: String,
    #[serde(default = "default_openai_temperature")]
    temperature: f32,
    #[serde(default = "default_openai_timeout_seconds")]
    timeout_seconds: u64,
}

impl Default for RawOpenAiConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_openai_api_base_url(),
            model: default_openai_model(),
            temperature: default_openai_temperature(),
            timeout_seconds: default_openai_timeout_seconds(),
        }
    }
}

#[derive(Deserialize)]
struct RawRetrieval {
    #[serde(default = "default_top_k")]
    top_k: usize,
    #[serde(default)]
    fanout: FanoutPolicy,
    #[serde(default = "default_short_timeout")]
    timeout_seconds: u64,
    #[serde(default)]
    articles: Option<RawArticles>,
    #[serde(default)]
    records: Option<RawRecords>,
}

impl Default for RawRetrieval {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            fanout: FanoutPolicy::default(),
            timeout_seconds: default_short_timeout(),
            articles: None,
            records: None,
        }
    }
}

#[derive(Deserialize)]
struct RawArticles {
    /// Defaults to `true`; set to `false` to disable without removing the section.
    #[serde(default = "default_true")]
    enabled: bool,
    endpoint: String,
    index: String,
    #[serde(default = "default_article_api_version")]
    api_version: String,
    #[serde(default = "default_vector_field")]
    vector_field: String,
    #[serde(default = "default_content_field")]
    content_field: String,
    #[serde(default = "default_name_field")]
    name_field: String,
}

#[derive(Deserialize)]
struct RawRecords {
    db_path: String,
}

#[derive(Deserialize)]
struct RawContext {
    #[serde(default = "default_max_evidence_chars")]
    max_evidence_chars: usize,
    #[serde(default = "default_max_prompt_chars")]
    max_prompt_chars: usize,
}

impl Default for RawContext {
    fn default() -> Self {
        Self {
            max_evidence_chars: default_max_evidence_chars(),
            max_prompt_chars: default_max_prompt_chars(),
        }
    }
}

fn default_bind() -> String { "127.0.0.1:8080".to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_embedding_provider() -> String { "none".to_string() }
fn default_embedding_api_base_url() -> String { "https://api.openai.com/v1/embeddings".to_string() }
fn default_embedding_model() -> String { "text-embedding-3-small".to_string() }
fn default_hashed_dimensions() -> usize { 256 }
fn default_llm_provider() -> String { "dummy".to_string() }
fn default_openai_api_base_url() -> String { "https://api.openai.com/v1/chat/completions".to_string() }
fn default_openai_model() -> String { "gpt-4o-mini".to_string() }
fn default_openai_temperature() -> f32 { 0.2 }
fn default_openai_timeout_seconds() -> u64 { 120 }
fn default_short_timeout() -> u64 { 30 }
fn default_top_k() -> usize { 5 }
fn default_article_api_version() -> String { "2023-11-01".to_string() }
fn default_vector_field() -> String { "contentVector".to_string() }
fn default_content_field() -> String { "content".to_string() }
fn default_name_field() -> String { "metadata_storage_name".to_string() }
fn default_max_evidence_chars() -> usize { 12_000 }
fn default_max_prompt_chars() -> usize { 24_000 }

fn default_true() -> bool {
    true
}

// ── Loading ───────────────────────────────────────────────────────────────────

/// Load config from `RAG_CONFIG` (or `config/default.toml`), then apply
/// env-var overrides.
pub fn load() -> Result<Config, AppError> {
    let path = env::var("RAG_CONFIG").unwrap_or_else(|_| "config/default.toml".to_string());
    load_from(Path::new(&path), &Overrides::from_env())
}

/// Loader with an explicit path and overrides.
/// Tests pass overrides directly instead of mutating env vars.
pub fn load_from(path: &Path, overrides: &Overrides) -> Result<Config, AppError> {
    let raw = fs::read_to_string(path)
        .map_err(|e| AppError::Config(format!("cannot read {}: {e}", path.display())))?;
    parse(&raw, overrides)
        .map_err(|e| AppError::Config(format!("{} in {}", e, path.display())))
}

/// Resolve a TOML document into a [`Config`].
pub fn parse(raw: &str, overrides: &Overrides) -> Result<Config, String> {
    let parsed: RawConfig = toml::from_str(raw).map_err(|e| format!("parse error: {e}"))?;

    if parsed.retrieval.top_k == 0 {
        return Err("retrieval.top_k must be > 0".to_string());
    }
    if parsed.embedding.hashed.dimensions == 0 {
        return Err("embedding.hashed.dimensions must be > 0".to_string());
    }
    if parsed.context.max_prompt_chars < parsed.context.max_evidence_chars {
        return Err("context.max_prompt_chars must be >= context.max_evidence_chars".to_string());
    }

    let log_level = overrides.log_level.clone().unwrap_or(parsed.server.log_level);
    crate::logger::parse_level(&log_level).map_err(|e| format!("server.log_level: {e}"))?;

    let retrieval_timeout = parsed.retrieval.timeout_seconds;
    let articles = parsed
        .retrieval
        .articles
        .filter(|a| a.enabled)
        .map(|a| ArticleSearchConfig {
            endpoint: a.endpoint.trim_end_matches('/').to_string(),
            index: a.index,
            api_version: a.api_version,
            vector_field: a.vector_field,
            content_field: a.content_field,
            name_field: a.name_field,
            timeout_seconds: retrieval_timeout,
        });

    Ok(Config {
        server: ServerConfig {
            bind: overrides.bind.clone().unwrap_or(parsed.server.bind),
            log_level,
        },
        embedding: EmbeddingConfig {
            provider: parsed.embedding.provider,
            openai: OpenAiEmbeddingConfig {
                api_base_url: parsed.embedding.openai.api_base_url,
                model: parsed.embedding.openai.model,
                timeout_seconds: parsed.embedding.openai.timeout_seconds,
            },
            hashed_dimensions: parsed.embedding.hashed.dimensions,
        },
        llm: LlmConfig {
            provider: parsed.llm.provider,
            openai: OpenAiConfig {
                api_base_url: parsed.llm.openai.api_base_url,
                model: parsed.llm.openai.model,
                temperature: parsed.llm.openai.temperature,
                timeout_seconds: parsed.llm.openai.timeout_seconds,
            },
        },
        retrieval: RetrievalConfig {
            top_k: parsed.retrieval.top_k,
            fanout: parsed.retrieval.fanout,
            timeout_seconds: retrieval_timeout,
            articles,
            records_db: parsed.retrieval.records.map(|r| expand_home(&r.db_path)),
        },
        context: ContextConfig {
            max_evidence_chars: parsed.context.max_evidence_chars,
            max_prompt_chars: parsed.context.max_prompt_chars,
        },
        llm_api_key: overrides.llm_api_key.clone(),
        embedding_api_key: overrides.embedding_api_key.clone(),
        article_search_api_key: overrides.article_search_api_key.clone(),
    })
}

/// Expand a leading `~` to the user's home directory.
/// Absolute or relative paths without `~` are returned unchanged.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const FULL_TOML: &str = r#"
[server]
bind = "0.0.0.0:9000"
log_level = "debug"

[embedding]
default = "hashed"
[embedding.hashed]
dimensions = 64

[llm]
default = "openai"
[llm.openai]
model = "gpt-4o"

[retrieval]
top_k = 3
fanout = "best_effort"
timeout_seconds = 5

[retrieval.articles]
endpoint = "https://search.example.net/"
index = "college-articles"

[retrieval.records]
db_path = "/var/lib/rag/records.db"

[context]
max_evidence_chars = 100
max_prompt_chars = 400
"#;

    fn write_toml(content: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn empty_document_uses_defaults() {
        let cfg = parse("", &Overrides::default()).unwrap();
        assert_eq!(cfg.server.bind, "127.0.0.1:8080");
        assert_eq!(cfg.embedding.provider, "none");
        assert_eq!(cfg.llm.provider, "dummy");
        assert_eq!(cfg.retrieval.top_k, 5);
        assert_eq!(cfg.retrieval.fanout, FanoutPolicy::AllOrNothing);
        assert!(cfg.retrieval.articles.is_none());
        assert!(cfg.retrieval.records_db.is_none());
    }

    #[test]
    fn parse_full_config() {
        let f = write_toml(FULL_TOML);
        let cfg = load_from(f.path(), &Overrides::default()).unwrap();
        assert_eq!(cfg.server.bind, "0.0.0.0:9000");
        assert_eq!(cfg.embedding.hashed_dimensions, 64);
        assert_eq!(cfg.llm.openai.model, "gpt-4o");
        assert_eq!(cfg.retrieval.fanout, FanoutPolicy::BestEffort);

        let articles = cfg.retrieval.articles.expect("articles configured");
        assert_eq!(articles.endpoint, "https://search.example.net");
        assert_eq!(articles.vector_field, "contentVector");
        assert_eq!(articles.timeout_seconds, 5);
        assert_eq!(cfg.retrieval.records_db, Some(PathBuf::from("/var/lib/rag/records.db")));
    }

    #[test]
    fn disabled_articles_section_is_dropped() {
        let toml = r#"
[retrieval.articles]
enabled = false
endpoint = "https://search.example.net"
index = "a"
"#;
        let cfg = parse(toml, &Overrides::default()).unwrap();
        assert!(cfg.retrieval.articles.is_none());
    }

    #[test]
    fn overrides_win_over_file() {
        let overrides = Overrides {
            bind: Some("127.0.0.1:1".into()),
            log_level: Some("trace".into()),
            llm_api_key: Some("sk-test".into()),
            ..Overrides::default()
        };
        let cfg = parse(FULL_TOML, &overrides).unwrap();
        assert_eq!(cfg.server.bind, "127.0.0.1:1");
        assert_eq!(cfg.server.log_level, "trace");
        assert_eq!(cfg.llm_api_key.as_deref(), Some("sk-test"));
        assert!(cfg.embedding_api_key.is_none());
    }

    #[test]
    fn zero_top_k_is_rejected() {
        let err = parse("[retrieval]\ntop_k = 0\n", &Overrides::default()).unwrap_err();
        assert!(err.contains("top_k"));
    }

    #[test]
    fn bad_log_level_is_rejected() {
        let err = parse("[server]\nlog_level = \"verbose\"\n", &Overrides::default()).unwrap_err();
        assert!(err.contains("server.log_level"));

        let overrides = Overrides { log_level: Some("loud".into()), ..Overrides::default() };
        assert!(parse("", &overrides).is_err());

        let f = write_toml("[server]\nlog_level = \"chatty\"\n");
        let err = load_from(f.path(), &Overrides::default()).unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn log_filter_directive_is_accepted() {
        let toml = "[server]\nlog_level = \"admissions_rag=debug,tower=warn\"\n";
        let cfg = parse(toml, &Overrides::default()).unwrap();
        assert_eq!(cfg.server.log_level, "admissions_rag=debug,tower=warn");
    }

    #[test]
    fn prompt_budget_smaller_than_evidence_budget_is_rejected() {
        let toml = "[context]\nmax_evidence_chars = 500\nmax_prompt_chars = 100\n";
        assert!(parse(toml, &Overrides::default()).is_err());
    }

    #[test]
    fn missing_file_errors() {
        let result = load_from(Path::new("/nonexistent/config.toml"), &Overrides::default());
        let msg = result.unwrap_err().to_string();
        assert!(msg.contains("config error"));
    }

    #[test]
    fn tilde_expands_to_home() {
        let home = dirs::home_dir().expect("home dir must exist in test env");
        let expanded = expand_home("~/.admissions-rag/records.db");
        assert!(expanded.starts_with(&home));
        assert!(expanded.ends_with("records.db"));
    }

    #[test]
    fn absolute_path_unchanged() {
        assert_eq!(expand_home("/absolute/path"), PathBuf::from("/absolute/path"));
    }
}
