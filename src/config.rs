//! TOML configuration parsing and validation.
//!
//! Every section except `[corpus]`, `[index]`, and `[server]` has defaults,
//! so a minimal config only needs to name the corpus directory, the index
//! location, and the bind address. API keys are never read from the file;
//! providers take them from the environment.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tutor_rag_core::chunk::ChunkParams;
use tutor_rag_core::session::SessionPolicy;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub corpus: CorpusConfig,
    pub index: IndexConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CorpusConfig {
    pub dir: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    /// Create the directory with sample documents when it does not exist.
    #[serde(default = "default_true")]
    pub seed_samples: bool,
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.txt".to_string()]
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// Directory holding the persisted index.
    pub path: PathBuf,
    /// Age after which an abandoned build marker may be reclaimed even if
    /// its owner cannot be checked.
    #[serde(default = "default_stale_build_secs")]
    pub stale_build_secs: u64,
}

fn default_stale_build_secs() -> u64 {
    3600
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    200
}

impl ChunkingConfig {
    pub fn params(&self) -> Result<ChunkParams> {
        Ok(ChunkParams::new(self.chunk_size, self.chunk_overlap)?)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Number of chunks retrieved per question.
    #[serde(default = "default_k")]
    pub k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self { k: default_k() }
    }
}

fn default_k() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for Ollama (default `http://localhost:11434`).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embed_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_embed_timeout_secs(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

/// How a follow-up question is turned into a standalone retrieval query.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CondenseMode {
    /// Ask the generative model to rephrase the question.
    Model,
    /// Prepend the rendered history to the question; no model call.
    Template,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default = "default_generation_model")]
    pub model: String,
    /// Base URL override (Gemini, Ollama, or an OpenAI-compatible server).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    #[serde(default = "default_condense")]
    pub condense: CondenseMode,
    /// Cached condensed queries; 0 disables the cache.
    #[serde(default = "default_condense_cache_capacity")]
    pub condense_cache_capacity: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            model: default_generation_model(),
            url: None,
            temperature: default_temperature(),
            max_output_tokens: default_max_output_tokens(),
            max_retries: default_max_retries(),
            timeout_secs: default_generation_timeout_secs(),
            backoff_ms: default_backoff_ms(),
            condense: default_condense(),
            condense_cache_capacity: default_condense_cache_capacity(),
        }
    }
}

fn default_disabled() -> String {
    "disabled".to_string()
}
fn default_generation_model() -> String {
    "gemini-2.5-flash".to_string()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_output_tokens() -> u32 {
    1024
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    3
}
fn default_embed_timeout_secs() -> u64 {
    30
}
fn default_generation_timeout_secs() -> u64 {
    60
}
fn default_backoff_ms() -> u64 {
    1000
}
fn default_condense() -> CondenseMode {
    CondenseMode::Model
}
fn default_condense_cache_capacity() -> usize {
    256
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionsConfig {
    #[serde(default = "default_session_capacity")]
    pub capacity: usize,
    /// Idle time after which a session is discarded; 0 disables expiry.
    #[serde(default = "default_idle_ttl_secs")]
    pub idle_ttl_secs: u64,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            capacity: default_session_capacity(),
            idle_ttl_secs: default_idle_ttl_secs(),
        }
    }
}

fn default_session_capacity() -> usize {
    1024
}
fn default_idle_ttl_secs() -> u64 {
    3600
}

impl SessionsConfig {
    pub fn policy(&self) -> SessionPolicy {
        SessionPolicy {
            capacity: self.capacity,
            idle_ttl: (self.idle_ttl_secs > 0).then(|| Duration::from_secs(self.idle_ttl_secs)),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate a config from TOML text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    // Validate chunking
    if config.chunking.chunk_size == 0 {
        bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.chunk_overlap >= config.chunking.chunk_size {
        bail!(
            "chunking.chunk_overlap ({}) must be smaller than chunking.chunk_size ({})",
            config.chunking.chunk_overlap,
            config.chunking.chunk_size
        );
    }

    // Validate retrieval
    if config.retrieval.k < 1 {
        bail!("retrieval.k must be >= 1");
    }

    // Validate sessions
    if config.sessions.capacity < 1 {
        bail!("sessions.capacity must be >= 1");
    }

    // Validate embedding
    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "local" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }
    if config.embedding.is_enabled() && config.embedding.provider != "local" {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }
    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }
    validate_upstream(
        "embedding",
        config.embedding.max_retries,
        config.embedding.timeout_secs,
        config.embedding.backoff_ms,
    )?;

    // Validate generation
    match config.generation.provider.as_str() {
        "disabled" | "gemini" | "ollama" | "openai" => {}
        other => bail!(
            "Unknown generation provider: '{}'. Must be disabled, gemini, ollama, or openai.",
            other
        ),
    }
    if !(0.0..=2.0).contains(&config.generation.temperature) {
        bail!("generation.temperature must be in [0.0, 2.0]");
    }
    validate_upstream(
        "generation",
        config.generation.max_retries,
        config.generation.timeout_secs,
        config.generation.backoff_ms,
    )?;

    Ok(())
}

const MAX_RETRIES: u32 = 10;
const MAX_TIMEOUT_SECS: u64 = 3600;
const MAX_BACKOFF_MS: u64 = 60_000;

fn validate_upstream(
    section: &str,
    max_retries: u32,
    timeout_secs: u64,
    backoff_ms: u64,
) -> Result<()> {
    if max_retries > MAX_RETRIES {
        bail!("{}.max_retries must be <= {}", section, MAX_RETRIES);
    }
    if timeout_secs == 0 || timeout_secs > MAX_TIMEOUT_SECS {
        bail!("{}.timeout_secs must be in [1, {}]", section, MAX_TIMEOUT_SECS);
    }
    if backoff_ms > MAX_BACKOFF_MS {
        bail!("{}.backoff_ms must be <= {}", section, MAX_BACKOFF_MS);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[corpus]
dir = "./data"

[index]
path = "./index"

[server]
bind = "127.0.0.1:8000"
"#;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = parse_config(MINIMAL).unwrap();
        assert_eq!(config.chunking.chunk_size, 1000);
        assert_eq!(config.chunking.chunk_overlap, 200);
        assert_eq!(config.retrieval.k, 3);
        assert_eq!(config.corpus.include_globs, vec!["**/*.txt"]);
        assert!(config.corpus.seed_samples);
        assert_eq!(config.generation.model, "gemini-2.5-flash");
        assert_eq!(config.generation.condense, CondenseMode::Model);
        assert!(!config.embedding.is_enabled());
        assert_eq!(
            config.sessions.policy().idle_ttl,
            Some(Duration::from_secs(3600))
        );
    }

    #[test]
    fn test_overlap_must_be_smaller_than_size() {
        let toml = format!("{}\n[chunking]\nchunk_size = 100\nchunk_overlap = 100\n", MINIMAL);
        let err = parse_config(&toml).unwrap_err();
        assert!(err.to_string().contains("chunk_overlap"));
    }

    #[test]
    fn test_k_must_be_positive() {
        let toml = format!("{}\n[retrieval]\nk = 0\n", MINIMAL);
        assert!(parse_config(&toml).is_err());
    }

    #[test]
    fn test_unknown_providers_rejected() {
        let toml = format!("{}\n[generation]\nprovider = \"bard\"\n", MINIMAL);
        assert!(parse_config(&toml).is_err());

        let toml = format!("{}\n[embedding]\nprovider = \"word2vec\"\n", MINIMAL);
        assert!(parse_config(&toml).is_err());
    }

    #[test]
    fn test_remote_embedding_requires_model_and_dims() {
        let toml = format!("{}\n[embedding]\nprovider = \"ollama\"\n", MINIMAL);
        assert!(parse_config(&toml).is_err());

        let toml = format!(
            "{}\n[embedding]\nprovider = \"ollama\"\nmodel = \"nomic-embed-text\"\ndims = 768\n",
            MINIMAL
        );
        assert!(parse_config(&toml).is_ok());
    }

    #[test]
    fn test_upstream_budgets_are_bounded() {
        let toml = format!("{}\n[generation]\nmax_retries = 4294967295\n", MINIMAL);
        let err = parse_config(&toml).unwrap_err();
        assert!(err.to_string().contains("generation.max_retries"));

        let toml = format!("{}\n[embedding]\nbackoff_ms = 9223372036854775807\n", MINIMAL);
        let err = parse_config(&toml).unwrap_err();
        assert!(err.to_string().contains("embedding.backoff_ms"));

        let toml = format!("{}\n[embedding]\ntimeout_secs = 0\n", MINIMAL);
        let err = parse_config(&toml).unwrap_err();
        assert!(err.to_string().contains("embedding.timeout_secs"));
    }

    #[test]
    fn test_zero_ttl_disables_expiry() {
        let toml = format!("{}\n[sessions]\nidle_ttl_secs = 0\n", MINIMAL);
        let config = parse_config(&toml).unwrap();
        assert_eq!(config.sessions.policy().idle_ttl, None);
    }

    #[test]
    fn test_template_condense_mode() {
        let toml = format!("{}\n[generation]\ncondense = \"template\"\n", MINIMAL);
        let config = parse_config(&toml).unwrap();
        assert_eq!(config.generation.condense, CondenseMode::Template);
    }
}
