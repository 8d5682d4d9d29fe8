use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub llm: LlmConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    pub index: IndexConfig,
    #[serde(default)]
    pub documents: DocumentsConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub transcript: Option<TranscriptConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    /// Base URL of the chat-completions API (e.g. `https://api.openai.com/v1`).
    pub base_url: String,
    pub model: String,
    #[serde(default)]
    pub temperature: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_openai_key_env")]
    pub api_key_env: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_base_url")]
    pub base_url: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_openai_key_env")]
    pub api_key_env: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: default_embedding_base_url(),
            model: default_embedding_model(),
            api_key_env: default_openai_key_env(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// Query endpoint of the external vector index.
    pub url: String,
    #[serde(default = "default_index_key_env")]
    pub api_key_env: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DocumentsConfig {
    /// Base URL of the document store API.
    #[serde(default = "default_documents_base_url")]
    pub base_url: String,
}

impl Default for DocumentsConfig {
    fn default() -> Self {
        Self {
            base_url: default_documents_base_url(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_chars")]
    pub chunk_chars: usize,
    #[serde(default = "default_overlap_chars")]
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_chars: default_chunk_chars(),
            overlap_chars: default_overlap_chars(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Soft minimum number of accessible documents to gather.
    #[serde(default = "default_min_documents")]
    pub min_documents: usize,
    /// Number of fresh matches to poll for per iteration.
    #[serde(default = "default_poll_size")]
    pub poll_size: usize,
    #[serde(default = "default_max_tries")]
    pub max_tries: u32,
    /// Separator inserted between accumulated chunks.
    #[serde(default = "default_separator")]
    pub separator: String,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            min_documents: default_min_documents(),
            poll_size: default_poll_size(),
            max_tries: default_max_tries(),
            separator: default_separator(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DispatchConfig {
    /// Average number of outbound requests allowed per minute.
    #[serde(default = "default_average_rate_limit")]
    pub average_rate_limit: f64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Initial retry backoff; doubles on each failed attempt.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Per-call timeout for every outbound request.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            average_rate_limit: default_average_rate_limit(),
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct TranscriptConfig {
    /// Directory where per-exchange transcript records are written.
    pub dir: PathBuf,
}

fn default_max_tokens() -> u32 {
    400
}
fn default_openai_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_embedding_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_embedding_model() -> String {
    "text-embedding-ada-002".to_string()
}
fn default_index_key_env() -> String {
    "VECTOR_INDEX_API_KEY".to_string()
}
fn default_documents_base_url() -> String {
    "https://graph.microsoft.com/v1.0".to_string()
}
fn default_chunk_chars() -> usize {
    1000
}
fn default_overlap_chars() -> usize {
    200
}
fn default_min_documents() -> usize {
    2
}
fn default_poll_size() -> usize {
    2
}
fn default_max_tries() -> u32 {
    3
}
fn default_separator() -> String {
    " -- ".to_string()
}
fn default_average_rate_limit() -> f64 {
    60.0
}
fn default_max_retries() -> u32 {
    5
}
fn default_backoff_base_ms() -> u64 {
    1000
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_bind() -> String {
    "127.0.0.1:7400".to_string()
}

/// Read an API key from the environment variable named in config.
/// Missing keys are not an error here; clients decide whether they need one.
pub fn api_key_from_env(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|v| !v.is_empty())
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.chunk_chars == 0 {
        anyhow::bail!("chunking.chunk_chars must be > 0");
    }
    if config.chunking.overlap_chars >= config.chunking.chunk_chars {
        anyhow::bail!("chunking.overlap_chars must be smaller than chunking.chunk_chars");
    }

    if config.retrieval.poll_size == 0 {
        anyhow::bail!("retrieval.poll_size must be > 0");
    }
    if config.retrieval.max_tries == 0 {
        anyhow::bail!("retrieval.max_tries must be >= 1");
    }

    if config.dispatch.average_rate_limit <= 0.0 {
        anyhow::bail!("dispatch.average_rate_limit must be > 0");
    }
    if config.dispatch.timeout_secs == 0 {
        anyhow::bail!("dispatch.timeout_secs must be > 0");
    }

    if config.llm.base_url.is_empty() {
        anyhow::bail!("llm.base_url must not be empty");
    }
    if config.index.url.is_empty() {
        anyhow::bail!("index.url must not be empty");
    }

    Ok(())
}
