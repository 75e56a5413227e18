use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Result, RetrievalError};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub source: SourceConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Maximum chunk length in bytes of normalized text. Cut points snap
    /// back to UTF-8 char boundaries, so multibyte documents may produce
    /// chunks slightly under this size, never over it.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Bytes of text shared between adjacent chunks, also
    /// boundary-snapped.
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

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_url")]
    pub url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            model: default_model(),
            dims: default_dims(),
            batch_size: default_batch_size(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_model() -> String {
    "nomic-embed-text".to_string()
}
fn default_dims() -> usize {
    384
}
fn default_batch_size() -> usize {
    32
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Weight of the semantic score in the fused result:
    /// `hybrid = w * semantic + (1 - w) * keyword`.
    #[serde(default = "default_hybrid_weight")]
    pub hybrid_weight: f64,
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,
    /// Neighbor chunks fetched on each side in context mode.
    #[serde(default = "default_context_window")]
    pub context_window: u32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            hybrid_weight: default_hybrid_weight(),
            default_top_k: default_top_k(),
            context_window: default_context_window(),
        }
    }
}

fn default_hybrid_weight() -> f64 {
    0.7
}
fn default_top_k() -> usize {
    5
}
fn default_context_window() -> u32 {
    1
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            snapshot_path: default_snapshot_path(),
        }
    }
}

fn default_snapshot_path() -> PathBuf {
    PathBuf::from("data/ragstore.snapshot")
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
        }
    }
}

fn default_include_globs() -> Vec<String> {
    vec![
        "**/*.md".to_string(),
        "**/*.txt".to_string(),
        "**/*.json".to_string(),
    ]
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| RetrievalError::Config {
        reason: format!("failed to read {}: {}", path.display(), e),
    })?;

    let config: Config = toml::from_str(&content).map_err(|e| RetrievalError::Config {
        reason: format!("failed to parse {}: {}", path.display(), e),
    })?;

    config.validate()?;
    Ok(config)
}

impl Config {
    /// Validate once at construction; nothing is re-checked ad hoc later.
    pub fn validate(&self) -> Result<()> {
        if self.chunking.chunk_size == 0 {
            return Err(invalid("chunking.chunk_size must be > 0"));
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            return Err(invalid(
                "chunking.chunk_overlap must be smaller than chunking.chunk_size",
            ));
        }
        if !(0.0..=1.0).contains(&self.retrieval.hybrid_weight) {
            return Err(invalid("retrieval.hybrid_weight must be in [0.0, 1.0]"));
        }
        if self.retrieval.default_top_k == 0 {
            return Err(invalid("retrieval.default_top_k must be >= 1"));
        }
        if self.embedding.dims == 0 {
            return Err(invalid("embedding.dims must be > 0"));
        }
        if self.embedding.batch_size == 0 {
            return Err(invalid("embedding.batch_size must be > 0"));
        }
        Ok(())
    }
}

fn invalid(reason: &str) -> RetrievalError {
    RetrievalError::Config {
        reason: reason.to_string(),
    }
}
