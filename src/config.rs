//! TOML configuration.
//!
//! Every section and field has a default, so an empty file (or no file at
//! all) is a valid configuration. [`Config::validate`] runs before any work
//! starts and reports the first offending field as
//! [`Error::Configuration`].
//!
//! ```toml
//! [ingest]
//! include_globs = ["**/*.rs", "**/*.md"]
//! exclude_globs = ["**/fixtures/**"]
//! max_file_size = 1048576
//!
//! [chunking]
//! window_size = 750
//! overlap = 150
//!
//! [embedding]
//! strategy = "fallback"
//! dims = 256
//!
//! [retrieval]
//! k = 8
//! dedup_overlap = 0.5
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, Result};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    /// Empty means "match every file".
    #[serde(default)]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    #[serde(default = "default_max_files")]
    pub max_files: usize,
    /// Skip version-control, dependency, and build-output directories.
    #[serde(default = "default_true")]
    pub default_excludes: bool,
    /// Conventionally excluded directory names to walk anyway (e.g. `vendor`).
    #[serde(default)]
    pub reinclude_dirs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            include_globs: Vec::new(),
            exclude_globs: Vec::new(),
            max_file_size: default_max_file_size(),
            max_files: default_max_files(),
            default_excludes: true,
            reinclude_dirs: Vec::new(),
            follow_symlinks: false,
        }
    }
}

fn default_max_file_size() -> u64 {
    1024 * 1024
}
fn default_max_files() -> usize {
    500
}
fn default_true() -> bool {
    true
}

/// Window and overlap are measured in characters.
#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    #[serde(default = "default_overlap")]
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
            overlap: default_overlap(),
        }
    }
}

fn default_window_size() -> usize {
    750
}
fn default_overlap() -> usize {
    150
}

/// Which embedding scheme an index is built with.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingStrategy {
    /// External or in-process learned model.
    Model,
    /// Deterministic signed feature hashing; needs no model.
    #[default]
    Fallback,
}

impl std::fmt::Display for EmbeddingStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EmbeddingStrategy::Model => write!(f, "model"),
            EmbeddingStrategy::Fallback => write!(f, "fallback"),
        }
    }
}

/// Backend used by the model strategy.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ModelProvider {
    #[default]
    Ollama,
    Openai,
    Local,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub strategy: EmbeddingStrategy,
    #[serde(default)]
    pub provider: ModelProvider,
    #[serde(default)]
    pub model: Option<String>,
    /// Required for the fallback strategy's bucket count; optional for
    /// known models.
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Use the hash fallback when the model backend cannot be reached at
    /// selection time. Never applies once a build has started.
    #[serde(default = "default_true")]
    pub allow_fallback: bool,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            strategy: EmbeddingStrategy::Fallback,
            provider: ModelProvider::Ollama,
            model: None,
            dims: None,
            url: None,
            api_key_env: default_api_key_env(),
            batch_size: default_batch_size(),
            workers: default_workers(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            allow_fallback: true,
        }
    }
}

/// Dimensionality of the fallback strategy when `dims` is not set.
///
/// No model in [`known_model_dims`](crate::embedding::known_model_dims)
/// produces vectors of this size.
pub const DEFAULT_FALLBACK_DIMS: usize = 256;

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_workers() -> usize {
    4
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    1
}

impl EmbeddingConfig {
    pub fn is_model(&self) -> bool {
        self.strategy == EmbeddingStrategy::Model
    }

    /// Dimensionality for the fallback strategy.
    pub fn fallback_dims(&self) -> usize {
        self.dims.unwrap_or(DEFAULT_FALLBACK_DIMS)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_k")]
    pub k: i64,
    /// Two results from one file whose ranges overlap by more than this
    /// fraction of the shorter range are treated as duplicates.
    #[serde(default = "default_dedup_overlap")]
    pub dedup_overlap: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k: default_k(),
            dedup_overlap: default_dedup_overlap(),
        }
    }
}

fn default_k() -> i64 {
    8
}
fn default_dedup_overlap() -> f64 {
    0.5
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Config {
    /// Reject invalid values before any ingestion work starts.
    ///
    /// Glob syntax is checked by [`FileSelector::new`](crate::select::FileSelector::new).
    pub fn validate(&self) -> Result<()> {
        if self.chunking.window_size == 0 {
            return Err(Error::config("chunking.window_size", "must be > 0"));
        }
        if self.chunking.overlap >= self.chunking.window_size {
            return Err(Error::config(
                "chunking.overlap",
                format!(
                    "overlap ({}) must be smaller than window_size ({})",
                    self.chunking.overlap, self.chunking.window_size
                ),
            ));
        }

        if self.ingest.max_files == 0 {
            return Err(Error::config("ingest.max_files", "must be > 0"));
        }

        let emb = &self.embedding;
        if emb.dims == Some(0) {
            return Err(Error::config("embedding.dims", "must be > 0"));
        }
        if emb.batch_size == 0 {
            return Err(Error::config("embedding.batch_size", "must be > 0"));
        }
        if emb.workers == 0 {
            return Err(Error::config("embedding.workers", "must be > 0"));
        }
        if emb.timeout_secs == 0 {
            return Err(Error::config("embedding.timeout_secs", "must be > 0"));
        }
        if emb.max_retries > 1 {
            return Err(Error::config(
                "embedding.max_retries",
                format!("at most one retry is allowed, got {}", emb.max_retries),
            ));
        }
        if emb.is_model() && emb.provider != ModelProvider::Local && emb.model.is_none() {
            return Err(Error::config(
                "embedding.model",
                "a model name is required when strategy is 'model'",
            ));
        }

        if self.retrieval.k < 1 {
            return Err(Error::config(
                "retrieval.k",
                format!("must be >= 1, got {}", self.retrieval.k),
            ));
        }
        if !(0.0..=1.0).contains(&self.retrieval.dedup_overlap) {
            return Err(Error::config(
                "retrieval.dedup_overlap",
                "must be in [0.0, 1.0]",
            ));
        }

        Ok(())
    }
}

/// Parse and validate a configuration document.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config =
        toml::from_str(content).map_err(|e| Error::config("config", e.to_string()))?;
    config.validate()?;
    Ok(config)
}

/// Load a configuration file, or the defaults when `path` is `None`.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let Some(path) = path else {
        return Ok(Config::default());
    };
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::config(
            "config",
            format!("failed to read config file {}: {}", path.display(), e),
        )
    })?;
    parse_config(&content)
}
