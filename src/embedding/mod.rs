//! Embedding strategies.
//!
//! Defines the [`Embedder`] trait and its implementations:
//! - **[`HashEmbedder`]**: deterministic signed feature hashing; the fallback
//!   strategy, needs no model and no network.
//! - **[`RemoteEmbedder`]**: calls an Ollama `/api/embed` or OpenAI
//!   `/v1/embeddings` endpoint with a timeout and bounded retries.
//! - **`LocalEmbedder`**: in-process sentence-embedding model through
//!   fastembed (feature `local-embeddings-fastembed`).
//!
//! # Strategy Selection
//!
//! [`create_embedder`] picks the strategy once, from configuration. For the
//! model strategy it sends a probe request, which both checks that the
//! backend is reachable and learns the dimensionality of unknown models.
//! If the probe fails and `allow_fallback` is set, the hash fallback is
//! used for the whole build instead. After selection there is no switch:
//! a failing backend mid-build is an [`Error::EmbeddingBackend`].
//!
//! Every embedder carries an [`EmbedderIdentity`]; the vector index stores
//! it, so vectors from different strategies never meet in one index.

mod hash;
#[cfg(feature = "local-embeddings-fastembed")]
mod local;
mod remote;

pub use hash::{tokenize, HashEmbedder, FALLBACK_MODEL};
#[cfg(feature = "local-embeddings-fastembed")]
pub use local::LocalEmbedder;
pub use remote::RemoteEmbedder;

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::{EmbeddingConfig, EmbeddingStrategy, ModelProvider};
use crate::error::{Error, Result};
use crate::models::EmbeddingVector;

/// What produced a vector: strategy, model, and dimensionality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct EmbedderIdentity {
    pub strategy: EmbeddingStrategy,
    pub model: String,
    pub dims: usize,
}

impl EmbedderIdentity {
    pub fn new(strategy: EmbeddingStrategy, model: impl Into<String>, dims: usize) -> Self {
        Self {
            strategy,
            model: model.into(),
            dims,
        }
    }
}

impl std::fmt::Display for EmbedderIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{} ({}d)", self.strategy, self.model, self.dims)
    }
}

/// Maps text to fixed-length vectors.
///
/// `embed_batch` exists for throughput only; its output must equal calling
/// [`embed`](Embedder::embed) on each text in turn.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn identity(&self) -> &EmbedderIdentity;

    fn dims(&self) -> usize {
        self.identity().dims
    }

    /// Embed `texts`, returning one vector per input in the same order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<EmbeddingVector>>;

    async fn embed(&self, text: &str) -> Result<EmbeddingVector> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| Error::backend("empty embedding response"))
    }
}

/// Build the embedder described by `config`.
pub async fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    let embedder: Arc<dyn Embedder> = match config.strategy {
        EmbeddingStrategy::Fallback => Arc::new(HashEmbedder::new(config.fallback_dims())?),
        EmbeddingStrategy::Model => match create_model_embedder(config).await {
            Ok(embedder) => embedder,
            Err(err) if config.allow_fallback => {
                warn!(error = %err, "embedding model unavailable, using hash fallback");
                Arc::new(HashEmbedder::new(config.fallback_dims())?)
            }
            Err(err) => return Err(err),
        },
    };
    info!(embedder = %embedder.identity(), "embedding strategy selected");
    Ok(embedder)
}

async fn create_model_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider {
        ModelProvider::Ollama => Ok(Arc::new(RemoteEmbedder::connect(config, None).await?)),
        ModelProvider::Openai => {
            let key = std::env::var(&config.api_key_env).map_err(|_| {
                Error::backend(format!(
                    "{} environment variable not set",
                    config.api_key_env
                ))
            })?;
            Ok(Arc::new(RemoteEmbedder::connect(config, Some(key)).await?))
        }
        #[cfg(feature = "local-embeddings-fastembed")]
        ModelProvider::Local => Ok(Arc::new(LocalEmbedder::load(config).await?)),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        ModelProvider::Local => Err(Error::backend(
            "local embedding provider requires --features local-embeddings-fastembed",
        )),
    }
}

/// Dimensionality of well-known embedding models.
pub fn known_model_dims(model: &str) -> Option<usize> {
    let dims = match model {
        "all-minilm-l6-v2" | "sentence-transformers/all-MiniLM-L6-v2" | "all-minilm" => 384,
        "bge-small-en-v1.5" | "multilingual-e5-small" => 384,
        "bge-base-en-v1.5" | "multilingual-e5-base" => 768,
        "nomic-embed-text" | "nomic-embed-text-v1" | "nomic-embed-text-v1.5" => 768,
        "bge-large-en-v1.5" | "multilingual-e5-large" | "mxbai-embed-large" => 1024,
        "text-embedding-3-small" | "text-embedding-ada-002" => 1536,
        "text-embedding-3-large" => 3072,
        _ => return None,
    };
    Some(dims)
}

/// Validate a backend response: one vector per input, each of `dims` length.
pub(crate) fn check_vectors(
    identity: &EmbedderIdentity,
    inputs: usize,
    raw: Vec<Vec<f32>>,
) -> Result<Vec<EmbeddingVector>> {
    if raw.len() != inputs {
        return Err(Error::backend(format!(
            "{} returned {} vectors for {} inputs",
            identity.model,
            raw.len(),
            inputs
        )));
    }
    raw.into_iter()
        .map(|v| {
            if v.len() != identity.dims {
                Err(Error::backend(format!(
                    "{} returned a {}-dimensional vector, expected {}",
                    identity.model,
                    v.len(),
                    identity.dims
                )))
            } else {
                Ok(EmbeddingVector::new(v))
            }
        })
        .collect()
}

/// Cosine similarity of two vectors.
///
/// Returns a value in `[-1.0, 1.0]`, and `0.0` for empty vectors, vectors
/// of different lengths, or when either vector is zero.
///
/// ```text
///            a · b
/// cos(θ) = ─────────
///          ‖a‖ × ‖b‖
/// ```
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}
