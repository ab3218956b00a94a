//! In-process sentence embeddings through fastembed.
//!
//! The model is loaded once, on a blocking thread, and shared behind a
//! mutex. Inference also runs on the blocking pool and is bounded by the
//! configured timeout.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{check_vectors, known_model_dims, Embedder, EmbedderIdentity};
use crate::config::{EmbeddingConfig, EmbeddingStrategy};
use crate::error::{Error, Result};
use crate::models::EmbeddingVector;

const DEFAULT_LOCAL_MODEL: &str = "all-minilm-l6-v2";

pub struct LocalEmbedder {
    identity: EmbedderIdentity,
    model: Arc<Mutex<fastembed::TextEmbedding>>,
    batch_size: usize,
    timeout: Duration,
}

impl LocalEmbedder {
    pub async fn load(config: &EmbeddingConfig) -> Result<Self> {
        let name = config
            .model
            .clone()
            .unwrap_or_else(|| DEFAULT_LOCAL_MODEL.to_string());
        let kind = fastembed_model(&name)?;
        let dims = known_model_dims(&name)
            .ok_or_else(|| Error::backend(format!("unknown dimensionality for {}", name)))?;
        if let Some(configured) = config.dims {
            if configured != dims {
                return Err(Error::config(
                    "embedding.dims",
                    format!("{} produces {} dimensions, not {}", name, dims, configured),
                ));
            }
        }

        let model = tokio::task::spawn_blocking(move || {
            fastembed::TextEmbedding::try_new(
                fastembed::InitOptions::new(kind).with_show_download_progress(false),
            )
        })
        .await
        .map_err(|e| Error::backend(format!("model loader panicked: {}", e)))?
        .map_err(|e| Error::backend(format!("failed to initialize local model: {}", e)))?;

        Ok(Self {
            identity: EmbedderIdentity::new(EmbeddingStrategy::Model, name, dims),
            model: Arc::new(Mutex::new(model)),
            batch_size: config.batch_size,
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }
}

#[async_trait]
impl Embedder for LocalEmbedder {
    fn identity(&self) -> &EmbedderIdentity {
        &self.identity
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<EmbeddingVector>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let model = Arc::clone(&self.model);
        let batch_size = self.batch_size;
        let owned = texts.to_vec();

        let task = tokio::task::spawn_blocking(move || {
            let mut model = model
                .lock()
                .map_err(|_| Error::backend("local model lock poisoned"))?;
            model
                .embed(owned, Some(batch_size))
                .map_err(|e| Error::backend(format!("local embedding failed: {}", e)))
        });

        let raw = tokio::time::timeout(self.timeout, task)
            .await
            .map_err(|_| Error::backend("local embedding timed out"))?
            .map_err(|e| Error::backend(format!("embedding task panicked: {}", e)))??;

        check_vectors(&self.identity, texts.len(), raw)
    }
}

fn fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel> {
    match name {
        "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        "bge-large-en-v1.5" => Ok(fastembed::EmbeddingModel::BGELargeENV15),
        "nomic-embed-text-v1" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV1),
        "nomic-embed-text-v1.5" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV15),
        "multilingual-e5-small" => Ok(fastembed::EmbeddingModel::MultilingualE5Small),
        "multilingual-e5-base" => Ok(fastembed::EmbeddingModel::MultilingualE5Base),
        "multilingual-e5-large" => Ok(fastembed::EmbeddingModel::MultilingualE5Large),
        other => Err(Error::config(
            "embedding.model",
            format!(
                "unknown local model '{}'; supported: all-minilm-l6-v2, bge-small-en-v1.5, \
                 bge-base-en-v1.5, bge-large-en-v1.5, nomic-embed-text-v1, \
                 nomic-embed-text-v1.5, multilingual-e5-small, multilingual-e5-base, \
                 multilingual-e5-large",
                other
            ),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_model_is_configuration_error() {
        assert!(matches!(
            fastembed_model("gpt-embed-9000"),
            Err(Error::Configuration { .. })
        ));
        assert!(fastembed_model("bge-small-en-v1.5").is_ok());
    }
}
