//! HTTP embedding backends (Ollama and OpenAI).
//!
//! Each request is bounded by the configured timeout. Transient failures
//! (HTTP 429, 5xx, connection errors, timeouts) are retried `max_retries` times (default 1) after
//! a fixed backoff; client errors fail immediately.

use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};

use super::{check_vectors, known_model_dims, Embedder, EmbedderIdentity};
use crate::config::{EmbeddingConfig, EmbeddingStrategy, ModelProvider};
use crate::error::{Error, Result};
use crate::models::EmbeddingVector;

const RETRY_BACKOFF: Duration = Duration::from_secs(1);
const OLLAMA_DEFAULT_URL: &str = "http://localhost:11434";
const OPENAI_DEFAULT_URL: &str = "https://api.openai.com";
const PROBE_TEXT: &str = "dimension probe";

pub struct RemoteEmbedder {
    identity: EmbedderIdentity,
    provider: ModelProvider,
    endpoint: String,
    api_key: Option<String>,
    client: reqwest::Client,
    max_retries: u32,
}

impl std::fmt::Debug for RemoteEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteEmbedder")
            .field("identity", &self.identity)
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl RemoteEmbedder {
    /// Build the client and send a probe request.
    ///
    /// The probe confirms the backend answers and, when the model's
    /// dimensionality is neither configured nor known, determines it.
    pub async fn connect(config: &EmbeddingConfig, api_key: Option<String>) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| Error::config("embedding.model", "required for the model strategy"))?;
        let (endpoint, api_key) = match config.provider {
            ModelProvider::Ollama => {
                let base = config.url.as_deref().unwrap_or(OLLAMA_DEFAULT_URL);
                (format!("{}/api/embed", base.trim_end_matches('/')), None)
            }
            ModelProvider::Openai => {
                let base = config.url.as_deref().unwrap_or(OPENAI_DEFAULT_URL);
                let key = api_key
                    .ok_or_else(|| Error::backend("an API key is required for OpenAI"))?;
                (format!("{}/v1/embeddings", base.trim_end_matches('/')), Some(key))
            }
            ModelProvider::Local => {
                return Err(Error::config(
                    "embedding.provider",
                    "the local provider is not an HTTP backend",
                ))
            }
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::backend(format!("failed to build HTTP client: {}", e)))?;

        let mut embedder = Self {
            identity: EmbedderIdentity::new(EmbeddingStrategy::Model, model, 0),
            provider: config.provider,
            endpoint,
            api_key,
            client,
            max_retries: config.max_retries,
        };

        let probe = embedder.request(&[PROBE_TEXT.to_string()]).await?;
        let probed = probe
            .first()
            .map(|v| v.len())
            .ok_or_else(|| Error::backend("probe returned no vectors"))?;
        let expected = config
            .dims
            .or_else(|| known_model_dims(&embedder.identity.model))
            .unwrap_or(probed);
        if probed != expected {
            return Err(Error::backend(format!(
                "model {} returned {}-dimensional vectors, expected {}",
                embedder.identity.model, probed, expected
            )));
        }
        embedder.identity.dims = expected;
        debug!(embedder = %embedder.identity, endpoint = %embedder.endpoint, "embedding backend ready");
        Ok(embedder)
    }

    async fn request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.identity.model,
            "input": texts,
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                tokio::time::sleep(RETRY_BACKOFF).await;
            }

            let mut request = self.client.post(&self.endpoint).json(&body);
            if let Some(key) = &self.api_key {
                request = request.bearer_auth(key);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await.map_err(|e| {
                            Error::backend(format!("invalid response body: {}", e))
                        })?;
                        return match self.provider {
                            ModelProvider::Openai => parse_openai_response(&json),
                            _ => parse_ollama_response(&json),
                        };
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    let err = Error::backend(format!(
                        "{} returned {}: {}",
                        self.endpoint, status, body_text
                    ));
                    if status.as_u16() == 429 || status.is_server_error() {
                        warn!(attempt, status = %status, "transient embedding backend error");
                        last_err = Some(err);
                        continue;
                    }
                    return Err(err);
                }
                Err(e) => {
                    warn!(attempt, error = %e, "embedding backend unreachable");
                    last_err = Some(Error::backend(format!(
                        "request to {} failed: {}",
                        self.endpoint, e
                    )));
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| Error::backend("embedding failed after retries")))
    }
}

#[async_trait]
impl Embedder for RemoteEmbedder {
    fn identity(&self) -> &EmbedderIdentity {
        &self.identity
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<EmbeddingVector>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let raw = self.request(texts).await?;
        check_vectors(&self.identity, texts.len(), raw)
    }
}

fn parse_vector(value: &serde_json::Value) -> Result<Vec<f32>> {
    value
        .as_array()
        .ok_or_else(|| Error::backend("embedding is not an array"))?
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| Error::backend("embedding contains a non-numeric value"))
        })
        .collect()
}

/// Extract `embeddings[]` from an Ollama `/api/embed` response.
fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    json.get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| Error::backend("invalid Ollama response: missing embeddings array"))?
        .iter()
        .map(parse_vector)
        .collect()
}

/// Extract `data[].embedding` from an OpenAI response, in input order.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| Error::backend("invalid OpenAI response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);
        let embedding = item
            .get("embedding")
            .ok_or_else(|| Error::backend("invalid OpenAI response: missing embedding"))?;
        indexed.push((index, parse_vector(embedding)?));
    }
    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve canned HTTP responses, one per connection, in order.
    async fn mock_server(responses: Vec<(u16, String)>) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        tokio::spawn(async move {
            for (status, body) in responses {
                let (mut socket, _) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(_) => return,
                };
                counter.fetch_add(1, Ordering::SeqCst);
                let mut buf = vec![0u8; 64 * 1024];
                let mut read = 0;
                loop {
                    let n = socket.read(&mut buf[read..]).await.unwrap_or(0);
                    if n == 0 {
                        break;
                    }
                    read += n;
                    let text = String::from_utf8_lossy(&buf[..read]);
                    if let Some(head_end) = text.find("\r\n\r\n") {
                        let length = text[..head_end]
                            .lines()
                            .find_map(|l| {
                                let lower = l.to_ascii_lowercase();
                                lower
                                    .strip_prefix("content-length:")
                                    .map(|v| v.trim().parse::<usize>().unwrap_or(0))
                            })
                            .unwrap_or(0);
                        if read >= head_end + 4 + length {
                            break;
                        }
                    }
                }
                let reply = format!(
                    "HTTP/1.1 {} X\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = socket.write_all(reply.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });
        (format!("http://{}", addr), hits)
    }

    fn ollama_config(url: String) -> EmbeddingConfig {
        EmbeddingConfig {
            strategy: EmbeddingStrategy::Model,
            provider: ModelProvider::Ollama,
            model: Some("tiny-model".to_string()),
            url: Some(url),
            timeout_secs: 5,
            max_retries: 1,
            ..EmbeddingConfig::default()
        }
    }

    #[test]
    fn test_parse_ollama_response() {
        let json = serde_json::json!({"embeddings": [[0.1, 0.2], [0.3, 0.4]]});
        let vecs = parse_ollama_response(&json).unwrap();
        assert_eq!(vecs.len(), 2);
        assert!((vecs[1][0] - 0.3).abs() < 1e-6);
        assert!(parse_ollama_response(&serde_json::json!({"nope": 1})).is_err());
        assert!(parse_ollama_response(&serde_json::json!({"embeddings": [["x"]]})).is_err());
    }

    #[test]
    fn test_parse_openai_response_orders_by_index() {
        let json = serde_json::json!({"data": [
            {"index": 1, "embedding": [2.0]},
            {"index": 0, "embedding": [1.0]},
        ]});
        let vecs = parse_openai_response(&json).unwrap();
        assert_eq!(vecs, vec![vec![1.0], vec![2.0]]);
    }

    #[tokio::test]
    async fn test_probe_learns_dims_of_unknown_model() {
        let ok = r#"{"embeddings": [[0.5, 0.5, 0.0]]}"#.to_string();
        let (url, hits) = mock_server(vec![(200, ok.clone()), (200, ok)]).await;
        let embedder = RemoteEmbedder::connect(&ollama_config(url), None).await.unwrap();
        assert_eq!(embedder.dims(), 3);
        assert_eq!(embedder.identity().strategy, EmbeddingStrategy::Model);
        let v = embedder.embed("hello").await.unwrap();
        assert_eq!(v.dims(), 3);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_one_retry_on_server_error() {
        let ok = r#"{"embeddings": [[1.0, 0.0]]}"#.to_string();
        let (url, hits) =
            mock_server(vec![(503, "busy".to_string()), (200, ok)]).await;
        let embedder = RemoteEmbedder::connect(&ollama_config(url), None).await.unwrap();
        assert_eq!(embedder.dims(), 2);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let (url, hits) = mock_server(vec![(400, "bad".to_string())]).await;
        let err = RemoteEmbedder::connect(&ollama_config(url), None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::EmbeddingBackend { .. }));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_configured_dims_must_match_backend() {
        let ok = r#"{"embeddings": [[1.0, 0.0]]}"#.to_string();
        let (url, _) = mock_server(vec![(200, ok)]).await;
        let mut config = ollama_config(url);
        config.dims = Some(8);
        assert!(matches!(
            RemoteEmbedder::connect(&config, None).await,
            Err(Error::EmbeddingBackend { .. })
        ));
    }

    #[tokio::test]
    async fn test_wrong_sized_vector_mid_run_is_fatal() {
        let probe = r#"{"embeddings": [[1.0, 0.0]]}"#.to_string();
        let bad = r#"{"embeddings": [[1.0, 0.0, 0.0]]}"#.to_string();
        let (url, _) = mock_server(vec![(200, probe), (200, bad)]).await;
        let embedder = RemoteEmbedder::connect(&ollama_config(url), None).await.unwrap();
        assert!(matches!(
            embedder.embed("x").await,
            Err(Error::EmbeddingBackend { .. })
        ));
    }
}
