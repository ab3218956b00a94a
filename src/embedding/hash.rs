//! Deterministic fallback embeddings.
//!
//! Signed feature hashing over normalized tokens: each token lands in one of
//! `dims` buckets chosen by one SHA-256 digest, with a `±1` sign chosen by a
//! second, domain-separated digest. The accumulated counts are L2-normalized.
//!
//! The output depends only on the input text and `dims`, never on process
//! state, so it is stable across runs, processes, and platforms. Text with
//! no tokens maps to the zero vector, which scores `0.0` against anything.
//! When the signed counts of non-empty text cancel to zero, the unsigned
//! bucket counts are used instead, so any token yields a non-zero vector.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use super::{Embedder, EmbedderIdentity};
use crate::config::EmbeddingStrategy;
use crate::error::{Error, Result};
use crate::models::EmbeddingVector;

/// Model label recorded in the identity of fallback indexes.
pub const FALLBACK_MODEL: &str = "signed-hash-v1";

const SIGN_DOMAIN: &[u8] = b"sign\0";

pub struct HashEmbedder {
    identity: EmbedderIdentity,
}

impl HashEmbedder {
    pub fn new(dims: usize) -> Result<Self> {
        if dims == 0 {
            return Err(Error::config("embedding.dims", "must be > 0"));
        }
        Ok(Self {
            identity: EmbedderIdentity::new(EmbeddingStrategy::Fallback, FALLBACK_MODEL, dims),
        })
    }

    pub fn embed_text(&self, text: &str) -> EmbeddingVector {
        let dims = self.identity.dims;
        let mut signed = vec![0.0f32; dims];
        let mut unsigned = vec![0.0f32; dims];
        for token in tokenize(text) {
            let (bucket, sign) = bucket_and_sign(&token, dims);
            signed[bucket] += sign;
            unsigned[bucket] += 1.0;
        }
        let signed = EmbeddingVector::new(signed);
        if signed.is_zero() {
            // Every bucket cancelled out; tokenless text stays zero.
            return EmbeddingVector::new(unsigned).normalized();
        }
        signed.normalized()
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn identity(&self) -> &EmbedderIdentity {
        &self.identity
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<EmbeddingVector>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}

/// Split on anything that is not alphanumeric and lowercase the pieces.
///
/// `snake_case` and `kebab-case` identifiers split into their words.
pub fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
}

fn bucket_and_sign(token: &str, dims: usize) -> (usize, f32) {
    let bucket_digest = Sha256::digest(token.as_bytes());
    let bucket = (leading_u64(&bucket_digest) % dims as u64) as usize;

    let mut hasher = Sha256::new();
    hasher.update(SIGN_DOMAIN);
    hasher.update(token.as_bytes());
    let sign_digest = hasher.finalize();
    let sign = if sign_digest[0] & 1 == 0 { 1.0 } else { -1.0 };

    (bucket, sign)
}

fn leading_u64(digest: &[u8]) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::cosine_similarity;

    #[test]
    fn test_tokenize() {
        let tokens: Vec<String> = tokenize("Parse_Config(path) -> Result<Config>!").collect();
        assert_eq!(
            tokens,
            vec!["parse", "config", "path", "result", "config"]
        );
        assert_eq!(tokenize("  \n\t-- ").count(), 0);
    }

    #[test]
    fn test_deterministic_across_instances() {
        let a = HashEmbedder::new(64).unwrap();
        let b = HashEmbedder::new(64).unwrap();
        let text = "fn main() { println!(\"hello\"); }";
        assert_eq!(a.embed_text(text), b.embed_text(text));
    }

    #[test]
    fn test_unit_length_for_non_empty_input() {
        let e = HashEmbedder::new(64).unwrap();
        let v = e.embed_text("retrieval index vector");
        assert_eq!(v.dims(), 64);
        assert!(!v.is_zero());
        assert!((v.norm() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_tokenless_input_is_zero_vector() {
        let e = HashEmbedder::new(16).unwrap();
        let v = e.embed_text("");
        assert!(v.is_zero());
        assert!(e.embed_text("!!! ---").is_zero());
        let other = e.embed_text("something");
        assert_eq!(cosine_similarity(v.as_slice(), other.as_slice()), 0.0);
    }

    #[test]
    fn test_cancelling_tokens_still_non_zero() {
        let dims = 64;
        let tokens: Vec<String> = (0..2000).map(|i| format!("w{}", i)).collect();
        let mut seen: std::collections::HashMap<(usize, i8), &str> =
            std::collections::HashMap::new();
        let mut pair = None;
        for token in &tokens {
            let (bucket, sign) = bucket_and_sign(token, dims);
            let opposite = if sign > 0.0 { -1 } else { 1 };
            if let Some(other) = seen.get(&(bucket, opposite)) {
                pair = Some(format!("{} {}", other, token));
                break;
            }
            seen.insert((bucket, -opposite), token);
        }
        let text = pair.expect("64 buckets over 2000 tokens must collide");

        let e = HashEmbedder::new(dims).unwrap();
        let v = e.embed_text(&text);
        assert!(!v.is_zero(), "{:?} embedded to zero", text);
        assert!((v.norm() - 1.0).abs() < 1e-5);
        assert_eq!(v, e.embed_text(&text));
    }

    #[test]
    fn test_case_and_punctuation_insensitive() {
        let e = HashEmbedder::new(128).unwrap();
        assert_eq!(e.embed_text("Hello, World"), e.embed_text("hello world"));
    }

    #[test]
    fn test_shared_vocabulary_scores_higher() {
        let e = HashEmbedder::new(256).unwrap();
        let q = e.embed_text("database connection pool");
        let near = e.embed_text("the connection pool keeps database handles open");
        let far = e.embed_text("render the login button in blue");
        let s_near = cosine_similarity(q.as_slice(), near.as_slice());
        let s_far = cosine_similarity(q.as_slice(), far.as_slice());
        assert!(s_near > s_far, "{} <= {}", s_near, s_far);
    }

    #[test]
    fn test_zero_dims_rejected() {
        assert!(matches!(
            HashEmbedder::new(0),
            Err(Error::Configuration { .. })
        ));
    }

    #[tokio::test]
    async fn test_batch_matches_single() {
        let e = HashEmbedder::new(32).unwrap();
        let texts = vec!["alpha beta".to_string(), "".to_string(), "gamma".to_string()];
        let batch = e.embed_batch(&texts).await.unwrap();
        for (text, vector) in texts.iter().zip(batch.iter()) {
            assert_eq!(&e.embed(text).await.unwrap(), vector);
        }
    }
}
