//! Top-k retrieval with per-file overlap deduplication.
//!
//! A query is embedded with the same embedder that built the index, scored
//! against every entry, and walked best-first. A candidate is dropped when
//! it overlaps an already kept chunk of the same file by more than
//! `dedup_overlap` of the shorter of the two ranges. The walk stops once
//! `k` results are kept, so when nothing is dropped exactly
//! `min(k, entries)` results come back.

use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

use crate::config::RetrievalConfig;
use crate::embedding::Embedder;
use crate::error::{Error, Result};
use crate::index::VectorIndex;
use crate::models::{Chunk, EmbeddingVector};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetrievalParams {
    /// Fraction in `[0, 1]`; overlaps strictly above it are duplicates.
    pub dedup_overlap: f64,
}

impl Default for RetrievalParams {
    fn default() -> Self {
        Self { dedup_overlap: 0.5 }
    }
}

impl From<&RetrievalConfig> for RetrievalParams {
    fn from(config: &RetrievalConfig) -> Self {
        Self {
            dedup_overlap: config.dedup_overlap,
        }
    }
}

/// One ranked chunk with its provenance.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedChunk {
    /// 1-based.
    pub rank: usize,
    pub score: f32,
    pub entry_id: u64,
    pub chunk: Arc<Chunk>,
}

impl RetrievedChunk {
    pub fn path(&self) -> &str {
        &self.chunk.path
    }

    pub fn range(&self) -> std::ops::Range<usize> {
        self.chunk.start..self.chunk.end
    }

    pub fn text(&self) -> &str {
        &self.chunk.text
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RetrievalResult {
    pub query: String,
    pub items: Vec<RetrievedChunk>,
}

impl RetrievalResult {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RetrievedChunk> {
        self.items.iter()
    }
}

/// Answers queries against one completed index.
#[derive(Clone)]
pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    index: Arc<VectorIndex>,
    params: RetrievalParams,
}

impl Retriever {
    /// Fails when `embedder` did not produce the vectors in `index`.
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<VectorIndex>,
        params: RetrievalParams,
    ) -> Result<Self> {
        validate_params(&params)?;
        index.check_compatible(embedder.identity())?;
        Ok(Self {
            embedder,
            index,
            params,
        })
    }

    pub fn index(&self) -> &Arc<VectorIndex> {
        &self.index
    }

    pub async fn retrieve(&self, query: &str, k: i64) -> Result<RetrievalResult> {
        let k = validate_k(k)?;
        let vector = self.embedder.embed(query).await?;
        rank(query, &vector, k, &self.index, &self.params)
    }
}

/// Embed `query` with `embedder` and rank it against `index`, with the
/// default `dedup_overlap` of 0.5.
pub async fn retrieve(
    query: &str,
    k: i64,
    embedder: &dyn Embedder,
    index: &VectorIndex,
) -> Result<RetrievalResult> {
    retrieve_with(query, k, embedder, index, &RetrievalParams::default()).await
}

/// [`retrieve`] with explicit parameters.
///
/// An empty index yields an empty result before the embedder is checked
/// or called.
pub async fn retrieve_with(
    query: &str,
    k: i64,
    embedder: &dyn Embedder,
    index: &VectorIndex,
    params: &RetrievalParams,
) -> Result<RetrievalResult> {
    let k = validate_k(k)?;
    validate_params(params)?;
    if index.is_empty() {
        return Ok(RetrievalResult {
            query: query.to_string(),
            items: Vec::new(),
        });
    }
    index.check_compatible(embedder.identity())?;
    let vector = embedder.embed(query).await?;
    rank(query, &vector, k, index, params)
}

/// Rank a precomputed query vector, deduplicating overlapping windows.
pub fn rank(
    query: &str,
    vector: &EmbeddingVector,
    k: usize,
    index: &VectorIndex,
    params: &RetrievalParams,
) -> Result<RetrievalResult> {
    let mut items: Vec<RetrievedChunk> = Vec::with_capacity(k.min(index.len()));
    let mut dropped = 0usize;

    for hit in index.ranked(vector)? {
        if items.len() == k {
            break;
        }
        let chunk = &hit.entry.chunk;
        if items
            .iter()
            .any(|kept| is_duplicate(&kept.chunk, chunk, params.dedup_overlap))
        {
            dropped += 1;
            continue;
        }
        items.push(RetrievedChunk {
            rank: items.len() + 1,
            score: hit.score,
            entry_id: hit.entry.id,
            chunk: Arc::clone(chunk),
        });
    }

    debug!(query, k, returned = items.len(), dropped, "retrieval ranked");
    Ok(RetrievalResult {
        query: query.to_string(),
        items,
    })
}

fn is_duplicate(kept: &Chunk, candidate: &Chunk, threshold: f64) -> bool {
    let shared = kept.overlap_with(candidate);
    if shared == 0 {
        return false;
    }
    let shorter = kept.len().min(candidate.len()).max(1);
    shared as f64 / shorter as f64 > threshold
}

fn validate_k(k: i64) -> Result<usize> {
    if k <= 0 {
        return Err(Error::config("k", format!("must be >= 1, got {}", k)));
    }
    Ok(usize::try_from(k).unwrap_or(usize::MAX))
}

fn validate_params(params: &RetrievalParams) -> Result<()> {
    if !(0.0..=1.0).contains(&params.dedup_overlap) {
        return Err(Error::config(
            "retrieval.dedup_overlap",
            format!("must be within [0, 1], got {}", params.dedup_overlap),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EmbeddingStrategy;
    use crate::embedding::{EmbedderIdentity, HashEmbedder};

    fn chunk(path: &str, start: usize, end: usize) -> Arc<Chunk> {
        Arc::new(Chunk {
            path: Arc::from(path),
            start,
            end,
            index: 0,
            text: "x".repeat(end - start),
            token_estimate: 1,
            hash: String::new(),
        })
    }

    fn index_of(entries: Vec<(Arc<Chunk>, Vec<f32>)>) -> VectorIndex {
        let mut index =
            VectorIndex::new(EmbedderIdentity::new(EmbeddingStrategy::Model, "t", 2));
        for (c, v) in entries {
            index.insert(c, v.into()).unwrap();
        }
        index
    }

    #[test]
    fn test_overlapping_windows_are_deduplicated() {
        let index = index_of(vec![
            (chunk("a.rs", 0, 200), vec![1.0, 0.0]),
            (chunk("a.rs", 150, 350), vec![0.9, 0.1]),
            (chunk("a.rs", 50, 250), vec![0.95, 0.05]),
            (chunk("b.rs", 0, 200), vec![0.8, 0.2]),
        ]);
        let result = rank(
            "q",
            &vec![1.0, 0.0].into(),
            10,
            &index,
            &RetrievalParams::default(),
        )
        .unwrap();
        // 50..250 shares 150 of 200 chars with 0..200 and is dropped;
        // 150..350 shares 50 and is kept.
        let got: Vec<(&str, usize)> = result.iter().map(|r| (r.path(), r.chunk.start)).collect();
        assert_eq!(got, vec![("a.rs", 0), ("a.rs", 150), ("b.rs", 0)]);
        let ranks: Vec<usize> = result.iter().map(|r| r.rank).collect();
        assert_eq!(ranks, vec![1, 2, 3]);
    }

    #[test]
    fn test_dedup_threshold_one_keeps_everything() {
        let index = index_of(vec![
            (chunk("a.rs", 0, 200), vec![1.0, 0.0]),
            (chunk("a.rs", 0, 200), vec![1.0, 0.0]),
        ]);
        let params = RetrievalParams { dedup_overlap: 1.0 };
        let result = rank("q", &vec![1.0, 0.0].into(), 5, &index, &params).unwrap();
        assert_eq!(result.len(), 2);
    }

    #[test]
    fn test_k_clamped_and_scores_descending() {
        let index = index_of(vec![
            (chunk("a", 0, 10), vec![0.0, 1.0]),
            (chunk("b", 0, 10), vec![1.0, 0.0]),
            (chunk("c", 0, 10), vec![1.0, 1.0]),
        ]);
        let params = RetrievalParams::default();
        let q: EmbeddingVector = vec![1.0, 0.0].into();
        assert_eq!(rank("q", &q, 2, &index, &params).unwrap().len(), 2);
        let all = rank("q", &q, 100, &index, &params).unwrap();
        assert_eq!(all.len(), 3);
        for pair in all.items.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
        assert_eq!(all.items[0].path(), "b");
    }

    #[tokio::test]
    async fn test_non_positive_k_rejected() {
        let embedder = HashEmbedder::new(8).unwrap();
        let index = VectorIndex::new(embedder.identity().clone());
        for k in [0, -3] {
            assert!(matches!(
                retrieve("q", k, &embedder, &index).await,
                Err(Error::Configuration { .. })
            ));
        }
    }

    #[tokio::test]
    async fn test_empty_index_returns_empty_result() {
        let embedder = Arc::new(HashEmbedder::new(8).unwrap());
        let index = Arc::new(VectorIndex::new(embedder.identity().clone()));
        let retriever = Retriever::new(embedder, index, RetrievalParams::default()).unwrap();
        let result = retriever.retrieve("anything", 3).await.unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn test_retriever_rejects_foreign_embedder() {
        let index = Arc::new(VectorIndex::new(EmbedderIdentity::new(
            EmbeddingStrategy::Model,
            "m",
            384,
        )));
        let fallback = Arc::new(HashEmbedder::new(64).unwrap());
        assert!(matches!(
            Retriever::new(fallback, Arc::clone(&index), RetrievalParams::default()),
            Err(Error::DimensionMismatch {
                expected: 384,
                actual: 64
            })
        ));
        let same_dims = Arc::new(HashEmbedder::new(384).unwrap());
        assert!(matches!(
            Retriever::new(same_dims, index, RetrievalParams::default()),
            Err(Error::DimensionMismatch {
                expected: 384,
                actual: 384
            })
        ));

        let older_fallback = Arc::new(VectorIndex::new(EmbedderIdentity::new(
            EmbeddingStrategy::Fallback,
            "signed-hash-v0",
            64,
        )));
        assert!(matches!(
            Retriever::new(
                Arc::new(HashEmbedder::new(64).unwrap()),
                older_fallback,
                RetrievalParams::default()
            ),
            Err(Error::EmbedderMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_empty_index_skips_embedder_check() {
        let index = VectorIndex::new(EmbedderIdentity::new(EmbeddingStrategy::Model, "m", 384));
        let fallback = HashEmbedder::new(64).unwrap();
        let result = retrieve("anything", 3, &fallback, &index).await.unwrap();
        assert!(result.is_empty());
        assert_eq!(result.query, "anything");
    }

    #[tokio::test]
    async fn test_retrieve_with_honours_dedup_overlap() {
        let embedder = HashEmbedder::new(16).unwrap();
        let mut index = VectorIndex::new(embedder.identity().clone());
        let text = "x".repeat(10);
        for _ in 0..2 {
            let c = chunk("a.rs", 0, 10);
            index.insert(c, embedder.embed_text(&text)).unwrap();
        }

        let strict = retrieve("x", 5, &embedder, &index).await.unwrap();
        assert_eq!(strict.len(), 1);
        let loose = retrieve_with(
            "x",
            5,
            &embedder,
            &index,
            &RetrievalParams { dedup_overlap: 1.0 },
        )
        .await
        .unwrap();
        assert_eq!(loose.len(), 2);
        assert!(matches!(
            retrieve_with(
                "x",
                5,
                &embedder,
                &index,
                &RetrievalParams { dedup_overlap: 1.5 }
            )
            .await,
            Err(Error::Configuration { .. })
        ));
    }
}
