//! Append-only vector index with brute-force cosine search.
//!
//! The index records the [`EmbedderIdentity`] it was built with. Every
//! inserted vector must match its dimensionality, and every query must come
//! from a compatible embedder, so vectors of different strategies never
//! meet in one index.
//!
//! # Build
//!
//! [`VectorIndex::build_with`] embeds batches concurrently (bounded by
//! `workers`) and inserts the results in chunk order once every batch has
//! finished. Insertion ids therefore never depend on which batch completes
//! first, and a failed or cancelled build returns an error instead of a
//! partially populated index.
//!
//! # Search
//!
//! Scores are cosine similarities. Results are ordered by descending score,
//! ties by ascending insertion id.

use std::cmp::Ordering;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::embedding::{cosine_similarity, Embedder, EmbedderIdentity};
use crate::error::{validate_dimension, Error, Result};
use crate::models::{Chunk, EmbeddingVector, IndexEntry};
use crate::progress::{NoProgress, ProgressEvent, ProgressReporter};

/// Concurrency knobs for [`VectorIndex::build_with`].
#[derive(Debug, Clone, Copy)]
pub struct BuildOptions {
    pub batch_size: usize,
    pub workers: usize,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            batch_size: 64,
            workers: 4,
        }
    }
}

/// One search result, borrowed from the index.
#[derive(Debug, Clone, Copy)]
pub struct SearchHit<'a> {
    pub entry: &'a IndexEntry,
    pub score: f32,
}

#[derive(Debug)]
pub struct VectorIndex {
    identity: EmbedderIdentity,
    entries: Vec<IndexEntry>,
    next_id: u64,
}

impl VectorIndex {
    pub fn new(identity: EmbedderIdentity) -> Self {
        Self {
            identity,
            entries: Vec::new(),
            next_id: 1,
        }
    }

    /// Embed and index `chunks` with default options.
    pub async fn build(chunks: Vec<Arc<Chunk>>, embedder: Arc<dyn Embedder>) -> Result<Self> {
        Self::build_with(
            chunks,
            embedder,
            BuildOptions::default(),
            &CancellationToken::new(),
            &NoProgress,
        )
        .await
    }

    pub async fn build_with(
        chunks: Vec<Arc<Chunk>>,
        embedder: Arc<dyn Embedder>,
        options: BuildOptions,
        cancel: &CancellationToken,
        progress: &dyn ProgressReporter,
    ) -> Result<Self> {
        let mut index = Self::new(embedder.identity().clone());
        if chunks.is_empty() {
            progress.report(ProgressEvent::Done { entries: 0 });
            return Ok(index);
        }

        let total = chunks.len() as u64;
        let batches: Vec<Vec<Arc<Chunk>>> = chunks
            .chunks(options.batch_size.max(1))
            .map(|b| b.to_vec())
            .collect();
        let semaphore = Arc::new(Semaphore::new(options.workers.max(1)));
        let mut results: Vec<Option<Vec<EmbeddingVector>>> = vec![None; batches.len()];
        let mut tasks = JoinSet::new();

        for (batch_no, batch) in batches.iter().enumerate() {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let embedder = Arc::clone(&embedder);
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| Error::backend("embedding worker pool closed"))?;
                let vectors = embedder.embed_batch(&texts).await?;
                Ok::<_, Error>((batch_no, vectors))
            });
        }

        let mut embedded = 0u64;
        loop {
            let joined = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tasks.abort_all();
                    return Err(Error::Cancelled);
                }
                joined = tasks.join_next() => joined,
            };
            let Some(joined) = joined else { break };
            let (batch_no, vectors) = match joined {
                Ok(Ok(done)) => done,
                Ok(Err(err)) => {
                    tasks.abort_all();
                    return Err(err);
                }
                Err(join_err) => {
                    tasks.abort_all();
                    return Err(Error::backend(format!(
                        "embedding task failed: {}",
                        join_err
                    )));
                }
            };
            embedded += vectors.len() as u64;
            debug!(batch = batch_no, vectors = vectors.len(), "batch embedded");
            progress.report(ProgressEvent::Embedding {
                n: embedded,
                total,
            });
            results[batch_no] = Some(vectors);
        }

        for (batch, vectors) in batches.into_iter().zip(results) {
            let vectors =
                vectors.ok_or_else(|| Error::backend("embedding batch produced no result"))?;
            if vectors.len() != batch.len() {
                return Err(Error::backend(format!(
                    "embedder returned {} vectors for {} chunks",
                    vectors.len(),
                    batch.len()
                )));
            }
            for (chunk, vector) in batch.into_iter().zip(vectors) {
                index.insert(chunk, vector)?;
            }
        }

        info!(
            entries = index.len(),
            embedder = %index.identity,
            "vector index built"
        );
        progress.report(ProgressEvent::Done {
            entries: index.len() as u64,
        });
        Ok(index)
    }

    /// Embed one chunk with `embedder` and append it.
    pub async fn add(&mut self, chunk: Arc<Chunk>, embedder: &dyn Embedder) -> Result<u64> {
        self.check_compatible(embedder.identity())?;
        let vector = embedder.embed(&chunk.text).await?;
        self.insert(chunk, vector)
    }

    /// Append a precomputed vector. Returns the assigned id.
    pub fn insert(&mut self, chunk: Arc<Chunk>, vector: EmbeddingVector) -> Result<u64> {
        validate_dimension(self.identity.dims, vector.dims())?;
        let id = self.next_id;
        self.next_id += 1;
        self.entries.push(IndexEntry { id, vector, chunk });
        Ok(id)
    }

    /// At most `k` entries, best first.
    pub fn search(&self, query: &EmbeddingVector, k: usize) -> Result<Vec<SearchHit<'_>>> {
        let mut hits = self.ranked(query)?;
        hits.truncate(k);
        Ok(hits)
    }

    /// Every entry, best first.
    pub fn ranked(&self, query: &EmbeddingVector) -> Result<Vec<SearchHit<'_>>> {
        if self.entries.is_empty() {
            return Ok(Vec::new());
        }
        validate_dimension(self.identity.dims, query.dims())?;

        let mut hits: Vec<SearchHit<'_>> = self
            .entries
            .iter()
            .map(|entry| SearchHit {
                entry,
                score: cosine_similarity(query.as_slice(), entry.vector.as_slice()),
            })
            .collect();
        hits.sort_by(compare_hits);
        Ok(hits)
    }

    /// Reject an embedder whose vectors cannot be compared with this index.
    ///
    /// Another strategy is a [`Error::DimensionMismatch`] even when the sizes
    /// happen to agree; another model under the same strategy is an
    /// [`Error::EmbedderMismatch`].
    pub fn check_compatible(&self, other: &EmbedderIdentity) -> Result<()> {
        validate_dimension(self.identity.dims, other.dims)?;
        if self.identity.strategy != other.strategy {
            return Err(Error::DimensionMismatch {
                expected: self.identity.dims,
                actual: other.dims,
            });
        }
        if &self.identity != other {
            return Err(Error::EmbedderMismatch {
                index: self.identity.to_string(),
                query: other.to_string(),
            });
        }
        Ok(())
    }

    pub fn identity(&self) -> &EmbedderIdentity {
        &self.identity
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn compare_hits(a: &SearchHit<'_>, b: &SearchHit<'_>) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.entry.id.cmp(&b.entry.id))
}
