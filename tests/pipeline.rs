use async_trait::async_trait;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use repo_analyst::chunk::Chunker;
use repo_analyst::config::{Config, EmbeddingStrategy, DEFAULT_FALLBACK_DIMS};
use repo_analyst::embedding::{
    create_embedder, known_model_dims, Embedder, EmbedderIdentity, HashEmbedder,
};
use repo_analyst::index::VectorIndex;
use repo_analyst::ingest::{Ingestion, Ingestor};
use repo_analyst::models::EmbeddingVector;
use repo_analyst::retrieve::{retrieve, RetrievalParams};
use repo_analyst::session::SessionSlot;
use repo_analyst::Error;

const FILE_TWO: &str = "file two content file two content file two content";

fn scenario_repo() -> TempDir {
    let tmp = TempDir::new().unwrap();
    let filler = "alpha beta gamma delta ".repeat(30);
    let file_one: String = filler.chars().take(500).collect();
    assert_eq!(FILE_TWO.chars().count(), 50);
    fs::write(tmp.path().join("a_one.txt"), file_one).unwrap();
    fs::write(tmp.path().join("b_two.txt"), FILE_TWO).unwrap();
    fs::write(tmp.path().join("c_three.txt"), "").unwrap();
    tmp
}

fn scenario_config() -> Config {
    let mut config = Config::default();
    config.chunking.window_size = 200;
    config.chunking.overlap = 50;
    config.embedding.strategy = EmbeddingStrategy::Fallback;
    config.embedding.dims = Some(64);
    config
}

async fn ingest(root: &Path, config: &Config) -> Ingestion {
    let embedder = create_embedder(&config.embedding).await.unwrap();
    Ingestor::new(config, embedder)
        .unwrap()
        .ingest(root, Some("fixture"), &CancellationToken::new())
        .await
        .unwrap()
}

/// Reports a learned model's identity with a different dimensionality.
struct FakeModel {
    identity: EmbedderIdentity,
}

#[async_trait]
impl Embedder for FakeModel {
    fn identity(&self) -> &EmbedderIdentity {
        &self.identity
    }

    async fn embed_batch(&self, texts: &[String]) -> repo_analyst::Result<Vec<EmbeddingVector>> {
        Ok(texts
            .iter()
            .map(|_| EmbeddingVector::new(vec![0.5; self.identity.dims]))
            .collect())
    }
}

#[tokio::test]
async fn test_three_file_scenario() {
    let repo = scenario_repo();
    let ingestion = ingest(repo.path(), &scenario_config()).await;

    let ranges: Vec<(&str, usize, usize)> = ingestion
        .index
        .entries()
        .iter()
        .map(|e| (&*e.chunk.path, e.chunk.start, e.chunk.end))
        .collect();
    assert_eq!(
        ranges,
        vec![
            ("a_one.txt", 0, 200),
            ("a_one.txt", 150, 350),
            ("a_one.txt", 300, 500),
            ("b_two.txt", 0, 50),
        ]
    );
    assert_eq!(ingestion.index.len(), 4);
    assert_eq!(ingestion.index.identity().dims, 64);
    assert_eq!(ingestion.snapshot.file_count(), 3);

    let result = retrieve(
        "file two content",
        2,
        ingestion.embedder.as_ref(),
        &ingestion.index,
    )
    .await
    .unwrap();
    assert_eq!(result.len(), 2);
    assert_eq!(result.items[0].rank, 1);
    assert_eq!(result.items[0].path(), "b_two.txt");
    assert_eq!(result.items[0].range(), 0..50);
    assert!(result.items[0].score >= result.items[1].score);
}

#[tokio::test]
async fn test_independent_builds_are_identical() {
    let repo = scenario_repo();
    let config = scenario_config();
    let first = ingest(repo.path(), &config).await;
    let second = ingest(repo.path(), &config).await;

    assert_eq!(first.index.len(), second.index.len());
    for (a, b) in first.index.entries().iter().zip(second.index.entries()) {
        assert_eq!(a.id, b.id);
        assert_eq!(a.chunk, b.chunk);
        assert_eq!(a.vector, b.vector);
    }

    for query in ["file two content", "alpha gamma", "nothing matches this"] {
        let r1 = first
            .retriever(RetrievalParams::default())
            .unwrap()
            .retrieve(query, 4)
            .await
            .unwrap();
        let r2 = second
            .retriever(RetrievalParams::default())
            .unwrap()
            .retrieve(query, 4)
            .await
            .unwrap();
        let s1: Vec<(u64, f32)> = r1.iter().map(|i| (i.entry_id, i.score)).collect();
        let s2: Vec<(u64, f32)> = r2.iter().map(|i| (i.entry_id, i.score)).collect();
        assert_eq!(s1, s2);
    }
}

#[tokio::test]
async fn test_results_bounded_and_ordered() {
    let repo = scenario_repo();
    let ingestion = ingest(repo.path(), &scenario_config()).await;
    // No window pair in the scenario overlaps by more than half.
    let retriever = ingestion.retriever(RetrievalParams::default()).unwrap();

    for k in 1..=6i64 {
        let result = retriever.retrieve("alpha beta", k).await.unwrap();
        assert_eq!(result.len(), (k as usize).min(ingestion.index.len()));
        for pair in result.items.windows(2) {
            assert!(pair[0].score >= pair[1].score);
            assert_eq!(pair[0].rank + 1, pair[1].rank);
        }
    }
    assert!(matches!(
        retriever.retrieve("alpha", 0).await,
        Err(Error::Configuration { .. })
    ));
}

#[tokio::test]
async fn test_empty_repository_yields_empty_result() {
    let tmp = TempDir::new().unwrap();
    let ingestion = ingest(tmp.path(), &scenario_config()).await;
    assert!(ingestion.index.is_empty());
    let result = ingestion
        .retriever(RetrievalParams::default())
        .unwrap()
        .retrieve("anything at all", 5)
        .await
        .unwrap();
    assert!(result.is_empty());
}

#[tokio::test]
async fn test_query_from_other_strategy_is_dimension_mismatch() {
    let repo = scenario_repo();
    let ingestion = ingest(repo.path(), &scenario_config()).await;
    let model = FakeModel {
        identity: EmbedderIdentity::new(EmbeddingStrategy::Model, "fake-minilm", 384),
    };

    let err = retrieve("file two content", 2, &model, &ingestion.index)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::DimensionMismatch {
            expected: 64,
            actual: 384
        }
    ));

    // A raw vector of the wrong size is refused by the index as well.
    let query = model.embed("file two content").await.unwrap();
    assert!(matches!(
        ingestion.index.search(&query, 2),
        Err(Error::DimensionMismatch { .. })
    ));
    assert_eq!(ingestion.index.len(), 4);
}

#[tokio::test]
async fn test_model_query_with_equal_dims_is_dimension_mismatch() {
    let repo = scenario_repo();
    let mut config = scenario_config();
    config.embedding.dims = Some(384);
    let ingestion = ingest(repo.path(), &config).await;
    let model = FakeModel {
        identity: EmbedderIdentity::new(EmbeddingStrategy::Model, "all-minilm-l6-v2", 384),
    };

    let err = retrieve("file two content", 2, &model, &ingestion.index)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::DimensionMismatch {
            expected: 384,
            actual: 384
        }
    ));
}

#[tokio::test]
async fn test_default_fallback_size_differs_from_known_models() {
    for model in [
        "all-minilm-l6-v2",
        "bge-small-en-v1.5",
        "nomic-embed-text",
        "mxbai-embed-large",
        "text-embedding-3-small",
        "text-embedding-3-large",
    ] {
        assert_ne!(known_model_dims(model), Some(DEFAULT_FALLBACK_DIMS), "{}", model);
    }

    let repo = scenario_repo();
    let embedder = create_embedder(&Config::default().embedding).await.unwrap();
    assert_eq!(embedder.identity().dims, DEFAULT_FALLBACK_DIMS);
    let ingestion = Ingestor::new(&Config::default(), embedder)
        .unwrap()
        .ingest(repo.path(), Some("fixture"), &CancellationToken::new())
        .await
        .unwrap();
    let model = FakeModel {
        identity: EmbedderIdentity::new(EmbeddingStrategy::Model, "all-minilm-l6-v2", 384),
    };
    assert!(matches!(
        retrieve("anything", 1, &model, &ingestion.index).await,
        Err(Error::DimensionMismatch { .. })
    ));
}

#[test]
fn test_chunks_cover_every_offset() {
    for (len, window, overlap) in [(1, 5, 0), (10, 5, 2), (501, 200, 50), (999, 100, 99), (64, 64, 10)] {
        let chunker = Chunker::new(window, overlap).unwrap();
        let text: String = (0..len).map(|i| char::from(b'a' + (i % 26) as u8)).collect();
        let chunks = chunker.chunk_text("f.txt", &text).unwrap();

        assert_eq!(chunks.len(), chunker.chunk_count(len));
        assert_eq!(chunks.first().map(|c| c.start), Some(0));
        assert_eq!(chunks.last().map(|c| c.end), Some(len));
        for pair in chunks.windows(2) {
            assert!(pair[1].start <= pair[0].end, "gap in {:?}", (len, window, overlap));
            assert!(pair[1].start > pair[0].start);
        }
        for c in &chunks {
            assert!(!c.is_empty() && c.len() <= window);
            assert_eq!(c.text.chars().count(), c.len());
        }
    }
}

#[test]
fn test_overlap_not_smaller_than_window_rejected() {
    assert!(matches!(
        Chunker::new(100, 100),
        Err(Error::Configuration { .. })
    ));
}

#[tokio::test]
async fn test_readers_keep_old_index_during_swap() {
    let repo = scenario_repo();
    let config = scenario_config();
    let slot = SessionSlot::default();
    slot.replace(Arc::new(ingest(repo.path(), &config).await));

    let held = slot.current().unwrap();
    fs::write(repo.path().join("d_four.txt"), "a brand new file").unwrap();
    let rebuilt = Arc::new(ingest(repo.path(), &config).await);
    let replaced = slot.replace(Arc::clone(&rebuilt)).unwrap();

    assert!(Arc::ptr_eq(&held, &replaced));
    assert_eq!(held.index.len(), 4);
    assert_eq!(slot.current().unwrap().index.len(), 5);
}

#[tokio::test]
async fn test_incremental_add_keeps_ids_increasing() {
    let embedder = HashEmbedder::new(64).unwrap();
    let chunker = Chunker::new(200, 50).unwrap();
    let chunks: Vec<_> = chunker
        .chunk_text("x.md", &"word ".repeat(120))
        .unwrap()
        .into_iter()
        .map(Arc::new)
        .collect();

    let mut index = VectorIndex::new(embedder.identity().clone());
    let mut last = 0;
    for chunk in chunks {
        let id = index.add(chunk, &embedder).await.unwrap();
        assert!(id > last);
        last = id;
    }
    assert_eq!(index.len(), 4);
}
