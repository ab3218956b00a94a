//! Ingestion pipeline orchestration.
//!
//! Coordinates one build: selection → chunking → embedding → index. The
//! result is an [`Ingestion`]: an immutable snapshot, the index built from
//! it, and the per-file warnings collected on the way.
//!
//! Selection and chunking do blocking file I/O and run on the blocking
//! pool. Cancellation is checked between files and while embedding; a file
//! whose chunking fails part-way contributes no chunks at all.

use sha2::{Digest, Sha256};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::chunk::Chunker;
use crate::config::Config;
use crate::embedding::Embedder;
use crate::error::{Error, Result};
use crate::index::{BuildOptions, VectorIndex};
use crate::models::{Chunk, FileRecord, RepositorySnapshot, SkippedFile};
use crate::progress::{NoProgress, ProgressEvent, ProgressReporter};
use crate::retrieve::{RetrievalParams, Retriever};
use crate::select::FileSelector;

/// Everything one ingestion produced.
pub struct Ingestion {
    pub snapshot: Arc<RepositorySnapshot>,
    pub index: Arc<VectorIndex>,
    pub embedder: Arc<dyn Embedder>,
    pub warnings: Vec<SkippedFile>,
}

impl Ingestion {
    pub fn retriever(&self, params: RetrievalParams) -> Result<Retriever> {
        Retriever::new(Arc::clone(&self.embedder), Arc::clone(&self.index), params)
    }
}

impl std::fmt::Debug for Ingestion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ingestion")
            .field("repository", &self.snapshot.repository)
            .field("reference", &self.snapshot.reference)
            .field("files", &self.snapshot.file_count())
            .field("entries", &self.index.len())
            .field("warnings", &self.warnings.len())
            .finish()
    }
}

pub struct Ingestor {
    selector: FileSelector,
    chunker: Chunker,
    embedder: Arc<dyn Embedder>,
    options: BuildOptions,
    progress: Arc<dyn ProgressReporter>,
}

impl Ingestor {
    /// Validate `config` and prepare the pipeline stages.
    pub fn new(config: &Config, embedder: Arc<dyn Embedder>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            selector: FileSelector::new(&config.ingest)?,
            chunker: Chunker::from_config(&config.chunking)?,
            embedder,
            options: BuildOptions {
                batch_size: config.embedding.batch_size,
                workers: config.embedding.workers,
            },
            progress: Arc::new(NoProgress),
        })
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    /// The reference an ingestion of `root` would record when none is given.
    pub async fn reference(&self, root: &Path) -> Result<String> {
        let root = canonical_root(root)?;
        let selector = self.selector.clone();
        let walk_root = root.clone();
        blocking(&root, move || -> Result<String> {
            if let Some(sha) = git_head(&walk_root) {
                return Ok(sha);
            }
            let selection = selector.select(&walk_root)?;
            Ok(content_fingerprint(&selection.files))
        })
        .await?
    }

    /// Build a snapshot and index for `root`.
    ///
    /// `reference` names the commit or branch being analysed; when absent it
    /// is resolved from the checkout (see [`resolve_reference`]).
    pub async fn ingest(
        &self,
        root: &Path,
        reference: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Ingestion> {
        let root = canonical_root(root)?;
        self.progress.report(ProgressEvent::Discovering {
            root: root.display().to_string(),
        });

        let selector = self.selector.clone();
        let walk_root = root.clone();
        let selection = blocking(&root, move || selector.select(&walk_root)).await??;
        let mut warnings = selection.skipped;
        self.progress.report(ProgressEvent::Selected {
            files: selection.files.len() as u64,
            skipped: warnings.len() as u64,
        });
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let reference = match reference {
            Some(r) => r.to_string(),
            None => {
                let files = selection.files.clone();
                let git_root = root.clone();
                blocking(&root, move || resolve_reference(&git_root, &files)).await?
            }
        };

        let chunker = self.chunker;
        let progress = Arc::clone(&self.progress);
        let token = cancel.clone();
        let files = selection.files;
        let chunked = blocking(&root, move || {
            chunk_files(&chunker, files, &token, progress.as_ref())
        })
        .await??;
        warnings.extend(chunked.skipped);

        let index = VectorIndex::build_with(
            chunked.chunks,
            Arc::clone(&self.embedder),
            self.options,
            cancel,
            self.progress.as_ref(),
        )
        .await?;

        let repository = root.display().to_string();
        let snapshot = RepositorySnapshot::new(&root, repository, reference, chunked.files);
        info!(
            repository = %snapshot.repository,
            reference = %snapshot.reference,
            files = snapshot.file_count(),
            entries = index.len(),
            warnings = warnings.len(),
            "ingestion complete"
        );

        Ok(Ingestion {
            snapshot: Arc::new(snapshot),
            index: Arc::new(index),
            embedder: Arc::clone(&self.embedder),
            warnings,
        })
    }
}

struct Chunked {
    files: Vec<FileRecord>,
    chunks: Vec<Arc<Chunk>>,
    skipped: Vec<SkippedFile>,
}

fn chunk_files(
    chunker: &Chunker,
    files: Vec<FileRecord>,
    cancel: &CancellationToken,
    progress: &dyn ProgressReporter,
) -> Result<Chunked> {
    let total = files.len() as u64;
    let mut kept = Vec::with_capacity(files.len());
    let mut chunks = Vec::new();
    let mut skipped = Vec::new();

    for (n, file) in files.into_iter().enumerate() {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let stream = chunker.chunk(&file);
        match stream.and_then(|s| s.collect::<Result<Vec<Chunk>>>()) {
            Ok(file_chunks) => {
                debug!(path = %file.path, chunks = file_chunks.len(), "file chunked");
                chunks.extend(file_chunks.into_iter().map(Arc::new));
                kept.push(file);
            }
            Err(err) => {
                warn!(path = %file.path, error = %err, "skipping file that failed to read");
                skipped.push(SkippedFile::new(file.path, err.to_string()));
            }
        }
        progress.report(ProgressEvent::Chunking {
            n: n as u64 + 1,
            total,
        });
    }

    Ok(Chunked {
        files: kept,
        chunks,
        skipped,
    })
}

/// Resolve the reference of the checkout at `root`.
///
/// Uses `git rev-parse HEAD` when `root` is a Git working tree, otherwise a
/// content fingerprint: `content:` followed by the first 12 hex digits of a
/// SHA-256 over every selected file's path, size, and contents.
pub fn resolve_reference(root: &Path, files: &[FileRecord]) -> String {
    match git_head(root) {
        Some(sha) => sha,
        None => content_fingerprint(files),
    }
}

fn git_head(root: &Path) -> Option<String> {
    let output = Command::new("git")
        .args(["rev-parse", "HEAD"])
        .current_dir(root)
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let sha = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!sha.is_empty()).then_some(sha)
}

fn content_fingerprint(files: &[FileRecord]) -> String {
    let mut hasher = Sha256::new();
    for file in files {
        hasher.update(file.path.as_bytes());
        hasher.update([0]);
        hasher.update(file.size.to_le_bytes());
        match File::open(&file.abs_path) {
            Ok(mut handle) => {
                if let Err(err) = std::io::copy(&mut handle, &mut hasher) {
                    debug!(path = %file.path, error = %err, "fingerprint read failed");
                }
            }
            Err(err) => debug!(path = %file.path, error = %err, "fingerprint open failed"),
        }
    }
    let digest = format!("{:x}", hasher.finalize());
    format!("content:{}", &digest[..12])
}

pub(crate) fn canonical_root(root: &Path) -> Result<PathBuf> {
    std::fs::canonicalize(root).map_err(|source| Error::RepositoryAccess {
        path: root.to_path_buf(),
        source,
    })
}

async fn blocking<T, F>(root: &Path, f: F) -> Result<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::RepositoryAccess {
            path: root.to_path_buf(),
            source: std::io::Error::other(e.to_string()),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;
    use crate::progress::tests::Recorder;
    use std::fs;
    use tempfile::TempDir;

    fn config(window: usize, overlap: usize) -> Config {
        let mut config = Config::default();
        config.chunking.window_size = window;
        config.chunking.overlap = overlap;
        config
    }

    fn ingestor(config: &Config) -> Ingestor {
        let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::new(64).unwrap());
        Ingestor::new(config, embedder).unwrap()
    }

    #[tokio::test]
    async fn test_ingest_builds_snapshot_and_index() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a.txt"), "a".repeat(500)).unwrap();
        fs::write(tmp.path().join("b.txt"), "b".repeat(50)).unwrap();
        fs::write(tmp.path().join("c.txt"), "").unwrap();

        let recorder = Arc::new(Recorder::default());
        let ingestion = ingestor(&config(200, 50))
            .with_progress(recorder.clone())
            .ingest(tmp.path(), Some("v1"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(ingestion.snapshot.reference, "v1");
        assert_eq!(ingestion.snapshot.file_count(), 3);
        assert_eq!(ingestion.index.len(), 4);
        assert!(ingestion.warnings.is_empty());

        let events = recorder.0.lock().unwrap();
        assert!(matches!(events[0], ProgressEvent::Discovering { .. }));
        assert!(events.contains(&ProgressEvent::Chunking { n: 3, total: 3 }));
        assert_eq!(events.last(), Some(&ProgressEvent::Done { entries: 4 }));
    }

    #[tokio::test]
    async fn test_undecodable_file_is_skipped_whole() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("good.txt"), "hello world").unwrap();
        // Known text extension, so the sniffer does not reject it up front.
        let mut bad = "x".repeat(300).into_bytes();
        bad.extend_from_slice(&[0xff, 0xfe, 0xfd]);
        fs::write(tmp.path().join("bad.txt"), bad).unwrap();

        let ingestion = ingestor(&config(100, 10))
            .ingest(tmp.path(), Some("r"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(ingestion.index.len(), 1);
        assert!(ingestion
            .index
            .entries()
            .iter()
            .all(|e| &*e.chunk.path == "good.txt"));
        assert_eq!(ingestion.warnings.len(), 1);
        assert_eq!(ingestion.warnings[0].path, "bad.txt");
        assert!(ingestion.snapshot.file("bad.txt").is_none());
    }

    #[tokio::test]
    async fn test_missing_root_is_repository_access_error() {
        let tmp = TempDir::new().unwrap();
        let result = ingestor(&Config::default())
            .ingest(&tmp.path().join("nope"), None, &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(Error::RepositoryAccess { .. })));
    }

    #[tokio::test]
    async fn test_cancelled_ingestion() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a.txt"), "content").unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = ingestor(&Config::default())
            .ingest(tmp.path(), None, &cancel)
            .await;
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[test]
    fn test_invalid_config_rejected_before_work() {
        let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::new(8).unwrap());
        assert!(matches!(
            Ingestor::new(&config(100, 100), embedder),
            Err(Error::Configuration { .. })
        ));
    }

    #[test]
    fn test_content_fingerprint_tracks_file_set() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a.rs"), "fn a() {}\n").unwrap();
        fs::write(tmp.path().join("b.rs"), "fn b() { 2 }\n").unwrap();
        let a = FileRecord::new("a.rs", tmp.path().join("a.rs"), 10);
        let b = FileRecord::new("b.rs", tmp.path().join("b.rs"), 13);
        let one = content_fingerprint(&[a.clone(), b.clone()]);
        assert!(one.starts_with("content:"));
        assert_eq!(one.len(), "content:".len() + 12);
        assert_eq!(one, content_fingerprint(&[a.clone(), b.clone()]));
        assert_ne!(one, content_fingerprint(&[a.clone()]));

        fs::write(tmp.path().join("b.rs"), "fn b() { 3 }\n").unwrap();
        assert_ne!(one, content_fingerprint(&[a, b]));
    }
}
