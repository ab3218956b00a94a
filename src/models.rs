//! Core data models used throughout the ingestion and retrieval pipeline.
//!
//! These types carry no knowledge of any service or UI layer. Chunks are
//! shared between chunker output, index entries, and retrieval results
//! through [`Arc`], never copied.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Broad kind of a repository file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileCategory {
    Code,
    Doc,
    Config,
    Other,
}

impl std::fmt::Display for FileCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FileCategory::Code => "code",
            FileCategory::Doc => "doc",
            FileCategory::Config => "config",
            FileCategory::Other => "other",
        };
        f.write_str(s)
    }
}

/// Classify a relative path by its extension.
///
/// Returns the category and, for code files, a short language label.
pub fn classify(path: &str) -> (FileCategory, Option<&'static str>) {
    let file_name = path.rsplit('/').next().unwrap_or(path);
    let ext = match file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => ext.to_ascii_lowercase(),
        _ => {
            return match file_name {
                "Dockerfile" | "Makefile" | "Justfile" => (FileCategory::Config, None),
                "README" | "LICENSE" | "CHANGELOG" => (FileCategory::Doc, None),
                _ => (FileCategory::Other, None),
            };
        }
    };

    let language = match ext.as_str() {
        "rs" => "rust",
        "py" => "python",
        "js" | "jsx" | "mjs" | "cjs" => "javascript",
        "ts" | "tsx" => "typescript",
        "go" => "go",
        "java" => "java",
        "kt" | "kts" => "kotlin",
        "scala" => "scala",
        "rb" => "ruby",
        "php" => "php",
        "c" | "h" => "c",
        "cpp" | "cc" | "cxx" | "hpp" | "hh" => "cpp",
        "cs" => "csharp",
        "swift" => "swift",
        "sh" | "bash" | "zsh" => "shell",
        "sql" => "sql",
        "lua" => "lua",
        "html" | "htm" => "html",
        "css" | "scss" => "css",
        _ => "",
    };
    if !language.is_empty() {
        return (FileCategory::Code, Some(language));
    }

    match ext.as_str() {
        "md" | "markdown" | "rst" | "txt" | "adoc" => (FileCategory::Doc, None),
        "toml" | "yaml" | "yml" | "json" | "ini" | "cfg" | "conf" | "lock" | "env" | "xml" => {
            (FileCategory::Config, None)
        }
        _ => (FileCategory::Other, None),
    }
}

/// One eligible file of a [`RepositorySnapshot`].
///
/// `path` is relative to the snapshot root and always uses `/` separators.
/// The text is read lazily on first use of [`FileRecord::text`]; the
/// chunker streams from disk and never needs it.
#[derive(Debug, Clone, Serialize)]
pub struct FileRecord {
    pub path: String,
    #[serde(skip)]
    pub abs_path: PathBuf,
    pub size: u64,
    pub category: FileCategory,
    pub language: Option<&'static str>,
    #[serde(skip)]
    text: OnceLock<Arc<str>>,
}

impl FileRecord {
    pub fn new(path: impl Into<String>, abs_path: impl Into<PathBuf>, size: u64) -> Self {
        let path = path.into();
        let (category, language) = classify(&path);
        Self {
            path,
            abs_path: abs_path.into(),
            size,
            category,
            language,
            text: OnceLock::new(),
        }
    }

    /// The file's full text, loaded once.
    pub fn text(&self) -> Result<Arc<str>> {
        if let Some(text) = self.text.get() {
            return Ok(Arc::clone(text));
        }
        let loaded: Arc<str> = std::fs::read_to_string(&self.abs_path)
            .map_err(|source| Error::Io {
                path: self.abs_path.clone(),
                source,
            })?
            .into();
        Ok(Arc::clone(self.text.get_or_init(|| loaded)))
    }

    /// File name without its directory.
    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    /// Lowercased extension including the dot, or `"<none>"`.
    pub fn extension(&self) -> String {
        match self.file_name().rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => format!(".{}", ext.to_ascii_lowercase()),
            _ => "<none>".to_string(),
        }
    }
}

/// A bounded, offset-tagged slice of a file's text.
///
/// Offsets are character offsets into the file; `start..end` is half-open.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Chunk {
    pub path: Arc<str>,
    pub start: usize,
    pub end: usize,
    /// Position of this chunk within its file, starting at 0.
    pub index: usize,
    pub text: String,
    pub token_estimate: usize,
    /// SHA-256 of `text`.
    pub hash: String,
}

impl Chunk {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }

    /// Number of characters shared by two ranges of the same file.
    pub fn overlap_with(&self, other: &Chunk) -> usize {
        if self.path != other.path {
            return 0;
        }
        let lo = self.start.max(other.start);
        let hi = self.end.min(other.end);
        hi.saturating_sub(lo)
    }
}

/// A dense embedding of fixed dimensionality.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct EmbeddingVector(Vec<f32>);

impl EmbeddingVector {
    pub fn new(values: Vec<f32>) -> Self {
        Self(values)
    }

    pub fn zeros(dims: usize) -> Self {
        Self(vec![0.0; dims])
    }

    pub fn dims(&self) -> usize {
        self.0.len()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn into_inner(self) -> Vec<f32> {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|v| *v == 0.0)
    }

    pub fn norm(&self) -> f32 {
        self.0.iter().map(|v| v * v).sum::<f32>().sqrt()
    }

    /// Scale to unit length. The zero vector stays zero.
    pub fn normalized(mut self) -> Self {
        let norm = self.norm();
        if norm > f32::EPSILON {
            for v in &mut self.0 {
                *v /= norm;
            }
        }
        self
    }
}

impl From<Vec<f32>> for EmbeddingVector {
    fn from(values: Vec<f32>) -> Self {
        Self(values)
    }
}

/// A vector plus the chunk it was computed from, owned by the index.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    /// Assigned at insertion, strictly increasing.
    pub id: u64,
    pub vector: EmbeddingVector,
    pub chunk: Arc<Chunk>,
}

/// A file left out of ingestion, reported next to the result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedFile {
    pub path: String,
    pub reason: String,
}

impl SkippedFile {
    pub fn new(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Immutable view of a repository's eligible files at one reference.
///
/// Re-ingesting the same repository at another reference produces a new
/// snapshot; this one is never mutated.
#[derive(Debug, Clone, Serialize)]
pub struct RepositorySnapshot {
    pub id: Uuid,
    #[serde(skip)]
    pub root: PathBuf,
    /// Canonical root path, used as the repository identity.
    pub repository: String,
    /// Commit, branch, or content fingerprint.
    pub reference: String,
    pub created_at: DateTime<Utc>,
    pub files: Vec<FileRecord>,
}

impl RepositorySnapshot {
    pub fn new(root: &Path, repository: String, reference: String, files: Vec<FileRecord>) -> Self {
        Self {
            id: Uuid::new_v4(),
            root: root.to_path_buf(),
            repository,
            reference,
            created_at: Utc::now(),
            files,
        }
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.iter().map(|f| f.path.as_str())
    }

    pub fn file(&self, path: &str) -> Option<&FileRecord> {
        self.files
            .binary_search_by(|f| f.path.as_str().cmp(path))
            .ok()
            .map(|i| &self.files[i])
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }

    pub fn category_counts(&self) -> BTreeMap<FileCategory, usize> {
        let mut counts = BTreeMap::new();
        for file in &self.files {
            *counts.entry(file.category).or_insert(0) += 1;
        }
        counts
    }
}
