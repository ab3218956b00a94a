//! File selection.
//!
//! Walks a repository root and yields the eligible files in lexicographic
//! order of their relative path. A file is eligible when it matches at
//! least one include glob (or the include set is empty), matches no exclude
//! glob, is within the size limit, and looks like text.
//!
//! Version-control metadata, dependency, and build-output directories are
//! pruned during the walk unless re-included by name. Oversized and binary
//! files are dropped silently; unreadable entries become
//! [`SkippedFile`] warnings.

use globset::{Glob, GlobSet, GlobSetBuilder};
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::IngestConfig;
use crate::error::{Error, Result};
use crate::models::{FileRecord, SkippedFile};

/// Directory names skipped unless listed in `reinclude_dirs`.
pub const DEFAULT_EXCLUDED_DIRS: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    "node_modules",
    "vendor",
    "target",
    "build",
    "dist",
    "__pycache__",
    ".venv",
    "venv",
    ".tox",
    ".mypy_cache",
    ".pytest_cache",
    ".gradle",
    ".next",
];

/// Extensions accepted as text without sniffing their content.
const TEXTUAL_EXTENSIONS: &[&str] = &[
    "py", "md", "json", "yaml", "yml", "toml", "ini", "cfg", "txt", "csv", "tsv", "js", "ts",
    "tsx", "jsx", "java", "go", "rs", "rb", "php", "c", "cpp", "cxx", "h", "hpp", "scala",
];

/// Number of leading bytes inspected by the binary heuristic.
const SNIFF_BYTES: usize = 1024;

/// Result of a selection pass.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    pub files: Vec<FileRecord>,
    pub skipped: Vec<SkippedFile>,
}

#[derive(Debug, Clone)]
pub struct FileSelector {
    include: Option<GlobSet>,
    exclude: GlobSet,
    max_file_size: u64,
    max_files: usize,
    pruned_dirs: Vec<String>,
    follow_symlinks: bool,
}

impl FileSelector {
    /// Compile the configured globs. Invalid patterns are configuration errors.
    pub fn new(config: &IngestConfig) -> Result<Self> {
        let include = if config.include_globs.is_empty() {
            None
        } else {
            Some(build_globset("ingest.include_globs", &config.include_globs)?)
        };
        let exclude = build_globset("ingest.exclude_globs", &config.exclude_globs)?;

        let pruned_dirs = if config.default_excludes {
            DEFAULT_EXCLUDED_DIRS
                .iter()
                .filter(|d| !config.reinclude_dirs.iter().any(|r| r == *d))
                .map(|d| d.to_string())
                .collect()
        } else {
            Vec::new()
        };

        Ok(Self {
            include,
            exclude,
            max_file_size: config.max_file_size,
            max_files: config.max_files,
            pruned_dirs,
            follow_symlinks: config.follow_symlinks,
        })
    }

    /// Whether a relative path passes the include/exclude rules.
    pub fn matches(&self, relative: &str) -> bool {
        let included = self
            .include
            .as_ref()
            .map(|set| set.is_match(relative))
            .unwrap_or(true);
        included && !self.exclude.is_match(relative)
    }

    /// Walk `root` and return the eligible files.
    pub fn select(&self, root: &Path) -> Result<Selection> {
        check_root(root)?;

        let mut skipped = Vec::new();
        let mut candidates: Vec<(String, PathBuf)> = Vec::new();

        let walker = WalkDir::new(root)
            .follow_links(self.follow_symlinks)
            .into_iter()
            .filter_entry(|entry| {
                entry.depth() == 0
                    || !entry.file_type().is_dir()
                    || !self.is_pruned(&entry.file_name().to_string_lossy())
            });

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    if err.depth() == 0 {
                        let source = err
                            .into_io_error()
                            .unwrap_or_else(|| std::io::Error::other("walk failed at root"));
                        return Err(Error::RepositoryAccess {
                            path: root.to_path_buf(),
                            source,
                        });
                    }
                    let path = err
                        .path()
                        .map(|p| relative_path(root, p))
                        .unwrap_or_default();
                    warn!(path = %path, error = %err, "skipping unreadable entry");
                    skipped.push(SkippedFile::new(path, err.to_string()));
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let relative = relative_path(root, entry.path());
            if !self.matches(&relative) {
                continue;
            }
            candidates.push((relative, entry.into_path()));
        }

        candidates.sort_by(|a, b| a.0.cmp(&b.0));

        let mut files = Vec::new();
        let mut remaining = candidates.into_iter();
        for (relative, abs_path) in remaining.by_ref() {
            let size = match std::fs::metadata(&abs_path) {
                Ok(meta) => meta.len(),
                Err(err) => {
                    warn!(path = %relative, error = %err, "skipping file without metadata");
                    skipped.push(SkippedFile::new(relative, err.to_string()));
                    continue;
                }
            };
            if size > self.max_file_size {
                debug!(path = %relative, size, "excluding oversized file");
                continue;
            }
            match is_probably_text(&abs_path) {
                Ok(true) => {}
                Ok(false) => {
                    debug!(path = %relative, "excluding binary file");
                    continue;
                }
                Err(err) => {
                    warn!(path = %relative, error = %err, "skipping unreadable file");
                    skipped.push(SkippedFile::new(relative, err.to_string()));
                    continue;
                }
            }

            files.push(FileRecord::new(relative, abs_path, size));
            if files.len() >= self.max_files {
                break;
            }
        }

        let left_out = remaining.count();
        if left_out > 0 {
            warn!(max_files = self.max_files, left_out, "selection truncated");
            skipped.push(SkippedFile::new(
                "",
                format!(
                    "max_files limit of {} reached; {} more candidate files not ingested",
                    self.max_files, left_out
                ),
            ));
        }

        Ok(Selection { files, skipped })
    }

    fn is_pruned(&self, dir_name: &str) -> bool {
        self.pruned_dirs.iter().any(|d| d == dir_name)
    }
}

/// Select files under `root` with the given rules and default exclusions.
pub fn select(
    root: &Path,
    include_patterns: &[String],
    exclude_patterns: &[String],
    max_file_size: u64,
) -> Result<Selection> {
    let config = IngestConfig {
        include_globs: include_patterns.to_vec(),
        exclude_globs: exclude_patterns.to_vec(),
        max_file_size,
        max_files: usize::MAX,
        ..IngestConfig::default()
    };
    FileSelector::new(&config)?.select(root)
}

fn check_root(root: &Path) -> Result<()> {
    let access = |source| Error::RepositoryAccess {
        path: root.to_path_buf(),
        source,
    };
    let meta = std::fs::metadata(root).map_err(access)?;
    if !meta.is_dir() {
        return Err(access(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "repository root is not a directory",
        )));
    }
    std::fs::read_dir(root).map_err(access)?;
    Ok(())
}

fn relative_path(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Guess whether a file holds text.
///
/// Known textual extensions are trusted. Anything else is sampled: a NUL
/// byte or an invalid UTF-8 sequence marks it binary. A multi-byte
/// character cut off by the end of the sample does not count as invalid.
pub fn is_probably_text(path: &Path) -> std::io::Result<bool> {
    let known = path
        .extension()
        .map(|ext| {
            let ext = ext.to_string_lossy().to_ascii_lowercase();
            TEXTUAL_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false);
    if known {
        return Ok(true);
    }

    let mut sample = Vec::with_capacity(SNIFF_BYTES);
    std::fs::File::open(path)?
        .take(SNIFF_BYTES as u64)
        .read_to_end(&mut sample)?;

    if sample.contains(&0) {
        return Ok(false);
    }
    match std::str::from_utf8(&sample) {
        Ok(_) => Ok(true),
        Err(e) => Ok(e.error_len().is_none() && sample.len() == SNIFF_BYTES),
    }
}

fn build_globset(field: &str, patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| Error::config(field, format!("invalid glob '{}': {}", pattern, e)))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| Error::config(field, e.to_string()))
}
