//! Error taxonomy for ingestion and retrieval.
//!
//! Fatal conditions abort the current operation and are returned as
//! [`Error`]. Per-file read problems during ingestion are not errors: they
//! are converted into [`SkippedFile`](crate::models::SkippedFile) warnings
//! and returned next to the successful result.

use std::path::PathBuf;

use thiserror::Error;

/// Result alias used throughout the library.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// The repository root could not be read. Aborts ingestion.
    #[error("repository not accessible at {}: {source}", path.display())]
    RepositoryAccess {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Invalid glob, window, overlap, `k`, or other configuration value.
    /// Raised before any work starts.
    #[error("invalid configuration for `{field}`: {message}")]
    Configuration { field: String, message: String },

    /// The selected embedding backend failed or is unavailable.
    #[error("embedding backend error: {message}")]
    EmbeddingBackend { message: String },

    /// Query and index vectors come from different strategies or have
    /// different sizes.
    #[error("dimension mismatch: index expects {expected} dimensions, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Same strategy and size, but a different model produced the vectors.
    #[error("embedder mismatch: index was built with {index}, query uses {query}")]
    EmbedderMismatch { index: String, query: String },

    /// The text-generation collaborator failed while producing an artifact.
    #[error("text generation failed: {message}")]
    Generation { message: String },

    /// The surrounding analysis request was cancelled.
    #[error("ingestion cancelled")]
    Cancelled,

    /// A single file could not be read or decoded.
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub fn config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Configuration {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn backend(message: impl Into<String>) -> Self {
        Error::EmbeddingBackend {
            message: message.into(),
        }
    }

    /// Whether the error aborts the whole ingestion rather than one file.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Error::Io { .. })
    }
}

/// Check that a vector has the dimensionality the index expects.
pub fn validate_dimension(expected: usize, actual: usize) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(Error::DimensionMismatch { expected, actual })
    }
}
