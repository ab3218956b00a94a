//! # Repo Analyst
//!
//! Turns a source repository into a searchable semantic index and answers
//! "which fragments are most relevant to this request" deterministically,
//! even without a learned embedding model. Retrieved fragments ground
//! documentation artifacts: summary, architecture map, diagram, onboarding
//! guide, and change-impact notes.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌─────────┐   ┌──────────┐   ┌─────────────┐
//! │ Selector │──▶│ Chunker │──▶│ Embedder │──▶│ VectorIndex │
//! │ globs    │   │ windows │   │ model or │   │ cosine, k-NN│
//! └──────────┘   └─────────┘   │ hash     │   └──────┬──────┘
//!                              └──────────┘          │
//!                                                    ▼
//!                              ┌───────────┐   ┌───────────┐
//!                              │ Artifacts │◀──│ Retriever │
//!                              └───────────┘   └───────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! repo-analyst files ./my-repo
//! repo-analyst index ./my-repo
//! repo-analyst search ./my-repo "how is configuration loaded" -k 5
//! repo-analyst analyze ./my-repo --json
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`error`] | Error taxonomy |
//! | [`models`] | Snapshots, files, chunks, vectors |
//! | [`select`] | File selection |
//! | [`chunk`] | Sliding-window chunking |
//! | [`embedding`] | Embedding strategies |
//! | [`index`] | Vector index |
//! | [`retrieve`] | Top-k retrieval with deduplication |
//! | [`ingest`] | Ingestion pipeline |
//! | [`session`] | Per-repository index cache |
//! | [`artifacts`] | Documentation artifacts |
//! | [`progress`] | Ingestion progress reporting |
//! | [`logging`] | Log subscriber setup |
//! | [`commands`] | CLI command implementations |

pub mod artifacts;
pub mod chunk;
pub mod commands;
pub mod config;
pub mod embedding;
pub mod error;
pub mod index;
pub mod ingest;
pub mod logging;
pub mod models;
pub mod progress;
pub mod retrieve;
pub mod select;
pub mod session;

pub use error::{Error, Result};
