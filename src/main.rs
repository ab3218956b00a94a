//! # Repo Analyst CLI (`repo-analyst`)
//!
//! Ingests a repository, builds its semantic index, and answers queries or
//! produces documentation artifacts from it.
//!
//! ## Usage
//!
//! ```bash
//! repo-analyst --config ./repo-analyst.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `repo-analyst files <root>` | List the files that would be indexed |
//! | `repo-analyst index <root>` | Ingest and print snapshot/index statistics |
//! | `repo-analyst search <root> "<query>"` | Retrieve the most relevant chunks |
//! | `repo-analyst analyze <root>` | Produce every documentation artifact |

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use repo_analyst::commands;
use repo_analyst::config;
use repo_analyst::logging;
use repo_analyst::progress::ProgressMode;

/// Repo Analyst: semantic retrieval over source repositories.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. Without it, built-in defaults apply (hash embeddings, 750/150
/// character windows).
#[derive(Parser)]
#[command(name = "repo-analyst", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Progress output on stderr: `off`, `human`, or `json`.
    ///
    /// Defaults to `human` when stderr is a terminal, otherwise `off`.
    #[arg(long, global = true)]
    progress: Option<ProgressMode>,

    /// Log at debug level (overridden by `REPO_ANALYST_LOG`).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the files selected for indexing.
    Files {
        /// Repository root.
        root: PathBuf,
    },

    /// Ingest a repository and print index statistics.
    Index {
        /// Repository root.
        root: PathBuf,

        /// Commit, branch, or label recorded as the snapshot reference.
        /// Resolved from `git rev-parse HEAD` or file contents when absent.
        #[arg(long = "ref")]
        reference: Option<String>,
    },

    /// Retrieve the chunks most relevant to a query.
    Search {
        /// Repository root.
        root: PathBuf,

        /// Natural-language query.
        query: String,

        /// Number of results (must be >= 1).
        #[arg(short, long, allow_negative_numbers = true)]
        k: Option<i64>,

        /// Print results as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Produce summary, architecture map, diagram, onboarding guide, and
    /// change-impact notes.
    Analyze {
        /// Repository root.
        root: PathBuf,

        /// Print artifacts as JSON.
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(cli.config.as_deref())?;
    logging::init_logging(&cfg.logging, cli.verbose);
    let progress = cli.progress.unwrap_or_else(ProgressMode::default_for_tty);

    match cli.command {
        Commands::Files { root } => {
            commands::run_files(&cfg, &root)?;
        }
        Commands::Index { root, reference } => {
            commands::run_index(&cfg, &root, reference.as_deref(), progress).await?;
        }
        Commands::Search {
            root,
            query,
            k,
            json,
        } => {
            commands::run_search(&cfg, &root, &query, k, json, progress).await?;
        }
        Commands::Analyze { root, json } => {
            commands::run_analyze(&cfg, &root, json, progress).await?;
        }
    }

    Ok(())
}
