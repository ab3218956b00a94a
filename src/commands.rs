//! CLI command implementations.
//!
//! Each `run_*` function backs one `repo-analyst` subcommand. Results go
//! to stdout; warnings, progress, and logs go to stderr.

use anyhow::{Context, Result};
use std::path::Path;
use tokio_util::sync::CancellationToken;

use crate::artifacts::synthesize;
use crate::config::Config;
use crate::embedding::create_embedder;
use crate::ingest::{Ingestion, Ingestor};
use crate::models::SkippedFile;
use crate::progress::ProgressMode;
use crate::retrieve::RetrievalParams;
use crate::select::FileSelector;

/// List the files an ingestion of `root` would index.
pub fn run_files(config: &Config, root: &Path) -> Result<()> {
    config.validate()?;
    let selection = FileSelector::new(&config.ingest)?.select(root)?;
    print_warnings(&selection.skipped);

    if selection.files.is_empty() {
        println!("No eligible files.");
        return Ok(());
    }
    for file in &selection.files {
        println!(
            "{:>10}  {:<7} {}",
            format_bytes(file.size),
            file.category.to_string(),
            file.path
        );
    }
    println!();
    println!("{} files", selection.files.len());
    Ok(())
}

/// Ingest `root` and print snapshot and index statistics.
pub async fn run_index(
    config: &Config,
    root: &Path,
    reference: Option<&str>,
    progress: ProgressMode,
) -> Result<()> {
    let ingestion = ingest(config, root, reference, progress).await?;
    let snapshot = &ingestion.snapshot;

    println!("Repository Snapshot");
    println!("===================");
    println!();
    println!("  Repository:  {}", snapshot.repository);
    println!("  Reference:   {}", snapshot.reference);
    println!("  Snapshot:    {}", snapshot.id);
    println!(
        "  Created:     {}",
        snapshot.created_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!();
    println!("  Files:       {}", snapshot.file_count());
    println!("  Size:        {}", format_bytes(snapshot.total_bytes()));
    for (category, count) in snapshot.category_counts() {
        println!("    {:<10} {}", category.to_string(), count);
    }
    println!();
    println!("  Chunks:      {}", ingestion.index.len());
    println!("  Embedder:    {}", ingestion.index.identity());
    println!("  Warnings:    {}", ingestion.warnings.len());

    print_warnings(&ingestion.warnings);
    Ok(())
}

/// Ingest `root`, then print the chunks most relevant to `query`.
pub async fn run_search(
    config: &Config,
    root: &Path,
    query: &str,
    k: Option<i64>,
    json: bool,
    progress: ProgressMode,
) -> Result<()> {
    let ingestion = ingest(config, root, None, progress).await?;
    let retriever = ingestion.retriever(RetrievalParams::from(&config.retrieval))?;
    let result = retriever
        .retrieve(query, k.unwrap_or(config.retrieval.k))
        .await?;
    print_warnings(&ingestion.warnings);

    if json {
        let out = serde_json::json!({
            "repository": ingestion.snapshot.repository,
            "reference": ingestion.snapshot.reference,
            "embedder": ingestion.index.identity(),
            "result": result,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    if result.is_empty() {
        println!("No results.");
        return Ok(());
    }
    for item in result.iter() {
        let range = item.range();
        println!(
            "{}. [{:.2}] {}:{}-{}",
            item.rank,
            item.score,
            item.path(),
            range.start,
            range.end
        );
        let excerpt: String = item.text().chars().take(240).collect();
        println!("    excerpt: \"{}\"", excerpt.replace('\n', " ").trim());
        println!();
    }
    Ok(())
}

/// Ingest `root` and print every artifact.
pub async fn run_analyze(
    config: &Config,
    root: &Path,
    json: bool,
    progress: ProgressMode,
) -> Result<()> {
    let ingestion = ingest(config, root, None, progress).await?;
    let artifacts = synthesize(
        &ingestion,
        None,
        RetrievalParams::from(&config.retrieval),
        config.retrieval.k,
    )
    .await?;
    print_warnings(&ingestion.warnings);

    if json {
        println!("{}", serde_json::to_string_pretty(&artifacts)?);
        return Ok(());
    }
    for artifact in &artifacts {
        println!("# {}", artifact.name);
        println!();
        println!("{}", artifact.content);
        if !artifact.sources.is_empty() {
            println!();
            println!("Sources:");
            for source in &artifact.sources {
                println!(
                    "  - {}:{}-{} ({:.2})",
                    source.path, source.start, source.end, source.score
                );
            }
        }
        println!();
    }
    Ok(())
}

async fn ingest(
    config: &Config,
    root: &Path,
    reference: Option<&str>,
    progress: ProgressMode,
) -> Result<Ingestion> {
    config.validate()?;
    let embedder = create_embedder(&config.embedding)
        .await
        .context("failed to select an embedding strategy")?;
    let ingestor = Ingestor::new(config, embedder)?.with_progress(progress.reporter());
    let cancel = cancel_on_ctrl_c();
    let ingestion = ingestor
        .ingest(root, reference, &cancel)
        .await
        .with_context(|| format!("failed to ingest {}", root.display()))?;
    Ok(ingestion)
}

/// A token cancelled when the process receives Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            child.cancel();
        }
    });
    token
}

fn print_warnings(warnings: &[SkippedFile]) {
    for warning in warnings {
        if warning.path.is_empty() {
            eprintln!("warning: {}", warning.reason);
        } else {
            eprintln!("warning: skipped {}: {}", warning.path, warning.reason);
        }
    }
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
