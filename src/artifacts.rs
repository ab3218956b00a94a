//! Documentation artifacts built from an ingestion.
//!
//! Structural artifacts (architecture map, Mermaid diagram) need only the
//! snapshot's paths. Prose artifacts (summary, onboarding guide, change
//! impact) retrieve the chunks most relevant to a fixed per-kind query and
//! hand them, with provenance, to a [`TextGenerator`]. Without a generator
//! they fall back to heuristic text derived from the file list.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use tracing::{debug, warn};

use crate::error::Result;
use crate::ingest::Ingestion;
use crate::models::RepositorySnapshot;
use crate::retrieve::{RetrievalParams, RetrievalResult};

/// Entries shown per directory in the Mermaid diagram.
const DIAGRAM_DIR_LIMIT: usize = 10;
const DIAGRAM_FILE_LIMIT: usize = 10;
const README_EXCERPT_LINES: usize = 12;
const SAMPLE_FILES: usize = 10;
const TOP_COUNTS: usize = 8;
const EXCERPT_CHARS: usize = 1200;

const SYSTEM_PROMPT: &str = "You document codebases for engineers joining the project. \
Ground every statement in the excerpts provided and cite file paths.";

/// External text-generation backend.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Failures should be reported as [`Error::Generation`](crate::error::Error::Generation).
    async fn generate(&self, system: &str, prompt: &str) -> Result<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Summary,
    ArchitectureMap,
    MermaidDiagram,
    OnboardingGuide,
    ChangeImpact,
    RetrievalNote,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 6] = [
        ArtifactKind::Summary,
        ArtifactKind::ArchitectureMap,
        ArtifactKind::MermaidDiagram,
        ArtifactKind::OnboardingGuide,
        ArtifactKind::ChangeImpact,
        ArtifactKind::RetrievalNote,
    ];

    pub fn title(&self) -> &'static str {
        match self {
            ArtifactKind::Summary => "Repository Summary",
            ArtifactKind::ArchitectureMap => "Architecture Map",
            ArtifactKind::MermaidDiagram => "Mermaid Diagram",
            ArtifactKind::OnboardingGuide => "Onboarding Guide",
            ArtifactKind::ChangeImpact => "Change Impact Analysis",
            ArtifactKind::RetrievalNote => "Vector Index",
        }
    }

    /// Retrieval query for prose artifacts; `None` for structural ones.
    pub fn query(&self) -> Option<&'static str> {
        match self {
            ArtifactKind::Summary => {
                Some("summarize the architecture, purpose, and main components of this repository")
            }
            ArtifactKind::OnboardingGuide => {
                Some("how to install, configure, build, run, and test this project")
            }
            ArtifactKind::ChangeImpact => Some(
                "core modules, shared interfaces, and configuration that many other files depend on",
            ),
            _ => None,
        }
    }

    pub fn format(&self) -> ArtifactFormat {
        match self {
            ArtifactKind::ArchitectureMap => ArtifactFormat::Json,
            ArtifactKind::MermaidDiagram => ArtifactFormat::Mermaid,
            _ => ArtifactFormat::Markdown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactFormat {
    Markdown,
    Json,
    Mermaid,
}

/// Where a retrieved excerpt came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Provenance {
    pub path: String,
    pub start: usize,
    pub end: usize,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct Artifact {
    pub kind: ArtifactKind,
    pub name: String,
    pub format: ArtifactFormat,
    pub content: String,
    pub sources: Vec<Provenance>,
}

impl Artifact {
    fn new(kind: ArtifactKind, content: String) -> Self {
        Self {
            kind,
            name: kind.title().to_string(),
            format: kind.format(),
            content,
            sources: Vec::new(),
        }
    }
}

/// Nested directory tree of file names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchitectureMap {
    pub dirs: BTreeMap<String, ArchitectureMap>,
    pub files: Vec<String>,
}

impl ArchitectureMap {
    pub fn from_paths<'a>(paths: impl IntoIterator<Item = &'a str>) -> Self {
        let mut root = ArchitectureMap::default();
        for path in paths {
            let mut parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
            let Some(file) = parts.pop() else { continue };
            let mut node = &mut root;
            for dir in parts {
                node = node.dirs.entry(dir.to_string()).or_default();
            }
            node.files.push(file.to_string());
        }
        root
    }

    /// JSON shape: one key per directory, files under `"__files__"`.
    pub fn to_json(&self) -> serde_json::Value {
        let mut obj = serde_json::Map::new();
        for (name, child) in &self.dirs {
            obj.insert(name.clone(), child.to_json());
        }
        if !self.files.is_empty() {
            obj.insert("__files__".to_string(), serde_json::json!(self.files));
        }
        serde_json::Value::Object(obj)
    }

    pub fn to_mermaid(&self) -> String {
        let mut lines = vec!["graph TD".to_string(), "    Repo[Repository]".to_string()];
        let mut next_id = 0usize;
        self.walk_mermaid("Repo", &mut next_id, &mut lines);
        lines.join("\n")
    }

    fn walk_mermaid(&self, parent: &str, next_id: &mut usize, lines: &mut Vec<String>) {
        for (name, child) in self.dirs.iter().take(DIAGRAM_DIR_LIMIT) {
            let id = node_id(next_id, name);
            lines.push(format!("    {} --> {}[\"{}/\"]", parent, id, escape_label(name)));
            child.walk_mermaid(&id, next_id, lines);
        }
        for file in self.files.iter().take(DIAGRAM_FILE_LIMIT) {
            let id = node_id(next_id, file);
            lines.push(format!("    {} --> {}[\"{}\"]", parent, id, escape_label(file)));
        }
    }
}

/// Unique per diagram: sanitising alone maps `a-b` and `a_b` to one id.
fn node_id(next_id: &mut usize, name: &str) -> String {
    *next_id += 1;
    let clean: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("n{}_{}", next_id, clean)
}

fn escape_label(name: &str) -> String {
    name.replace('"', "#quot;")
}

fn plural(count: usize) -> &'static str {
    if count == 1 {
        ""
    } else {
        "s"
    }
}

/// `(key, count)` pairs, most common first, ties alphabetical.
fn top_counts(counts: HashMap<String, usize>, limit: usize) -> Vec<(String, usize)> {
    let mut pairs: Vec<(String, usize)> = counts.into_iter().collect();
    pairs.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    pairs.truncate(limit);
    pairs
}

pub fn heuristic_summary(snapshot: &RepositorySnapshot) -> String {
    if snapshot.files.is_empty() {
        return "No textual documents were discovered in the repository.".to_string();
    }

    let mut extensions: HashMap<String, usize> = HashMap::new();
    let mut dirs: HashMap<String, usize> = HashMap::new();
    for file in &snapshot.files {
        *extensions.entry(file.extension()).or_insert(0) += 1;
        let top = match file.path.split_once('/') {
            Some((dir, _)) => dir.to_string(),
            None => "<root>".to_string(),
        };
        *dirs.entry(top).or_insert(0) += 1;
    }

    let mut out = String::new();
    let _ = writeln!(out, "## Repository Overview");
    let _ = writeln!(
        out,
        "- Total textual documents processed: {}",
        snapshot.file_count()
    );
    let _ = writeln!(out, "- Primary languages / file types:");
    for (ext, count) in top_counts(extensions, TOP_COUNTS) {
        let _ = writeln!(out, "  - `{}`: {} file{}", ext, count, plural(count));
    }
    let _ = writeln!(out, "- Key directories:");
    for (dir, count) in top_counts(dirs, TOP_COUNTS) {
        let _ = writeln!(out, "  - `{}`: {} file{}", dir, count, plural(count));
    }

    if let Some(excerpt) = readme_excerpt(snapshot) {
        let _ = writeln!(out, "\n### README Highlights");
        let _ = writeln!(out, "{}", excerpt);
    }

    let _ = writeln!(out, "\n### Sample Files Considered");
    for path in snapshot.paths().take(SAMPLE_FILES) {
        let _ = writeln!(out, "- `{}`", path);
    }
    out.trim_end().to_string()
}

fn readme_excerpt(snapshot: &RepositorySnapshot) -> Option<String> {
    let readme = snapshot
        .files
        .iter()
        .find(|f| f.file_name().to_ascii_lowercase().starts_with("readme"))?;
    let text = match readme.text() {
        Ok(text) => text,
        Err(err) => {
            warn!(path = %readme.path, error = %err, "README unreadable, omitting excerpt");
            return None;
        }
    };
    let lines: Vec<&str> = text
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(str::trim_end)
        .take(README_EXCERPT_LINES)
        .collect();
    (!lines.is_empty()).then(|| lines.join("\n"))
}

pub fn onboarding_guide(snapshot: &RepositorySnapshot) -> String {
    if snapshot.files.is_empty() {
        return "Repository appears empty; nothing to onboard.".to_string();
    }
    let mut out = String::from("## Onboarding Guide\n\n");
    out.push_str("1. Clone the repository and install dependencies.\n");
    out.push_str("2. Review the primary project files:\n");
    for path in snapshot.paths().take(5) {
        let _ = writeln!(out, "   - `{}`", path);
    }
    out.push_str("3. Run the automated tests to validate the setup.\n");
    out.push_str("4. Explore remaining modules following the architecture map.");
    out
}

pub fn change_impact(snapshot: &RepositorySnapshot) -> String {
    if snapshot.files.is_empty() {
        return "No changes detected; repository contains no textual files.".to_string();
    }
    let mut extensions: BTreeMap<String, usize> = BTreeMap::new();
    for file in &snapshot.files {
        *extensions.entry(file.extension()).or_insert(0) += 1;
    }
    let mut out = String::from("## Change Impact Considerations\n\n");
    out.push_str(
        "When modifying this repository, pay attention to the following file type distribution:\n",
    );
    for (ext, count) in extensions {
        let _ = writeln!(out, "- `{}`: {} file{}", ext, count, plural(count));
    }
    out.push_str("\nUse search to check whether a change touches related files.");
    out
}

pub fn retrieval_note(ingestion: &Ingestion) -> String {
    format!(
        "Vector index built with {} chunks from {} files using `{}`.",
        ingestion.index.len(),
        ingestion.snapshot.file_count(),
        ingestion.index.identity()
    )
}

/// Prompt for `kind`: repository facts plus the retrieved excerpts.
pub fn render_prompt(
    kind: ArtifactKind,
    snapshot: &RepositorySnapshot,
    retrieved: &RetrievalResult,
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Write the \"{}\" for this repository.", kind.title());
    let _ = writeln!(
        out,
        "Repository: {} at {}",
        snapshot.repository, snapshot.reference
    );
    let _ = writeln!(
        out,
        "{} textual files. Sample paths:",
        snapshot.file_count()
    );
    for path in snapshot.paths().take(SAMPLE_FILES) {
        let _ = writeln!(out, "- `{}`", path);
    }
    if !retrieved.is_empty() {
        let _ = writeln!(out, "\nRelevant excerpts:");
    }
    for item in retrieved.iter() {
        let range = item.range();
        let _ = writeln!(
            out,
            "\n[{}] {}:{}-{} (score {:.3})",
            item.rank,
            item.path(),
            range.start,
            range.end,
            item.score
        );
        let excerpt: String = item.text().chars().take(EXCERPT_CHARS).collect();
        let _ = writeln!(out, "```\n{}\n```", excerpt);
    }
    out
}

fn provenance(retrieved: &RetrievalResult) -> Vec<Provenance> {
    retrieved
        .iter()
        .map(|item| Provenance {
            path: item.path().to_string(),
            start: item.chunk.start,
            end: item.chunk.end,
            score: item.score,
        })
        .collect()
}

/// Produce every artifact for `ingestion`.
///
/// Prose artifacts retrieve `k` chunks each. With a `generator` their text
/// comes from it; otherwise from the heuristics above.
pub async fn synthesize(
    ingestion: &Ingestion,
    generator: Option<&dyn TextGenerator>,
    params: RetrievalParams,
    k: i64,
) -> Result<Vec<Artifact>> {
    let retriever = ingestion.retriever(params)?;
    let snapshot = ingestion.snapshot.as_ref();
    let map = ArchitectureMap::from_paths(snapshot.paths());
    let mut artifacts = Vec::with_capacity(ArtifactKind::ALL.len());

    for kind in ArtifactKind::ALL {
        let artifact = match kind {
            ArtifactKind::ArchitectureMap => {
                let json = serde_json::to_string_pretty(&map.to_json())
                    .unwrap_or_else(|_| "{}".to_string());
                Artifact::new(kind, json)
            }
            ArtifactKind::MermaidDiagram => Artifact::new(kind, map.to_mermaid()),
            ArtifactKind::RetrievalNote => {
                if ingestion.index.is_empty() {
                    continue;
                }
                Artifact::new(kind, retrieval_note(ingestion))
            }
            ArtifactKind::Summary | ArtifactKind::OnboardingGuide | ArtifactKind::ChangeImpact => {
                let query = kind.query().unwrap_or(kind.title());
                let retrieved = retriever.retrieve(query, k).await?;
                debug!(artifact = kind.title(), excerpts = retrieved.len(), "context retrieved");
                let content = match generator {
                    Some(generator) if !snapshot.files.is_empty() => {
                        let prompt = render_prompt(kind, snapshot, &retrieved);
                        generator.generate(SYSTEM_PROMPT, &prompt).await?
                    }
                    _ => match kind {
                        ArtifactKind::Summary => heuristic_summary(snapshot),
                        ArtifactKind::OnboardingGuide => onboarding_guide(snapshot),
                        _ => change_impact(snapshot),
                    },
                };
                let mut artifact = Artifact::new(kind, content);
                artifact.sources = provenance(&retrieved);
                artifact
            }
        };
        artifacts.push(artifact);
    }

    Ok(artifacts)
}
