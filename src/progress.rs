//! Ingestion progress reporting.
//!
//! Reports what is being scanned, chunked, and embedded so a long build is
//! observable. Progress is emitted on **stderr** so stdout remains parseable
//! for scripts.

use std::io::{IsTerminal, Write};
use std::str::FromStr;
use std::sync::Arc;

/// A single progress event for one ingestion.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProgressEvent {
    /// Walking the repository root. Total unknown.
    Discovering { root: String },
    /// Selection finished.
    Selected { files: u64, skipped: u64 },
    /// n files chunked out of total.
    Chunking { n: u64, total: u64 },
    /// n chunks embedded out of total.
    Embedding { n: u64, total: u64 },
    /// Index built.
    Done { entries: u64 },
}

impl ProgressEvent {
    fn phase(&self) -> &'static str {
        match self {
            ProgressEvent::Discovering { .. } => "discovering",
            ProgressEvent::Selected { .. } => "selected",
            ProgressEvent::Chunking { .. } => "chunking",
            ProgressEvent::Embedding { .. } => "embedding",
            ProgressEvent::Done { .. } => "done",
        }
    }
}

/// Reports ingestion progress. Implementations write to stderr (human or JSON).
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Human-friendly progress on stderr: "index  embedding  1,234 / 5,000 chunks".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ProgressEvent) {
        let line = match &event {
            ProgressEvent::Discovering { root } => format!("index {}  discovering...\n", root),
            ProgressEvent::Selected { files, skipped } => format!(
                "index  selected  {} files ({} skipped)\n",
                format_number(*files),
                format_number(*skipped)
            ),
            ProgressEvent::Chunking { n, total } => format!(
                "index  chunking  {} / {} files\n",
                format_number(*n),
                format_number(*total)
            ),
            ProgressEvent::Embedding { n, total } => format!(
                "index  embedding  {} / {} chunks\n",
                format_number(*n),
                format_number(*total)
            ),
            ProgressEvent::Done { entries } => {
                format!("index  done  {} entries\n", format_number(*entries))
            }
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl JsonProgress {
    fn to_json(event: &ProgressEvent) -> serde_json::Value {
        let mut obj = serde_json::json!({
            "event": "progress",
            "phase": event.phase(),
        });
        let extra = match event {
            ProgressEvent::Discovering { root } => serde_json::json!({ "root": root }),
            ProgressEvent::Selected { files, skipped } => {
                serde_json::json!({ "files": files, "skipped": skipped })
            }
            ProgressEvent::Chunking { n, total } | ProgressEvent::Embedding { n, total } => {
                serde_json::json!({ "n": n, "total": total })
            }
            ProgressEvent::Done { entries } => serde_json::json!({ "entries": entries }),
        };
        if let (Some(obj), serde_json::Value::Object(extra)) = (obj.as_object_mut(), extra) {
            obj.extend(extra);
        }
        obj
    }
}

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ProgressEvent) {
        if let Ok(line) = serde_json::to_string(&Self::to_json(&event)) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if std::io::stderr().is_terminal() {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Arc<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Arc::new(NoProgress),
            ProgressMode::Human => Arc::new(StderrProgress),
            ProgressMode::Json => Arc::new(JsonProgress),
        }
    }
}

impl FromStr for ProgressMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "off" => Ok(ProgressMode::Off),
            "human" => Ok(ProgressMode::Human),
            "json" => Ok(ProgressMode::Json),
            other => Err(format!(
                "unknown progress mode '{}' (expected off, human, or json)",
                other
            )),
        }
    }
}
