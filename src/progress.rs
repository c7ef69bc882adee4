//! Ingestion progress reporting.
//!
//! The orchestrator emits [`IngestEvent`]s as it works through folders,
//! documents, and batches; a [`ProgressReporter`] decides what the user
//! sees. Progress goes to **stderr** so stdout stays parseable for scripts:
//! the final `Upload of N documents complete.` line is the only thing the
//! ingest commands print to stdout.

use std::io::Write;

use anyhow::{bail, Result};
use serde::Serialize;

/// A single progress event.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum IngestEvent {
    /// The folder list is known.
    FoldersListed { count: usize },
    /// Starting folder `n` of `total` (1-based).
    FolderStarted { folder: String, n: usize, total: usize },
    /// The source returned nothing for this folder.
    FolderEmpty { folder: String },
    /// The source failed on this folder; the run moves on.
    FolderFailed { folder: String, error: String },
    /// A document was split into `chunks` passages.
    DocumentChunked { folder: String, name: String, chunks: usize },
    /// A chunk could not be embedded and was left out.
    ChunkSkipped { record_id: String, error: String },
    /// All records for the folder are built and about to be uploaded.
    RecordsReady { folder: String, records: usize },
    /// One upload batch finished.
    BatchUploaded {
        folder: String,
        batch: usize,
        size: usize,
        succeeded: usize,
        failed: bool,
    },
}

pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: &IngestEvent);
}

/// Human-friendly lines on stderr.
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: &IngestEvent) {
        let line = match event {
            IngestEvent::FoldersListed { count } => {
                format!("found {} folders\n", format_number(*count as u64))
            }
            IngestEvent::FolderStarted { folder, n, total } => {
                format!("processing folder {}  ({} / {})\n", folder, n, total)
            }
            IngestEvent::FolderEmpty { folder } => {
                format!("  {}  no documents found\n", folder)
            }
            IngestEvent::FolderFailed { folder, error } => {
                format!("  {}  failed: {}\n", folder, error)
            }
            IngestEvent::DocumentChunked { name, chunks, .. } => {
                format!("  {}  {} chunks\n", name, format_number(*chunks as u64))
            }
            IngestEvent::ChunkSkipped { record_id, error } => {
                format!("  skipped {}: {}\n", record_id, error)
            }
            IngestEvent::RecordsReady { folder, records } => {
                format!("  {}  {} records to upload\n", folder, format_number(*records as u64))
            }
            IngestEvent::BatchUploaded {
                batch,
                size,
                succeeded,
                failed,
                ..
            } => {
                if *failed {
                    format!("  batch {}  failed ({} records not indexed)\n", batch, size)
                } else {
                    format!("  batch {}  {} / {} records indexed\n", batch, succeeded, size)
                }
            }
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: &IngestEvent) {
        if let Ok(line) = serde_json::to_string(event) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: &IngestEvent) {}
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
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    /// Resolve the `--progress` flag, falling back to [`default_for_tty`](Self::default_for_tty).
    pub fn from_flag(flag: Option<&str>) -> Result<Self> {
        match flag {
            None => Ok(Self::default_for_tty()),
            Some("human") => Ok(ProgressMode::Human),
            Some("json") => Ok(ProgressMode::Json),
            Some("off") => Ok(ProgressMode::Off),
            Some(other) => bail!("Unknown progress mode: {} (expected human, json, or off)", other),
        }
    }

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
