//! Result types for batch and single-file runs.

use crate::discover::SourceKind;
use crate::error::FileError;
use crate::plan::{ConvertReason, SkipReason};
use serde::Serialize;
use std::path::PathBuf;

/// What happened to one file.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum FileAction {
    /// The full pipeline ran and produced Markdown.
    Converted { reason: ConvertReason },
    /// An office file's intermediate PDF was reused; only the parser ran.
    ParsedOnly,
    /// Nothing to do.
    Skipped { reason: SkipReason },
    /// A collaborator ran but produced no output.
    Failed { detail: String },
    /// A collaborator or the file system faulted.
    Errored { error: FileError },
}

impl FileAction {
    pub fn is_converted(&self) -> bool {
        matches!(self, FileAction::Converted { .. } | FileAction::ParsedOnly)
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, FileAction::Failed { .. } | FileAction::Errored { .. })
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            FileAction::Skipped {
                reason: SkipReason::ConverterUnavailable
            }
        )
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, FileAction::Skipped { .. }) && !self.is_unavailable()
    }
}

/// Outcome for one candidate file.
#[derive(Debug, Clone, Serialize)]
pub struct FileOutcome {
    pub source: PathBuf,
    /// Canonical store key.
    pub key: String,
    pub kind: SourceKind,
    #[serde(flatten)]
    pub action: FileAction,
    /// Final Markdown path, when one exists after this run.
    pub output_path: Option<PathBuf>,
    pub duration_ms: u64,
    /// Intermediate PDF left on disk by this attempt, for end-of-run cleanup.
    #[serde(skip)]
    pub intermediate: Option<PathBuf>,
}

/// Totals for a batch run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchSummary {
    pub converted: usize,
    /// Unchanged files skipped.
    pub skipped: usize,
    pub failed: usize,
    /// Office files skipped because the converter is not installed.
    pub unavailable: usize,
    /// Candidates discovered.
    pub total: usize,
    /// Candidates never started because the run was interrupted.
    pub not_started: usize,
    pub interrupted: bool,
    pub duration_ms: u64,
    pub files: Vec<FileOutcome>,
}

impl BatchSummary {
    /// Tally `files` against `total` discovered candidates.
    pub fn from_outcomes(total: usize, mut files: Vec<FileOutcome>, interrupted: bool) -> Self {
        files.sort_by(|a, b| a.key.cmp(&b.key));
        let count = |f: fn(&FileAction) -> bool| files.iter().filter(|o| f(&o.action)).count();
        Self {
            converted: count(FileAction::is_converted),
            skipped: count(FileAction::is_skipped),
            failed: count(FileAction::is_failure),
            unavailable: count(FileAction::is_unavailable),
            total,
            not_started: total.saturating_sub(files.len()),
            interrupted,
            duration_ms: 0,
            files,
        }
    }

    /// One-line human summary, e.g. `2 converted, 1 skipped, 0 failed of 3 files`.
    pub fn headline(&self) -> String {
        let mut line = format!(
            "{} converted, {} skipped, {} failed of {} file{}",
            self.converted,
            self.skipped,
            self.failed,
            self.total,
            if self.total == 1 { "" } else { "s" }
        );
        if self.unavailable > 0 {
            line.push_str(&format!(" ({} office file(s) skipped: converter unavailable)", self.unavailable));
        }
        if self.interrupted {
            line.push_str(&format!(" (interrupted, {} not started)", self.not_started));
        }
        line
    }
}
