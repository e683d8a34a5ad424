//! Pass results reported to operators and schedulers

use serde::{Deserialize, Serialize};
use std::ops::AddAssign;
use std::path::PathBuf;

/// Counts from one reconciliation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexResult {
    /// Chunks newly embedded and written
    pub added: usize,
    /// Stale chunks removed
    pub deleted: usize,
    /// Chunks already indexed
    pub skipped: usize,
}

impl IndexResult {
    pub fn new(added: usize, deleted: usize, skipped: usize) -> Self {
        Self { added, deleted, skipped }
    }
}

impl AddAssign for IndexResult {
    fn add_assign(&mut self, other: Self) {
        self.added += other.added;
        self.deleted += other.deleted;
        self.skipped += other.skipped;
    }
}

/// Lifecycle of a source file during a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileState {
    /// Waiting in the incoming folder
    Incoming,
    /// Being chunked and synchronized
    Processing,
    /// Indexed and moved to the processed folder (terminal)
    Processed,
    /// Pass failed; file left in the incoming folder for retry
    Failed,
}

/// What happened to one file in a pass
#[derive(Debug, Clone, Serialize)]
pub struct FileOutcome {
    /// Path of the file in the incoming folder
    pub path: PathBuf,
    /// Source identifier used for chunk identity
    pub source_id: String,
    /// Final state reached in this pass
    pub state: FileState,
    /// Counts for this file (zero on failure)
    pub result: IndexResult,
    /// Where the file now lives, when archived
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archived_to: Option<PathBuf>,
    /// Error category, when failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    /// Error message, when failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of one ingestion pass over the incoming folder
#[derive(Debug, Clone, Serialize)]
pub struct IngestionReport {
    pub group_key: String,
    /// Totals over successfully processed files
    pub result: IndexResult,
    /// Per-file outcomes, in processing order
    pub files: Vec<FileOutcome>,
}

impl IngestionReport {
    pub fn new(group_key: impl Into<String>) -> Self {
        Self {
            group_key: group_key.into(),
            result: IndexResult::default(),
            files: Vec::new(),
        }
    }

    /// True when no file failed
    pub fn is_success(&self) -> bool {
        self.failed().next().is_none()
    }

    pub fn failed(&self) -> impl Iterator<Item = &FileOutcome> {
        self.files.iter().filter(|f| f.state == FileState::Failed)
    }

    pub fn processed(&self) -> impl Iterator<Item = &FileOutcome> {
        self.files.iter().filter(|f| f.state == FileState::Processed)
    }
}
