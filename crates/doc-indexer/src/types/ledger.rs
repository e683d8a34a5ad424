//! Record ledger types: entries, batches and reconciliation plans

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

use super::ChunkId;

/// One indexed chunk as recorded in the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Chunk identifier (also the vector store key)
    pub chunk_id: ChunkId,
    /// Logical namespace owning the entry
    pub group_key: String,
    /// Source the chunk was cut from
    pub source_id: String,
    /// SHA-256 of the chunk text at the time it was embedded
    pub content_hash: String,
    /// Batch that last wrote or re-confirmed the entry
    pub batch_id: Uuid,
    /// When that batch ran
    pub updated_at: DateTime<Utc>,
}

/// A chunk offered to the ledger by the current pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerCandidate {
    pub chunk_id: ChunkId,
    pub source_id: String,
    pub content_hash: String,
}

/// One reconciliation pass for a group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionBatch {
    pub id: Uuid,
    pub group_key: String,
    pub started_at: DateTime<Utc>,
}

impl IngestionBatch {
    /// Open a new batch for `group_key`
    pub fn start(group_key: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            group_key: group_key.into(),
            started_at: Utc::now(),
        }
    }
}

/// Which ledger entries a pass may delete
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupScope {
    /// Only entries whose source is in the set (incremental cleanup)
    Sources(BTreeSet<String>),
    /// Every entry of the group (full cleanup)
    Group,
}

impl CleanupScope {
    /// Incremental scope covering a single source
    pub fn source(source_id: impl Into<String>) -> Self {
        let mut set = BTreeSet::new();
        set.insert(source_id.into());
        Self::Sources(set)
    }

    pub fn contains(&self, source_id: &str) -> bool {
        match self {
            CleanupScope::Sources(sources) => sources.contains(source_id),
            CleanupScope::Group => true,
        }
    }
}

/// Result of diffing candidates against the ledger
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffPlan {
    /// Candidates with no ledger entry; must be embedded and written
    pub to_add: Vec<LedgerCandidate>,
    /// Entries in scope with no matching candidate; must be removed
    pub to_delete: Vec<ChunkId>,
    /// Candidates already indexed; re-confirmed on commit
    pub unchanged: Vec<ChunkId>,
    /// Unchanged identifiers whose text hash differs from the ledger.
    /// These are not re-indexed because identity is positional.
    pub drifted: Vec<ChunkId>,
}

impl DiffPlan {
    /// Whether the pass would touch the vector store
    pub fn has_writes(&self) -> bool {
        !self.to_add.is_empty() || !self.to_delete.is_empty()
    }
}

/// Per-group ledger statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct LedgerStats {
    pub group_key: String,
    pub entries: usize,
    pub sources: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_batch_at: Option<DateTime<Utc>>,
}

/// A committed batch as recorded in the ledger history
#[derive(Debug, Clone, Serialize)]
pub struct BatchRecord {
    pub id: Uuid,
    pub group_key: String,
    pub started_at: DateTime<Utc>,
    pub committed_at: DateTime<Utc>,
    pub added: usize,
    pub deleted: usize,
    pub skipped: usize,
}
