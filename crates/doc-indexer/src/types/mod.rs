//! Core types for the indexing pipeline

pub mod chunk;
pub mod ledger;
pub mod report;

pub use chunk::{ChunkId, ChunkMetadata, DocumentChunk, DocumentMetadata, LoadedDocument, PageText};
pub use ledger::{
    BatchRecord, CleanupScope, DiffPlan, IngestionBatch, LedgerCandidate, LedgerEntry, LedgerStats,
};
pub use report::{FileOutcome, FileState, IndexResult, IngestionReport};
