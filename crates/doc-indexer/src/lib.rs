//! doc-indexer: incremental PDF ingestion with a chunk ledger
//!
//! Documents dropped into an incoming folder are split into chunks with
//! stable identifiers, reconciled against a SQLite record ledger and
//! written to a vector index. Only new chunks are embedded and chunks that
//! disappeared from a re-ingested file are removed. Indexed files are
//! archived into a processed folder.

pub mod config;
pub mod error;
pub mod ingestion;
pub mod providers;
pub mod retrieval;
pub mod server;
pub mod storage;
pub mod sync;
pub mod types;
pub mod watcher;

#[cfg(test)]
mod testing;

pub use config::IndexerConfig;
pub use error::{Error, Result};
pub use ingestion::{identify, DocumentChunker, DocumentLoader, PdfLoader, TextChunker};
pub use retrieval::{RetrievedChunk, Retriever};
pub use storage::RecordLedger;
pub use sync::{CleanupMode, IndexSynchronizer};
pub use types::{ChunkId, DocumentChunk, IndexResult, IngestionReport};
pub use watcher::{run_watch_loop, IngestionWatcher};
