//! Storage module for persistent ledger state
//!
//! Provides the SQLite-based record ledger used for deduplication.

mod ledger;

pub use ledger::{LedgerLocation, RecordLedger};
