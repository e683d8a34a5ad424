//! Index synchronization: reconciling chunks against the ledger and the
//! vector store

mod locks;
mod synchronizer;

pub use locks::GroupLocks;
pub use synchronizer::{CleanupMode, IndexSynchronizer};
