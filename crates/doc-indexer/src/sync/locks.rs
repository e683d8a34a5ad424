//! Per-group mutual exclusion

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// One async mutex per group key, created on first use.
///
/// Work on different groups proceeds in parallel; work on the same group
/// is serialized in arrival order.
#[derive(Clone, Default)]
pub struct GroupLocks {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl GroupLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn mutex_for(&self, group_key: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(group_key.to_string())
            .or_default()
            .value()
            .clone()
    }

    /// Wait for exclusive access to `group_key`
    pub async fn lock(&self, group_key: &str) -> OwnedMutexGuard<()> {
        self.mutex_for(group_key).lock_owned().await
    }

    /// Exclusive access to `group_key` if nobody holds it
    pub fn try_lock(&self, group_key: &str) -> Option<OwnedMutexGuard<()>> {
        self.mutex_for(group_key).try_lock_owned().ok()
    }
}
