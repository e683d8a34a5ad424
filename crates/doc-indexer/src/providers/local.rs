//! Local vector store persisted as a JSON snapshot in a directory
//!
//! Brute-force cosine search over an in-memory map. Every write replaces the
//! snapshot atomically (temp file + rename), so a crash leaves either the old
//! or the new state on disk. Readers work on the last published map and
//! never wait for a snapshot to be written.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::VectorStoreConfig;
use crate::error::{Error, Result};
use crate::types::ChunkId;

use super::vector_store::{cosine_similarity, VectorRecord, VectorSearchResult, VectorStoreProvider};

const SNAPSHOT_FILE: &str = "vectors.json";
const SNAPSHOT_VERSION: u32 = 1;

type RecordKey = (String, String);
type RecordMap = HashMap<RecordKey, VectorRecord>;

#[derive(Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    records: Vec<VectorRecord>,
}

struct StoreInner {
    /// Published map; the lock is only held to clone or swap the `Arc`
    records: RwLock<Arc<RecordMap>>,
    /// Serializes writers for the whole copy/persist/publish cycle
    write_gate: Mutex<()>,
    /// Snapshot location; `None` for `:memory:`
    path: Option<PathBuf>,
}

/// In-process vector store
#[derive(Clone)]
pub struct LocalVectorStore {
    inner: Arc<StoreInner>,
}

fn key(group_key: &str, id: &ChunkId) -> RecordKey {
    (group_key.to_string(), id.as_str().to_string())
}

impl LocalVectorStore {
    /// Non-persistent store
    pub fn in_memory() -> Self {
        Self {
            inner: Arc::new(StoreInner {
                records: RwLock::new(Arc::new(HashMap::new())),
                write_gate: Mutex::new(()),
                path: None,
            }),
        }
    }

    /// Open (or create) a store in `dir`
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir).map_err(|e| {
            Error::vector_store(format!("Failed to create {}: {}", dir.display(), e))
        })?;

        let path = dir.join(SNAPSHOT_FILE);
        let records = if path.exists() {
            let raw = std::fs::read(&path).map_err(|e| {
                Error::vector_store(format!("Failed to read {}: {}", path.display(), e))
            })?;
            let snapshot: Snapshot = serde_json::from_slice(&raw)?;
            if snapshot.version != SNAPSHOT_VERSION {
                return Err(Error::vector_store(format!(
                    "{} has unsupported version {}",
                    path.display(),
                    snapshot.version
                )));
            }
            snapshot
                .records
                .into_iter()
                .map(|r| (key(&r.group_key, &r.id), r))
                .collect()
        } else {
            HashMap::new()
        };

        tracing::info!(
            "Vector store opened at {} ({} records)",
            dir.display(),
            records.len()
        );

        Ok(Self {
            inner: Arc::new(StoreInner {
                records: RwLock::new(Arc::new(records)),
                write_gate: Mutex::new(()),
                path: Some(path),
            }),
        })
    }

    /// Create from config
    pub fn from_config(config: &VectorStoreConfig) -> Result<Self> {
        match config.connection_string.trim() {
            ":memory:" => Ok(Self::in_memory()),
            dir => Self::open(dir),
        }
    }

    /// Current published map
    fn snapshot(&self) -> Arc<RecordMap> {
        self.inner.records.read().clone()
    }

    /// Apply `change` to a copy of the map, persist it, then publish it.
    /// A failed write leaves memory and disk as they were.
    fn mutate<T>(&self, change: impl FnOnce(&mut RecordMap) -> Result<T>) -> Result<T> {
        let _gate = self.inner.write_gate.lock();

        let mut next = (*self.snapshot()).clone();
        let out = change(&mut next)?;
        if let Some(path) = &self.inner.path {
            write_snapshot(path, &next)?;
        }

        *self.inner.records.write() = Arc::new(next);
        Ok(out)
    }

    fn upsert_sync(&self, batch: Vec<VectorRecord>) -> Result<()> {
        self.mutate(|records| {
            let expected = records
                .values()
                .next()
                .map(|r| r.embedding.len())
                .or_else(|| batch.first().map(|r| r.embedding.len()));

            if let Some(dims) = expected {
                if let Some(bad) = batch.iter().find(|r| r.embedding.len() != dims) {
                    return Err(Error::vector_store(format!(
                        "record {} has {} dimensions, store holds {}",
                        bad.id,
                        bad.embedding.len(),
                        dims
                    )));
                }
            }

            for record in batch {
                records.insert(key(&record.group_key, &record.id), record);
            }
            Ok(())
        })
    }

    fn delete_sync(&self, group_key: &str, ids: &[ChunkId]) -> Result<usize> {
        self.mutate(|records| {
            Ok(ids
                .iter()
                .filter(|id| records.remove(&key(group_key, id)).is_some())
                .count())
        })
    }

    fn get_sync(&self, group_key: &str, ids: &[ChunkId]) -> Vec<VectorRecord> {
        let records = self.snapshot();
        ids.iter()
            .filter_map(|id| records.get(&key(group_key, id)).cloned())
            .collect()
    }

    fn search_sync(&self, query: &[f32], top_k: usize, group: Option<&str>) -> Vec<VectorSearchResult> {
        let records = self.snapshot();

        let mut scored: Vec<VectorSearchResult> = records
            .values()
            .filter(|r| group.map_or(true, |g| r.group_key == g))
            .map(|r| VectorSearchResult {
                similarity: cosine_similarity(query, &r.embedding),
                record: r.clone(),
            })
            .collect();

        scored.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.record.id.cmp(&b.record.id))
        });
        scored.truncate(top_k);
        scored
    }
}

fn write_snapshot(path: &Path, records: &RecordMap) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| Error::vector_store(format!("{} has no parent", path.display())))?;

    let mut ordered: Vec<&VectorRecord> = records.values().collect();
    ordered.sort_by(|a, b| (&a.group_key, &a.id).cmp(&(&b.group_key, &b.id)));

    #[derive(Serialize)]
    struct SnapshotRef<'a> {
        version: u32,
        records: Vec<&'a VectorRecord>,
    }

    let body = serde_json::to_vec(&SnapshotRef {
        version: SNAPSHOT_VERSION,
        records: ordered,
    })?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .map_err(|e| Error::vector_store(format!("Failed to stage snapshot: {}", e)))?;
    tmp.write_all(&body)
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(|e| Error::vector_store(format!("Failed to write snapshot: {}", e)))?;
    tmp.persist(path)
        .map_err(|e| Error::vector_store(format!("Failed to replace {}: {}", path.display(), e)))?;
    Ok(())
}

#[async_trait]
impl VectorStoreProvider for LocalVectorStore {
    async fn upsert(&self, records: &[VectorRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let store = self.clone();
        let records = records.to_vec();
        tokio::task::spawn_blocking(move || store.upsert_sync(records))
            .await
            .map_err(|e| Error::Internal(format!("Task join error: {}", e)))?
    }

    async fn delete(&self, group_key: &str, ids: &[ChunkId]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let store = self.clone();
        let group_key = group_key.to_string();
        let ids = ids.to_vec();
        tokio::task::spawn_blocking(move || store.delete_sync(&group_key, &ids))
            .await
            .map_err(|e| Error::Internal(format!("Task join error: {}", e)))?
    }

    async fn get(&self, group_key: &str, ids: &[ChunkId]) -> Result<Vec<VectorRecord>> {
        Ok(self.get_sync(group_key, ids))
    }

    async fn search(
        &self,
        query_embedding: &[f32],
        top_k: usize,
        group_filter: Option<&str>,
    ) -> Result<Vec<VectorSearchResult>> {
        let store = self.clone();
        let query = query_embedding.to_vec();
        let group = group_filter.map(str::to_string);

        tokio::task::spawn_blocking(move || store.search_sync(&query, top_k, group.as_deref()))
            .await
            .map_err(|e| Error::Internal(format!("Task join error: {}", e)))
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.snapshot().len())
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(self.inner.path.as_ref().map_or(true, |p| p.parent().map_or(false, Path::exists)))
    }

    fn name(&self) -> &str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChunkMetadata;

    fn record(group: &str, id: &str, embedding: Vec<f32>) -> VectorRecord {
        VectorRecord {
            id: ChunkId::from_raw(id),
            group_key: group.to_string(),
            embedding,
            text: format!("text of {}", id),
            metadata: ChunkMetadata {
                source: "a.pdf".into(),
                page_number: 1,
                chunk_number: 0,
                producer: String::new(),
                creator: String::new(),
                total_pages: 1,
            },
        }
    }

    #[tokio::test]
    async fn test_upsert_replaces_same_address() {
        let store = LocalVectorStore::in_memory();
        store.upsert(&[record("g", "x-0", vec![1.0, 0.0])]).await.unwrap();
        store.upsert(&[record("g", "x-0", vec![0.0, 1.0])]).await.unwrap();
        store.upsert(&[record("other", "x-0", vec![1.0, 0.0])]).await.unwrap();

        assert_eq!(store.len().await.unwrap(), 2);
        let got = store.get("g", &[ChunkId::from_raw("x-0")]).await.unwrap();
        assert_eq!(got[0].embedding, vec![0.0, 1.0]);
    }

    #[tokio::test]
    async fn test_delete_is_group_scoped() {
        let store = LocalVectorStore::in_memory();
        store
            .upsert(&[record("a", "x-0", vec![1.0]), record("b", "x-0", vec![1.0])])
            .await
            .unwrap();

        let removed = store
            .delete("a", &[ChunkId::from_raw("x-0"), ChunkId::from_raw("missing")])
            .await
            .unwrap();

        assert_eq!(removed, 1);
        assert_eq!(store.get("b", &[ChunkId::from_raw("x-0")]).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_search_orders_by_similarity_and_filters_group() {
        let store = LocalVectorStore::in_memory();
        store
            .upsert(&[
                record("g", "near", vec![1.0, 0.1]),
                record("g", "far", vec![0.0, 1.0]),
                record("h", "exact", vec![1.0, 0.0]),
            ])
            .await
            .unwrap();

        let all = store.search(&[1.0, 0.0], 2, None).await.unwrap();
        assert_eq!(all[0].record.id.as_str(), "exact");
        assert_eq!(all[1].record.id.as_str(), "near");

        let scoped = store.search(&[1.0, 0.0], 10, Some("g")).await.unwrap();
        let ids: Vec<&str> = scoped.iter().map(|r| r.record.id.as_str()).collect();
        assert_eq!(ids, vec!["near", "far"]);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_is_rejected() {
        let store = LocalVectorStore::in_memory();
        store.upsert(&[record("g", "a", vec![1.0, 0.0])]).await.unwrap();

        let err = store.upsert(&[record("g", "b", vec![1.0])]).await.unwrap_err();
        assert!(matches!(err, Error::VectorStore(_)));
        assert_eq!(store.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_snapshot_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = LocalVectorStore::open(dir.path()).unwrap();
            store
                .upsert(&[record("g", "a", vec![1.0]), record("g", "b", vec![2.0])])
                .await
                .unwrap();
            store.delete("g", &[ChunkId::from_raw("a")]).await.unwrap();
        }

        let reopened = LocalVectorStore::open(dir.path()).unwrap();
        assert_eq!(reopened.len().await.unwrap(), 1);
        let got = reopened.get("g", &[ChunkId::from_raw("b")]).await.unwrap();
        assert_eq!(got[0].text, "text of b");
    }

    #[test]
    fn test_reads_proceed_while_a_write_is_in_flight() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalVectorStore::open(dir.path()).unwrap();
        store.upsert_sync(vec![record("g", "old", vec![1.0, 0.0])]).unwrap();

        // hold the writer gate so the upsert below stays in flight
        let gate = store.inner.write_gate.lock();
        let writer = {
            let store = store.clone();
            std::thread::spawn(move || store.upsert_sync(vec![record("g", "new", vec![1.0, 0.0])]))
        };
        std::thread::sleep(std::time::Duration::from_millis(50));

        let started = std::time::Instant::now();
        let hits = store.search_sync(&[1.0, 0.0], 10, Some("g"));
        let got = store.get_sync("g", &[ChunkId::from_raw("old")]);
        assert!(started.elapsed() < std::time::Duration::from_secs(1));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record.id.as_str(), "old");
        assert_eq!(got.len(), 1);
        assert!(!writer.is_finished());

        drop(gate);
        writer.join().unwrap().unwrap();
        assert_eq!(store.search_sync(&[1.0, 0.0], 10, Some("g")).len(), 2);
    }

    #[test]
    fn test_failed_write_publishes_nothing() {
        let store = LocalVectorStore::in_memory();
        store.upsert_sync(vec![record("g", "a", vec![1.0, 0.0])]).unwrap();
        let before = store.snapshot();

        assert!(store.upsert_sync(vec![record("g", "b", vec![1.0])]).is_err());

        assert!(Arc::ptr_eq(&before, &store.snapshot()));
    }

    #[test]
    fn test_memory_connection_string() {
        let config = VectorStoreConfig {
            connection_string: ":memory:".into(),
        };
        let store = LocalVectorStore::from_config(&config).unwrap();
        assert!(store.inner.path.is_none());
    }
}
