//! Reconcile a set of chunks against the ledger and the vector store

use futures::future::join_all;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::timeout;

use super::locks::GroupLocks;
use crate::config::{validate_group_key, EmbeddingConfig};
use crate::error::{Error, Result};
use crate::ingestion::{content_hash, identify};
use crate::providers::{EmbeddingProvider, VectorRecord, VectorStoreProvider};
use crate::storage::RecordLedger;
use crate::types::{
    ChunkId, CleanupScope, DiffPlan, DocumentChunk, IndexResult, IngestionBatch, LedgerCandidate,
};

/// Which stale entries a synchronization may delete
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CleanupMode {
    /// Only entries of the sources present in the call
    #[default]
    Incremental,
    /// Every entry of the group that the call does not re-confirm
    Full,
}

/// Keeps the vector store and the ledger consistent for each group.
///
/// A call either applies all of its writes or leaves both stores as they
/// were: embeddings are computed before anything is written, vector store
/// writes are undone if a later step fails, and the ledger is committed in
/// one transaction at the end.
pub struct IndexSynchronizer {
    ledger: RecordLedger,
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStoreProvider>,
    locks: GroupLocks,
    parallelism: usize,
    embed_timeout: Duration,
}

impl IndexSynchronizer {
    pub fn new(
        ledger: RecordLedger,
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStoreProvider>,
    ) -> Self {
        Self {
            ledger,
            embedder,
            store,
            locks: GroupLocks::new(),
            parallelism: 4,
            embed_timeout: Duration::from_secs(60),
        }
    }

    /// Apply embedding parallelism and timeout from config
    pub fn with_embedding_config(self, config: &EmbeddingConfig) -> Self {
        self.with_parallelism(config.parallelism())
            .with_embed_timeout(config.timeout())
    }

    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    pub fn with_embed_timeout(mut self, embed_timeout: Duration) -> Self {
        self.embed_timeout = embed_timeout;
        self
    }


    /// Index `chunks` into `group_key` with incremental cleanup.
    ///
    /// Stale entries are removed only for sources that appear in `chunks`.
    pub async fn synchronize(&self, chunks: &[DocumentChunk], group_key: &str) -> Result<IndexResult> {
        self.synchronize_with(chunks, group_key, CleanupMode::Incremental)
            .await
    }

    /// Index the complete chunk set of one source.
    ///
    /// Unlike [`synchronize`](Self::synchronize) this also cleans up when
    /// `chunks` is empty, removing every entry of `source_id`.
    pub async fn synchronize_source(
        &self,
        source_id: &str,
        chunks: &[DocumentChunk],
        group_key: &str,
    ) -> Result<IndexResult> {
        if let Some(other) = chunks.iter().find(|c| c.source() != source_id) {
            return Err(Error::internal(format!(
                "chunk from '{}' passed as part of source '{}'",
                other.source(),
                source_id
            )));
        }
        self.reconcile(chunks, group_key, CleanupScope::source(source_id))
            .await
    }

    /// Index `chunks` with an explicit cleanup mode
    pub async fn synchronize_with(
        &self,
        chunks: &[DocumentChunk],
        group_key: &str,
        mode: CleanupMode,
    ) -> Result<IndexResult> {
        let scope = match mode {
            CleanupMode::Incremental => CleanupScope::Sources(
                chunks.iter().map(|c| c.source().to_string()).collect::<BTreeSet<_>>(),
            ),
            CleanupMode::Full => CleanupScope::Group,
        };
        self.reconcile(chunks, group_key, scope).await
    }

    async fn reconcile(
        &self,
        chunks: &[DocumentChunk],
        group_key: &str,
        scope: CleanupScope,
    ) -> Result<IndexResult> {
        validate_group_key(group_key)?;

        let _guard = self.locks.lock(group_key).await;
        let batch = IngestionBatch::start(group_key);

        let mut by_id: HashMap<ChunkId, &DocumentChunk> = HashMap::with_capacity(chunks.len());
        let mut candidates = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let id = identify(chunk);
            if by_id.contains_key(&id) {
                tracing::warn!(
                    "Duplicate chunk {} ({} #{}) ignored",
                    id,
                    chunk.source(),
                    chunk.ordinal()
                );
                continue;
            }
            candidates.push(LedgerCandidate {
                chunk_id: id.clone(),
                source_id: chunk.source().to_string(),
                content_hash: content_hash(&chunk.content),
            });
            by_id.insert(id, chunk);
        }

        let plan = self.ledger.diff(group_key, &candidates, &scope)?;

        if !plan.drifted.is_empty() {
            tracing::warn!(
                "{} chunk(s) in group {} changed text without changing position; keeping the indexed version",
                plan.drifted.len(),
                group_key
            );
        }

        let result = IndexResult::new(plan.to_add.len(), plan.to_delete.len(), plan.unchanged.len());

        if !plan.has_writes() {
            self.ledger.commit(&batch, &plan)?;
            tracing::debug!("Batch {} for {}: nothing to write ({:?})", batch.id, group_key, result);
            return Ok(result);
        }

        let records = self.embed_additions(&plan, &by_id, group_key).await?;
        self.apply(&batch, &plan, &records).await?;

        tracing::info!(
            "Batch {} for {}: added {}, deleted {}, skipped {}",
            batch.id,
            group_key,
            result.added,
            result.deleted,
            result.skipped
        );
        Ok(result)
    }

    /// Embed every addition; fails without side effects if any chunk fails
    async fn embed_additions(
        &self,
        plan: &DiffPlan,
        by_id: &HashMap<ChunkId, &DocumentChunk>,
        group_key: &str,
    ) -> Result<Vec<VectorRecord>> {
        let semaphore = Arc::new(Semaphore::new(self.parallelism));
        let embed_timeout = self.embed_timeout;

        let futures = plan.to_add.iter().filter_map(|candidate| {
            let chunk = *by_id.get(&candidate.chunk_id)?;
            let semaphore = semaphore.clone();
            let embedder = self.embedder.clone();

            Some(async move {
                let outcome = match semaphore.acquire().await {
                    Ok(_permit) => match timeout(embed_timeout, embedder.embed(&chunk.content)).await {
                        Ok(Ok(embedding)) => Ok(embedding),
                        Ok(Err(e)) => Err(e.to_string()),
                        Err(_) => Err(format!("timed out after {:?}", embed_timeout)),
                    },
                    Err(e) => Err(format!("embedding pool closed: {}", e)),
                };
                (candidate, chunk, outcome)
            })
        });

        let results = join_all(futures).await;

        let mut records = Vec::with_capacity(results.len());
        let mut failed_ids = Vec::new();
        let mut first_error = None;

        for (candidate, chunk, outcome) in results {
            match outcome {
                Ok(embedding) => records.push(VectorRecord {
                    id: candidate.chunk_id.clone(),
                    group_key: group_key.to_string(),
                    embedding,
                    text: chunk.content.clone(),
                    metadata: chunk.metadata.clone(),
                }),
                Err(message) => {
                    tracing::error!("Failed to embed {} ({}): {}", candidate.chunk_id, chunk.format_citation(), message);
                    failed_ids.push(candidate.chunk_id.to_string());
                    first_error.get_or_insert(message);
                }
            }
        }

        if !failed_ids.is_empty() {
            return Err(Error::embedding(
                failed_ids,
                first_error.unwrap_or_default(),
            ));
        }
        Ok(records)
    }

    /// Write the plan to the vector store, then commit the ledger.
    /// Vector store writes are undone if any later step fails.
    async fn apply(&self, batch: &IngestionBatch, plan: &DiffPlan, records: &[VectorRecord]) -> Result<()> {
        let group_key = batch.group_key.as_str();
        let added: Vec<ChunkId> = records.iter().map(|r| r.id.clone()).collect();

        let snapshot = if plan.to_delete.is_empty() {
            Vec::new()
        } else {
            self.store.get(group_key, &plan.to_delete).await?
        };

        if let Err(e) = self.store.upsert(records).await {
            self.roll_back(group_key, &added, &[]).await;
            return Err(e);
        }

        if let Err(e) = self.store.delete(group_key, &plan.to_delete).await {
            self.roll_back(group_key, &added, &snapshot).await;
            return Err(e);
        }

        if let Err(e) = self.ledger.commit(batch, plan) {
            self.roll_back(group_key, &added, &snapshot).await;
            return Err(e);
        }

        Ok(())
    }

    /// Best-effort undo of vector store writes made by a failed batch
    async fn roll_back(&self, group_key: &str, added: &[ChunkId], deleted: &[VectorRecord]) {
        tracing::warn!(
            "Rolling back {} addition(s) and {} deletion(s) in {}",
            added.len(),
            deleted.len(),
            group_key
        );

        if let Err(e) = self.store.delete(group_key, added).await {
            tracing::error!(
                "Rollback could not remove {} record(s) from {}: {}; they will be replaced on the next pass",
                added.len(),
                group_key,
                e
            );
        }

        if let Err(e) = self.store.upsert(deleted).await {
            tracing::error!(
                "Rollback could not restore {} record(s) in {}: {}",
                deleted.len(),
                group_key,
                e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::LocalVectorStore;
    use crate::testing::{chunk, chunks_for, FlakyStore, HashEmbedder};
    use std::sync::atomic::Ordering;

    const GROUP: &str = "chromadb/my_documents";

    struct Harness {
        sync: Arc<IndexSynchronizer>,
        embedder: Arc<HashEmbedder>,
        store: Arc<FlakyStore>,
        ledger: RecordLedger,
    }

    fn harness() -> Harness {
        let embedder = Arc::new(HashEmbedder::new());
        let store = Arc::new(FlakyStore::new(LocalVectorStore::in_memory()));
        let ledger = RecordLedger::in_memory().unwrap();
        let sync = Arc::new(IndexSynchronizer::new(
            ledger.clone(),
            embedder.clone(),
            store.clone(),
        ));
        Harness { sync, embedder, store, ledger }
    }

    #[tokio::test]
    async fn test_first_sync_adds_everything() {
        let h = harness();
        let chunks = chunks_for("a.pdf", &["alpha", "beta", "gamma"]);

        let result = h.sync.synchronize(&chunks, GROUP).await.unwrap();

        assert_eq!(result, IndexResult::new(3, 0, 0));
        assert_eq!(h.store.len().await.unwrap(), 3);
        assert_eq!(h.ledger.keys(GROUP).unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_resync_is_idempotent() {
        let h = harness();
        let chunks = chunks_for("a.pdf", &["alpha", "beta"]);
        h.sync.synchronize(&chunks, GROUP).await.unwrap();
        let calls = h.embedder.calls.load(Ordering::SeqCst);

        let result = h.sync.synchronize(&chunks, GROUP).await.unwrap();

        assert_eq!(result, IndexResult::new(0, 0, 2));
        assert_eq!(h.embedder.calls.load(Ordering::SeqCst), calls);
        assert_eq!(h.store.len().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_shrunk_source_deletes_trailing_chunks_only() {
        let h = harness();
        h.sync
            .synchronize(&chunks_for("a.pdf", &["a0", "a1", "a2"]), GROUP)
            .await
            .unwrap();
        h.sync
            .synchronize(&chunks_for("b.pdf", &["b0"]), GROUP)
            .await
            .unwrap();

        let result = h
            .sync
            .synchronize(&chunks_for("a.pdf", &["a0"]), GROUP)
            .await
            .unwrap();

        assert_eq!(result, IndexResult::new(0, 2, 1));
        assert_eq!(h.store.len().await.unwrap(), 2);
        assert_eq!(h.ledger.stats(GROUP).unwrap().sources, 2);
    }

    #[tokio::test]
    async fn test_full_cleanup_removes_unlisted_sources() {
        let h = harness();
        h.sync
            .synchronize(&chunks_for("a.pdf", &["a0"]), GROUP)
            .await
            .unwrap();
        h.sync
            .synchronize(&chunks_for("b.pdf", &["b0", "b1"]), GROUP)
            .await
            .unwrap();

        let result = h
            .sync
            .synchronize_with(&chunks_for("a.pdf", &["a0"]), GROUP, CleanupMode::Full)
            .await
            .unwrap();

        assert_eq!(result, IndexResult::new(0, 2, 1));
        assert_eq!(h.store.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_empty_source_removes_its_entries() {
        let h = harness();
        h.sync
            .synchronize(&chunks_for("a.pdf", &["a0", "a1"]), GROUP)
            .await
            .unwrap();

        let result = h.sync.synchronize_source("a.pdf", &[], GROUP).await.unwrap();

        assert_eq!(result, IndexResult::new(0, 2, 0));
        assert!(h.store.is_empty().await.unwrap());
        assert!(h.ledger.keys(GROUP).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_groups_do_not_share_state() {
        let h = harness();
        let chunks = chunks_for("a.pdf", &["alpha", "beta"]);

        h.sync.synchronize(&chunks, "team-a").await.unwrap();
        let result = h.sync.synchronize(&chunks, "team-b").await.unwrap();
        assert_eq!(result.added, 2);

        h.sync
            .synchronize_with(&[], "team-b", CleanupMode::Full)
            .await
            .unwrap();
        assert_eq!(h.ledger.keys("team-a").unwrap().len(), 2);
        assert_eq!(h.store.len().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_embedding_failure_writes_nothing() {
        let h = harness();
        h.sync
            .synchronize(&chunks_for("a.pdf", &["keep"]), GROUP)
            .await
            .unwrap();
        h.embedder.fail_on("poison");

        let err = h
            .sync
            .synchronize(&chunks_for("b.pdf", &["fine", "poison", "also fine"]), GROUP)
            .await
            .unwrap_err();

        match err {
            Error::Embedding { failed_ids, .. } => {
                assert_eq!(failed_ids, vec![crate::ingestion::chunk_id_for("b.pdf", 1).to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(h.store.len().await.unwrap(), 1);
        assert_eq!(h.ledger.keys(GROUP).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_embedding_timeout_is_a_failure() {
        let h = harness();
        h.embedder.delay_ms.store(200, Ordering::SeqCst);
        let sync = IndexSynchronizer::new(h.ledger.clone(), h.embedder.clone(), h.store.clone())
            .with_embed_timeout(Duration::from_millis(20));

        let err = sync
            .synchronize(&chunks_for("a.pdf", &["slow"]), GROUP)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Embedding { .. }));
        assert!(h.ledger.keys(GROUP).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_store_delete_failure_rolls_back_additions() {
        let h = harness();
        h.sync
            .synchronize(&chunks_for("a.pdf", &["a0", "a1"]), GROUP)
            .await
            .unwrap();
        h.store.fail_next_delete.store(true, Ordering::SeqCst);

        // shrink a.pdf and add a chunk at a new position
        let mut chunks = chunks_for("a.pdf", &["a0"]);
        chunks.push(chunk("c.pdf", 0, "new"));
        let err = h.sync.synchronize(&chunks, GROUP).await.unwrap_err();

        assert!(matches!(err, Error::VectorStore(_)));
        assert_eq!(h.store.len().await.unwrap(), 2);
        assert_eq!(h.ledger.keys(GROUP).unwrap().len(), 2);

        // the next pass succeeds and converges
        let result = h.sync.synchronize(&chunks, GROUP).await.unwrap();
        assert_eq!(result, IndexResult::new(1, 1, 1));
    }

    #[tokio::test]
    async fn test_ledger_failure_restores_vector_store() {
        let h = harness();
        h.sync
            .synchronize(&chunks_for("a.pdf", &["a0", "a1"]), GROUP)
            .await
            .unwrap();
        h.ledger.execute_raw("DROP TABLE ingestion_batches;").unwrap();

        let mut chunks = chunks_for("a.pdf", &["a0"]);
        chunks.push(chunk("b.pdf", 0, "new"));
        let err = h.sync.synchronize(&chunks, GROUP).await.unwrap_err();

        assert!(matches!(err, Error::Ledger(_)));
        let restored = h
            .store
            .get(GROUP, &[crate::ingestion::chunk_id_for("a.pdf", 1)])
            .await
            .unwrap();
        assert_eq!(restored.len(), 1);
        assert_eq!(restored[0].text, "a1");
        assert_eq!(h.store.len().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_chunks_are_counted_once() {
        let h = harness();
        let one = chunk("a.pdf", 0, "same");

        let result = h.sync.synchronize(&[one.clone(), one], GROUP).await.unwrap();

        assert_eq!(result, IndexResult::new(1, 0, 0));
    }

    #[tokio::test]
    async fn test_concurrent_calls_on_one_group_are_serialized() {
        let h = harness();
        let chunks = chunks_for("a.pdf", &["one", "two", "three"]);

        let (first, second) = tokio::join!(
            h.sync.synchronize(&chunks, GROUP),
            h.sync.synchronize(&chunks, GROUP)
        );
        let (first, second) = (first.unwrap(), second.unwrap());

        assert_eq!(first.added + second.added, 3);
        assert_eq!(first.skipped + second.skipped, 3);
        assert_eq!(h.embedder.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_invalid_group_key_is_rejected() {
        let h = harness();
        let err = h
            .sync
            .synchronize(&chunks_for("a.pdf", &["x"]), "bad group")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn test_edited_text_at_same_position_is_kept() {
        let h = harness();
        h.sync
            .synchronize(&chunks_for("a.pdf", &["original"]), GROUP)
            .await
            .unwrap();

        let result = h
            .sync
            .synchronize(&chunks_for("a.pdf", &["edited"]), GROUP)
            .await
            .unwrap();

        assert_eq!(result, IndexResult::new(0, 0, 1));
        let stored = h
            .store
            .get(GROUP, &[crate::ingestion::chunk_id_for("a.pdf", 0)])
            .await
            .unwrap();
        assert_eq!(stored[0].text, "original");
    }
}
