//! Read-only similarity search over the indexed chunks

use serde::Serialize;
use std::sync::Arc;

use crate::error::Result;
use crate::providers::{EmbeddingProvider, VectorSearchResult, VectorStoreProvider};
use crate::types::{ChunkId, ChunkMetadata};

/// A chunk returned by a search, best match first
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedChunk {
    pub text: String,
    pub metadata: ChunkMetadata,
    /// Cosine similarity to the query
    pub score: f32,
    pub chunk_id: ChunkId,
    pub group_key: String,
}

impl From<VectorSearchResult> for RetrievedChunk {
    fn from(result: VectorSearchResult) -> Self {
        Self {
            text: result.record.text,
            metadata: result.record.metadata,
            score: result.similarity,
            chunk_id: result.record.id,
            group_key: result.record.group_key,
        }
    }
}

/// Embeds a query and looks up its nearest chunks.
///
/// Never writes; results reflect the last committed batches.
pub struct Retriever {
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStoreProvider>,
}

impl Retriever {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, store: Arc<dyn VectorStoreProvider>) -> Self {
        Self { embedder, store }
    }

    /// Top `k` chunks across all groups
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<RetrievedChunk>> {
        self.search_filtered(query, k, None).await
    }

    /// Top `k` chunks of one group
    pub async fn search_in_group(&self, query: &str, k: usize, group_key: &str) -> Result<Vec<RetrievedChunk>> {
        self.search_filtered(query, k, Some(group_key)).await
    }

    async fn search_filtered(&self, query: &str, k: usize, group: Option<&str>) -> Result<Vec<RetrievedChunk>> {
        if query.trim().is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let embedding = self.embedder.embed(query).await?;
        let results = self.store.search(&embedding, k, group).await?;

        tracing::debug!(
            "Search for {:?} (k={}, group={:?}) returned {} chunk(s)",
            query,
            k,
            group,
            results.len()
        );

        Ok(results.into_iter().map(RetrievedChunk::from).collect())
    }
}
