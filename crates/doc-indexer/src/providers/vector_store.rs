//! Vector store provider trait for storing and searching embeddings

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{ChunkId, ChunkMetadata};

/// A stored vector with the chunk it was computed from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    /// Chunk identifier, unique within the group
    pub id: ChunkId,
    /// Group the record belongs to
    pub group_key: String,
    pub embedding: Vec<f32>,
    /// Chunk text
    pub text: String,
    pub metadata: ChunkMetadata,
}

/// Search result from vector store
#[derive(Debug, Clone)]
pub struct VectorSearchResult {
    /// The matched record
    pub record: VectorRecord,
    /// Cosine similarity (higher is more similar)
    pub similarity: f32,
}

/// Trait for vector storage and similarity search
///
/// Records are addressed by `(group_key, id)`. Upserting an existing
/// address replaces it; deleting a missing one is not an error.
///
/// Implementations:
/// - `LocalVectorStore`: in-process index persisted as JSON
#[async_trait]
pub trait VectorStoreProvider: Send + Sync {
    /// Insert or replace records
    async fn upsert(&self, records: &[VectorRecord]) -> Result<()>;

    /// Remove records of a group; returns how many existed
    async fn delete(&self, group_key: &str, ids: &[ChunkId]) -> Result<usize>;

    /// Fetch the records that exist among `ids`
    async fn get(&self, group_key: &str, ids: &[ChunkId]) -> Result<Vec<VectorRecord>>;

    /// Nearest records to `query_embedding`, best first
    async fn search(
        &self,
        query_embedding: &[f32],
        top_k: usize,
        group_filter: Option<&str>,
    ) -> Result<Vec<VectorSearchResult>>;

    /// Get total number of vectors stored
    async fn len(&self) -> Result<usize>;

    /// Check if store is empty
    async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// Check if the provider is healthy
    async fn health_check(&self) -> Result<bool>;

    /// Get provider name for logging
    fn name(&self) -> &str;
}

/// Cosine similarity; 0.0 for mismatched or zero vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}
