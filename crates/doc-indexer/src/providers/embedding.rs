//! Embedding provider contract

use async_trait::async_trait;
use crate::error::Result;

/// Turns chunk and query text into vectors.
///
/// The synchronizer calls [`embed`](Self::embed) once per new chunk with its
/// own parallelism and timeout, so implementations only handle a single
/// request (plus any transport-level retry).
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Length of every vector [`embed`](Self::embed) returns
    fn dimensions(&self) -> usize;

    /// Whether the backing service answers; reported by `/health`
    async fn health_check(&self) -> Result<bool>;

    fn name(&self) -> &str;
}
