//! Provider abstractions for embeddings and vector storage
//!
//! Trait-based so the synchronizer can run against Ollama and the local
//! store in production and against scripted doubles in tests.

pub mod embedding;
pub mod local;
pub mod ollama;
pub mod vector_store;

pub use embedding::EmbeddingProvider;
pub use local::LocalVectorStore;
pub use ollama::OllamaEmbedder;
pub use vector_store::{cosine_similarity, VectorRecord, VectorSearchResult, VectorStoreProvider};
