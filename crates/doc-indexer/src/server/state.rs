//! Shared application state: every pipeline component, built once from
//! the configuration

use std::sync::Arc;

use crate::config::IndexerConfig;
use crate::error::Result;
use crate::ingestion::DocumentChunker;
use crate::providers::{EmbeddingProvider, LocalVectorStore, OllamaEmbedder, VectorStoreProvider};
use crate::retrieval::Retriever;
use crate::storage::RecordLedger;
use crate::sync::IndexSynchronizer;
use crate::watcher::IngestionWatcher;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: IndexerConfig,
    watcher: Arc<IngestionWatcher>,
    retriever: Retriever,
    ledger: RecordLedger,
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStoreProvider>,
}

impl AppState {
    /// Open the ledger and vector store and wire the Ollama embedder in
    pub fn new(config: IndexerConfig) -> Result<Self> {
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(OllamaEmbedder::new(&config.embeddings)?);
        let store: Arc<dyn VectorStoreProvider> = Arc::new(LocalVectorStore::from_config(&config.vector_store)?);
        Self::with_providers(config, embedder, store)
    }

    /// Build the state around explicit providers
    pub fn with_providers(
        config: IndexerConfig,
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStoreProvider>,
    ) -> Result<Self> {
        let ledger = RecordLedger::open(&config.ledger.connection_string)?;
        tracing::info!(
            "Ledger at {}, vector store '{}', embedder '{}'",
            config.ledger.connection_string,
            store.name(),
            embedder.name()
        );

        let synchronizer = Arc::new(
            IndexSynchronizer::new(ledger.clone(), embedder.clone(), store.clone())
                .with_embedding_config(&config.embeddings),
        );
        let chunker = Arc::new(DocumentChunker::pdf(&config.chunking));
        let watcher = Arc::new(IngestionWatcher::new(
            config.folders.clone(),
            config.watcher.clone(),
            chunker,
            synchronizer,
        ));
        let retriever = Retriever::new(embedder.clone(), store.clone());

        Ok(Self {
            inner: Arc::new(AppStateInner {
                config,
                watcher,
                retriever,
                ledger,
                embedder,
                store,
            }),
        })
    }

    pub fn config(&self) -> &IndexerConfig {
        &self.inner.config
    }

    pub fn watcher(&self) -> &Arc<IngestionWatcher> {
        &self.inner.watcher
    }

    pub fn retriever(&self) -> &Retriever {
        &self.inner.retriever
    }

    pub fn ledger(&self) -> &RecordLedger {
        &self.inner.ledger
    }

    pub fn embedder(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.inner.embedder
    }

    pub fn store(&self) -> &Arc<dyn VectorStoreProvider> {
        &self.inner.store
    }

    /// Group used when a request does not name one
    pub fn default_group(&self) -> &str {
        &self.inner.config.group_key
    }
}
