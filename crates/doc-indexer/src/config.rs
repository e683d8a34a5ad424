//! Configuration for the indexing pipeline
//!
//! Loaded once at startup from an optional TOML file, then environment
//! overrides, then validated. Components receive the pieces they need at
//! construction time.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Prefix for environment overrides
const ENV_PREFIX: &str = "DOC_INDEXER_";

/// Upper bound on group key length
const MAX_GROUP_KEY_LEN: usize = 256;

/// Main indexer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerConfig {
    /// Logical namespace isolating this collection's dedup state
    #[serde(default = "default_group_key")]
    pub group_key: String,
    /// Chunking configuration
    #[serde(default)]
    pub chunking: ChunkingConfig,
    /// Drop and archive folders
    #[serde(default)]
    pub folders: FolderConfig,
    /// Record ledger configuration
    #[serde(default)]
    pub ledger: LedgerConfig,
    /// Vector store configuration
    #[serde(default)]
    pub vector_store: VectorStoreConfig,
    /// Embedding provider configuration
    #[serde(default)]
    pub embeddings: EmbeddingConfig,
    /// Watcher scheduling configuration
    #[serde(default)]
    pub watcher: WatcherConfig,
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,
}

fn default_group_key() -> String {
    "documents/default".to_string()
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            group_key: default_group_key(),
            chunking: ChunkingConfig::default(),
            folders: FolderConfig::default(),
            ledger: LedgerConfig::default(),
            vector_store: VectorStoreConfig::default(),
            embeddings: EmbeddingConfig::default(),
            watcher: WatcherConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

impl IndexerConfig {
    /// Load configuration from an optional TOML file, apply environment
    /// overrides and validate the result.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML file without validating it
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Cannot read config file {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&raw)
    }

    /// Parse TOML text without validating it
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Apply `DOC_INDEXER_*` overrides using the given lookup
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));

        if let Some(group) = var("GROUP_KEY") {
            self.group_key = group;
        }
        if let Some(incoming) = var("INCOMING") {
            self.folders.incoming = PathBuf::from(incoming);
        }
        if let Some(processed) = var("PROCESSED") {
            self.folders.processed = PathBuf::from(processed);
        }
        if let Some(ledger) = var("LEDGER") {
            self.ledger.connection_string = ledger;
        }
        if let Some(store) = var("VECTOR_STORE") {
            self.vector_store.connection_string = store;
        }
        if let Some(url) = var("OLLAMA_URL") {
            self.embeddings.base_url = url;
        }
    }

    /// Validate the whole configuration. Any error here is fatal.
    pub fn validate(&self) -> Result<()> {
        validate_group_key(&self.group_key)?;
        self.chunking.validate()?;
        self.folders.validate()?;

        if self.ledger.connection_string.trim().is_empty() {
            return Err(Error::Config("ledger.connection_string is empty".into()));
        }
        if self.vector_store.connection_string.trim().is_empty() {
            return Err(Error::Config("vector_store.connection_string is empty".into()));
        }
        if self.embeddings.dimensions == 0 {
            return Err(Error::Config("embeddings.dimensions must be > 0".into()));
        }
        if self.embeddings.timeout_secs == 0 {
            return Err(Error::Config("embeddings.timeout_secs must be > 0".into()));
        }
        if self.watcher.file_extensions.is_empty() {
            return Err(Error::Config("watcher.file_extensions is empty".into()));
        }
        Ok(())
    }
}

/// Reject group keys that could alias or smuggle another namespace
pub fn validate_group_key(group_key: &str) -> Result<()> {
    if group_key.trim().is_empty() {
        return Err(Error::Config("group_key must not be empty".into()));
    }
    if group_key.len() > MAX_GROUP_KEY_LEN {
        return Err(Error::Config(format!(
            "group_key is longer than {} bytes",
            MAX_GROUP_KEY_LEN
        )));
    }
    if let Some(bad) = group_key
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '/' | '.' | ':')))
    {
        return Err(Error::Config(format!(
            "group_key '{}' contains invalid character {:?}",
            group_key, bad
        )));
    }
    Ok(())
}

/// Text chunking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Maximum chunk length in characters
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Characters shared between consecutive chunks
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

fn default_chunk_size() -> usize { 1000 }
fn default_chunk_overlap() -> usize { 100 }

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

impl ChunkingConfig {
    fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::Config("chunking.chunk_size must be > 0".into()));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(Error::Config(format!(
                "chunking.chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        Ok(())
    }
}

/// Drop folder and archive folder
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FolderConfig {
    /// Files pending ingestion
    #[serde(default = "default_incoming")]
    pub incoming: PathBuf,
    /// Files successfully ingested
    #[serde(default = "default_processed")]
    pub processed: PathBuf,
}

fn default_incoming() -> PathBuf { PathBuf::from("./docs_folders/doc_to_add") }
fn default_processed() -> PathBuf { PathBuf::from("./docs_folders/processed_docs") }

impl Default for FolderConfig {
    fn default() -> Self {
        Self {
            incoming: default_incoming(),
            processed: default_processed(),
        }
    }
}

impl FolderConfig {
    fn validate(&self) -> Result<()> {
        if self.incoming.as_os_str().is_empty() || self.processed.as_os_str().is_empty() {
            return Err(Error::Config("folders.incoming and folders.processed must be set".into()));
        }
        if self.incoming == self.processed {
            return Err(Error::Config(format!(
                "folders.incoming and folders.processed are both {}",
                self.incoming.display()
            )));
        }
        if self.processed.starts_with(&self.incoming) || self.incoming.starts_with(&self.processed) {
            return Err(Error::Config(
                "folders.incoming and folders.processed must not be nested".into(),
            ));
        }
        Ok(())
    }

    /// Create both folders if missing
    pub fn ensure_exist(&self) -> Result<()> {
        std::fs::create_dir_all(&self.incoming)?;
        std::fs::create_dir_all(&self.processed)?;
        Ok(())
    }
}

/// Record ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// SQLite location: a path, `sqlite:///path`, or `:memory:`
    #[serde(default = "default_ledger_connection")]
    pub connection_string: String,
}

fn default_ledger_connection() -> String {
    "sqlite:///record_manager_cache.sql".to_string()
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            connection_string: default_ledger_connection(),
        }
    }
}

/// Vector store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorStoreConfig {
    /// Directory holding the persisted index, or `:memory:`
    #[serde(default = "default_vector_store_connection")]
    pub connection_string: String,
}

fn default_vector_store_connection() -> String {
    "./vector_store".to_string()
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            connection_string: default_vector_store_connection(),
        }
    }
}

/// Embedding provider (Ollama) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Ollama base URL
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Embedding model name
    #[serde(default = "default_embed_model")]
    pub model: String,
    /// Embedding dimensions (384 for all-minilm)
    #[serde(default = "default_dimensions")]
    pub dimensions: usize,
    /// Per-call timeout; a timeout fails the pass and is retried later
    #[serde(default = "default_embed_timeout")]
    pub timeout_secs: u64,
    /// Retries per call before giving up
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Concurrent embedding calls per pass (default: CPU count, max 4)
    #[serde(default)]
    pub parallel_embeddings: Option<usize>,
}

fn default_base_url() -> String { "http://localhost:11434".to_string() }
fn default_embed_model() -> String { "all-minilm".to_string() }
fn default_dimensions() -> usize { 384 }
fn default_embed_timeout() -> u64 { 60 }
fn default_max_retries() -> u32 { 2 }

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_embed_model(),
            dimensions: default_dimensions(),
            timeout_secs: default_embed_timeout(),
            max_retries: default_max_retries(),
            parallel_embeddings: None,
        }
    }
}

impl EmbeddingConfig {
    /// Per-call timeout as a Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Resolved embedding parallelism
    pub fn parallelism(&self) -> usize {
        self.parallel_embeddings
            .unwrap_or_else(|| num_cpus::get().min(4))
            .max(1)
    }
}

/// How the watcher learns about new files
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WatchMode {
    /// Scan the incoming folder on a fixed interval
    #[default]
    Poll,
    /// Subscribe to filesystem events
    Events,
}

/// Watcher scheduling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    /// Trigger source
    #[serde(default)]
    pub mode: WatchMode,
    /// Interval between scans in poll mode
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Quiet period after a filesystem event before a pass starts
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Extensions picked up from the incoming folder (case-insensitive)
    #[serde(default = "default_extensions")]
    pub file_extensions: Vec<String>,
}

fn default_poll_interval() -> u64 { 10 }
fn default_debounce_ms() -> u64 { 750 }
fn default_extensions() -> Vec<String> { vec!["pdf".to_string()] }

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            mode: WatchMode::default(),
            poll_interval_secs: default_poll_interval(),
            debounce_ms: default_debounce_ms(),
            file_extensions: default_extensions(),
        }
    }
}

impl WatcherConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Whether a path carries one of the configured extensions
    pub fn accepts(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map_or(false, |ext| {
                self.file_extensions
                    .iter()
                    .any(|allowed| allowed.eq_ignore_ascii_case(ext))
            })
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host address
    #[serde(default = "default_host")]
    pub host: String,
    /// Port number
    #[serde(default = "default_port")]
    pub port: u16,
    /// Enable CORS
    #[serde(default = "default_enable_cors")]
    pub enable_cors: bool,
}

fn default_host() -> String { "127.0.0.1".to_string() }
fn default_port() -> u16 { 8080 }
fn default_enable_cors() -> bool { true }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            enable_cors: default_enable_cors(),
        }
    }
}
