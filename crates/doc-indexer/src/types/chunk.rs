//! Document chunk types with source tracking

use serde::{Deserialize, Serialize};
use std::fmt;

/// File-level metadata extracted from a source document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    /// PDF `/Producer` (empty when unavailable)
    #[serde(default)]
    pub producer: String,
    /// PDF `/Creator` (empty when unavailable)
    #[serde(default)]
    pub creator: String,
    /// Number of pages in the document
    #[serde(default)]
    pub total_pages: u32,
}

/// Text of a single page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageText {
    /// Page number (1-indexed)
    pub page_number: u32,
    /// Extracted text
    pub text: String,
}

/// A loaded document before splitting
#[derive(Debug, Clone)]
pub struct LoadedDocument {
    /// Per-page text, in page order
    pub pages: Vec<PageText>,
    /// File-level metadata (defaults when extraction failed)
    pub metadata: DocumentMetadata,
}

/// Metadata carried by every chunk and stored alongside its vector
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Source identifier (path relative to the incoming folder)
    pub source: String,
    /// Page the chunk was cut from (1-indexed)
    pub page_number: u32,
    /// Ordinal of the chunk within its source file (0-indexed)
    pub chunk_number: u32,
    /// Inherited PDF producer
    #[serde(default)]
    pub producer: String,
    /// Inherited PDF creator
    #[serde(default)]
    pub creator: String,
    /// Inherited page count
    #[serde(default)]
    pub total_pages: u32,
}

/// A bounded span of document text with positional and metadata tags
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentChunk {
    /// Text content
    pub content: String,
    /// Source, position and inherited document metadata
    pub metadata: ChunkMetadata,
}

impl DocumentChunk {
    /// Create a chunk for `source` at `ordinal`
    pub fn new(
        content: String,
        source: impl Into<String>,
        page_number: u32,
        ordinal: u32,
        document: &DocumentMetadata,
    ) -> Self {
        Self {
            content,
            metadata: ChunkMetadata {
                source: source.into(),
                page_number,
                chunk_number: ordinal,
                producer: document.producer.clone(),
                creator: document.creator.clone(),
                total_pages: document.total_pages,
            },
        }
    }

    /// Source identifier
    pub fn source(&self) -> &str {
        &self.metadata.source
    }

    /// Ordinal within the source file
    pub fn ordinal(&self) -> u32 {
        self.metadata.chunk_number
    }

    /// Human-readable location, e.g. `manual.pdf, Page 3`
    pub fn format_citation(&self) -> String {
        format!("{}, Page {}", self.metadata.source, self.metadata.page_number)
    }
}

/// Stable identifier of a chunk: `hash(source) + ordinal`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChunkId(String);

impl ChunkId {
    /// Wrap an identifier read back from storage
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ChunkId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
