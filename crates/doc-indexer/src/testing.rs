//! Test doubles and fixtures shared by unit tests

use async_trait::async_trait;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::ingestion::DocumentLoader;
use crate::providers::{
    EmbeddingProvider, LocalVectorStore, VectorRecord, VectorSearchResult, VectorStoreProvider,
};
use crate::types::{ChunkId, DocumentChunk, DocumentMetadata, LoadedDocument, PageText};

pub const TEST_DIMENSIONS: usize = 8;

/// Deterministic bag-of-bytes embedder with call counting and fault injection
#[derive(Default)]
pub struct HashEmbedder {
    pub calls: AtomicUsize,
    pub delay_ms: AtomicU64,
    fail_markers: Mutex<Vec<String>>,
}

impl HashEmbedder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every text containing `marker`
    pub fn fail_on(&self, marker: &str) {
        self.fail_markers.lock().push(marker.to_string());
    }

    pub fn clear_failures(&self) {
        self.fail_markers.lock().clear();
    }

    pub fn vector(text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; TEST_DIMENSIONS];
        for b in text.bytes() {
            v[(b as usize) % TEST_DIMENSIONS] += 1.0;
        }
        v[TEST_DIMENSIONS - 1] += 0.5;
        v
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        if self.fail_markers.lock().iter().any(|m| text.contains(m.as_str())) {
            return Err(Error::embedding(Vec::new(), "scripted failure"));
        }
        Ok(Self::vector(text))
    }

    fn dimensions(&self) -> usize {
        TEST_DIMENSIONS
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    fn name(&self) -> &str {
        "hash"
    }
}

/// Local store that can be told to fail its next write
pub struct FlakyStore {
    inner: LocalVectorStore,
    pub fail_next_upsert: AtomicBool,
    pub fail_next_delete: AtomicBool,
}

impl FlakyStore {
    pub fn new(inner: LocalVectorStore) -> Self {
        Self {
            inner,
            fail_next_upsert: AtomicBool::new(false),
            fail_next_delete: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl VectorStoreProvider for FlakyStore {
    async fn upsert(&self, records: &[VectorRecord]) -> Result<()> {
        if self.fail_next_upsert.swap(false, Ordering::SeqCst) {
            return Err(Error::vector_store("scripted upsert failure"));
        }
        self.inner.upsert(records).await
    }

    async fn delete(&self, group_key: &str, ids: &[ChunkId]) -> Result<usize> {
        if self.fail_next_delete.swap(false, Ordering::SeqCst) {
            return Err(Error::vector_store("scripted delete failure"));
        }
        self.inner.delete(group_key, ids).await
    }

    async fn get(&self, group_key: &str, ids: &[ChunkId]) -> Result<Vec<VectorRecord>> {
        self.inner.get(group_key, ids).await
    }

    async fn search(
        &self,
        query_embedding: &[f32],
        top_k: usize,
        group_filter: Option<&str>,
    ) -> Result<Vec<VectorSearchResult>> {
        self.inner.search(query_embedding, top_k, group_filter).await
    }

    async fn len(&self) -> Result<usize> {
        self.inner.len().await
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    fn name(&self) -> &str {
        "flaky"
    }
}

/// Plain-text loader: form feeds separate pages, a `CORRUPT` prefix fails
pub struct TextLoader;

impl DocumentLoader for TextLoader {
    fn load(&self, path: &Path) -> Result<LoadedDocument> {
        let label = path.display().to_string();
        let raw = std::fs::read_to_string(path).map_err(|e| Error::load(&label, e.to_string()))?;
        if raw.starts_with("CORRUPT") {
            return Err(Error::load(&label, "not a valid document"));
        }

        let pages: Vec<PageText> = raw
            .split('\x0c')
            .enumerate()
            .map(|(i, text)| PageText {
                page_number: i as u32 + 1,
                text: text.trim().to_string(),
            })
            .filter(|p| !p.text.is_empty())
            .collect();

        Ok(LoadedDocument {
            metadata: DocumentMetadata {
                producer: "text".into(),
                creator: String::new(),
                total_pages: pages.len() as u32,
            },
            pages,
        })
    }

    fn name(&self) -> &str {
        "text"
    }
}

pub fn chunk(source: &str, ordinal: u32, text: &str) -> DocumentChunk {
    DocumentChunk::new(text.to_string(), source, 1, ordinal, &DocumentMetadata::default())
}

pub fn chunks_for(source: &str, texts: &[&str]) -> Vec<DocumentChunk> {
    texts
        .iter()
        .enumerate()
        .map(|(i, text)| chunk(source, i as u32, text))
        .collect()
}

/// Build a PDF with one Courier text line per page and an optional
/// `(producer, creator)` Info dictionary
pub fn build_pdf(pages: &[&str], info: Option<(&str, &str)>) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => font_id,
        },
    });

    let mut kids: Vec<Object> = Vec::new();
    for text in pages {
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 12.into()]),
                Operation::new("Td", vec![72.into(), 720.into()]),
                Operation::new("Tj", vec![Object::string_literal(*text)]),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        });
        kids.push(page_id.into());
    }

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => pages.len() as i64,
        }),
    );

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    if let Some((producer, creator)) = info {
        let info_id = doc.add_object(dictionary! {
            "Producer" => Object::string_literal(producer),
            "Creator" => Object::string_literal(creator),
        });
        doc.trailer.set("Info", info_id);
    }

    let mut out = Vec::new();
    doc.save_to(&mut out).unwrap();
    out
}
