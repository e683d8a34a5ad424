//! Text chunking with page and ordinal tracking

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;

use unicode_segmentation::UnicodeSegmentation;

use super::loader::{DocumentLoader, PdfLoader};
use crate::config::ChunkingConfig;
use crate::error::Result;
use crate::types::{DocumentChunk, LoadedDocument};

/// Separators tried in order: paragraphs, lines, words, then graphemes
const DEFAULT_SEPARATORS: &[&str] = &["\n\n", "\n", " ", ""];

fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Recursive character splitter with configurable size and overlap.
///
/// Lengths are measured in characters. Text is split on the coarsest
/// separator present; pieces that are still too long are split again with
/// the next separator. Adjacent pieces are then merged back up to
/// `chunk_size`, carrying up to `overlap` characters into the next chunk.
pub struct TextChunker {
    /// Target chunk size in characters
    chunk_size: usize,
    /// Overlap between chunks
    overlap: usize,
    separators: Vec<String>,
}

impl TextChunker {
    /// Create a new chunker
    pub fn new(chunk_size: usize, overlap: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            overlap: overlap.min(chunk_size.saturating_sub(1)),
            separators: DEFAULT_SEPARATORS.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn from_config(config: &ChunkingConfig) -> Self {
        Self::new(config.chunk_size, config.chunk_overlap)
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Split text into chunks of at most `chunk_size` characters
    pub fn split_text(&self, text: &str) -> Vec<String> {
        let separators: Vec<&str> = self.separators.iter().map(String::as_str).collect();
        self.split_recursive(text, &separators)
    }

    fn split_recursive(&self, text: &str, separators: &[&str]) -> Vec<String> {
        let position = separators
            .iter()
            .position(|sep| sep.is_empty() || text.contains(sep))
            .unwrap_or(separators.len().saturating_sub(1));
        let separator = separators.get(position).copied().unwrap_or("");
        let remaining = separators.get(position + 1..).unwrap_or(&[]);

        let splits: Vec<&str> = if separator.is_empty() {
            text.graphemes(true).collect()
        } else {
            text.split(separator).filter(|s| !s.is_empty()).collect()
        };

        let mut chunks = Vec::new();
        let mut fitting: Vec<&str> = Vec::new();

        for split in splits {
            if char_len(split) < self.chunk_size {
                fitting.push(split);
                continue;
            }

            if !fitting.is_empty() {
                chunks.extend(self.merge_splits(&fitting, separator));
                fitting.clear();
            }

            if remaining.is_empty() {
                chunks.push(split.to_string());
            } else {
                chunks.extend(self.split_recursive(split, remaining));
            }
        }

        if !fitting.is_empty() {
            chunks.extend(self.merge_splits(&fitting, separator));
        }

        chunks
    }

    /// Greedily join splits up to `chunk_size`, keeping a tail of at most
    /// `overlap` characters as the start of the next chunk
    fn merge_splits(&self, splits: &[&str], separator: &str) -> Vec<String> {
        let separator_len = char_len(separator);
        let mut chunks = Vec::new();
        let mut current: VecDeque<&str> = VecDeque::new();
        let mut total = 0usize;

        for &split in splits {
            let len = char_len(split);
            let joined = |current: &VecDeque<&str>| if current.is_empty() { 0 } else { separator_len };

            if total + len + joined(&current) > self.chunk_size {
                if total > self.chunk_size {
                    tracing::warn!(
                        "Created a chunk of size {}, which is longer than the specified {}",
                        total,
                        self.chunk_size
                    );
                }

                if !current.is_empty() {
                    if let Some(chunk) = join_trimmed(&current, separator) {
                        chunks.push(chunk);
                    }

                    while total > self.overlap
                        || (total > 0 && total + len + joined(&current) > self.chunk_size)
                    {
                        let Some(first) = current.pop_front() else {
                            break;
                        };
                        total = total.saturating_sub(char_len(first) + joined(&current));
                    }
                }
            }

            current.push_back(split);
            total += len + if current.len() > 1 { separator_len } else { 0 };
        }

        if let Some(chunk) = join_trimmed(&current, separator) {
            chunks.push(chunk);
        }

        chunks
    }
}

fn join_trimmed(parts: &VecDeque<&str>, separator: &str) -> Option<String> {
    let joined = parts.iter().copied().collect::<Vec<_>>().join(separator);
    let trimmed = joined.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Loads a document and splits it into positioned chunks.
///
/// Pages are split independently; ordinals run across the whole file so
/// that `(source, ordinal)` is unique.
pub struct DocumentChunker {
    loader: Arc<dyn DocumentLoader>,
    splitter: TextChunker,
}

impl DocumentChunker {
    pub fn new(loader: Arc<dyn DocumentLoader>, splitter: TextChunker) -> Self {
        Self { loader, splitter }
    }

    /// PDF chunker with the configured size and overlap
    pub fn pdf(config: &ChunkingConfig) -> Self {
        Self::new(Arc::new(PdfLoader::new()), TextChunker::from_config(config))
    }

    pub fn loader_name(&self) -> &str {
        self.loader.name()
    }

    /// Load `path` and chunk it, using the path itself as the source id
    pub fn chunk(&self, path: &Path) -> Result<Vec<DocumentChunk>> {
        self.chunk_as(path, &path.to_string_lossy())
    }

    /// Load `path` and chunk it under an explicit source id
    pub fn chunk_as(&self, path: &Path, source_id: &str) -> Result<Vec<DocumentChunk>> {
        let document = self.loader.load(path)?;
        let chunks = self.chunk_document(&document, source_id);
        tracing::debug!(
            "Split {} into {} chunk(s) ({} loader)",
            source_id,
            chunks.len(),
            self.loader.name()
        );
        Ok(chunks)
    }

    /// Split an already loaded document
    pub fn chunk_document(&self, document: &LoadedDocument, source_id: &str) -> Vec<DocumentChunk> {
        let mut chunks = Vec::new();
        let mut ordinal = 0u32;

        for page in &document.pages {
            for text in self.splitter.split_text(&page.text) {
                chunks.push(DocumentChunk::new(
                    text,
                    source_id,
                    page.page_number,
                    ordinal,
                    &document.metadata,
                ));
                ordinal += 1;
            }
        }

        chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DocumentMetadata, PageText};

    fn numbered_words(count: usize) -> String {
        (0..count)
            .map(|i| format!("w{:04}", i))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn test_short_text_is_single_chunk() {
        let chunker = TextChunker::new(1000, 100);
        assert_eq!(chunker.split_text("  just one line  "), vec!["just one line"]);
        assert!(chunker.split_text("   \n\n  ").is_empty());
    }

    #[test]
    fn test_prefers_paragraph_boundaries() {
        let chunker = TextChunker::new(15, 0);
        let chunks = chunker.split_text("para one.\n\npara two.");
        assert_eq!(chunks, vec!["para one.", "para two."]);
    }

    #[test]
    fn test_chunks_respect_size() {
        let chunker = TextChunker::new(50, 10);
        let text = format!("{}\n\n{}", numbered_words(200), numbered_words(30));
        let chunks = chunker.split_text(&text);

        assert!(chunks.len() > 10);
        for chunk in &chunks {
            assert!(char_len(chunk) <= 50, "chunk too long: {chunk:?}");
        }
    }

    #[test]
    fn test_overlap_carries_trailing_word() {
        // 5-char words joined by spaces: a 10-char overlap fits exactly one word
        let chunker = TextChunker::new(50, 10);
        let chunks = chunker.split_text(&numbered_words(100));

        for pair in chunks.windows(2) {
            let last_prev = pair[0].split(' ').last().unwrap();
            let first_next = pair[1].split(' ').next().unwrap();
            assert_eq!(last_prev, first_next);
        }
    }

    #[test]
    fn test_zero_overlap_partitions_words() {
        let chunker = TextChunker::new(50, 0);
        let text = numbered_words(100);
        let chunks = chunker.split_text(&text);

        assert_eq!(chunks.join(" "), text);
    }

    #[test]
    fn test_unbroken_text_falls_back_to_graphemes() {
        let chunker = TextChunker::new(10, 0);
        let chunks = chunker.split_text(&"é".repeat(25));

        assert_eq!(chunks.len(), 3);
        assert_eq!(char_len(&chunks[0]), 10);
        assert_eq!(char_len(&chunks[2]), 5);
    }

    #[test]
    fn test_ordinals_run_across_pages() {
        let document = LoadedDocument {
            pages: vec![
                PageText { page_number: 1, text: numbered_words(20) },
                PageText { page_number: 2, text: numbered_words(20) },
            ],
            metadata: DocumentMetadata {
                producer: "p".into(),
                creator: "c".into(),
                total_pages: 2,
            },
        };
        let chunker = DocumentChunker::new(
            Arc::new(PdfLoader::new()),
            TextChunker::new(60, 0),
        );

        let chunks = chunker.chunk_document(&document, "manual.pdf");

        let ordinals: Vec<u32> = chunks.iter().map(|c| c.ordinal()).collect();
        assert_eq!(ordinals, (0..chunks.len() as u32).collect::<Vec<_>>());
        assert_eq!(chunks.first().unwrap().metadata.page_number, 1);
        assert_eq!(chunks.last().unwrap().metadata.page_number, 2);
        assert!(chunks.iter().all(|c| c.source() == "manual.pdf"));
        assert!(chunks.iter().all(|c| c.metadata.producer == "p" && c.metadata.total_pages == 2));
    }

    #[test]
    fn test_chunk_pdf_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.pdf");
        std::fs::write(&path, crate::testing::build_pdf(&["Alpha beta gamma"], None)).unwrap();

        let chunks = DocumentChunker::pdf(&ChunkingConfig::default())
            .chunk_as(&path, "doc.pdf")
            .unwrap();

        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].content.contains("Alpha"));
        assert_eq!(chunks[0].format_citation(), "doc.pdf, Page 1");
    }
}
