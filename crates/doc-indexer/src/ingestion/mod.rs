//! Document ingestion: loading, splitting and chunk identity

mod chunker;
pub mod identity;
mod loader;

pub use chunker::{DocumentChunker, TextChunker};
pub use identity::{chunk_id_for, content_hash, identify, source_id_for};
pub use loader::{cleanup_pdf_text, DocumentLoader, PdfLoader};
