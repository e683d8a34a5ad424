//! Chunk identity and content hashing

use sha2::{Digest, Sha256};
use std::path::Path;

use crate::types::{ChunkId, DocumentChunk};

/// Hex characters of the source digest kept in a chunk id
const SOURCE_DIGEST_LEN: usize = 32;

/// Stable identifier of a chunk, derived from its source and ordinal only.
///
/// Re-chunking the same file yields the same ids, so unchanged files are
/// recognised as already indexed. Text edits that keep the chunk count
/// therefore keep their ids; [`content_hash`] is what detects them.
pub fn identify(chunk: &DocumentChunk) -> ChunkId {
    chunk_id_for(chunk.source(), chunk.ordinal())
}

/// Identifier for `(source_id, ordinal)`
pub fn chunk_id_for(source_id: &str, ordinal: u32) -> ChunkId {
    let digest = hex::encode(Sha256::digest(source_id.as_bytes()));
    ChunkId::from_raw(format!("{}-{}", &digest[..SOURCE_DIGEST_LEN], ordinal))
}

/// SHA-256 of chunk text
pub fn content_hash(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

/// Source identifier for a file: its path relative to `root`, with `/`
/// separators. Paths outside `root` keep their full form.
pub fn source_id_for(path: &Path, root: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative.to_string_lossy().replace('\\', "/")
}
