//! Row types and error definitions for the content store.

use thiserror::Error;

/// Errors raised by content store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying SQLite error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// The parent directory for the database file could not be created.
    #[error("failed to prepare database directory {path}: {source}")]
    CreateDir {
        /// Directory that was attempted.
        path: std::path::PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

/// Identity and version of an existing document row.
#[derive(Debug, Clone)]
pub struct DocHead {
    /// Row id of the document.
    pub doc_id: i64,
    /// Stored content hash of the raw text, if any.
    pub raw_hash: Option<String>,
}

/// Full set of columns written when a document is created or rebuilt.
#[derive(Debug)]
pub struct DocUpsert<'a> {
    /// Source name the document was fetched from.
    pub source: &'a str,
    /// Canonical document URL.
    pub url: &'a str,
    /// Document title.
    pub title: &'a str,
    /// Retrieval tier label.
    pub tier: &'a str,
    /// Retrieval relevance multiplier.
    pub weight: f64,
    /// RFC3339 fetch timestamp.
    pub fetched_at: &'a str,
    /// Hash of the untouched fetched text.
    pub raw_hash: &'a str,
    /// Hash of the normalized text.
    pub norm_hash: &'a str,
    /// Optional compressed raw archive with raw/compressed lengths.
    pub raw_archive: Option<(&'a [u8], usize, usize)>,
}

/// Columns written for one chunk slot during a rebuild.
#[derive(Debug)]
pub struct ChunkUpsert<'a> {
    /// Owning document.
    pub doc_id: i64,
    /// Zero-based, contiguous slot index.
    pub chunk_index: usize,
    /// Chunk text.
    pub text: &'a str,
    /// Compressed chunk text.
    pub text_zst: &'a [u8],
    /// Hash of the chunk text.
    pub chunk_hash: &'a str,
}

/// An active chunk still waiting for an embedding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingChunk {
    /// Chunk row id.
    pub chunk_id: i64,
    /// Chunk text to embed.
    pub text: String,
}

/// One embedding row ready to be committed.
#[derive(Debug, Clone)]
pub struct EmbeddingRow {
    /// Chunk the vector belongs to.
    pub chunk_id: i64,
    /// Vector dimensionality.
    pub dims: usize,
    /// Little-endian `f32` vector bytes.
    pub vector: Vec<u8>,
}
