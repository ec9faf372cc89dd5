//! Content hashing, compressed text archives, and vector blob packing.
//!
//! Every persisted artifact is paired with a sha-256 hash of its text so the
//! auditor can re-verify stored blobs long after ingestion. Raw documents and
//! chunk texts are archived as zstd frames; embedding vectors are stored as
//! little-endian `f32` bytes.

use sha2::{Digest, Sha256};
use thiserror::Error;

/// Compression level applied to archived document and chunk text.
const ZSTD_LEVEL: i32 = 6;

/// Errors raised while decoding archived blobs.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The zstd frame could not be decompressed.
    #[error("zstd decompression failed: {0}")]
    Decompress(#[from] std::io::Error),
    /// The decompressed bytes were not valid UTF-8.
    #[error("archived text is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Hex-encoded sha-256 digest of a text.
pub fn sha256_hex(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// Compress a text into a zstd frame for archival.
pub fn compress_text(text: &str) -> Vec<u8> {
    // encode_all over an in-memory cursor cannot fail for valid input.
    zstd::encode_all(std::io::Cursor::new(text.as_bytes()), ZSTD_LEVEL)
        .unwrap_or_else(|_| text.as_bytes().to_vec())
}

/// Decompress an archived zstd frame back into text.
pub fn decompress_text(blob: &[u8]) -> Result<String, CodecError> {
    let bytes = zstd::decode_all(std::io::Cursor::new(blob))?;
    Ok(String::from_utf8(bytes)?)
}

/// Pack an embedding vector into little-endian `f32` bytes for storage.
pub fn vector_to_bytes(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}
