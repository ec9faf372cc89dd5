//! Post-run integrity verification of the content store.
//!
//! The auditor is a read-only pass with two halves: a seeded random sample
//! of archived blobs that are decompressed and re-hashed against their
//! stored hashes, and an exhaustive referential sweep for orphan rows and
//! missing embeddings. The sample is deterministic for a given seed, so two
//! audits of the same store always check the same rows.

use crate::codec::{decompress_text, sha256_hex};
use crate::config::AuditConfig;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rusqlite::Connection;
use std::collections::BTreeMap;
use std::fmt;

/// Which table a failure was found in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Entity {
    /// A `docs` row.
    Doc,
    /// A `chunks` row.
    Chunk,
    /// An `embeddings` row.
    Embedding,
}

impl Entity {
    /// Short stable label used in summaries.
    pub fn label(&self) -> &'static str {
        match self {
            Entity::Doc => "doc",
            Entity::Chunk => "chunk",
            Entity::Embedding => "embedding",
        }
    }
}

/// Why a row failed the audit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The row should carry a compressed blob but does not.
    MissingBlob,
    /// The row should carry a content hash but does not.
    MissingHash,
    /// Recomputed hash did not match the stored one.
    HashMismatch {
        /// Hash recomputed from the decompressed blob.
        got: String,
        /// Hash stored on the row.
        expected: String,
    },
    /// The archived blob failed to decompress or was not UTF-8.
    DecompressError(String),
    /// Chunk row whose parent document does not exist.
    OrphanChunk {
        /// Dangling parent id the chunk points at.
        doc_id: i64,
    },
    /// Embedding row whose parent chunk does not exist.
    OrphanEmbedding,
    /// Document with zero active chunks.
    NoActiveChunks,
    /// Active chunk with no embedding row.
    MissingEmbedding,
}

impl FailureReason {
    /// Short stable label used when aggregating failures by reason.
    pub fn label(&self) -> &'static str {
        match self {
            FailureReason::MissingBlob => "missing_blob",
            FailureReason::MissingHash => "missing_hash",
            FailureReason::HashMismatch { .. } => "hash_mismatch",
            FailureReason::DecompressError(_) => "decompress_error",
            FailureReason::OrphanChunk { .. } => "orphan_chunk",
            FailureReason::OrphanEmbedding => "orphan_embedding",
            FailureReason::NoActiveChunks => "doc_has_no_active_chunks",
            FailureReason::MissingEmbedding => "active_chunk_missing_embedding",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::HashMismatch { got, expected } => {
                write!(f, "hash_mismatch (got {got}, expected {expected})")
            }
            FailureReason::DecompressError(error) => write!(f, "decompress_error ({error})"),
            FailureReason::OrphanChunk { doc_id } => write!(f, "orphan_chunk (doc_id {doc_id})"),
            other => f.write_str(other.label()),
        }
    }
}

/// One audit finding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrityFailure {
    /// Table the failing row lives in.
    pub entity: Entity,
    /// Row id.
    pub id: i64,
    /// Document URL for context, when one exists.
    pub url: String,
    /// What failed.
    pub reason: FailureReason,
}

impl fmt::Display for IntegrityFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} ({}): {}",
            self.entity.label(),
            self.id,
            self.url,
            self.reason
        )
    }
}

/// Result of one audit pass.
#[derive(Debug, Default)]
pub struct IntegrityReport {
    /// Docs carrying a blob or hash (the auditable population).
    pub docs_total: usize,
    /// Docs whose blob was decompressed and re-hashed.
    pub docs_checked: usize,
    /// Docs that passed the re-hash.
    pub docs_ok: usize,
    /// Chunks carrying a blob or hash.
    pub chunks_total: usize,
    /// Chunks whose blob was decompressed and re-hashed.
    pub chunks_checked: usize,
    /// Chunks that passed the re-hash.
    pub chunks_ok: usize,
    /// Exact count of chunks without a parent document.
    pub orphan_chunks: usize,
    /// Exact count of embeddings without a parent chunk.
    pub orphan_embeddings: usize,
    /// Exact count of active chunks without an embedding.
    pub missing_embeddings: usize,
    /// Exact count of documents with zero active chunks.
    pub docs_missing_chunks: usize,
    /// Individual findings; orphan and missing-embedding entries are capped
    /// by configuration while the counts above stay exact.
    pub failures: Vec<IntegrityFailure>,
}

impl IntegrityReport {
    /// True when the audit found nothing wrong.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
            && self.orphan_chunks == 0
            && self.orphan_embeddings == 0
            && self.missing_embeddings == 0
            && self.docs_missing_chunks == 0
    }

    /// Failure counts keyed by `(entity, reason)` labels.
    pub fn failures_by_reason(&self) -> BTreeMap<(&'static str, &'static str), usize> {
        let mut by_reason = BTreeMap::new();
        for failure in &self.failures {
            *by_reason
                .entry((failure.entity.label(), failure.reason.label()))
                .or_insert(0) += 1;
        }
        by_reason
    }
}

/// Compression effectiveness summary over the archived blobs.
#[derive(Debug, Default)]
pub struct CompressionStats {
    /// Docs carrying a complete archive (blob plus both lengths).
    pub docs_rows: usize,
    /// Mean uncompressed document length.
    pub docs_avg_raw: Option<f64>,
    /// Mean compressed document length.
    pub docs_avg_zst: Option<f64>,
    /// Mean compressed / mean uncompressed.
    pub docs_ratio: Option<f64>,
    /// Chunks counted (active only, when configured).
    pub chunks_rows: usize,
    /// Mean uncompressed chunk length.
    pub chunks_avg_raw: Option<f64>,
    /// Mean compressed chunk length.
    pub chunks_avg_zst: Option<f64>,
    /// Mean compressed / mean uncompressed.
    pub chunks_ratio: Option<f64>,
}

struct BlobRow {
    id: i64,
    url: String,
    blob: Option<Vec<u8>>,
    hash: Option<String>,
}

/// Verify the store against its own invariants.
///
/// `sample_docs`/`sample_chunks` bound the blob re-hash work; zero disables
/// that half entirely. The referential sweep is always exhaustive.
pub fn audit(conn: &Connection, options: &AuditConfig) -> rusqlite::Result<IntegrityReport> {
    let mut rng = StdRng::seed_from_u64(options.seed);
    let mut report = IntegrityReport::default();

    let doc_rows = load_blob_rows(
        conn,
        "SELECT doc_id, url, raw_zst, raw_hash FROM docs
         WHERE raw_zst IS NOT NULL OR raw_hash IS NOT NULL",
    )?;
    report.docs_total = doc_rows.len();
    let checkable = split_incomplete(doc_rows, Entity::Doc, &mut report.failures);
    let picked = sample_rows(checkable, options.sample_docs, &mut rng);
    report.docs_checked = picked.len();
    report.docs_ok = verify_blobs(picked, Entity::Doc, &mut report.failures);

    let chunk_sql = if options.active_chunks_only {
        "SELECT c.chunk_id, d.url, c.text_zst, c.chunk_hash
         FROM chunks c JOIN docs d ON d.doc_id = c.doc_id
         WHERE (c.text_zst IS NOT NULL OR c.chunk_hash IS NOT NULL) AND c.is_active=1"
    } else {
        "SELECT c.chunk_id, d.url, c.text_zst, c.chunk_hash
         FROM chunks c JOIN docs d ON d.doc_id = c.doc_id
         WHERE c.text_zst IS NOT NULL OR c.chunk_hash IS NOT NULL"
    };
    let chunk_rows = load_blob_rows(conn, chunk_sql)?;
    report.chunks_total = chunk_rows.len();
    let checkable = split_incomplete(chunk_rows, Entity::Chunk, &mut report.failures);
    let picked = sample_rows(checkable, options.sample_chunks, &mut rng);
    report.chunks_checked = picked.len();
    report.chunks_ok = verify_blobs(picked, Entity::Chunk, &mut report.failures);

    sweep_referential(conn, options, &mut report)?;

    tracing::info!(
        docs_checked = report.docs_checked,
        docs_ok = report.docs_ok,
        chunks_checked = report.chunks_checked,
        chunks_ok = report.chunks_ok,
        failures = report.failures.len(),
        "Audit complete"
    );
    Ok(report)
}

fn load_blob_rows(conn: &Connection, sql: &str) -> rusqlite::Result<Vec<BlobRow>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map([], |row| {
        Ok(BlobRow {
            id: row.get(0)?,
            url: row.get(1)?,
            blob: row.get(2)?,
            hash: row.get(3)?,
        })
    })?;
    rows.collect()
}

/// Flag rows missing their blob or hash outright; return the rest.
fn split_incomplete(
    rows: Vec<BlobRow>,
    entity: Entity,
    failures: &mut Vec<IntegrityFailure>,
) -> Vec<BlobRow> {
    let mut checkable = Vec::with_capacity(rows.len());
    for row in rows {
        let reason = match (&row.blob, &row.hash) {
            (None, _) => Some(FailureReason::MissingBlob),
            (_, None) => Some(FailureReason::MissingHash),
            _ => None,
        };
        match reason {
            Some(reason) => failures.push(IntegrityFailure {
                entity,
                id: row.id,
                url: row.url,
                reason,
            }),
            None => checkable.push(row),
        }
    }
    checkable
}

fn sample_rows(rows: Vec<BlobRow>, samples: usize, rng: &mut StdRng) -> Vec<BlobRow> {
    if samples == 0 {
        return Vec::new();
    }
    if rows.len() <= samples {
        return rows;
    }
    let picked = rand::seq::index::sample(rng, rows.len(), samples).into_vec();
    let mut rows: Vec<Option<BlobRow>> = rows.into_iter().map(Some).collect();
    picked
        .into_iter()
        .filter_map(|index| rows[index].take())
        .collect()
}

fn verify_blobs(
    rows: Vec<BlobRow>,
    entity: Entity,
    failures: &mut Vec<IntegrityFailure>,
) -> usize {
    let mut ok = 0;
    for row in rows {
        // split_incomplete guarantees both are present here.
        let (Some(blob), Some(expected)) = (row.blob, row.hash) else {
            continue;
        };
        match decompress_text(&blob) {
            Ok(text) => {
                let got = sha256_hex(&text);
                if got == expected {
                    ok += 1;
                } else {
                    failures.push(IntegrityFailure {
                        entity,
                        id: row.id,
                        url: row.url,
                        reason: FailureReason::HashMismatch { got, expected },
                    });
                }
            }
            Err(error) => failures.push(IntegrityFailure {
                entity,
                id: row.id,
                url: row.url,
                reason: FailureReason::DecompressError(error.to_string()),
            }),
        }
    }
    ok
}

fn sweep_referential(
    conn: &Connection,
    options: &AuditConfig,
    report: &mut IntegrityReport,
) -> rusqlite::Result<()> {
    let orphan_chunks: Vec<(i64, i64)> = collect_rows(
        conn,
        "SELECT c.chunk_id, c.doc_id
         FROM chunks c LEFT JOIN docs d ON d.doc_id = c.doc_id
         WHERE d.doc_id IS NULL",
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    report.orphan_chunks = orphan_chunks.len();
    for (chunk_id, doc_id) in orphan_chunks.into_iter().take(options.max_orphan_failures) {
        report.failures.push(IntegrityFailure {
            entity: Entity::Chunk,
            id: chunk_id,
            url: String::new(),
            reason: FailureReason::OrphanChunk { doc_id },
        });
    }

    let orphan_embeddings: Vec<i64> = collect_rows(
        conn,
        "SELECT e.chunk_id
         FROM embeddings e LEFT JOIN chunks c ON c.chunk_id = e.chunk_id
         WHERE c.chunk_id IS NULL",
        |row| row.get(0),
    )?;
    report.orphan_embeddings = orphan_embeddings.len();
    for chunk_id in orphan_embeddings
        .into_iter()
        .take(options.max_orphan_failures)
    {
        report.failures.push(IntegrityFailure {
            entity: Entity::Embedding,
            id: chunk_id,
            url: String::new(),
            reason: FailureReason::OrphanEmbedding,
        });
    }

    let chunkless_docs: Vec<(i64, String)> = collect_rows(
        conn,
        "SELECT d.doc_id, d.url
         FROM docs d LEFT JOIN chunks c ON c.doc_id = d.doc_id AND c.is_active=1
         GROUP BY d.doc_id
         HAVING COUNT(c.chunk_id)=0",
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    report.docs_missing_chunks = chunkless_docs.len();
    for (doc_id, url) in chunkless_docs.into_iter().take(options.max_orphan_failures) {
        report.failures.push(IntegrityFailure {
            entity: Entity::Doc,
            id: doc_id,
            url,
            reason: FailureReason::NoActiveChunks,
        });
    }

    let missing_embeddings: Vec<(i64, String)> = collect_rows(
        conn,
        "SELECT c.chunk_id, d.url
         FROM chunks c
         JOIN docs d ON d.doc_id = c.doc_id
         LEFT JOIN embeddings e ON e.chunk_id = c.chunk_id
         WHERE c.is_active=1 AND e.chunk_id IS NULL",
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    report.missing_embeddings = missing_embeddings.len();
    for (chunk_id, url) in missing_embeddings
        .into_iter()
        .take(options.max_missing_embedding_failures)
    {
        report.failures.push(IntegrityFailure {
            entity: Entity::Chunk,
            id: chunk_id,
            url,
            reason: FailureReason::MissingEmbedding,
        });
    }
    Ok(())
}

fn collect_rows<T>(
    conn: &Connection,
    sql: &str,
    map: impl FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<T>,
) -> rusqlite::Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map([], map)?;
    rows.collect()
}

/// Average raw/compressed lengths and their ratio for archived blobs.
pub fn compression_stats(
    conn: &Connection,
    active_chunks_only: bool,
) -> rusqlite::Result<CompressionStats> {
    let mut stats = CompressionStats::default();
    let (rows, avg_raw, avg_zst): (i64, Option<f64>, Option<f64>) = conn.query_row(
        "SELECT COUNT(*), AVG(raw_len), AVG(raw_zst_len)
         FROM docs
         WHERE raw_zst IS NOT NULL AND raw_len IS NOT NULL AND raw_zst_len IS NOT NULL",
        [],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
    )?;
    stats.docs_rows = rows as usize;
    stats.docs_avg_raw = avg_raw;
    stats.docs_avg_zst = avg_zst;
    stats.docs_ratio = ratio(avg_raw, avg_zst);

    let chunk_sql = if active_chunks_only {
        "SELECT COUNT(*), AVG(text_len), AVG(text_zst_len)
         FROM chunks
         WHERE text_zst IS NOT NULL AND text_len IS NOT NULL AND text_zst_len IS NOT NULL
           AND is_active=1"
    } else {
        "SELECT COUNT(*), AVG(text_len), AVG(text_zst_len)
         FROM chunks
         WHERE text_zst IS NOT NULL AND text_len IS NOT NULL AND text_zst_len IS NOT NULL"
    };
    let (rows, avg_raw, avg_zst): (i64, Option<f64>, Option<f64>) =
        conn.query_row(chunk_sql, [], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
        })?;
    stats.chunks_rows = rows as usize;
    stats.chunks_avg_raw = avg_raw;
    stats.chunks_avg_zst = avg_zst;
    stats.chunks_ratio = ratio(avg_raw, avg_zst);
    Ok(stats)
}

fn ratio(avg_raw: Option<f64>, avg_zst: Option<f64>) -> Option<f64> {
    match (avg_raw, avg_zst) {
        (Some(raw), Some(zst)) if raw > 0.0 => Some(zst / raw),
        _ => None,
    }
}
