//! Transactional document versioning, dedup, and chunk reconciliation.
//!
//! [`DocumentProcessor::process`] is the engine that decides, for one fetched
//! document, what actually changed and what embedding work remains. Every
//! call is one SQLite transaction: either the document's rows all advance to
//! the new state, or none do and the error is isolated to that document.

use crate::codec::{compress_text, sha256_hex, vector_to_bytes};
use crate::config::PipelineConfig;
use crate::embedding::{EmbedOutcome, EmbeddingClient, embed_with_shrink};
use crate::processing::chunking::chunk_text;
use crate::processing::normalize::{clean_wiki_text, normalize};
use crate::store::{
    self, ChunkUpsert, ContentStore, DocUpsert, EmbeddingRow, PendingChunk, StoreError,
};
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Errors emitted by the document processor.
#[derive(Debug, Error)]
pub enum ProcessingError {
    /// A store statement failed; the document transaction was rolled back.
    #[error("store write failed: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// The store could not open a transaction or commit a batch.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The fetch timestamp could not be formatted.
    #[error("failed to format timestamp: {0}")]
    Timestamp(#[from] time::error::Format),
}

/// One raw document handed to the processor by a source producer.
#[derive(Debug, Clone)]
pub struct RawDocument {
    /// Source name the document came from.
    pub source: String,
    /// Canonical document URL; the identity of the document.
    pub url: String,
    /// Document title.
    pub title: String,
    /// Untouched fetched text.
    pub raw_text: String,
    /// Retrieval tier label attached at ingestion time.
    pub tier: String,
    /// Retrieval relevance multiplier.
    pub weight: f64,
    /// Apply the wiki cleanup pass before normalization.
    pub wiki_cleanup: bool,
}

/// Summary of a `process_and_embed` call.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessOutcome {
    /// Chunks that needed an embedding when processing finished.
    pub pending: usize,
    /// Vectors committed by the immediate embedding pass.
    pub embedded: usize,
    /// Chunks skipped after the shrink loop gave up.
    pub skipped: usize,
}

/// Versioning/dedup/chunking engine. Cheap to construct; holds only the
/// chunking and embedding-budget knobs.
#[derive(Debug, Clone)]
pub struct DocumentProcessor {
    chunk_size: usize,
    chunk_overlap: usize,
    max_embed_chars: usize,
    min_embed_chars: usize,
    archive_raw: bool,
}

impl DocumentProcessor {
    /// Build a processor from the pipeline configuration.
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            chunk_size: config.chunk_size,
            chunk_overlap: config.chunk_overlap,
            max_embed_chars: config.max_embed_chars,
            min_embed_chars: config.min_embed_chars,
            archive_raw: config.archive_raw,
        }
    }

    /// Reconcile one document against the store and report which active
    /// chunks still need embeddings.
    ///
    /// Decision ladder, all inside one transaction:
    /// 1. Unknown URL but known `(source, raw_hash)` is a URL move: the
    ///    existing row is repointed, keeping its chunk history.
    /// 2. Known URL with matching hash and active chunks: no-op, or an
    ///    embedding-only pass when vectors are missing.
    /// 3. Anything else is a full rebuild: deactivate all chunk slots, then
    ///    upsert the new chunks in place. A slot whose hash changed drops its
    ///    stale embedding; unchanged slots keep their vector.
    pub fn process(
        &self,
        store: &mut ContentStore,
        doc: &RawDocument,
    ) -> Result<Vec<PendingChunk>, ProcessingError> {
        let raw_hash = sha256_hex(&doc.raw_text);
        let fetched_at = OffsetDateTime::now_utc().format(&Rfc3339)?;
        let tx = store.transaction()?;

        let mut existing = store::doc_by_url(&tx, &doc.url)?;
        if existing.is_none() {
            if let Some(moved) = store::doc_by_source_hash(&tx, &doc.source, &raw_hash)? {
                store::delete_doc_at_url(&tx, &doc.url, moved.doc_id)?;
                store::repoint_doc(&tx, moved.doc_id, &doc.url, &doc.title, &fetched_at)?;
                tracing::info!(
                    source = %doc.source,
                    doc_id = moved.doc_id,
                    url = %doc.url,
                    "URL move detected; repointed existing document"
                );
                existing = Some(moved);
            }
        }

        if let Some(head) = &existing {
            if head.raw_hash.as_deref() == Some(raw_hash.as_str()) {
                let active = store::active_chunk_count(&tx, head.doc_id)?;
                if active > 0 {
                    let pending = store::pending_chunks(&tx, head.doc_id)?;
                    if pending.is_empty() {
                        tracing::debug!(url = %doc.url, "Document already fully processed");
                    } else {
                        tracing::warn!(
                            url = %doc.url,
                            missing = pending.len(),
                            "Embedding-only pass; chunk rows untouched"
                        );
                    }
                    tx.commit()?;
                    return Ok(pending);
                }
                // Hash matches but no chunk survived a previous partial
                // failure; rebuild to recover.
                tracing::warn!(url = %doc.url, "No active chunks despite matching hash; rebuilding");
            } else {
                tracing::info!(url = %doc.url, "Content changed; rebuilding chunks");
            }
        }

        let cleaned = if doc.wiki_cleanup {
            clean_wiki_text(&doc.raw_text)
        } else {
            doc.raw_text.clone()
        };
        let norm = normalize(&cleaned);
        let norm_hash = sha256_hex(&norm);

        let archive = self.archive_raw.then(|| {
            let blob = compress_text(&doc.raw_text);
            let zst_len = blob.len();
            (blob, doc.raw_text.len(), zst_len)
        });
        let doc_id = store::upsert_doc(
            &tx,
            &DocUpsert {
                source: &doc.source,
                url: &doc.url,
                title: &doc.title,
                tier: &doc.tier,
                weight: doc.weight,
                fetched_at: &fetched_at,
                raw_hash: &raw_hash,
                norm_hash: &norm_hash,
                raw_archive: archive
                    .as_ref()
                    .map(|(blob, raw_len, zst_len)| (blob.as_slice(), *raw_len, *zst_len)),
            },
        )?;

        let chunks = chunk_text(&norm, self.chunk_size, self.chunk_overlap);
        store::deactivate_chunks(&tx, doc_id)?;
        for (index, chunk) in chunks.iter().enumerate() {
            let chunk_hash = sha256_hex(chunk);
            let prior = store::chunk_slot(&tx, doc_id, index)?;
            let text_zst = compress_text(chunk);
            store::upsert_chunk(
                &tx,
                &ChunkUpsert {
                    doc_id,
                    chunk_index: index,
                    text: chunk,
                    text_zst: &text_zst,
                    chunk_hash: &chunk_hash,
                },
            )?;
            if let Some((chunk_id, old_hash)) = prior {
                if old_hash.as_deref() != Some(chunk_hash.as_str()) {
                    store::delete_embedding(&tx, chunk_id)?;
                }
            }
        }

        let pending = store::pending_chunks(&tx, doc_id)?;
        tx.commit()?;
        tracing::info!(
            url = %doc.url,
            title = %doc.title,
            raw_len = doc.raw_text.len(),
            norm_len = norm.len(),
            chunks = chunks.len(),
            pending = pending.len(),
            "Document rebuilt"
        );
        Ok(pending)
    }

    /// Process a document and immediately embed whatever it reported as
    /// pending, committing the vectors before returning.
    ///
    /// The serial path and tests use this; the concurrent pipeline calls
    /// [`DocumentProcessor::process`] and hands the pending chunks to its
    /// worker pool instead.
    pub async fn process_and_embed(
        &self,
        store: &mut ContentStore,
        doc: &RawDocument,
        client: &dyn EmbeddingClient,
    ) -> Result<ProcessOutcome, ProcessingError> {
        let pending = self.process(store, doc)?;
        let mut rows = Vec::with_capacity(pending.len());
        let mut skipped = 0;
        for chunk in &pending {
            match embed_with_shrink(
                client,
                chunk.chunk_id,
                &chunk.text,
                self.max_embed_chars,
                self.min_embed_chars,
            )
            .await
            {
                EmbedOutcome::Embedded(vector) => rows.push(EmbeddingRow {
                    chunk_id: chunk.chunk_id,
                    dims: vector.dims,
                    vector: vector_to_bytes(&vector.vector),
                }),
                EmbedOutcome::Skipped => skipped += 1,
            }
        }
        let embedded = store.commit_embeddings(&rows)?;
        Ok(ProcessOutcome {
            pending: pending.len(),
            embedded,
            skipped,
        })
    }

    /// Upper character budget for text sent to the embedding backend.
    pub fn max_embed_chars(&self) -> usize {
        self.max_embed_chars
    }

    /// Floor the embedding shrink loop will not reduce below.
    pub fn min_embed_chars(&self) -> usize {
        self.min_embed_chars
    }
}
