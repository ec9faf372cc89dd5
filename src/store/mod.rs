//! SQLite content store: documents, chunks, and embeddings.
//!
//! The store is the single source of truth for ingestion state. All writes go
//! through one connection owned by the ingest consumer (single-writer
//! discipline); the row helpers here take a plain [`rusqlite::Connection`]
//! reference so they compose inside a caller-owned transaction.

mod schema;
mod types;

pub use types::{ChunkUpsert, DocHead, DocUpsert, EmbeddingRow, PendingChunk, StoreError};

use rusqlite::{Connection, OptionalExtension, Transaction, params};
use std::path::Path;

/// Handle to the SQLite content store.
pub struct ContentStore {
    conn: Connection,
}

impl ContentStore {
    /// Open (and if needed create) the store at `path`, applying pragmas and
    /// schema.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|source| StoreError::CreateDir {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }
        let conn = Connection::open(path)?;
        schema::apply(&conn)?;
        tracing::info!(path = %path.display(), "Opened content store");
        Ok(Self { conn })
    }

    /// Open an in-memory store. Used by tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        schema::apply(&conn)?;
        Ok(Self { conn })
    }

    /// Borrow the underlying connection for read-only passes.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Begin a write transaction.
    pub fn transaction(&mut self) -> Result<Transaction<'_>, StoreError> {
        Ok(self.conn.transaction()?)
    }

    /// Commit a batch of embedding rows in one transaction.
    ///
    /// `INSERT OR REPLACE` on the `chunk_id` primary key makes result
    /// application idempotent and order-independent.
    pub fn commit_embeddings(&mut self, rows: &[EmbeddingRow]) -> Result<usize, StoreError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO embeddings(chunk_id, dims, vector) VALUES (?1, ?2, ?3)",
            )?;
            for row in rows {
                stmt.execute(params![row.chunk_id, row.dims as i64, row.vector])?;
            }
        }
        tx.commit()?;
        Ok(rows.len())
    }

    /// Number of document rows.
    pub fn doc_count(&self) -> Result<i64, StoreError> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM docs", [], |row| row.get(0))?)
    }

    /// Number of chunk rows, optionally restricted to active ones.
    pub fn chunk_count(&self, active_only: bool) -> Result<i64, StoreError> {
        let sql = if active_only {
            "SELECT COUNT(*) FROM chunks WHERE is_active=1"
        } else {
            "SELECT COUNT(*) FROM chunks"
        };
        Ok(self.conn.query_row(sql, [], |row| row.get(0))?)
    }

    /// Number of embedding rows.
    pub fn embedding_count(&self) -> Result<i64, StoreError> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM embeddings", [], |row| row.get(0))?)
    }
}

/// Look up a document by its URL.
pub fn doc_by_url(conn: &Connection, url: &str) -> rusqlite::Result<Option<DocHead>> {
    conn.query_row(
        "SELECT doc_id, raw_hash FROM docs WHERE url=?1",
        params![url],
        |row| {
            Ok(DocHead {
                doc_id: row.get(0)?,
                raw_hash: row.get(1)?,
            })
        },
    )
    .optional()
}

/// Look up a document by `(source, raw_hash)`; this is how a URL move is
/// recognized.
pub fn doc_by_source_hash(
    conn: &Connection,
    source: &str,
    raw_hash: &str,
) -> rusqlite::Result<Option<DocHead>> {
    conn.query_row(
        "SELECT doc_id, raw_hash FROM docs WHERE source=?1 AND raw_hash=?2",
        params![source, raw_hash],
        |row| {
            Ok(DocHead {
                doc_id: row.get(0)?,
                raw_hash: row.get(1)?,
            })
        },
    )
    .optional()
}

/// Delete any document row sitting at `url`, except the one identified by
/// `keep_doc_id`. Chunks and embeddings cascade.
pub fn delete_doc_at_url(conn: &Connection, url: &str, keep_doc_id: i64) -> rusqlite::Result<usize> {
    conn.execute(
        "DELETE FROM docs WHERE url=?1 AND doc_id<>?2",
        params![url, keep_doc_id],
    )
}

/// Repoint an existing document to a new URL/title, carrying its chunk
/// history along.
pub fn repoint_doc(
    conn: &Connection,
    doc_id: i64,
    url: &str,
    title: &str,
    fetched_at: &str,
) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE docs SET url=?1, title=?2, fetched_at=?3 WHERE doc_id=?4",
        params![url, title, fetched_at, doc_id],
    )
}

/// Insert or update the document row for `upsert.url` and return its id.
pub fn upsert_doc(conn: &Connection, upsert: &DocUpsert<'_>) -> rusqlite::Result<i64> {
    let (raw_zst, raw_len, raw_zst_len) = match upsert.raw_archive {
        Some((blob, raw_len, zst_len)) => (Some(blob), Some(raw_len as i64), Some(zst_len as i64)),
        None => (None, None, None),
    };
    conn.execute(
        "INSERT INTO docs(source, url, title, fetched_at, raw_hash, norm_hash, tier, weight,
                          raw_zst, raw_len, raw_zst_len)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
         ON CONFLICT(url) DO UPDATE SET
             title=excluded.title,
             fetched_at=excluded.fetched_at,
             raw_hash=excluded.raw_hash,
             norm_hash=excluded.norm_hash,
             tier=excluded.tier,
             weight=excluded.weight,
             raw_zst=excluded.raw_zst,
             raw_len=excluded.raw_len,
             raw_zst_len=excluded.raw_zst_len",
        params![
            upsert.source,
            upsert.url,
            upsert.title,
            upsert.fetched_at,
            upsert.raw_hash,
            upsert.norm_hash,
            upsert.tier,
            upsert.weight,
            raw_zst,
            raw_len,
            raw_zst_len,
        ],
    )?;
    conn.query_row(
        "SELECT doc_id FROM docs WHERE url=?1",
        params![upsert.url],
        |row| row.get(0),
    )
}

/// Count the active chunks of a document.
pub fn active_chunk_count(conn: &Connection, doc_id: i64) -> rusqlite::Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM chunks WHERE doc_id=?1 AND is_active=1",
        params![doc_id],
        |row| row.get(0),
    )
}

/// Mark every chunk of a document inactive. Runs before new chunk slots are
/// upserted so a shrinking rebuild cannot orphan trailing indices.
pub fn deactivate_chunks(conn: &Connection, doc_id: i64) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE chunks SET is_active=0 WHERE doc_id=?1",
        params![doc_id],
    )
}

/// Fetch the id and stored hash of an existing chunk slot, if any.
pub fn chunk_slot(
    conn: &Connection,
    doc_id: i64,
    chunk_index: usize,
) -> rusqlite::Result<Option<(i64, Option<String>)>> {
    conn.query_row(
        "SELECT chunk_id, chunk_hash FROM chunks WHERE doc_id=?1 AND chunk_index=?2",
        params![doc_id, chunk_index as i64],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )
    .optional()
}

/// Insert or update one chunk slot, reactivating it.
pub fn upsert_chunk(conn: &Connection, upsert: &ChunkUpsert<'_>) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO chunks(doc_id, chunk_index, text, text_zst, text_len, text_zst_len,
                            chunk_hash, is_active)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1)
         ON CONFLICT(doc_id, chunk_index) DO UPDATE SET
             text=excluded.text,
             text_zst=excluded.text_zst,
             text_len=excluded.text_len,
             text_zst_len=excluded.text_zst_len,
             chunk_hash=excluded.chunk_hash,
             is_active=1",
        params![
            upsert.doc_id,
            upsert.chunk_index as i64,
            upsert.text,
            upsert.text_zst,
            upsert.text.len() as i64,
            upsert.text_zst.len() as i64,
            upsert.chunk_hash,
        ],
    )?;
    Ok(())
}

/// Drop the embedding row of a chunk, if present.
pub fn delete_embedding(conn: &Connection, chunk_id: i64) -> rusqlite::Result<usize> {
    conn.execute(
        "DELETE FROM embeddings WHERE chunk_id=?1",
        params![chunk_id],
    )
}

/// Active chunks of a document that have no embedding yet, in slot order.
/// Their absence is the pipeline's "work remaining" signal.
pub fn pending_chunks(conn: &Connection, doc_id: i64) -> rusqlite::Result<Vec<PendingChunk>> {
    let mut stmt = conn.prepare(
        "SELECT c.chunk_id, c.text
         FROM chunks c
         LEFT JOIN embeddings e ON e.chunk_id = c.chunk_id
         WHERE c.doc_id=?1 AND c.is_active=1 AND e.chunk_id IS NULL
         ORDER BY c.chunk_index",
    )?;
    let rows = stmt.query_map(params![doc_id], |row| {
        Ok(PendingChunk {
            chunk_id: row.get(0)?,
            text: row.get(1)?,
        })
    })?;
    rows.collect()
}
