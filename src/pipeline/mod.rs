//! Concurrent ingestion pipeline.
//!
//! Topology: one producer task per enabled source feeds a bounded document
//! queue; a single blocking consumer owns the store connection and is the
//! only writer of document/chunk state; a pool of async embed workers turns
//! pending chunks into vectors; the consumer drains worker results and
//! commits them in batches.
//!
//! All queues are bounded, so memory stays flat no matter how fast a source
//! produces: producers block on a full document queue, the consumer blocks
//! (with interleaved result drains) on a full job queue, and workers block on
//! a full results queue. Shutdown needs no sentinel values: each stage exits
//! when the channel feeding it disconnects.

use crate::codec::vector_to_bytes;
use crate::config::Config;
use crate::embedding::{EmbedOutcome, EmbeddingClient, build_client, embed_with_shrink};
use crate::processing::{DocumentProcessor, Filters, RawDocument};
use crate::sources::{SourceError, build_source};
use crate::store::{ContentStore, EmbeddingRow, StoreError};
use regex::Regex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Retry window for pushing one job onto a full embedding-job queue. Results
/// are drained between attempts so workers can always make progress.
const JOB_SEND_RETRY: Duration = Duration::from_millis(200);

/// Errors that abort an ingestion run outright. Per-document trouble is
/// counted in [`IngestStats`] instead.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A source could not be constructed from its spec.
    #[error(transparent)]
    Source(#[from] SourceError),
    /// The store could not be opened or a batch commit failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// A configured filter pattern failed to compile.
    #[error("invalid filter pattern: {0}")]
    Filter(#[from] regex::Error),
    /// A pipeline task panicked or was cancelled.
    #[error("pipeline task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// One chunk awaiting embedding.
#[derive(Debug)]
pub struct EmbedJob {
    /// Chunk row id.
    pub chunk_id: i64,
    /// Chunk text to embed.
    pub text: String,
}

/// Worker output for one job.
#[derive(Debug)]
pub struct EmbedResult {
    /// Chunk row id.
    pub chunk_id: i64,
    /// Embedded vector, or a skip after the shrink loop gave up.
    pub outcome: EmbedOutcome,
}

/// Counters reported at the end of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    /// Documents processed through the versioning engine.
    pub processed: usize,
    /// Documents rejected by the deny-list filters.
    pub skipped: usize,
    /// Documents whose transaction failed and was rolled back.
    pub failed: usize,
    /// Embedding rows committed.
    pub embedded: usize,
    /// Chunks whose embedding was skipped after all shrink attempts.
    pub embed_failed: usize,
}

/// Orchestrates one ingestion run over the configured sources.
pub struct IngestPipeline {
    config: Config,
}

impl IngestPipeline {
    /// Build a pipeline for one run.
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Open the store at the configured path and run to completion.
    pub async fn run(self) -> Result<IngestStats, PipelineError> {
        let store = ContentStore::open(&self.config.db_path)?;
        let (stats, _store) = self.run_with_store(store).await?;
        Ok(stats)
    }

    /// Run against an already-open store, returning it with the stats so
    /// callers can inspect final counts.
    pub async fn run_with_store(
        self,
        store: ContentStore,
    ) -> Result<(IngestStats, ContentStore), PipelineError> {
        let config = self.config;
        let pipeline_cfg = config.pipeline.clone();

        let deny_url = config
            .filters
            .deny_url_regex
            .as_deref()
            .map(Regex::new)
            .transpose()?;
        let filters = Filters::new(&config.filters)?;
        let processor = DocumentProcessor::new(&pipeline_cfg);
        let client = build_client(&config.embedding);

        let (doc_tx, doc_rx) = flume::bounded::<RawDocument>(pipeline_cfg.doc_queue_capacity);
        let (job_tx, job_rx) = flume::bounded::<EmbedJob>(pipeline_cfg.job_queue_capacity);
        let (result_tx, result_rx) =
            flume::bounded::<EmbedResult>(pipeline_cfg.result_queue_capacity);

        let mut producers = Vec::new();
        for spec in config.sources.iter().filter(|spec| spec.enabled) {
            let source = build_source(spec, deny_url.clone())?;
            let out = doc_tx.clone();
            producers.push(tokio::spawn(async move {
                let name = source.name().to_string();
                match source.produce(out).await {
                    Ok(produced) => {
                        tracing::info!(source = %name, produced, "Source drained");
                    }
                    Err(error) => {
                        tracing::error!(source = %name, %error, "Source aborted");
                    }
                }
            }));
        }
        // The consumer must observe disconnection once every producer is done.
        drop(doc_tx);

        let mut workers = Vec::new();
        for worker in 0..pipeline_cfg.embed_workers {
            workers.push(tokio::spawn(embed_worker(
                worker,
                Arc::clone(&client),
                job_rx.clone(),
                result_tx.clone(),
                pipeline_cfg.max_embed_chars,
                pipeline_cfg.min_embed_chars,
            )));
        }
        drop(job_rx);
        drop(result_tx);

        let consumer = tokio::task::spawn_blocking(move || {
            run_consumer(
                store, processor, filters, pipeline_cfg, doc_rx, job_tx, result_rx,
            )
        });

        for handle in producers {
            handle.await?;
        }
        let outcome = consumer.await??;
        for handle in workers {
            handle.await?;
        }
        let (stats, store) = outcome;
        tracing::info!(
            processed = stats.processed,
            skipped = stats.skipped,
            failed = stats.failed,
            embedded = stats.embedded,
            embed_failed = stats.embed_failed,
            "Ingestion run complete"
        );
        Ok((stats, store))
    }
}

async fn embed_worker(
    worker: usize,
    client: Arc<dyn EmbeddingClient>,
    jobs: flume::Receiver<EmbedJob>,
    results: flume::Sender<EmbedResult>,
    max_embed_chars: usize,
    min_embed_chars: usize,
) {
    tracing::debug!(worker, "Embed worker started");
    while let Ok(job) = jobs.recv_async().await {
        let outcome = embed_with_shrink(
            client.as_ref(),
            job.chunk_id,
            &job.text,
            max_embed_chars,
            min_embed_chars,
        )
        .await;
        let result = EmbedResult {
            chunk_id: job.chunk_id,
            outcome,
        };
        if results.send_async(result).await.is_err() {
            break;
        }
    }
    tracing::debug!(worker, "Embed worker finished");
}

/// Blocking consumer loop. Owns the store connection for the whole run.
fn run_consumer(
    mut store: ContentStore,
    processor: DocumentProcessor,
    filters: Filters,
    config: crate::config::PipelineConfig,
    doc_rx: flume::Receiver<RawDocument>,
    job_tx: flume::Sender<EmbedJob>,
    result_rx: flume::Receiver<EmbedResult>,
) -> Result<(IngestStats, ContentStore), StoreError> {
    let mut stats = IngestStats::default();
    let mut batch: Vec<EmbeddingRow> = Vec::new();
    let mut last_commit = Instant::now();

    loop {
        match doc_rx.recv_timeout(config.idle_poll()) {
            Ok(doc) => {
                if !filters.url_allowed(&doc.url) || !filters.text_allowed(&doc.raw_text) {
                    tracing::debug!(url = %doc.url, "Document denied by filters");
                    stats.skipped += 1;
                    continue;
                }
                match processor.process(&mut store, &doc) {
                    Ok(pending) => {
                        stats.processed += 1;
                        for chunk in pending {
                            let mut job = EmbedJob {
                                chunk_id: chunk.chunk_id,
                                text: chunk.text,
                            };
                            loop {
                                match job_tx.send_timeout(job, JOB_SEND_RETRY) {
                                    Ok(()) => break,
                                    Err(flume::SendTimeoutError::Timeout(returned)) => {
                                        job = returned;
                                        drain_results(&result_rx, &mut batch, &mut stats, &config);
                                        commit_if_due(
                                            &mut store,
                                            &mut batch,
                                            &mut last_commit,
                                            &mut stats,
                                            &config,
                                        )?;
                                    }
                                    Err(flume::SendTimeoutError::Disconnected(dropped)) => {
                                        // Every worker is gone; nothing can
                                        // embed this run anymore.
                                        tracing::error!(
                                            chunk_id = dropped.chunk_id,
                                            "Embed workers exited early; leaving chunk pending"
                                        );
                                        stats.embed_failed += 1;
                                        break;
                                    }
                                }
                            }
                        }
                    }
                    Err(error) => {
                        stats.failed += 1;
                        tracing::error!(url = %doc.url, %error, "Failed to process document");
                    }
                }
            }
            Err(flume::RecvTimeoutError::Timeout) => {
                tracing::debug!(
                    buffered = batch.len(),
                    "Document queue idle; draining results"
                );
            }
            Err(flume::RecvTimeoutError::Disconnected) => break,
        }
        drain_results(&result_rx, &mut batch, &mut stats, &config);
        commit_if_due(&mut store, &mut batch, &mut last_commit, &mut stats, &config)?;
    }

    // All producers are done. Dropping the job sender lets workers finish
    // the queue and exit, which in turn disconnects the results channel.
    drop(job_tx);
    loop {
        match result_rx.recv_timeout(config.idle_poll()) {
            Ok(result) => {
                buffer_result(result, &mut batch, &mut stats);
                commit_if_due(&mut store, &mut batch, &mut last_commit, &mut stats, &config)?;
            }
            Err(flume::RecvTimeoutError::Timeout) => {
                commit_if_due(&mut store, &mut batch, &mut last_commit, &mut stats, &config)?;
            }
            Err(flume::RecvTimeoutError::Disconnected) => break,
        }
    }
    stats.embedded += store.commit_embeddings(&batch)?;
    Ok((stats, store))
}

fn buffer_result(result: EmbedResult, batch: &mut Vec<EmbeddingRow>, stats: &mut IngestStats) {
    match result.outcome {
        EmbedOutcome::Embedded(vector) => batch.push(EmbeddingRow {
            chunk_id: result.chunk_id,
            dims: vector.dims,
            vector: vector_to_bytes(&vector.vector),
        }),
        EmbedOutcome::Skipped => stats.embed_failed += 1,
    }
}

/// Pull up to one commit batch worth of results off the queue without
/// blocking.
fn drain_results(
    result_rx: &flume::Receiver<EmbedResult>,
    batch: &mut Vec<EmbeddingRow>,
    stats: &mut IngestStats,
    config: &crate::config::PipelineConfig,
) {
    for _ in 0..config.commit_batch_size {
        match result_rx.try_recv() {
            Ok(result) => buffer_result(result, batch, stats),
            Err(_) => break,
        }
    }
}

/// Commit buffered embeddings when the batch threshold is reached or the
/// commit interval has elapsed.
fn commit_if_due(
    store: &mut ContentStore,
    batch: &mut Vec<EmbeddingRow>,
    last_commit: &mut Instant,
    stats: &mut IngestStats,
    config: &crate::config::PipelineConfig,
) -> Result<(), StoreError> {
    let due = batch.len() >= config.commit_batch_size
        || (!batch.is_empty() && last_commit.elapsed() >= config.commit_interval());
    if due {
        let committed = store.commit_embeddings(batch)?;
        tracing::debug!(committed, "Committed embedding batch");
        stats.embedded += committed;
        batch.clear();
        *last_commit = Instant::now();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        AuditConfig, EmbeddingConfig, EmbeddingProvider, FilterConfig, PipelineConfig,
    };
    use crate::sources::{SourceKind, SourceSpec};
    use std::path::PathBuf;

    fn markdown_spec(root: &std::path::Path) -> SourceSpec {
        SourceSpec {
            name: "docs".to_string(),
            kind: SourceKind::GithubMarkdown,
            tier: "primary".to_string(),
            weight: 1.0,
            enabled: true,
            path: Some(root.to_path_buf()),
            api: None,
            namespace: 0,
            base_url: None,
            seeds: Vec::new(),
            rate_limit_ms: 0,
            max_pages: None,
        }
    }

    fn offline_config(root: &std::path::Path) -> Config {
        Config {
            db_path: PathBuf::from(":memory:"),
            pipeline: PipelineConfig {
                chunk_size: 40,
                chunk_overlap: 10,
                max_embed_chars: 1800,
                min_embed_chars: 100,
                archive_raw: true,
                embed_workers: 2,
                commit_batch_size: 4,
                commit_interval_ms: 50,
                idle_poll_ms: 20,
                ..PipelineConfig::default()
            },
            embedding: EmbeddingConfig {
                provider: EmbeddingProvider::Offline,
                ..EmbeddingConfig::default()
            },
            filters: FilterConfig::default(),
            audit: AuditConfig::default(),
            sources: vec![markdown_spec(root)],
        }
    }

    #[tokio::test]
    async fn offline_run_embeds_every_active_chunk() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("alpha.md"),
            "Pyro resonance grants an attack bonus to the whole party for the full run.",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("beta.md"),
            "Hydro resonance restores health when characters are below half.",
        )
        .unwrap();

        let config = offline_config(dir.path());
        let store = ContentStore::open_in_memory().unwrap();
        let (stats, store) = IngestPipeline::new(config)
            .run_with_store(store)
            .await
            .unwrap();

        assert_eq!(stats.processed, 2);
        assert_eq!(stats.skipped, 0);
        assert_eq!(stats.failed, 0);
        assert_eq!(stats.embed_failed, 0);
        let active = store.chunk_count(true).unwrap();
        assert!(active > 0);
        assert_eq!(stats.embedded as i64, active);
        assert_eq!(store.embedding_count().unwrap(), active);
    }

    #[tokio::test]
    async fn deny_filter_skips_documents() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("keep.md"), "useful content that stays").unwrap();
        std::fs::write(dir.path().join("drop.md"), "unwanted content").unwrap();

        let mut config = offline_config(dir.path());
        config.filters.deny_url_regex = Some("drop".to_string());

        let store = ContentStore::open_in_memory().unwrap();
        let (stats, store) = IngestPipeline::new(config)
            .run_with_store(store)
            .await
            .unwrap();

        assert_eq!(stats.processed, 1);
        assert_eq!(stats.skipped, 1);
        assert_eq!(store.doc_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn run_with_no_sources_finishes_clean() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = offline_config(dir.path());
        config.sources.clear();

        let store = ContentStore::open_in_memory().unwrap();
        let (stats, _store) = IngestPipeline::new(config)
            .run_with_store(store)
            .await
            .unwrap();
        assert_eq!(stats, IngestStats::default());
    }
}
