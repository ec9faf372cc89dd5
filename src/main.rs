use clap::{Parser, Subcommand};
use ragmill::audit;
use ragmill::config::{self, AuditConfig, Config};
use ragmill::logging;
use ragmill::pipeline::IngestPipeline;
use ragmill::store::ContentStore;
use rusqlite::Connection;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "ragmill", version, about = "Document ingestion pipeline with a versioned, auditable SQLite store")]
struct Cli {
    /// Path to the TOML config file (default: ragmill.toml, or $RAGMILL_CONFIG).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a full ingestion pass over the configured sources.
    Ingest {
        /// Audit the store afterwards; exit non-zero on any finding.
        #[arg(long)]
        audit: bool,
    },
    /// Verify store integrity without ingesting.
    Audit,
    /// Report compression effectiveness of the archived blobs.
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    logging::init_tracing();
    let cli = Cli::parse();

    let config_path = config::resolve_config_path(cli.config.as_deref());
    let config = Config::load(&config_path)?;

    match cli.command {
        Command::Ingest { audit } => {
            let audit_options = config.audit.clone();
            let store = ContentStore::open(&config.db_path)?;
            let (stats, store) = IngestPipeline::new(config).run_with_store(store).await?;
            tracing::info!(
                processed = stats.processed,
                skipped = stats.skipped,
                failed = stats.failed,
                embedded = stats.embedded,
                embed_failed = stats.embed_failed,
                docs = store.doc_count()?,
                active_chunks = store.chunk_count(true)?,
                embeddings = store.embedding_count()?,
                "Ingestion finished"
            );
            if audit {
                run_audit(store.connection(), &audit_options)?;
            }
        }
        Command::Audit => {
            let store = ContentStore::open(&config.db_path)?;
            run_audit(store.connection(), &config.audit)?;
        }
        Command::Stats => {
            let store = ContentStore::open(&config.db_path)?;
            let stats =
                audit::compression_stats(store.connection(), config.audit.active_chunks_only)?;
            println!("docs:   rows={}", stats.docs_rows);
            print_blob_line(stats.docs_avg_raw, stats.docs_avg_zst, stats.docs_ratio);
            println!("chunks: rows={}", stats.chunks_rows);
            print_blob_line(stats.chunks_avg_raw, stats.chunks_avg_zst, stats.chunks_ratio);
        }
    }
    Ok(())
}

fn print_blob_line(avg_raw: Option<f64>, avg_zst: Option<f64>, ratio: Option<f64>) {
    match (avg_raw, avg_zst, ratio) {
        (Some(raw), Some(zst), Some(ratio)) => {
            println!("        avg_raw={raw:.0}B avg_zst={zst:.0}B ratio={ratio:.3}");
        }
        _ => println!("        no archived blobs"),
    }
}

/// Run the integrity audit and turn any finding into a non-zero exit.
fn run_audit(conn: &Connection, options: &AuditConfig) -> anyhow::Result<()> {
    let report = audit::audit(conn, options)?;
    tracing::info!(
        docs_total = report.docs_total,
        docs_checked = report.docs_checked,
        docs_ok = report.docs_ok,
        chunks_total = report.chunks_total,
        chunks_checked = report.chunks_checked,
        chunks_ok = report.chunks_ok,
        "Audit summary"
    );
    if report.is_clean() {
        tracing::info!("Store integrity verified");
        return Ok(());
    }

    for ((entity, reason), count) in report.failures_by_reason() {
        tracing::warn!(entity, reason, count, "Audit findings by reason");
    }
    for failure in report.failures.iter().take(10) {
        tracing::warn!(failure = %failure, "Example finding");
    }
    anyhow::bail!(
        "integrity audit failed: {} recorded findings ({} orphan chunks, {} orphan embeddings, \
         {} missing embeddings, {} docs without active chunks)",
        report.failures.len(),
        report.orphan_chunks,
        report.orphan_embeddings,
        report.missing_embeddings,
        report.docs_missing_chunks
    );
}
