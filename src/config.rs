//! Configuration loading and validation.
//!
//! All knobs live in one explicit [`Config`] struct deserialized from a TOML
//! file; there is no dynamic dict-shaped configuration. A couple of
//! deployment-specific values (database path, config file location) may be
//! overridden through environment variables so the same file works across
//! machines.

use crate::sources::SourceSpec;
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Environment variable overriding the SQLite database path.
pub const ENV_DB_PATH: &str = "RAGMILL_DB";
/// Environment variable selecting the TOML config file.
pub const ENV_CONFIG_PATH: &str = "RAGMILL_CONFIG";

/// Errors encountered while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Read {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
    /// The config file was not valid TOML for the expected schema.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    /// A value was present but semantically invalid.
    #[error("invalid config value: {0}")]
    InvalidValue(String),
}

/// Runtime configuration for an ingestion run.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Path of the SQLite content store.
    pub db_path: PathBuf,
    /// Chunking, embedding-budget, and concurrency knobs.
    #[serde(default)]
    pub pipeline: PipelineConfig,
    /// Embedding backend selection and connection settings.
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    /// Deny-list filters applied by the ingest consumer.
    #[serde(default)]
    pub filters: FilterConfig,
    /// Integrity audit sampling knobs.
    #[serde(default)]
    pub audit: AuditConfig,
    /// Document sources to ingest from.
    #[serde(default)]
    pub sources: Vec<SourceSpec>,
}

/// Chunking and pipeline concurrency settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Window size of the chunker, in characters.
    pub chunk_size: usize,
    /// Overlap between consecutive chunks, in characters. Must be `< chunk_size`.
    pub chunk_overlap: usize,
    /// Upper character budget for text sent to the embedding backend.
    pub max_embed_chars: usize,
    /// Floor the shrink loop will not reduce below.
    pub min_embed_chars: usize,
    /// Archive a zstd-compressed copy of the raw text on each rebuild.
    pub archive_raw: bool,
    /// Number of concurrent embedding workers.
    pub embed_workers: usize,
    /// Capacity of the bounded document queue (producer backpressure point).
    pub doc_queue_capacity: usize,
    /// Capacity of the bounded embedding-job queue.
    pub job_queue_capacity: usize,
    /// Capacity of the bounded results queue.
    pub result_queue_capacity: usize,
    /// Buffered embedding results that force a commit.
    pub commit_batch_size: usize,
    /// Milliseconds after which buffered results are committed regardless of count.
    pub commit_interval_ms: u64,
    /// Consumer poll timeout on an empty document queue, in milliseconds.
    pub idle_poll_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunk_size: 2400,
            chunk_overlap: 300,
            max_embed_chars: 1800,
            min_embed_chars: 800,
            archive_raw: false,
            embed_workers: 2,
            doc_queue_capacity: 64,
            job_queue_capacity: 256,
            result_queue_capacity: 256,
            commit_batch_size: 64,
            commit_interval_ms: 5_000,
            idle_poll_ms: 500,
        }
    }
}

impl PipelineConfig {
    /// Wall-clock interval bounding how long embedding results sit uncommitted.
    pub fn commit_interval(&self) -> Duration {
        Duration::from_millis(self.commit_interval_ms)
    }

    /// Timeout applied while waiting on an empty document queue.
    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms)
    }
}

/// Supported embedding backends.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    /// Remote Ollama embed endpoint.
    Ollama,
    /// Deterministic offline fallback; useful for tests and dry runs.
    Offline,
}

/// Embedding backend settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Which backend produces the vectors.
    pub provider: EmbeddingProvider,
    /// Base URL of the Ollama instance.
    pub base_url: String,
    /// Embedding model identifier passed to the backend.
    pub model: String,
    /// Vector dimensionality used by the offline provider.
    pub offline_dimension: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::Ollama,
            base_url: "http://127.0.0.1:11434".to_string(),
            model: "nomic-embed-text".to_string(),
            offline_dimension: 384,
        }
    }
}

/// Deny-list regular expressions applied before a document is processed.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Documents whose URL matches are skipped.
    pub deny_url_regex: Option<String>,
    /// Documents whose text matches are skipped.
    pub deny_text_regex: Option<String>,
}

/// Integrity audit sampling and reporting limits.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Maximum documents whose archived blob is re-hashed.
    pub sample_docs: usize,
    /// Maximum chunks whose archived blob is re-hashed.
    pub sample_chunks: usize,
    /// Seed for the deterministic sampler.
    pub seed: u64,
    /// Restrict blob checks to active chunks.
    pub active_chunks_only: bool,
    /// Cap on reported orphan failures (totals stay exact).
    pub max_orphan_failures: usize,
    /// Cap on reported missing-embedding failures (totals stay exact).
    pub max_missing_embedding_failures: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            sample_docs: 1500,
            sample_chunks: 1000,
            seed: 1337,
            active_chunks_only: true,
            max_orphan_failures: 2500,
            max_missing_embedding_failures: 2500,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, applying environment overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Config = toml::from_str(&raw)?;
        if let Some(db) = env_optional(ENV_DB_PATH) {
            config.db_path = PathBuf::from(db);
        }
        config.validate()?;
        tracing::debug!(
            db_path = %config.db_path.display(),
            sources = config.sources.len(),
            embed_workers = config.pipeline.embed_workers,
            provider = ?config.embedding.provider,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Reject configurations that cannot drive a correct run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let p = &self.pipeline;
        if p.chunk_size == 0 {
            return Err(ConfigError::InvalidValue(
                "pipeline.chunk_size must be greater than zero".into(),
            ));
        }
        if p.chunk_overlap >= p.chunk_size {
            return Err(ConfigError::InvalidValue(format!(
                "pipeline.chunk_overlap ({}) must be smaller than chunk_size ({})",
                p.chunk_overlap, p.chunk_size
            )));
        }
        if p.min_embed_chars > p.max_embed_chars {
            return Err(ConfigError::InvalidValue(
                "pipeline.min_embed_chars must not exceed max_embed_chars".into(),
            ));
        }
        if p.embed_workers == 0 {
            return Err(ConfigError::InvalidValue(
                "pipeline.embed_workers must be at least 1".into(),
            ));
        }
        for (name, value) in [
            ("doc_queue_capacity", p.doc_queue_capacity),
            ("job_queue_capacity", p.job_queue_capacity),
            ("result_queue_capacity", p.result_queue_capacity),
            ("commit_batch_size", p.commit_batch_size),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidValue(format!(
                    "pipeline.{name} must be at least 1"
                )));
            }
        }
        for (name, pattern) in [
            ("deny_url_regex", &self.filters.deny_url_regex),
            ("deny_text_regex", &self.filters.deny_text_regex),
        ] {
            if let Some(pattern) = pattern {
                regex::Regex::new(pattern).map_err(|err| {
                    ConfigError::InvalidValue(format!("filters.{name} is not a valid regex: {err}"))
                })?;
            }
        }
        Ok(())
    }
}

/// Resolve the config file path, honoring the `RAGMILL_CONFIG` override.
pub fn resolve_config_path(cli_path: Option<&Path>) -> PathBuf {
    if let Some(path) = cli_path {
        return path.to_path_buf();
    }
    env_optional(ENV_CONFIG_PATH)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("ragmill.toml"))
}

fn env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> Config {
        toml::from_str(raw).expect("config parses")
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let config = parse("db_path = \"data/rag.db\"");
        assert_eq!(config.pipeline.chunk_size, 2400);
        assert_eq!(config.pipeline.chunk_overlap, 300);
        assert_eq!(config.pipeline.embed_workers, 2);
        assert_eq!(config.embedding.provider, EmbeddingProvider::Ollama);
        assert!(config.sources.is_empty());
        config.validate().expect("defaults are valid");
    }

    #[test]
    fn rejects_overlap_not_smaller_than_size() {
        let config = parse(
            r#"
            db_path = "data/rag.db"
            [pipeline]
            chunk_size = 100
            chunk_overlap = 100
            "#,
        );
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue(_))
        ));
    }

    #[test]
    fn rejects_bad_filter_regex() {
        let config = parse(
            r#"
            db_path = "data/rag.db"
            [filters]
            deny_url_regex = "([unclosed"
            "#,
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn parses_sources_and_audit_sections() {
        let config = parse(
            r#"
            db_path = "data/rag.db"

            [audit]
            sample_docs = 10
            seed = 7

            [[sources]]
            name = "tcl"
            kind = "github-markdown"
            path = "repos/tcl"
            tier = "primary"
            weight = 1.5
            "#,
        );
        assert_eq!(config.audit.sample_docs, 10);
        assert_eq!(config.audit.seed, 7);
        assert_eq!(config.sources.len(), 1);
        assert_eq!(config.sources[0].name, "tcl");
    }
}
