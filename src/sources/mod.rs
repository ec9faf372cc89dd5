//! Document sources and their configuration.
//!
//! A source is an opaque producer of `(url, title, raw_text)` documents. The
//! pipeline spawns one producer task per enabled source; each drains its
//! adapter into the bounded document queue and reports how many documents it
//! yielded. Fetch errors stay inside the adapter (logged and skipped), so a
//! misbehaving site cannot abort the run.

mod crawl;
mod extract;
mod markdown;
mod wiki;

use crate::processing::RawDocument;
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub use crawl::CrawlSource;
pub use markdown::MarkdownSource;
pub use wiki::WikiSource;

/// Errors raised while constructing or running a source.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The source spec is missing a field its kind requires.
    #[error("source '{name}' is missing required field '{field}'")]
    MissingField {
        /// Source name from the spec.
        name: String,
        /// Field the kind requires.
        field: &'static str,
    },
    /// A configured URL did not parse.
    #[error("source '{name}' has invalid URL '{url}': {error}")]
    InvalidUrl {
        /// Source name from the spec.
        name: String,
        /// Offending URL string.
        url: String,
        /// Parse failure detail.
        error: url::ParseError,
    },
    /// The HTTP client could not be built.
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    /// A remote API returned a payload the adapter could not use.
    #[error("unexpected API response from {api}: {detail}")]
    Api {
        /// API endpoint queried.
        api: String,
        /// What was wrong with the payload.
        detail: String,
    },
    /// A request failed after the adapter's own tolerance was exhausted.
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// The document queue closed while the source was still producing.
    #[error("document queue closed before source finished")]
    QueueClosed,
}

/// Closed set of supported source kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
pub enum SourceKind {
    /// Walk a local checkout of a markdown repository.
    #[serde(rename = "github-markdown")]
    GithubMarkdown,
    /// Enumerate and fetch pages through a MediaWiki API endpoint.
    #[serde(rename = "wiki-api")]
    WikiApi,
    /// Breadth-first same-site crawl from seed URLs.
    #[serde(rename = "html-crawl")]
    HtmlCrawl,
}

/// One `[[sources]]` entry from the config file.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceSpec {
    /// Source name; recorded on every document it produces.
    pub name: String,
    /// Which adapter drives this source.
    pub kind: SourceKind,
    /// Retrieval tier label.
    #[serde(default = "default_tier")]
    pub tier: String,
    /// Retrieval relevance multiplier.
    #[serde(default = "default_weight")]
    pub weight: f64,
    /// Disabled sources are skipped without error.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Repository root (github-markdown).
    pub path: Option<PathBuf>,
    /// MediaWiki `api.php` endpoint (wiki-api).
    pub api: Option<String>,
    /// Wiki namespace to enumerate (wiki-api).
    #[serde(default)]
    pub namespace: u32,
    /// Site root used for the same-site check (html-crawl).
    pub base_url: Option<String>,
    /// Crawl entry points (html-crawl).
    #[serde(default)]
    pub seeds: Vec<String>,
    /// Delay between remote fetches, in milliseconds.
    #[serde(default = "default_rate_limit_ms")]
    pub rate_limit_ms: u64,
    /// Cap on pages fetched from a remote source.
    pub max_pages: Option<usize>,
}

fn default_tier() -> String {
    "primary".to_string()
}

fn default_weight() -> f64 {
    1.0
}

fn default_enabled() -> bool {
    true
}

fn default_rate_limit_ms() -> u64 {
    1_000
}

impl SourceSpec {
    /// Delay inserted between remote fetches.
    pub fn rate_limit(&self) -> Duration {
        Duration::from_millis(self.rate_limit_ms)
    }

    /// Wrap fetched content in a [`RawDocument`] tagged with this source's
    /// metadata.
    pub(crate) fn raw_document(&self, url: String, title: String, raw_text: String) -> RawDocument {
        RawDocument {
            source: self.name.clone(),
            url,
            title,
            raw_text,
            tier: self.tier.clone(),
            weight: self.weight,
            wiki_cleanup: self.kind == SourceKind::WikiApi,
        }
    }

    fn require<'a, T>(&self, field: &'static str, value: Option<&'a T>) -> Result<&'a T, SourceError> {
        value.ok_or(SourceError::MissingField {
            name: self.name.clone(),
            field,
        })
    }
}

/// A producer of raw documents.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Source name, for logging and stats.
    fn name(&self) -> &str;

    /// Drain the source into `out`, returning how many documents were sent.
    async fn produce(&self, out: flume::Sender<RawDocument>) -> Result<usize, SourceError>;
}

/// Instantiate the adapter a spec describes.
///
/// `deny_url` lets the crawler prune its frontier early; the ingest consumer
/// still applies the full filter set to everything that comes through.
pub fn build_source(
    spec: &SourceSpec,
    deny_url: Option<Regex>,
) -> Result<Box<dyn DocumentSource>, SourceError> {
    match spec.kind {
        SourceKind::GithubMarkdown => {
            let path = spec.require("path", spec.path.as_ref())?;
            Ok(Box::new(MarkdownSource::new(spec.clone(), path.clone())))
        }
        SourceKind::WikiApi => {
            let api = spec.require("api", spec.api.as_ref())?.clone();
            Ok(Box::new(WikiSource::new(spec.clone(), api)?))
        }
        SourceKind::HtmlCrawl => {
            let base = spec.require("base_url", spec.base_url.as_ref())?;
            if spec.seeds.is_empty() {
                return Err(SourceError::MissingField {
                    name: spec.name.clone(),
                    field: "seeds",
                });
            }
            Ok(Box::new(CrawlSource::new(spec.clone(), base, deny_url)?))
        }
    }
}

pub(crate) fn http_client() -> Result<reqwest::Client, SourceError> {
    reqwest::Client::builder()
        .user_agent(concat!("ragmill/", env!("CARGO_PKG_VERSION")))
        .timeout(Duration::from_secs(60))
        .build()
        .map_err(SourceError::Client)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(kind: &str) -> SourceSpec {
        toml::from_str(&format!(
            "name = \"s\"\nkind = \"{kind}\"\npath = \"repos/s\"\napi = \"http://w/api.php\"\nbase_url = \"http://w\"\nseeds = [\"http://w/\"]\n"
        ))
        .expect("spec parses")
    }

    #[test]
    fn spec_defaults() {
        let spec: SourceSpec =
            toml::from_str("name = \"s\"\nkind = \"github-markdown\"\npath = \"x\"").unwrap();
        assert_eq!(spec.tier, "primary");
        assert!((spec.weight - 1.0).abs() < f64::EPSILON);
        assert!(spec.enabled);
        assert_eq!(spec.rate_limit_ms, 1_000);
        assert_eq!(spec.namespace, 0);
        assert!(spec.max_pages.is_none());
    }

    #[test]
    fn kind_names_are_closed() {
        for (raw, kind) in [
            ("github-markdown", SourceKind::GithubMarkdown),
            ("wiki-api", SourceKind::WikiApi),
            ("html-crawl", SourceKind::HtmlCrawl),
        ] {
            assert_eq!(spec(raw).kind, kind);
        }
        assert!(toml::from_str::<SourceSpec>("name = \"s\"\nkind = \"rss\"").is_err());
    }

    #[test]
    fn build_rejects_missing_fields() {
        let mut crawl = spec("html-crawl");
        crawl.seeds.clear();
        assert!(matches!(
            build_source(&crawl, None),
            Err(SourceError::MissingField { field: "seeds", .. })
        ));

        let mut markdown = spec("github-markdown");
        markdown.path = None;
        assert!(matches!(
            build_source(&markdown, None),
            Err(SourceError::MissingField { field: "path", .. })
        ));
    }

    #[test]
    fn wiki_documents_get_cleanup_flag() {
        let doc = spec("wiki-api").raw_document("u".into(), "t".into(), "x".into());
        assert!(doc.wiki_cleanup);
        let doc = spec("github-markdown").raw_document("u".into(), "t".into(), "x".into());
        assert!(!doc.wiki_cleanup);
    }
}
