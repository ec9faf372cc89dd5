//! Same-site breadth-first crawler source.

use super::extract::{extract_links, html_to_text, page_title};
use super::{DocumentSource, SourceError, SourceSpec, http_client};
use crate::processing::RawDocument;
use async_trait::async_trait;
use regex::Regex;
use std::collections::{HashSet, VecDeque};
use url::Url;

/// Source that walks one site breadth-first from configured seed URLs.
///
/// The frontier never leaves the seed host, denied URLs are pruned before
/// they are fetched, and a `max_pages` cap bounds the walk. Fetch failures
/// skip the page rather than aborting the crawl.
pub struct CrawlSource {
    spec: SourceSpec,
    base: Url,
    seeds: Vec<Url>,
    deny_url: Option<Regex>,
    http: reqwest::Client,
}

impl CrawlSource {
    pub(crate) fn new(
        spec: SourceSpec,
        base: &str,
        deny_url: Option<Regex>,
    ) -> Result<Self, SourceError> {
        let parse = |raw: &str| {
            Url::parse(raw).map_err(|error| SourceError::InvalidUrl {
                name: spec.name.clone(),
                url: raw.to_string(),
                error,
            })
        };
        let base = parse(base)?;
        let seeds = spec.seeds.iter().map(|s| parse(s)).collect::<Result<_, _>>()?;
        Ok(Self {
            http: http_client()?,
            spec,
            base,
            seeds,
            deny_url,
        })
    }

    fn same_site(&self, url: &Url) -> bool {
        url.host_str() == self.base.host_str()
    }

    fn denied(&self, url: &Url) -> bool {
        self.deny_url
            .as_ref()
            .is_some_and(|deny| deny.is_match(url.as_str()))
    }
}

#[async_trait]
impl DocumentSource for CrawlSource {
    fn name(&self) -> &str {
        &self.spec.name
    }

    async fn produce(&self, out: flume::Sender<RawDocument>) -> Result<usize, SourceError> {
        let mut frontier: VecDeque<Url> = self.seeds.iter().cloned().collect();
        let mut seen: HashSet<String> = HashSet::new();
        let mut produced = 0;

        while let Some(url) = frontier.pop_front() {
            if self.spec.max_pages.is_some_and(|max| seen.len() >= max) {
                break;
            }
            if !seen.insert(url.to_string()) {
                continue;
            }
            if !self.same_site(&url) || self.denied(&url) {
                continue;
            }

            let html = match self.http.get(url.clone()).send().await {
                Ok(response) if response.status().is_success() => match response.text().await {
                    Ok(html) => html,
                    Err(error) => {
                        tracing::warn!(source = %self.spec.name, %url, %error, "Failed to read body; skipping");
                        tokio::time::sleep(self.spec.rate_limit()).await;
                        continue;
                    }
                },
                Ok(response) => {
                    tracing::debug!(source = %self.spec.name, %url, status = %response.status(), "Skipping non-success page");
                    tokio::time::sleep(self.spec.rate_limit()).await;
                    continue;
                }
                Err(error) => {
                    tracing::warn!(source = %self.spec.name, %url, %error, "Fetch failed; skipping");
                    tokio::time::sleep(self.spec.rate_limit()).await;
                    continue;
                }
            };

            for link in extract_links(&html, &url) {
                if self.same_site(&link) && !seen.contains(link.as_str()) && !self.denied(&link) {
                    frontier.push_back(link);
                }
            }

            let title = page_title(&html).unwrap_or_else(|| url.to_string());
            let text = html_to_text(&html);
            out.send_async(self.spec.raw_document(url.to_string(), title, text))
                .await
                .map_err(|_| SourceError::QueueClosed)?;
            produced += 1;
            tokio::time::sleep(self.spec.rate_limit()).await;
        }
        Ok(produced)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::SourceKind;
    use httpmock::prelude::*;

    fn spec(server: &MockServer, deny: Option<&str>) -> (SourceSpec, Option<Regex>) {
        let spec = SourceSpec {
            name: "site".to_string(),
            kind: SourceKind::HtmlCrawl,
            tier: "primary".to_string(),
            weight: 1.0,
            enabled: true,
            path: None,
            api: None,
            namespace: 0,
            base_url: Some(server.base_url()),
            seeds: vec![server.url("/start")],
            rate_limit_ms: 0,
            max_pages: Some(50),
        };
        (spec, deny.map(|d| Regex::new(d).unwrap()))
    }

    #[tokio::test]
    async fn crawls_same_site_links_only() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/start");
            then.status(200).body(
                "<title>Start</title><main><p>start page</p>\
                 <a href=\"/next\">next</a>\
                 <a href=\"http://elsewhere.test/away\">away</a></main>",
            );
        });
        server.mock(|when, then| {
            when.method(GET).path("/next");
            then.status(200)
                .body("<title>Next</title><main><p>second page</p></main>");
        });

        let (spec, deny) = spec(&server, None);
        let base = spec.base_url.clone().unwrap();
        let source = CrawlSource::new(spec, &base, deny).unwrap();
        let (tx, rx) = flume::unbounded();
        let produced = source.produce(tx).await.unwrap();
        assert_eq!(produced, 2);

        let first = rx.recv().unwrap();
        assert_eq!(first.title, "Start");
        assert!(first.raw_text.contains("start page"));
        let second = rx.recv().unwrap();
        assert_eq!(second.title, "Next");
    }

    #[tokio::test]
    async fn deny_regex_prunes_the_frontier() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/start");
            then.status(200).body(
                "<main><a href=\"/keep\">keep</a><a href=\"/forum/thread\">skip</a></main>",
            );
        });
        server.mock(|when, then| {
            when.method(GET).path("/keep");
            then.status(200).body("<main><p>kept</p></main>");
        });
        let forum = server.mock(|when, then| {
            when.method(GET).path("/forum/thread");
            then.status(200).body("<main><p>never fetched</p></main>");
        });

        let (spec, deny) = spec(&server, Some("/forum/"));
        let base = spec.base_url.clone().unwrap();
        let source = CrawlSource::new(spec, &base, deny).unwrap();
        let (tx, _rx) = flume::unbounded();
        let produced = source.produce(tx).await.unwrap();
        assert_eq!(produced, 2);
        forum.assert_hits(0);
    }

    #[tokio::test]
    async fn failed_pages_are_skipped() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/start");
            then.status(200)
                .body("<main><p>root</p><a href=\"/gone\">gone</a></main>");
        });
        server.mock(|when, then| {
            when.method(GET).path("/gone");
            then.status(404);
        });

        let (spec, deny) = spec(&server, None);
        let base = spec.base_url.clone().unwrap();
        let source = CrawlSource::new(spec, &base, deny).unwrap();
        let (tx, _rx) = flume::unbounded();
        assert_eq!(source.produce(tx).await.unwrap(), 1);
    }
}
