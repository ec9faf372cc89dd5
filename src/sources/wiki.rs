//! MediaWiki API source: enumerates pages through `list=allpages` and
//! fetches rendered HTML through `action=parse`.

use super::extract::html_to_text;
use super::{DocumentSource, SourceError, SourceSpec, http_client};
use crate::processing::RawDocument;
use async_trait::async_trait;
use serde::Deserialize;
use url::Url;

const ALLPAGES_LIMIT: &str = "100";

#[derive(Debug, Deserialize)]
struct AllPagesResponse {
    #[serde(rename = "continue")]
    cont: Option<AllPagesContinue>,
    #[serde(default)]
    query: Option<AllPagesQuery>,
}

#[derive(Debug, Deserialize)]
struct AllPagesContinue {
    apcontinue: String,
}

#[derive(Debug, Deserialize)]
struct AllPagesQuery {
    #[serde(default)]
    allpages: Vec<PageEntry>,
}

#[derive(Debug, Deserialize)]
struct PageEntry {
    title: String,
}

#[derive(Debug, Deserialize)]
struct ParseResponse {
    parse: Option<ParseBody>,
}

#[derive(Debug, Deserialize)]
struct ParseBody {
    text: Option<ParseText>,
}

#[derive(Debug, Deserialize)]
struct ParseText {
    #[serde(rename = "*")]
    html: Option<String>,
}

/// Source over a MediaWiki (typically Fandom) API endpoint.
pub struct WikiSource {
    spec: SourceSpec,
    api: String,
    http: reqwest::Client,
}

impl WikiSource {
    pub(crate) fn new(spec: SourceSpec, api: String) -> Result<Self, SourceError> {
        Ok(Self {
            spec,
            api,
            http: http_client()?,
        })
    }

    async fn list_page(&self, cont: Option<&str>) -> Result<AllPagesResponse, SourceError> {
        let namespace = self.spec.namespace.to_string();
        let mut params = vec![
            ("action", "query"),
            ("format", "json"),
            ("list", "allpages"),
            ("apnamespace", namespace.as_str()),
            ("aplimit", ALLPAGES_LIMIT),
        ];
        if let Some(cont) = cont {
            params.push(("apcontinue", cont));
        }
        let response = self
            .http
            .get(&self.api)
            .query(&params)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    async fn fetch_page_html(&self, title: &str) -> Result<Option<String>, SourceError> {
        let response = self
            .http
            .get(&self.api)
            .query(&[
                ("action", "parse"),
                ("format", "json"),
                ("page", title),
                ("prop", "text"),
                ("disabletoc", "1"),
                ("disablelimitreport", "1"),
                ("redirects", "1"),
            ])
            .send()
            .await?
            .error_for_status()?;
        let body: ParseResponse = response.json().await?;
        Ok(body.parse.and_then(|p| p.text).and_then(|t| t.html))
    }

    fn page_url(&self, title: &str) -> Result<String, SourceError> {
        let mut url = Url::parse(&self.api).map_err(|error| SourceError::InvalidUrl {
            name: self.spec.name.clone(),
            url: self.api.clone(),
            error,
        })?;
        url.query_pairs_mut().append_pair("title", title);
        Ok(url.to_string())
    }
}

#[async_trait]
impl DocumentSource for WikiSource {
    fn name(&self) -> &str {
        &self.spec.name
    }

    async fn produce(&self, out: flume::Sender<RawDocument>) -> Result<usize, SourceError> {
        let mut produced = 0;
        let mut fetched = 0usize;
        let mut cont: Option<String> = None;
        'listing: loop {
            let page = self.list_page(cont.as_deref()).await?;
            let titles = page.query.map(|q| q.allpages).unwrap_or_default();
            for entry in titles {
                match self.fetch_page_html(&entry.title).await {
                    Ok(Some(html)) => {
                        let text = html_to_text(&html);
                        let url = self.page_url(&entry.title)?;
                        out.send_async(self.spec.raw_document(url, entry.title, text))
                            .await
                            .map_err(|_| SourceError::QueueClosed)?;
                        produced += 1;
                    }
                    Ok(None) => {
                        tracing::debug!(source = %self.spec.name, title = %entry.title, "Page has no rendered text");
                    }
                    Err(error) => {
                        tracing::warn!(source = %self.spec.name, title = %entry.title, %error, "Failed to fetch page; skipping");
                    }
                }
                fetched += 1;
                if self.spec.max_pages.is_some_and(|max| fetched >= max) {
                    break 'listing;
                }
                tokio::time::sleep(self.spec.rate_limit()).await;
            }
            match page.cont {
                Some(next) => cont = Some(next.apcontinue),
                None => break,
            }
        }
        Ok(produced)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::SourceKind;
    use httpmock::prelude::*;

    fn spec(max_pages: Option<usize>) -> SourceSpec {
        SourceSpec {
            name: "wiki".to_string(),
            kind: SourceKind::WikiApi,
            tier: "secondary".to_string(),
            weight: 0.8,
            enabled: true,
            path: None,
            api: None,
            namespace: 0,
            base_url: None,
            seeds: Vec::new(),
            rate_limit_ms: 0,
            max_pages,
        }
    }

    fn mock_listing(
        server: &MockServer,
        expect_cont: Option<&str>,
        next_cont: Option<&str>,
        titles: &[&str],
    ) {
        let pages: Vec<String> = titles
            .iter()
            .map(|t| format!("{{\"title\": \"{t}\"}}"))
            .collect();
        let cont_field = match next_cont {
            Some(next) => {
                format!(",\"continue\": {{\"apcontinue\": \"{next}\", \"continue\": \"-||\"}}")
            }
            None => String::new(),
        };
        let body = format!(
            "{{\"query\": {{\"allpages\": [{}]}}{}}}",
            pages.join(","),
            cont_field
        );
        server.mock(|when, then| {
            let mut when = when
                .method(GET)
                .path("/api.php")
                .query_param("list", "allpages");
            match expect_cont {
                Some(from) => when = when.query_param("apcontinue", from),
                None => {
                    when = when.matches(|req| {
                        !req.query_params
                            .as_deref()
                            .unwrap_or_default()
                            .iter()
                            .any(|(k, _)| k == "apcontinue")
                    })
                }
            }
            when.query_param("action", "query");
            then.status(200)
                .json_body_obj(&serde_json::from_str::<serde_json::Value>(&body).unwrap());
        });
    }

    fn mock_parse(server: &MockServer, title: &str, html: &str) {
        let body = format!("{{\"parse\": {{\"text\": {{\"*\": \"{html}\"}}}}}}");
        server.mock(|when, then| {
            when.method(GET)
                .path("/api.php")
                .query_param("action", "parse")
                .query_param("page", title);
            then.status(200)
                .json_body_obj(&serde_json::from_str::<serde_json::Value>(&body).unwrap());
        });
    }

    #[tokio::test]
    async fn follows_continuation_and_parses_pages() {
        let server = MockServer::start();
        // First listing page continues at "Boo"; second page ends the walk.
        mock_listing(&server, Some("Boo"), None, &["Boo"]);
        mock_listing(&server, None, Some("Boo"), &["Amber"]);
        mock_parse(&server, "Amber", "<div class=\\\"mw-parser-output\\\"><p>Amber is an Outrider.</p></div>");
        mock_parse(&server, "Boo", "<p>Boo Tao.</p>");

        let source = WikiSource::new(spec(None), server.url("/api.php")).unwrap();
        let (tx, rx) = flume::unbounded();
        let produced = source.produce(tx).await.unwrap();
        assert_eq!(produced, 2);

        let doc = rx.recv().unwrap();
        assert_eq!(doc.title, "Amber");
        assert!(doc.raw_text.contains("Amber is an Outrider."));
        assert!(doc.url.contains("title=Amber"));
        assert!(doc.wiki_cleanup);
        assert_eq!(doc.tier, "secondary");
        assert_eq!(rx.recv().unwrap().title, "Boo");
    }

    #[tokio::test]
    async fn max_pages_caps_the_listing() {
        let server = MockServer::start();
        mock_listing(&server, None, None, &["One", "Two", "Three"]);
        mock_parse(&server, "One", "<p>one</p>");
        mock_parse(&server, "Two", "<p>two</p>");
        mock_parse(&server, "Three", "<p>three</p>");

        let source = WikiSource::new(spec(Some(2)), server.url("/api.php")).unwrap();
        let (tx, rx) = flume::unbounded();
        let produced = source.produce(tx).await.unwrap();
        assert_eq!(produced, 2);
        drop(rx);
    }
}
