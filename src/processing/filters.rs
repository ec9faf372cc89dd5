//! Deny-list filters applied by the ingest consumer.

use crate::config::FilterConfig;
use regex::Regex;

/// Compiled URL/text deny patterns. A document is skipped when either its URL
/// or its raw text matches.
#[derive(Debug, Default)]
pub struct Filters {
    deny_url: Option<Regex>,
    deny_text: Option<Regex>,
}

impl Filters {
    /// Compile filters from configuration. Patterns were validated at config
    /// load, so compilation failures are surfaced as errors only for direct
    /// callers.
    pub fn new(config: &FilterConfig) -> Result<Self, regex::Error> {
        Ok(Self {
            deny_url: config
                .deny_url_regex
                .as_deref()
                .map(Regex::new)
                .transpose()?,
            deny_text: config
                .deny_text_regex
                .as_deref()
                .map(Regex::new)
                .transpose()?,
        })
    }

    /// Whether a document URL passes the deny list.
    pub fn url_allowed(&self, url: &str) -> bool {
        !self
            .deny_url
            .as_ref()
            .is_some_and(|pattern| pattern.is_match(url))
    }

    /// Whether a document body passes the deny list.
    pub fn text_allowed(&self, text: &str) -> bool {
        !self
            .deny_text
            .as_ref()
            .is_some_and(|pattern| pattern.is_match(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_filters_allow_everything() {
        let filters = Filters::default();
        assert!(filters.url_allowed("https://example.com/any"));
        assert!(filters.text_allowed("any text at all"));
    }

    #[test]
    fn deny_patterns_reject_matches() {
        let filters = Filters::new(&FilterConfig {
            deny_url_regex: Some(r"(?i)/user:".to_string()),
            deny_text_regex: Some(r"#redirect".to_string()),
        })
        .unwrap();
        assert!(!filters.url_allowed("https://wiki.example/User:Admin"));
        assert!(filters.url_allowed("https://wiki.example/Xiangling"));
        assert!(!filters.text_allowed("#redirect [[Xiangling]]"));
        assert!(filters.text_allowed("Xiangling is a chef."));
    }
}
