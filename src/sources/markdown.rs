//! Markdown-repository source: walks a local checkout and yields one
//! document per content markdown file.

use super::{DocumentSource, SourceError, SourceSpec};
use crate::processing::RawDocument;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Boilerplate filenames that carry no retrievable content.
const SKIP_NAMES: &[&str] = &[
    "readme.md",
    "changelog.md",
    "contributing.md",
    "license.md",
    "_sidebar.md",
    "_meta.md",
];

/// Source over a local markdown repository checkout.
pub struct MarkdownSource {
    spec: SourceSpec,
    root: PathBuf,
}

impl MarkdownSource {
    pub(crate) fn new(spec: SourceSpec, root: PathBuf) -> Self {
        Self { spec, root }
    }

    fn wanted(&self, path: &Path) -> bool {
        if path.extension().is_none_or(|ext| !ext.eq_ignore_ascii_case("md")) {
            return false;
        }
        if path
            .components()
            .any(|part| matches!(part.as_os_str().to_str(), Some("node_modules" | ".git")))
        {
            return false;
        }
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();
        !SKIP_NAMES.contains(&name.as_str())
    }
}

#[async_trait]
impl DocumentSource for MarkdownSource {
    fn name(&self) -> &str {
        &self.spec.name
    }

    async fn produce(&self, out: flume::Sender<RawDocument>) -> Result<usize, SourceError> {
        let mut produced = 0;
        for entry in WalkDir::new(&self.root).into_iter() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(error) => {
                    tracing::warn!(source = %self.spec.name, %error, "Skipping unreadable directory entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() || !self.wanted(entry.path()) {
                continue;
            }
            let text = match std::fs::read_to_string(entry.path()) {
                Ok(text) => text,
                Err(error) => {
                    tracing::warn!(
                        source = %self.spec.name,
                        path = %entry.path().display(),
                        %error,
                        "Skipping unreadable markdown file"
                    );
                    continue;
                }
            };
            let title = entry
                .path()
                .file_stem()
                .and_then(|stem| stem.to_str())
                .unwrap_or("untitled")
                .to_string();
            let rel = entry
                .path()
                .strip_prefix(&self.root)
                .unwrap_or(entry.path())
                .components()
                .map(|part| part.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            let url = format!("repo://{}/{}", self.spec.name, rel);
            out.send_async(self.spec.raw_document(url, title, text))
                .await
                .map_err(|_| SourceError::QueueClosed)?;
            produced += 1;
        }
        Ok(produced)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::SourceKind;

    fn spec() -> SourceSpec {
        SourceSpec {
            name: "tcl".to_string(),
            kind: SourceKind::GithubMarkdown,
            tier: "primary".to_string(),
            weight: 1.0,
            enabled: true,
            path: None,
            api: None,
            namespace: 0,
            base_url: None,
            seeds: Vec::new(),
            rate_limit_ms: 0,
            max_pages: None,
        }
    }

    #[tokio::test]
    async fn walks_content_files_and_skips_boilerplate() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("guides")).unwrap();
        std::fs::create_dir_all(dir.path().join("node_modules/pkg")).unwrap();
        std::fs::write(dir.path().join("README.md"), "boilerplate").unwrap();
        std::fs::write(dir.path().join("guides/combat.md"), "combat guide").unwrap();
        std::fs::write(dir.path().join("guides/notes.txt"), "not markdown").unwrap();
        std::fs::write(dir.path().join("node_modules/pkg/doc.md"), "vendored").unwrap();

        let source = MarkdownSource::new(spec(), dir.path().to_path_buf());
        let (tx, rx) = flume::unbounded();
        let produced = source.produce(tx).await.unwrap();
        assert_eq!(produced, 1);

        let doc = rx.recv().unwrap();
        assert_eq!(doc.url, "repo://tcl/guides/combat.md");
        assert_eq!(doc.title, "combat");
        assert_eq!(doc.raw_text, "combat guide");
        assert!(!doc.wiki_cleanup);
    }
}
