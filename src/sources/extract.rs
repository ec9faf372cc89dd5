//! HTML content extraction shared by the wiki and crawl adapters.

use scraper::{ElementRef, Html, Selector};
use std::sync::LazyLock;
use url::Url;

static LINKS: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a[href]").unwrap());
static TITLE: LazyLock<Selector> = LazyLock::new(|| Selector::parse("title").unwrap());

/// Containers tried in order before falling back to the whole document.
const MAIN_SELECTORS: &[&str] = &["main", "article", "#content", ".mw-parser-output"];

/// Tags whose text is navigation or machinery rather than content.
const SKIP_TAGS: &[&str] = &[
    "script", "style", "noscript", "header", "footer", "nav", "aside",
];

/// Tags that end a visual line; a newline is emitted after their text.
const BLOCK_TAGS: &[&str] = &[
    "p", "div", "li", "br", "tr", "table", "ul", "ol", "blockquote", "section", "article", "h1",
    "h2", "h3", "h4", "h5", "h6",
];

/// Extract readable text from an HTML page, preferring the main content
/// container and dropping script/style/navigation subtrees.
pub fn html_to_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let main = MAIN_SELECTORS
        .iter()
        .filter_map(|sel| Selector::parse(sel).ok())
        .find_map(|sel| document.select(&sel).next())
        .unwrap_or_else(|| document.root_element());
    let mut text = String::new();
    collect_text(main, &mut text);
    text
}

fn collect_text(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        if let Some(child_element) = ElementRef::wrap(child) {
            let tag = child_element.value().name();
            if SKIP_TAGS.contains(&tag) {
                continue;
            }
            collect_text(child_element, out);
            if BLOCK_TAGS.contains(&tag) {
                out.push('\n');
            }
        } else if let Some(text) = child.value().as_text() {
            out.push_str(text);
        }
    }
}

/// The page's `<title>` text, if present and non-empty.
pub fn page_title(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let title = document.select(&TITLE).next()?;
    let text = title.text().collect::<String>().trim().to_string();
    (!text.is_empty()).then_some(text)
}

/// All absolute link targets on the page, resolved against `base` with
/// fragments stripped. Unparseable hrefs are dropped.
pub fn extract_links(html: &str, base: &Url) -> Vec<Url> {
    let document = Html::parse_document(html);
    document
        .select(&LINKS)
        .filter_map(|a| a.value().attr("href"))
        .filter_map(|href| base.join(href).ok())
        .map(|mut url| {
            url.set_fragment(None);
            url
        })
        .collect()
}
