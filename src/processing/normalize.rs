//! Text normalization and wiki-markup cleanup.
//!
//! Normalization (NFKC + whitespace collapsing) runs on every document before
//! chunking so chunk hashes are stable across cosmetic re-fetches. The wiki
//! cleanup pass only runs for wiki-sourced documents, stripping template and
//! reference noise that would otherwise pollute retrieval. The defang pass is
//! applied right before embedding to neutralize markup that confuses
//! embedding models.

use regex::Regex;
use std::sync::LazyLock;
use unicode_normalization::UnicodeNormalization;

static RE_INLINE_WS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t]+").expect("static regex"));
static RE_BLANK_RUNS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("static regex"));

static RE_TEMPLATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\{\{.*?\}\}").expect("static regex"));
static RE_REF: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[\d+\]").expect("static regex"));
static RE_CATEGORIES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?im)^categories?:.*$").expect("static regex"));
static RE_FILE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?im)^file:.*$").expect("static regex"));
static RE_EDGE_WS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t]+\n|\n[ \t]+").expect("static regex"));
static RE_RULER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[-=_]{3,}[ \t]*$").expect("static regex"));

/// Table-like line count beyond which pipes are stripped before embedding.
const DEFANG_TABLE_LINES: usize = 10;
/// Total pipe count beyond which pipes are stripped before embedding.
const DEFANG_PIPES: usize = 80;
/// `[[` occurrences beyond which wiki links are stripped before embedding.
const DEFANG_LINKS: usize = 20;
/// `{{` occurrences beyond which templates are stripped before embedding.
const DEFANG_BRACES: usize = 10;

/// Canonicalize text: NFKC, collapse runs of spaces/tabs, squeeze blank-line
/// runs down to one empty line, trim.
pub fn normalize(text: &str) -> String {
    let text: String = text.nfkc().collect();
    let text = RE_INLINE_WS.replace_all(&text, " ");
    let text = RE_BLANK_RUNS.replace_all(&text, "\n\n");
    text.trim().to_string()
}

/// Strip fandom/MediaWiki noise: templates, numeric references, category and
/// file lines, horizontal rules, and stray non-breaking/zero-width spaces.
pub fn clean_wiki_text(text: &str) -> String {
    let text = text.replace('\u{00a0}', " ").replace('\u{200b}', "");
    let text = RE_TEMPLATE.replace_all(&text, "");
    let text = RE_REF.replace_all(&text, "");
    let text = RE_CATEGORIES.replace_all(&text, "");
    let text = RE_FILE.replace_all(&text, "");
    let text = RE_EDGE_WS.replace_all(&text, "\n");
    let text = RE_RULER.replace_all(&text, "");
    text.trim().to_string()
}

/// Neutralize markup likely to confuse the embedding model.
///
/// Texts dominated by table pipes lose their pipes; texts with heavy
/// `[[link]]` or `{{template}}` markup lose those markers. Thresholds keep
/// ordinary prose untouched.
pub fn defang_markup(text: &str) -> String {
    let table_lines = text.lines().filter(|line| line.contains('|')).count();
    let pipe_count = text.matches('|').count();

    let mut out = if table_lines > DEFANG_TABLE_LINES || pipe_count > DEFANG_PIPES {
        text.replace('|', " ")
    } else {
        text.to_string()
    };
    if out.matches("[[").count() > DEFANG_LINKS {
        out = out.replace("[[", " ").replace("]]", " ");
    }
    if out.matches("{{").count() > DEFANG_BRACES {
        out = out.replace("{{", " ").replace("}}", " ");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_collapses_whitespace() {
        let text = "a  \t b\n\n\n\n\nc";
        assert_eq!(normalize(text), "a b\n\nc");
    }

    #[test]
    fn normalize_applies_nfkc() {
        // Fullwidth digits fold to ASCII under NFKC.
        assert_eq!(normalize("ｅｒ５"), "er5");
    }

    #[test]
    fn normalize_is_idempotent() {
        let once = normalize("  Pyro   DPS\n\n\n\ncalc  ");
        assert_eq!(normalize(&once), once);
    }

    #[test]
    fn clean_wiki_strips_templates_and_refs() {
        let text = "Xiangling{{Infobox|element=Pyro}} is a chef[1].\nCategory: Characters\n";
        let cleaned = clean_wiki_text(text);
        assert!(!cleaned.contains("Infobox"));
        assert!(!cleaned.contains("[1]"));
        assert!(!cleaned.to_lowercase().contains("category"));
        assert!(cleaned.contains("Xiangling"));
    }

    #[test]
    fn clean_wiki_drops_rulers_and_file_lines() {
        let text = "intro\n----\nFile: Guoba.png\nbody";
        let cleaned = clean_wiki_text(text);
        assert!(!cleaned.contains("----"));
        assert!(!cleaned.contains("Guoba.png"));
    }

    #[test]
    fn defang_leaves_prose_alone() {
        let text = "a | b\nplain prose with one [[link]]";
        assert_eq!(defang_markup(text), text);
    }

    #[test]
    fn defang_strips_heavy_tables() {
        let table = "| a | b | c |\n".repeat(12);
        let out = defang_markup(&table);
        assert!(!out.contains('|'));
    }

    #[test]
    fn defang_strips_heavy_link_markup() {
        let text = "[[x]] ".repeat(25);
        let out = defang_markup(&text);
        assert!(!out.contains("[["));
        assert!(!out.contains("]]"));
    }
}
