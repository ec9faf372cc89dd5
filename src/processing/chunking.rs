//! Deterministic fixed-window chunker.
//!
//! Splits normalized text into overlapping windows counted in characters.
//! The splitter is intentionally dumb: chunk boundaries never depend on
//! model tokenizers or sentence detection, so re-running it over unchanged
//! text always reproduces the same slots and hashes.

/// Split `text` into trimmed windows of at most `size` characters, with
/// consecutive windows sharing `overlap` characters.
///
/// `overlap` must be smaller than `size` (enforced at config load); values
/// are clamped here so a direct caller cannot stall the cursor. Empty or
/// whitespace-only input yields no chunks. Terminates in
/// `O(len / (size - overlap))` steps.
pub fn chunk_text(text: &str, size: usize, overlap: usize) -> Vec<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() || size == 0 {
        return Vec::new();
    }
    let overlap = overlap.min(size - 1);

    let chars: Vec<char> = trimmed.chars().collect();
    let total = chars.len();
    let mut chunks = Vec::with_capacity(total / size.saturating_sub(overlap).max(1) + 1);
    let mut cursor = 0;

    while cursor < total {
        let end = (cursor + size).min(total);
        let window: String = chars[cursor..end].iter().collect();
        let window = window.trim();
        if !window.is_empty() {
            chunks.push(window.to_string());
        }
        if end >= total {
            break;
        }
        let next = end.saturating_sub(overlap);
        // Forward progress even for degenerate inputs.
        cursor = if next > cursor { next } else { end };
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_yields_no_chunks() {
        assert!(chunk_text("", 10, 2).is_empty());
        assert!(chunk_text("   \n\t  ", 10, 2).is_empty());
    }

    #[test]
    fn short_input_is_a_single_chunk() {
        assert_eq!(chunk_text("hello", 10, 2), vec!["hello"]);
    }

    #[test]
    fn windows_overlap_by_exactly_the_requested_amount() {
        let text = "abcdefghijklmnopqrstuvwxyz";
        let chunks = chunk_text(text, 10, 3);
        assert_eq!(chunks[0], "abcdefghij");
        assert_eq!(chunks[1], "hijklmnopq");
        assert_eq!(chunks[2], "opqrstuvwx");
        for pair in chunks.windows(2) {
            let tail: String = pair[0].chars().skip(pair[0].chars().count() - 3).collect();
            assert!(pair[1].starts_with(&tail));
        }
    }

    #[test]
    fn chunking_is_deterministic() {
        let text = "lorem ipsum dolor sit amet ".repeat(40);
        assert_eq!(chunk_text(&text, 50, 10), chunk_text(&text, 50, 10));
    }

    #[test]
    fn zero_overlap_partitions_the_text() {
        let text = "abcdefghij";
        assert_eq!(chunk_text(text, 4, 0), vec!["abcd", "efgh", "ij"]);
    }

    #[test]
    fn chunk_count_is_linear_in_text_length() {
        let text = "x".repeat(1000);
        let chunks = chunk_text(&text, 100, 20);
        // stride is 80 chars, so ceil((1000 - 100) / 80) + 1 windows
        assert_eq!(chunks.len(), 13);
    }

    #[test]
    fn multibyte_text_splits_on_char_boundaries() {
        let text = "火火火火火火火火火火";
        let chunks = chunk_text(text, 4, 1);
        assert_eq!(chunks[0].chars().count(), 4);
        assert!(chunks.iter().all(|c| !c.is_empty()));
    }

    #[test]
    fn overlap_is_clamped_below_size() {
        // A direct caller passing overlap >= size must still terminate.
        let chunks = chunk_text("abcdefghij", 4, 9);
        assert!(!chunks.is_empty());
    }
}
