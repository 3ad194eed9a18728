//! Sentence-boundary-aware overlapping text chunker.
//!
//! Slides a fixed-size window over the document, pulling each cut point
//! back to the nearest sentence terminator (`.`, `!`, `?`) found in the
//! trailing half of the window so chunks rarely split mid-sentence. The
//! next window starts `overlap` characters before the previous cut.
//!
//! Pure function of its inputs: no shared state between calls.

/// Split `text` into overlapping chunks of at most `chunk_size` bytes.
///
/// Returns `[text]` unchanged when it already fits in one window.
/// `overlap` must be smaller than `chunk_size` (enforced at config load);
/// equal or larger values would stall the window.
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    if text.len() <= chunk_size {
        return vec![text.to_string()];
    }

    let bytes = text.as_bytes();
    let mut chunks = Vec::new();
    let mut start = 0usize;

    while start < text.len() {
        let mut end = (start + chunk_size).min(text.len());

        // Pull the cut back to a sentence terminator, searching no further
        // than the midpoint of this window.
        if end < text.len() {
            let floor = start + chunk_size / 2;
            if let Some(term) = (floor..end).rev().find(|&i| {
                matches!(bytes[i], b'.' | b'!' | b'?')
            }) {
                end = term + 1;
            } else {
                // No terminator in the search window: cut at the raw
                // offset, nudged to a char boundary.
                while end > start && !text.is_char_boundary(end) {
                    end -= 1;
                }
            }
        }

        let piece = text[start..end].trim();
        if !piece.is_empty() {
            chunks.push(piece.to_string());
        }

        if end >= text.len() {
            break;
        }
        let mut next = end.saturating_sub(overlap).max(start + 1);
        while next < text.len() && !text.is_char_boundary(next) {
            next += 1;
        }
        start = next;
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_text_single_chunk() {
        let chunks = chunk_text("Short requirement.", 1000, 200);
        assert_eq!(chunks, vec!["Short requirement.".to_string()]);
    }

    #[test]
    fn test_exact_size_single_chunk() {
        let text = "a".repeat(100);
        let chunks = chunk_text(&text, 100, 20);
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn test_cuts_at_sentence_boundary() {
        let text = format!(
            "{} First sentence ends here. {}",
            "x".repeat(60),
            "y".repeat(120)
        );
        let chunks = chunk_text(&text, 100, 10);
        assert!(chunks.len() > 1);
        assert!(
            chunks[0].ends_with('.'),
            "first chunk should end at the terminator, got: {:?}",
            chunks[0]
        );
    }

    #[test]
    fn test_no_terminator_cuts_at_raw_offset() {
        let text = "z".repeat(250);
        let chunks = chunk_text(&text, 100, 20);
        assert!(chunks.len() > 1);
        assert_eq!(chunks[0].len(), 100);
    }

    #[test]
    fn test_overlap_repeats_tail_of_previous_chunk() {
        let text = "w".repeat(300);
        let chunks = chunk_text(&text, 100, 30);
        // With no terminators each window cuts at the raw offset, so each
        // successive chunk starts 30 chars before the previous cut.
        assert!(chunks.len() >= 3);
        for pair in chunks.windows(2) {
            assert!(pair[0].len() >= 30);
        }
    }

    #[test]
    fn test_idempotent() {
        let text = "The account holder must verify identity. \
                    Verification requires a valid document. \
                    Documents expire after ninety days. "
            .repeat(10);
        let a = chunk_text(&text, 120, 30);
        let b = chunk_text(&text, 120, 30);
        assert_eq!(a, b);
    }

    #[test]
    fn test_covers_entire_text() {
        let text = "Clause one applies. Clause two applies. Clause three applies. ".repeat(8);
        let chunks = chunk_text(&text, 100, 25);
        // Every non-whitespace region of the source must appear in some chunk.
        let tail = text.trim_end();
        let last = chunks.last().unwrap();
        assert!(tail.ends_with(last.trim_end()));
        assert!(chunks.iter().all(|c| text.contains(c.as_str())));
    }

    #[test]
    fn test_multibyte_text_does_not_split_codepoints() {
        let text = "価格の要件は千二百円です。".repeat(30);
        let chunks = chunk_text(&text, 100, 20);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.chars().count() > 0);
        }
    }

    #[test]
    fn test_empty_text() {
        let chunks = chunk_text("", 100, 20);
        assert_eq!(chunks, vec![String::new()]);
    }
}
