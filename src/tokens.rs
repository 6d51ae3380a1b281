//! Token estimation
//!
//! A token is approximated as four characters. This is not a tokenizer; it
//! only has to be deterministic and applied the same way everywhere a budget
//! decision is made.

/// Characters per estimated token.
pub const CHARS_PER_TOKEN: usize = 4;

/// Estimated token cost of `text`: `ceil(chars / 4)`.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

/// Longest prefix of `text` whose estimated cost is at most `max_tokens`.
///
/// Cuts on a character boundary, never inside a code point.
pub fn truncate_to_tokens(text: &str, max_tokens: usize) -> &str {
    let max_chars = max_tokens.saturating_mul(CHARS_PER_TOKEN);
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("a"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
        assert_eq!(estimate_tokens(&"x".repeat(800)), 200);
    }

    #[test]
    fn test_estimate_counts_chars_not_bytes() {
        assert_eq!(estimate_tokens("ééééé"), 2);
    }

    #[test]
    fn test_truncate_fits_budget() {
        let text = "x".repeat(1000);
        let cut = truncate_to_tokens(&text, 10);
        assert_eq!(cut.len(), 40);
        assert_eq!(estimate_tokens(cut), 10);
        assert_eq!(truncate_to_tokens("short", 10), "short");
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let text = "ü".repeat(10);
        let cut = truncate_to_tokens(&text, 1);
        assert_eq!(cut.chars().count(), 4);
    }
}
