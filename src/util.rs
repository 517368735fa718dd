//! Utility functions shared across the bot.
//!
//! Command matching lives here so every policy and card handler agrees on
//! what counts as a keyword hit.

/// Returns `true` when `s`, with surrounding whitespace removed, equals any of
/// the given keywords exactly (case-sensitive).
///
/// ```ignore
/// use larkgpt::util::either_trim_equal;
///
/// assert!(either_trim_equal(" clear ", &["/clear", "clear"]));
/// assert!(!either_trim_equal("clear all", &["/clear", "clear"]));
/// ```
pub fn either_trim_equal(s: &str, keywords: &[&str]) -> bool {
    let trimmed = s.trim();
    keywords.iter().any(|k| trimmed == *k)
}

/// Strip the first matching prefix and return the remainder.
///
/// Prefixes are tried in order; the input is not trimmed first, so
/// `"/system "` only matches when the message starts with it.
pub fn either_cut_prefix<'a>(s: &'a str, prefixes: &[&str]) -> Option<&'a str> {
    prefixes.iter().find_map(|p| s.strip_prefix(p))
}

/// Truncate a string to at most `max_chars` characters, appending "..." if truncated.
///
/// Works on character boundaries so multi-byte text (emoji, CJK) never splits.
pub fn truncate_with_ellipsis(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => {
            let truncated = &s[..idx];
            format!("{}...", truncated.trim_end())
        }
        None => s.to_string(),
    }
}

/// Return the greatest valid UTF-8 char boundary at or below `index`.
pub fn floor_utf8_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }

    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}
