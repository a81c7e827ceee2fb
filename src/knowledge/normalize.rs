//! Question text normalization
//!
//! Turns raw question text into the key used for exact lookups and fuzzy
//! matching. Two questions that differ only by casing, accents, spacing or
//! punctuation produce the same key.

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Tokens dropped from keys after accent stripping.
///
/// "é" (is) collapses to "e", which carries no meaning for matching:
/// "qual é a capital" and "qual a capital" are the same question.
const FOLDED_TOKENS: &[&str] = &["e"];

/// Canonicalize question text into a comparable key.
///
/// Never fails. Whitespace-only input yields an empty key, which callers
/// must reject before lookup.
pub fn normalize(text: &str) -> String {
    let lowered = text.trim().to_lowercase();

    // NFD splits "é" into "e" + U+0301 so the mark can be dropped
    let stripped: String = lowered
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .map(|c| if c.is_alphanumeric() || c.is_whitespace() { c } else { ' ' })
        .collect();

    stripped
        .split_whitespace()
        .filter(|token| !FOLDED_TOKENS.contains(token))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Split a normalized key into its tokens
pub fn tokens(key: &str) -> impl Iterator<Item = &str> {
    key.split_whitespace()
}
