//! String helpers shared across ingestion, caching, and the model router.

use once_cell::sync::Lazy;
use regex::Regex;

static NON_ALNUM: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-zA-Z0-9_]+").expect("valid regex"));

/// Normalize an arbitrary header or table name into a safe SQL identifier.
///
/// Each run of non-`[A-Za-z0-9_]` characters collapses into a single `_`,
/// leading/trailing underscores are stripped, and the result is lower-cased.
/// An input with no usable characters becomes `"dataset"`.
pub fn slugify_identifier(value: &str) -> String {
    let cleaned = NON_ALNUM
        .replace_all(value, "_")
        .trim_matches('_')
        .to_lowercase();
    if cleaned.is_empty() { "dataset".to_string() } else { cleaned }
}

/// Collapse internal whitespace and lower-case a question for cache keying.
pub fn normalize_question(question: &str) -> String {
    question
        .trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Truncate to at most `max_chars` characters on a char boundary.
pub fn truncate_chars(value: &str, max_chars: usize) -> String {
    value.chars().take(max_chars).collect()
}
