//! Fixed-size overlapping text chunking for context documents.

/// Split whitespace-collapsed text into chunks of `size` characters with
/// `overlap` characters shared between consecutive chunks.
pub fn chunk_text(text: &str, size: usize, overlap: usize) -> Vec<String> {
    let cleaned: Vec<char> = text
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .collect();
    if cleaned.is_empty() || size == 0 {
        return Vec::new();
    }

    let mut chunks = Vec::new();
    let mut start = 0usize;
    while start < cleaned.len() {
        let end = (start + size).min(cleaned.len());
        chunks.push(cleaned[start..end].iter().collect());
        if end == cleaned.len() {
            break;
        }
        // Step forward by at least one char so the loop always terminates.
        start = (end.saturating_sub(overlap)).max(start + 1);
    }
    chunks
}
