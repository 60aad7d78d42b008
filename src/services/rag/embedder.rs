//! Hashed-token embedding
//!
//! Deterministic, dependency-free text vectors: tokenize on
//! `[a-zA-Z0-9_]+`, hash each distinct token into one of 128 buckets via
//! SHA-256, accumulate counts, L2-normalize. Changing `EMBED_SIZE`
//! invalidates every persisted chunk vector, so it must stay fixed unless
//! storage is versioned alongside it.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};

pub const EMBED_SIZE: usize = 128;

static TOKEN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[a-zA-Z0-9_]+").expect("valid regex"));

fn hash_token(token: &str) -> usize {
    let digest = Sha256::digest(token.as_bytes());
    // The digest value mod 128 is just its low 7 bits.
    (digest[digest.len() - 1] as usize) % EMBED_SIZE
}

/// Embed text into a normalized `EMBED_SIZE` vector. Token-less text embeds
/// as the zero vector.
pub fn embed_text(text: &str) -> Vec<f64> {
    let lowered = text.to_lowercase();
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for token in TOKEN_RE.find_iter(&lowered) {
        *counts.entry(token.as_str()).or_insert(0) += 1;
    }

    let mut vector = vec![0.0; EMBED_SIZE];
    if counts.is_empty() {
        return vector;
    }
    for (token, count) in counts {
        vector[hash_token(token)] += count as f64;
    }

    let norm = vector.iter().map(|v| v * v).sum::<f64>().sqrt();
    if norm == 0.0 {
        return vector;
    }
    vector.iter().map(|v| v / norm).collect()
}

/// Vectors are pre-normalized, so cosine similarity is the dot product.
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedding_is_normalized_and_deterministic() {
        let first = embed_text("Revenue grew in the EMEA segment");
        let second = embed_text("Revenue grew in the EMEA segment");
        assert_eq!(first, second);
        assert_eq!(first.len(), EMBED_SIZE);

        let norm: f64 = first.iter().map(|v| v * v).sum::<f64>().sqrt();
        assert!((norm - 1.0).abs() < 1e-9);
    }

    #[test]
    fn empty_text_embeds_as_zero_vector() {
        let vector = embed_text("!!! ???");
        assert!(vector.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn self_similarity_is_one_and_beats_unrelated_text() {
        let query = embed_text("what does churn mean");
        let matching = embed_text("churn is the rate at which customers leave");
        let unrelated = embed_text("quarterly depreciation of fixed assets");

        assert!((cosine_similarity(&query, &query) - 1.0).abs() < 1e-9);
        assert!(
            cosine_similarity(&query, &matching) > cosine_similarity(&query, &unrelated)
        );
    }

    #[test]
    fn case_does_not_change_the_embedding() {
        assert_eq!(embed_text("Revenue EMEA"), embed_text("revenue emea"));
    }
}
