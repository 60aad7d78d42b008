//! TTL response cache for the ask endpoint
//!
//! Keyed by a SHA-256 over the normalized question, the active dataset id,
//! and the sorted clarifications, so a repeat question differing only in
//! case or whitespace hits the same entry. Payloads are stored and returned
//! as deep copies; entries past their TTL are evicted lazily on read.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::utils::normalize_question;

/// Canonical cache key for one (question, dataset, clarifications) triple.
pub fn build_cache_key(
    question: &str,
    dataset_id: Option<&str>,
    clarifications: &BTreeMap<String, Value>,
) -> String {
    // serde_json maps are sorted by key, which keeps the encoding canonical.
    let payload = serde_json::json!({
        "question": normalize_question(question),
        "dataset_id": dataset_id.unwrap_or(""),
        "clarifications": clarifications,
    });
    let digest = Sha256::digest(payload.to_string().as_bytes());
    digest.iter().map(|byte| format!("{byte:02x}")).collect()
}

#[derive(Debug, Default)]
pub struct AskCache {
    entries: Mutex<HashMap<String, (Instant, Value)>>,
}

impl AskCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, cache_key: &str) -> Option<Value> {
        let mut entries = self.entries.lock().expect("ask cache lock poisoned");
        let (expires_at, payload) = entries.get(cache_key)?;
        if *expires_at <= Instant::now() {
            entries.remove(cache_key);
            return None;
        }
        Some(payload.clone())
    }

    pub fn set(&self, cache_key: &str, payload: &Value, ttl_seconds: u64) {
        if ttl_seconds == 0 {
            return;
        }
        let expires_at = Instant::now() + Duration::from_secs(ttl_seconds);
        self.entries
            .lock()
            .expect("ask cache lock poisoned")
            .insert(cache_key.to_string(), (expires_at, payload.clone()));
    }

    pub fn clear(&self) {
        self.entries.lock().expect("ask cache lock poisoned").clear();
    }

    #[cfg(test)]
    fn insert_expired(&self, cache_key: &str, payload: &Value) {
        let expired = Instant::now() - Duration::from_secs(1);
        self.entries
            .lock()
            .expect("ask cache lock poisoned")
            .insert(cache_key.to_string(), (expired, payload.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_ignores_case_and_whitespace_noise() {
        let clarifications = BTreeMap::new();
        let a = build_cache_key("Why did revenue change?  ", Some("d1"), &clarifications);
        let b = build_cache_key("  why did   revenue change?", Some("d1"), &clarifications);
        assert_eq!(a, b);
    }

    #[test]
    fn key_varies_with_dataset_and_clarifications() {
        let empty = BTreeMap::new();
        let mut clarified = BTreeMap::new();
        clarified.insert("metric".to_string(), Value::String("revenue".to_string()));

        let base = build_cache_key("why?", Some("d1"), &empty);
        assert_ne!(base, build_cache_key("why?", Some("d2"), &empty));
        assert_ne!(base, build_cache_key("why?", None, &empty));
        assert_ne!(base, build_cache_key("why?", Some("d1"), &clarified));
    }

    #[test]
    fn round_trip_returns_a_deep_copy() {
        let cache = AskCache::new();
        let payload = serde_json::json!({"answer": {"headline": "ok"}});
        cache.set("k", &payload, 600);

        let mut fetched = cache.get("k").expect("cached");
        fetched["answer"]["headline"] = Value::String("mutated".to_string());

        let fresh = cache.get("k").expect("still cached");
        assert_eq!(fresh["answer"]["headline"], "ok");
    }

    #[test]
    fn zero_ttl_disables_storing() {
        let cache = AskCache::new();
        cache.set("k", &serde_json::json!({"a": 1}), 0);
        assert!(cache.get("k").is_none());
    }

    #[test]
    fn expired_entries_are_evicted_on_read() {
        let cache = AskCache::new();
        cache.insert_expired("k", &serde_json::json!({"a": 1}));
        assert!(cache.get("k").is_none());
    }
}
