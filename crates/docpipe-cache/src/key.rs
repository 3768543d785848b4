//! Deterministic cache keys.

use sha2::{Digest, Sha256};

/// Known cache namespaces.
pub mod namespaces {
    /// Search hits: document id + query text + result count
    pub const SEARCH: &str = "search";
    /// Generated summaries: document id
    pub const SUMMARY: &str = "summary";
}

/// Derive `{namespace}:{sha256(parts)}`.
///
/// Each part is length-prefixed before hashing so `["a:b", "c"]` and
/// `["a", "b:c"]` produce different keys.
pub fn derive_key(namespace: &str, parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update((part.len() as u64).to_le_bytes());
        hasher.update(part.as_bytes());
    }
    format!("{}:{:x}", namespace, hasher.finalize())
}

/// Key for cached search hits.
pub fn search_key(document_id: &str, query: &str, k: usize) -> String {
    derive_key(namespaces::SEARCH, &[document_id, query, &k.to_string()])
}

/// Key for a cached document summary.
pub fn summary_key(document_id: &str) -> String {
    derive_key(namespaces::SUMMARY, &[document_id])
}
