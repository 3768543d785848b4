//! Text chunks and their content fingerprints.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Deterministic chunk id: SHA-256 of the content joined with its index.
pub fn chunk_fingerprint(content: &str, index: usize) -> String {
    let digest = Sha256::digest(format!("{}_{}", content, index).as_bytes());
    format!("{:x}", digest)
}

/// A window of document text ready for indexing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub content: String,
    /// Position in the chunk sequence
    pub index: usize,
    /// Length in characters
    pub length: usize,
}

impl Chunk {
    pub fn new(content: impl Into<String>, index: usize) -> Self {
        let content = content.into();
        Self {
            chunk_id: chunk_fingerprint(&content, index),
            length: content.chars().count(),
            content,
            index,
        }
    }
}
