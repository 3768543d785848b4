//! Processing error types.

use std::path::PathBuf;

use thiserror::Error;

pub type ExtractionResult<T> = Result<T, ExtractionError>;

/// The input could not be turned into text. Terminal for the document.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("Failed to read {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse document: {0}")]
    Corrupt(String),

    #[error("Unsupported document type: {0}")]
    Unsupported(String),
}

impl ExtractionError {
    pub fn corrupt(msg: impl Into<String>) -> Self {
        Self::Corrupt(msg.into())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChunkingError {
    #[error("Invalid chunk window: size {size}, overlap {overlap}")]
    InvalidWindow { size: usize, overlap: usize },
}
