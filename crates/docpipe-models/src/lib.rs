//! Shared data models for the document pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Jobs, their state machine and polling snapshots
//! - Document records and their processing status
//! - Text chunks and content fingerprints

pub mod chunk;
pub mod document;
pub mod job;

// Re-export common types
pub use chunk::{chunk_fingerprint, Chunk};
pub use document::{DocumentId, DocumentMetadata, DocumentRecord, DocumentStatus, PageText};
pub use job::{JobId, JobProgress, JobRecord, JobState, JobStatusView, TransitionError};
