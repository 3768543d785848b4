//! Worker error types.

use docpipe_models::{DocumentId, DocumentStatus};
use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Job failed: {0}")]
    JobFailed(String),

    #[error("Invalid job arguments: {0}")]
    InvalidArgs(String),

    #[error("Document not found: {0}")]
    DocumentNotFound(DocumentId),

    #[error("Document {id} is {status}: {reason}")]
    DocumentState {
        id: DocumentId,
        status: DocumentStatus,
        reason: String,
    },

    #[error("Upload rejected: {0}")]
    Rejected(String),

    #[error("Service failed: {0}")]
    ServiceFailed(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("{0}")]
    Extraction(#[from] docpipe_processing::ExtractionError),

    #[error("Document store error: {0}")]
    Store(#[from] docpipe_store::StoreError),

    #[error("Queue error: {0}")]
    Queue(#[from] docpipe_queue::QueueError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl WorkerError {
    pub fn job_failed(msg: impl Into<String>) -> Self {
        Self::JobFailed(msg.into())
    }

    pub fn invalid_args(msg: impl Into<String>) -> Self {
        Self::InvalidArgs(msg.into())
    }

    pub fn rejected(msg: impl Into<String>) -> Self {
        Self::Rejected(msg.into())
    }

    pub fn service_failed(msg: impl Into<String>) -> Self {
        Self::ServiceFailed(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn document_state(
        id: &DocumentId,
        status: DocumentStatus,
        reason: impl Into<String>,
    ) -> Self {
        Self::DocumentState {
            id: id.clone(),
            status,
            reason: reason.into(),
        }
    }
}
