//! Queue message payloads.

use chrono::{DateTime, Utc};
use docpipe_models::{JobId, JobRecord};
use serde::{Deserialize, Serialize};

/// Registered handler names.
pub mod handlers {
    pub const PROCESS_DOCUMENT: &str = "process_document";
    pub const GENERATE_SUMMARY: &str = "generate_summary";
    pub const CLEANUP: &str = "cleanup";
}

/// Logical lanes.
pub mod lanes {
    pub const DOCUMENT_PROCESSING: &str = "document_processing";
    pub const MAINTENANCE: &str = "maintenance";
}

/// Message placed on a lane. The job record itself lives in the job store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedJob {
    pub job_id: JobId,
    pub handler: String,
    pub queue: String,
    #[serde(default)]
    pub args: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dedup_key: Option<String>,
    pub enqueued_at: DateTime<Utc>,
}

impl QueuedJob {
    /// Build the lane message for a freshly created record.
    pub fn from_record(record: &JobRecord) -> Self {
        Self {
            job_id: record.id.clone(),
            handler: record.handler.clone(),
            queue: record.queue.clone(),
            args: record.args.clone(),
            dedup_key: record.dedup_key.clone(),
            enqueued_at: Utc::now(),
        }
    }
}

/// A message handed to one consumer. Must be acked once handled.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    /// Broker message id, used to ack
    pub message_id: String,
    pub lane: String,
    pub job: QueuedJob,
}
