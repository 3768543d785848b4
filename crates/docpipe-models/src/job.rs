//! Job definitions and the job state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Job state as seen by pollers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    /// Job is waiting in its queue
    #[default]
    Pending,
    /// A worker claimed the job and is running it
    Processing,
    /// Handler finished and produced a result
    Success,
    /// Handler failed, timed out or could not be dispatched
    Failure,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "PENDING",
            JobState::Processing => "PROCESSING",
            JobState::Success => "SUCCESS",
            JobState::Failure => "FAILURE",
        }
    }

    /// Terminal states never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Success | JobState::Failure)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Rejected state transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid job transition {from} -> {to}")]
pub struct TransitionError {
    pub from: JobState,
    pub to: JobState,
}

/// Latest progress snapshot. Overwritten on every update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobProgress {
    /// Milestone label
    pub step: String,
    /// Completion percentage (0-100)
    pub percent: u8,
}

impl JobProgress {
    pub fn new(step: impl Into<String>, percent: u8) -> Self {
        Self {
            step: step.into(),
            percent: percent.min(100),
        }
    }
}

/// Durable job record owned by the worker pool while it runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    /// Unique job ID, assigned at enqueue time
    pub id: JobId,

    /// Registered handler that executes the job
    pub handler: String,

    /// Logical lane the job was routed to
    pub queue: String,

    /// Handler arguments
    #[serde(default)]
    pub args: serde_json::Value,

    /// Current state
    #[serde(default)]
    pub state: JobState,

    /// Latest progress snapshot
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<JobProgress>,

    /// Handler result (SUCCESS only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,

    /// Error summary (FAILURE only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Worker unit that claimed the job
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker: Option<String>,

    /// Key used to reject concurrent jobs for the same target
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dedup_key: Option<String>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Started at timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    /// Finished at timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    /// Create a new pending job.
    pub fn new(
        handler: impl Into<String>,
        queue: impl Into<String>,
        args: serde_json::Value,
    ) -> Self {
        Self {
            id: JobId::new(),
            handler: handler.into(),
            queue: queue.into(),
            args,
            state: JobState::Pending,
            progress: None,
            result: None,
            error: None,
            worker: None,
            dedup_key: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    /// Attach a deduplication key.
    pub fn with_dedup_key(mut self, key: Option<String>) -> Self {
        self.dedup_key = key;
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    fn guard(&self, allowed: &[JobState], to: JobState) -> Result<(), TransitionError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(TransitionError {
                from: self.state,
                to,
            })
        }
    }

    /// Claim the job for a worker unit.
    ///
    /// A redelivered job that is still `PROCESSING` may be claimed again; it
    /// keeps the progress already published.
    pub fn start(&mut self, worker: impl Into<String>) -> Result<(), TransitionError> {
        self.guard(&[JobState::Pending, JobState::Processing], JobState::Processing)?;
        if self.state == JobState::Pending || self.progress.is_none() {
            self.progress = Some(JobProgress::new("started", 0));
        }
        self.state = JobState::Processing;
        self.worker = Some(worker.into());
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Record a milestone. The stored percent never decreases.
    pub fn report(&mut self, step: impl Into<String>, percent: u8) -> Result<(), TransitionError> {
        self.guard(&[JobState::Processing], JobState::Processing)?;
        let floor = self.progress.as_ref().map(|p| p.percent).unwrap_or(0);
        self.progress = Some(JobProgress::new(step, percent.max(floor)));
        Ok(())
    }

    /// Mark job as succeeded.
    pub fn succeed(&mut self, result: serde_json::Value) -> Result<(), TransitionError> {
        self.guard(&[JobState::Processing], JobState::Success)?;
        self.state = JobState::Success;
        self.result = Some(result);
        self.progress = Some(JobProgress::new("completed", 100));
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    /// Mark job as failed.
    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), TransitionError> {
        self.guard(&[JobState::Processing], JobState::Failure)?;
        self.state = JobState::Failure;
        self.error = Some(error.into());
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    /// Snapshot returned to pollers.
    pub fn status_view(&self) -> JobStatusView {
        JobStatusView {
            job_id: self.id.clone(),
            state: self.state,
            result: self.result.clone(),
            error: self.error.clone(),
            progress: match self.state {
                JobState::Processing => self.progress.clone(),
                _ => None,
            },
        }
    }
}

/// Polling snapshot of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusView {
    pub job_id: JobId,
    pub state: JobState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<JobProgress>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pending() -> JobRecord {
        JobRecord::new("process_document", "document_processing", json!({"document_id": "d1"}))
    }

    #[test]
    fn test_job_creation() {
        let job = pending();
        assert_eq!(job.state, JobState::Pending);
        assert!(job.progress.is_none());
        assert!(!job.is_terminal());
    }

    #[test]
    fn test_job_state_transitions() {
        let mut job = pending();

        job.start("worker-1").unwrap();
        assert_eq!(job.state, JobState::Processing);
        assert_eq!(job.progress, Some(JobProgress::new("started", 0)));
        assert!(job.started_at.is_some());

        job.report("extracting_text", 20).unwrap();
        job.succeed(json!({"chunk_count": 3})).unwrap();
        assert_eq!(job.state, JobState::Success);
        assert_eq!(job.progress.as_ref().map(|p| p.percent), Some(100));
        assert!(job.finished_at.is_some());
    }

    #[test]
    fn test_reclaim_keeps_progress() {
        let mut job = pending();
        job.start("worker-1").unwrap();
        job.report("indexing_chunks", 60).unwrap();

        job.start("worker-2").unwrap();
        assert_eq!(job.worker.as_deref(), Some("worker-2"));
        assert_eq!(job.progress, Some(JobProgress::new("indexing_chunks", 60)));

        job.report("extracting_text", 20).unwrap();
        assert_eq!(job.progress.as_ref().map(|p| p.percent), Some(60));
    }

    #[test]
    fn test_cannot_skip_processing() {
        let mut job = pending();
        assert_eq!(
            job.succeed(json!(null)),
            Err(TransitionError {
                from: JobState::Pending,
                to: JobState::Success
            })
        );
        assert!(job.fail("boom").is_err());
        assert!(job.report("step", 10).is_err());
        assert_eq!(job.state, JobState::Pending);
    }

    #[test]
    fn test_terminal_is_final() {
        let mut job = pending();
        job.start("worker-1").unwrap();
        job.fail("extraction failed").unwrap();

        assert!(job.start("worker-2").is_err());
        assert!(job.succeed(json!({})).is_err());
        assert!(job.fail("again").is_err());
        assert_eq!(job.state, JobState::Failure);
        assert_eq!(job.error.as_deref(), Some("extraction failed"));
    }

    #[test]
    fn test_progress_is_monotonic_and_clamped() {
        let mut job = pending();
        job.start("worker-1").unwrap();

        job.report("indexing_chunks", 60).unwrap();
        job.report("late_event", 20).unwrap();
        assert_eq!(job.progress, Some(JobProgress::new("late_event", 60)));

        job.report("overflow", 250).unwrap();
        assert_eq!(job.progress.as_ref().map(|p| p.percent), Some(100));
    }

    #[test]
    fn test_redelivered_job_can_be_reclaimed() {
        let mut job = pending();
        job.start("worker-1").unwrap();
        job.start("worker-2").unwrap();
        assert_eq!(job.worker.as_deref(), Some("worker-2"));
    }

    #[test]
    fn test_status_view_hides_progress_outside_processing() {
        let mut job = pending();
        job.start("worker-1").unwrap();
        job.report("extracting_text", 20).unwrap();
        assert!(job.status_view().progress.is_some());

        job.succeed(json!({"pages": 1})).unwrap();
        let view = job.status_view();
        assert_eq!(view.state, JobState::Success);
        assert!(view.progress.is_none());
        assert_eq!(view.result, Some(json!({"pages": 1})));
    }

    #[test]
    fn test_state_serializes_uppercase() {
        let encoded = serde_json::to_string(&JobState::Processing).unwrap();
        assert_eq!(encoded, "\"PROCESSING\"");
    }
}
