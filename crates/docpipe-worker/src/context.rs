//! Per-job execution context handed to handlers.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use docpipe_models::{JobId, JobRecord};
use docpipe_queue::JobStore;

use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::retry::{retry_async, RetryConfig};

/// Owns the job record while a worker unit runs it.
///
/// Handlers report milestones through [`JobContext::report_progress`]; the
/// pool alone moves the record to a terminal state.
pub struct JobContext {
    job_id: JobId,
    record: Mutex<JobRecord>,
    store: Arc<dyn JobStore>,
    logger: JobLogger,
}

impl JobContext {
    pub fn new(record: JobRecord, store: Arc<dyn JobStore>, logger: JobLogger) -> Self {
        Self {
            job_id: record.id.clone(),
            record: Mutex::new(record),
            store,
            logger,
        }
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn logger(&self) -> &JobLogger {
        &self.logger
    }

    /// Copy of the record as it stands.
    pub fn snapshot(&self) -> JobRecord {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, JobRecord> {
        self.record.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record a milestone and publish it to pollers.
    ///
    /// Fails only if the job already finished (for example after a timeout).
    /// A store outage is logged and the job carries on.
    pub async fn report_progress(&self, step: &str, percent: u8) -> WorkerResult<()> {
        let snapshot = {
            let mut record = self.lock();
            record
                .report(step, percent)
                .map_err(|e| WorkerError::job_failed(e.to_string()))?;
            record.clone()
        };

        self.logger.log_progress(&format!("{} ({}%)", step, percent));
        if let Err(e) = self.store.save(&snapshot).await {
            self.logger
                .log_warning(&format!("Failed to publish progress {}: {}", step, e));
        }
        Ok(())
    }

    /// Move to SUCCESS and persist.
    ///
    /// A [`WorkerError::Queue`] means the store kept failing and the record
    /// there is still PROCESSING.
    pub(crate) async fn complete(&self, result: serde_json::Value) -> WorkerResult<bool> {
        let snapshot = {
            let mut record = self.lock();
            record
                .succeed(result)
                .map_err(|e| WorkerError::job_failed(e.to_string()))?;
            record.clone()
        };
        self.persist(&snapshot).await
    }

    /// Move to FAILURE and persist. Store errors as for [`JobContext::complete`].
    pub(crate) async fn fail(&self, error: &str) -> WorkerResult<bool> {
        let snapshot = {
            let mut record = self.lock();
            record
                .fail(error)
                .map_err(|e| WorkerError::job_failed(e.to_string()))?;
            record.clone()
        };
        self.persist(&snapshot).await
    }

    async fn persist(&self, snapshot: &JobRecord) -> WorkerResult<bool> {
        let retry = RetryConfig::new(format!("persist {} state", snapshot.state))
            .with_base_delay(Duration::from_millis(50));
        match retry_async(&retry, || self.store.save(snapshot)).await {
            Ok(saved) => Ok(saved),
            Err(e) => {
                self.logger.log_error(&format!(
                    "Failed to persist {} state: {}",
                    snapshot.state, e
                ));
                Err(e.into())
            }
        }
    }
}
