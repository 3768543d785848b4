//! Submission and polling client.

use std::sync::Arc;

use docpipe_models::{JobId, JobRecord, JobStatusView};
use tracing::{info, warn};

use crate::broker::JobBroker;
use crate::error::{QueueError, QueueResult};
use crate::job::{handlers, QueuedJob};
use crate::routes::RouteTable;
use crate::store::JobStore;

/// Dedup key for a submission, if the handler targets something that must
/// not be worked on twice at once.
///
/// Document-scoped jobs are keyed by handler and document id; cleanup runs
/// are keyed globally.
pub fn dedup_key_for(handler: &str, args: &serde_json::Value) -> Option<String> {
    if let Some(document_id) = args.get("document_id").and_then(|v| v.as_str()) {
        return Some(format!("{}:{}", handler, document_id));
    }
    (handler == handlers::CLEANUP).then(|| handlers::CLEANUP.to_string())
}

/// Creates job records, places them on lanes and reads them back.
#[derive(Clone)]
pub struct JobClient {
    broker: Arc<dyn JobBroker>,
    store: Arc<dyn JobStore>,
    routes: Arc<RouteTable>,
}

impl JobClient {
    pub fn new(
        broker: Arc<dyn JobBroker>,
        store: Arc<dyn JobStore>,
        routes: RouteTable,
    ) -> Self {
        Self {
            broker,
            store,
            routes: Arc::new(routes),
        }
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Submit to the lane configured for `handler`.
    pub async fn submit(&self, handler: &str, args: serde_json::Value) -> QueueResult<JobId> {
        let lane = self
            .routes
            .lane_for(handler)
            .ok_or_else(|| QueueError::UnknownRoute(handler.to_string()))?
            .to_string();
        self.enqueue(handler, &lane, args).await
    }

    /// Submit to an explicit lane.
    ///
    /// The record is stored as `PENDING` before the message is published so
    /// a worker never sees a message without its record.
    pub async fn enqueue(
        &self,
        handler: &str,
        queue: &str,
        args: serde_json::Value,
    ) -> QueueResult<JobId> {
        let dedup_key = dedup_key_for(handler, &args);
        let record = JobRecord::new(handler, queue, args).with_dedup_key(dedup_key);
        self.store.create(&record).await?;

        let message = QueuedJob::from_record(&record);
        if let Err(e) = self.broker.enqueue(&message).await {
            if let Err(cleanup) = self.store.remove(&record.id).await {
                warn!("Failed to remove unqueued job {}: {}", record.id, cleanup);
            }
            return Err(e);
        }

        info!(job_id = %record.id, handler = %handler, queue = %queue, "Job submitted");
        Ok(record.id)
    }

    /// Current snapshot of a job.
    pub async fn get_status(&self, job_id: &JobId) -> QueueResult<JobStatusView> {
        self.store
            .get(job_id)
            .await?
            .map(|record| record.status_view())
            .ok_or_else(|| QueueError::JobNotFound(job_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBroker;
    use crate::store::MemoryJobStore;
    use docpipe_models::JobState;
    use serde_json::json;
    use std::time::Duration;

    fn client() -> (JobClient, Arc<MemoryBroker>) {
        let broker = Arc::new(MemoryBroker::default());
        let client = JobClient::new(
            broker.clone(),
            Arc::new(MemoryJobStore::new()),
            RouteTable::default(),
        );
        (client, broker)
    }

    #[test]
    fn test_dedup_key_for() {
        assert_eq!(
            dedup_key_for("process_document", &json!({"document_id": "d1", "file_path": "x"})),
            Some("process_document:d1".to_string())
        );
        assert_eq!(dedup_key_for("cleanup", &json!({})), Some("cleanup".to_string()));
        assert_eq!(dedup_key_for("other", &json!({})), None);
    }

    #[tokio::test]
    async fn test_submit_routes_and_creates_pending_record() {
        let (client, broker) = client();
        let job_id = client.submit("cleanup", json!({})).await.unwrap();

        let status = client.get_status(&job_id).await.unwrap();
        assert_eq!(status.state, JobState::Pending);
        assert!(status.progress.is_none());

        let delivery = broker
            .consume("maintenance", "c", Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(delivery.job.job_id, job_id);
    }

    #[tokio::test]
    async fn test_unknown_handler_is_rejected() {
        let (client, _) = client();
        let err = client.submit("transcode", json!({})).await.unwrap_err();
        assert!(matches!(err, QueueError::UnknownRoute(_)));
    }

    #[tokio::test]
    async fn test_duplicate_submission_leaves_no_record() {
        let (client, broker) = client();
        let args = json!({"document_id": "d1", "file_path": "/u/d1_a.pdf"});
        client.submit("process_document", args.clone()).await.unwrap();

        let err = client.submit("process_document", args).await.unwrap_err();
        assert!(err.is_duplicate());
        assert_eq!(broker.len("document_processing"), 1);
    }

    #[tokio::test]
    async fn test_unknown_job_status() {
        let (client, _) = client();
        let err = client.get_status(&JobId::new()).await.unwrap_err();
        assert!(matches!(err, QueueError::JobNotFound(_)));
    }
}
