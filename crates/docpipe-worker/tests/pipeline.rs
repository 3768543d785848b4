//! End-to-end runs of the built-in handlers on an in-process pool.

mod common;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use async_trait::async_trait;
use docpipe_models::{Chunk, DocumentId, DocumentRecord, DocumentStatus, JobId, JobState};
use docpipe_processing::{
    DocumentProcessor, ExtractedDocument, ExtractionResult, PdfExtractor, TextExtractor,
};
use docpipe_queue::{handlers, QueueError};
use docpipe_worker::handlers::{CleanupHandler, GenerateSummaryHandler, ProcessDocumentHandler};
use docpipe_worker::services::{
    ChunkIndex, DocumentSearch, DocumentSummary, ExtractiveSummarizer, SearchHit,
};
use docpipe_worker::{HandlerRegistry, RetentionSweeper, SweepReport, WorkerError, WorkerResult};
use serde_json::json;

use common::{build_pdf, pages, Harness};

#[tokio::test]
async fn test_upload_is_processed_to_success() {
    let harness = Harness::new();
    let pool = harness.start(harness.config(), harness.registry());

    let accepted = harness
        .intake()
        .accept("report.pdf", &build_pdf(&pages(10)))
        .await
        .unwrap();
    let status = harness.wait_for(&accepted.job_id).await;

    assert_eq!(status.state, JobState::Success, "error: {:?}", status.error);
    assert!(status.progress.is_none());
    let result = status.result.unwrap();
    assert_eq!(result["status"], "completed");
    assert_eq!(result["pages"], 10);
    let chunk_count = result["chunk_count"].as_u64().unwrap();
    assert!(chunk_count > 0);

    let document = harness.document(&accepted.document_id).unwrap();
    assert_eq!(document.status, DocumentStatus::Completed);
    assert_eq!(document.pages, 10);
    assert_eq!(u64::from(document.chunk_count), chunk_count);
    assert_eq!(harness.index.chunk_count(&accepted.document_id) as u64, chunk_count);

    pool.stop().await;
}

#[tokio::test]
async fn test_state_and_progress_only_move_forward() {
    let harness = Harness::new();
    let pool = harness.start(harness.config(), harness.registry());

    let accepted = harness
        .intake()
        .accept("report.pdf", &build_pdf(&pages(2)))
        .await
        .unwrap();
    harness.wait_for(&accepted.job_id).await;
    pool.stop().await;

    let history = harness.store.history(&accepted.job_id);
    let states: Vec<JobState> = history.iter().map(|(state, _)| *state).collect();
    assert_eq!(states.first(), Some(&JobState::Pending));
    assert_eq!(states.last(), Some(&JobState::Success));
    assert!(states[1..states.len() - 1]
        .iter()
        .all(|s| *s == JobState::Processing));

    let percents: Vec<u8> = history.iter().filter_map(|(_, p)| *p).collect();
    assert!(percents.windows(2).all(|w| w[0] <= w[1]), "{:?}", percents);
    assert_eq!(percents.first(), Some(&0));
    assert_eq!(percents.last(), Some(&100));
    for milestone in [20, 60, 90] {
        assert!(percents.contains(&milestone));
    }
}

#[tokio::test]
async fn test_corrupt_pdf_fails_job_and_document() {
    let harness = Harness::new();
    let pool = harness.start(harness.config(), harness.registry());

    let accepted = harness
        .intake()
        .accept("broken.pdf", b"this is not a valid pdf file")
        .await
        .unwrap();
    let status = harness.wait_for(&accepted.job_id).await;
    pool.stop().await;

    assert_eq!(status.state, JobState::Failure);
    assert!(status.result.is_none());
    assert!(status
        .error
        .unwrap()
        .starts_with("Failed to parse document"));
    assert_eq!(
        harness.document(&accepted.document_id).unwrap().status,
        DocumentStatus::Failed
    );
}

/// Index whose backing service is down.
struct UnavailableIndex;

#[async_trait]
impl ChunkIndex for UnavailableIndex {
    async fn add_chunks(&self, _: &DocumentId, _: &[Chunk]) -> WorkerResult<()> {
        Err(WorkerError::service_failed("vector store unavailable"))
    }

    async fn search(&self, _: &DocumentId, _: &str, _: usize) -> WorkerResult<Vec<SearchHit>> {
        Err(WorkerError::service_failed("vector store unavailable"))
    }

    async fn chunks(&self, _: &DocumentId, _: usize) -> WorkerResult<Vec<Chunk>> {
        Err(WorkerError::service_failed("vector store unavailable"))
    }

    async fn remove(&self, _: &DocumentId) -> WorkerResult<()> {
        Ok(())
    }
}

#[tokio::test]
async fn test_index_outage_fails_job_and_document() {
    let harness = Harness::new();
    let search = DocumentSearch::new(Arc::new(UnavailableIndex), harness.cache.clone());
    let registry = HandlerRegistry::new().register(Arc::new(ProcessDocumentHandler::new(
        harness.db.clone(),
        DocumentProcessor::default(),
        search,
    )));
    let pool = harness.start(harness.config(), registry);

    let accepted = harness
        .intake()
        .accept("report.pdf", &build_pdf(&pages(2)))
        .await
        .unwrap();
    let status = harness.wait_for(&accepted.job_id).await;
    pool.stop().await;

    assert_eq!(status.state, JobState::Failure);
    assert_eq!(
        status.error.as_deref(),
        Some("Service failed: vector store unavailable")
    );
    assert_eq!(
        harness.document(&accepted.document_id).unwrap().status,
        DocumentStatus::Failed
    );
    // Extraction finished and indexing had started before the failure.
    let history = harness.store.history(&accepted.job_id);
    assert!(history.contains(&(JobState::Processing, Some(60))));
    assert_eq!(history.last().map(|(state, _)| *state), Some(JobState::Failure));
}

/// Extracts like the PDF extractor, only slower than any sane time limit.
struct SlowExtractor;

impl TextExtractor for SlowExtractor {
    fn extract(&self, path: &Path) -> ExtractionResult<ExtractedDocument> {
        std::thread::sleep(Duration::from_secs(2));
        PdfExtractor.extract(path)
    }
}

#[tokio::test]
async fn test_time_limit_fails_job_and_document() {
    let harness = Harness::new();
    let search = DocumentSearch::new(harness.index.clone(), harness.cache.clone());
    let registry = HandlerRegistry::new().register(Arc::new(
        ProcessDocumentHandler::new(harness.db.clone(), DocumentProcessor::default(), search)
            .with_extractor(Arc::new(SlowExtractor)),
    ));
    let config = docpipe_worker::WorkerConfig {
        job_timeout: Duration::from_millis(300),
        ..harness.config()
    };
    let pool = harness.start(config, registry);

    let accepted = harness
        .intake()
        .accept("slow.pdf", &build_pdf(&pages(1)))
        .await
        .unwrap();
    let status = harness.wait_for(&accepted.job_id).await;
    pool.stop().await;

    assert_eq!(status.state, JobState::Failure);
    assert!(status.error.unwrap().contains("time limit"));
    assert_eq!(
        harness.document(&accepted.document_id).unwrap().status,
        DocumentStatus::Failed
    );
}

#[tokio::test]
async fn test_summary_requires_processing_then_caches() {
    let harness = Harness::new();
    let pool = harness.start(harness.config(), harness.registry());

    let accepted = harness
        .intake()
        .accept("report.pdf", &build_pdf(&pages(3)))
        .await
        .unwrap();
    harness.wait_for(&accepted.job_id).await;

    let args = json!({ "document_id": accepted.document_id });
    let first = harness
        .client
        .submit(handlers::GENERATE_SUMMARY, args.clone())
        .await
        .unwrap();
    let first = harness.wait_for(&first).await;
    assert_eq!(first.state, JobState::Success, "error: {:?}", first.error);
    let first: DocumentSummary = serde_json::from_value(first.result.unwrap()).unwrap();
    assert!(!first.cached);
    assert!(first.summary.contains("failed uploads"));

    let second = harness
        .client
        .submit(handlers::GENERATE_SUMMARY, args)
        .await
        .unwrap();
    let second = harness.wait_for(&second).await;
    let second: DocumentSummary = serde_json::from_value(second.result.unwrap()).unwrap();
    assert!(second.cached);
    assert_eq!(second.summary, first.summary);

    pool.stop().await;
}

#[tokio::test]
async fn test_summary_of_unknown_document_fails() {
    let harness = Harness::new();
    let pool = harness.start(harness.config(), harness.registry());

    let job_id = harness
        .client
        .submit(handlers::GENERATE_SUMMARY, json!({ "document_id": "missing" }))
        .await
        .unwrap();
    let status = harness.wait_for(&job_id).await;
    pool.stop().await;

    assert_eq!(status.state, JobState::Failure);
    assert!(status.error.unwrap().contains("missing"));
}

#[tokio::test]
async fn test_cleanup_job_sweeps_old_failed_documents() {
    let harness = Harness::new();
    let uploads = harness.dir.path().join("uploads");
    std::fs::create_dir_all(&uploads).unwrap();

    let mut ids = Vec::new();
    for age_days in [8, 3] {
        let id = DocumentId::new();
        let path = uploads.join(format!("{}_old.pdf", id));
        std::fs::write(&path, b"%PDF-1.4").unwrap();
        let record = DocumentRecord::new(id.clone(), "old.pdf", path.display().to_string(), 8)
            .uploaded_at(Utc::now() - chrono::Duration::days(age_days))
            .with_status(DocumentStatus::Failed);
        harness.db.session().unwrap().insert(&record).unwrap();
        ids.push((id, path));
    }

    let pool = harness.start(harness.config(), harness.registry());
    let job_id = harness
        .client
        .submit(handlers::CLEANUP, json!(null))
        .await
        .unwrap();
    let status = harness.wait_for(&job_id).await;
    pool.stop().await;

    assert_eq!(status.state, JobState::Success, "error: {:?}", status.error);
    let report: SweepReport = serde_json::from_value(status.result.unwrap()).unwrap();
    assert_eq!(report.deleted_count, 1);
    assert_eq!(report.failed_count, 0);

    let (old, old_path) = &ids[0];
    let (recent, recent_path) = &ids[1];
    assert!(harness.document(old).is_none());
    assert!(!old_path.exists());
    assert!(harness.document(recent).is_some());
    assert!(recent_path.exists());
}

#[tokio::test]
async fn test_duplicate_cleanup_is_rejected_until_finished() {
    let harness = Harness::new();
    let first = harness
        .client
        .submit(handlers::CLEANUP, json!(null))
        .await
        .unwrap();
    let err = harness
        .client
        .submit(handlers::CLEANUP, json!(null))
        .await
        .unwrap_err();
    assert!(matches!(err, QueueError::Duplicate(_)));

    let registry = HandlerRegistry::new().register(Arc::new(CleanupHandler::new(
        RetentionSweeper::new(harness.db.clone()),
        7,
    )));
    let pool = harness.start(harness.config(), registry);
    assert_eq!(harness.wait_for(&first).await.state, JobState::Success);

    // The finished run released its key.
    let again = harness
        .client
        .submit(handlers::CLEANUP, json!(null))
        .await
        .unwrap();
    assert_eq!(harness.wait_for(&again).await.state, JobState::Success);
    pool.stop().await;
}

#[tokio::test]
async fn test_unregistered_handler_fails_job() {
    let harness = Harness::new();
    // Only the summary handler is registered; process_document is routed
    // but nobody can run it.
    let registry = HandlerRegistry::new().register(Arc::new(GenerateSummaryHandler::new(
        harness.db.clone(),
        harness.index.clone(),
        Arc::new(ExtractiveSummarizer::default()),
        harness.cache.clone(),
    )));
    let pool = harness.start(harness.config(), registry);

    let job_id = harness
        .client
        .submit(
            handlers::PROCESS_DOCUMENT,
            json!({ "document_id": "d1", "file_path": "/nowhere.pdf" }),
        )
        .await
        .unwrap();
    let status = harness.wait_for(&job_id).await;
    pool.stop().await;

    assert_eq!(status.state, JobState::Failure);
    assert_eq!(status.error.as_deref(), Some("Unknown handler: process_document"));
}

#[tokio::test]
async fn test_status_of_unknown_job() {
    let harness = Harness::new();
    let err = harness.client.get_status(&JobId::new()).await.unwrap_err();
    assert!(matches!(err, QueueError::JobNotFound(_)));
}
