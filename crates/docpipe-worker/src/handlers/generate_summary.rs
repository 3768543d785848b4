//! Summarize a processed document, caching the result.
//!
//! With a `focus` query the summary is built from the best matching chunks
//! instead of the leading ones, and only the search hits are cached.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use docpipe_cache::{summary_key, CacheService};
use docpipe_models::{Chunk, DocumentId, DocumentStatus};
use docpipe_queue::handlers;
use docpipe_store::DocumentDb;
use serde::Deserialize;

use crate::context::JobContext;
use crate::error::{WorkerError, WorkerResult};
use crate::handler::{parse_args, JobHandler};
use crate::services::{ChunkIndex, DocumentSearch, DocumentSummary, Summarizer};

const DEFAULT_MAX_CHUNKS: usize = 20;

#[derive(Debug, Deserialize)]
struct SummaryArgs {
    document_id: DocumentId,
    #[serde(default)]
    focus: Option<String>,
}

pub struct GenerateSummaryHandler {
    db: DocumentDb,
    search: DocumentSearch,
    summarizer: Arc<dyn Summarizer>,
    cache: CacheService,
    ttl: Duration,
    max_chunks: usize,
}

impl GenerateSummaryHandler {
    pub fn new(
        db: DocumentDb,
        index: Arc<dyn ChunkIndex>,
        summarizer: Arc<dyn Summarizer>,
        cache: CacheService,
    ) -> Self {
        let ttl = cache.default_ttl();
        Self {
            db,
            search: DocumentSearch::new(index, cache.clone()),
            summarizer,
            cache,
            ttl,
            max_chunks: DEFAULT_MAX_CHUNKS,
        }
    }

    pub fn with_max_chunks(mut self, max_chunks: usize) -> Self {
        self.max_chunks = max_chunks;
        self
    }
}

#[async_trait]
impl JobHandler for GenerateSummaryHandler {
    fn name(&self) -> &'static str {
        handlers::GENERATE_SUMMARY
    }

    async fn run(
        &self,
        ctx: Arc<JobContext>,
        args: serde_json::Value,
    ) -> WorkerResult<serde_json::Value> {
        let SummaryArgs { document_id, focus } = parse_args(args)?;

        let status = {
            let session = self.db.session()?;
            session
                .get(&document_id)?
                .ok_or_else(|| WorkerError::DocumentNotFound(document_id.clone()))?
                .status
        };
        if status != DocumentStatus::Completed {
            return Err(WorkerError::document_state(
                &document_id,
                status,
                "summaries need a completed document",
            ));
        }

        if let Some(focus) = focus.filter(|f| !f.trim().is_empty()) {
            ctx.report_progress("searching", 30).await?;
            let mut hits = self
                .search
                .search(&document_id, &focus, self.max_chunks)
                .await?;
            hits.sort_by_key(|hit| hit.index);
            let chunks: Vec<Chunk> = hits
                .into_iter()
                .map(|hit| Chunk::new(hit.content, hit.index))
                .collect();

            ctx.report_progress("summarizing", 50).await?;
            let summary = self.summarizer.summarize(&document_id, &chunks).await?;
            ctx.logger().log_completion(&format!(
                "summary of \"{}\" built from {} chunks",
                focus, summary.source_chunks
            ));
            return Ok(serde_json::to_value(summary)?);
        }

        ctx.report_progress("checking_cache", 10).await?;
        let key = summary_key(document_id.as_str());
        if let Some(mut summary) = self.cache.get::<DocumentSummary>(&key).await {
            summary.cached = true;
            ctx.logger().log_completion("summary served from cache");
            return Ok(serde_json::to_value(summary)?);
        }

        ctx.report_progress("summarizing", 50).await?;
        let chunks = self
            .search
            .index()
            .chunks(&document_id, self.max_chunks)
            .await?;
        let summary = self.summarizer.summarize(&document_id, &chunks).await?;
        self.cache.set(&key, &summary, self.ttl).await;

        ctx.logger().log_completion(&format!(
            "summary built from {} chunks",
            summary.source_chunks
        ));
        Ok(serde_json::to_value(summary)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::JobLogger;
    use crate::services::{ExtractiveSummarizer, InMemoryChunkIndex};
    use docpipe_cache::EvictionPolicy;
    use docpipe_models::{Chunk, DocumentRecord, JobRecord};
    use docpipe_queue::{JobStore, MemoryJobStore};
    use serde_json::json;

    struct Fixture {
        _dir: tempfile::TempDir,
        db: DocumentDb,
        index: Arc<InMemoryChunkIndex>,
        cache: CacheService,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let db = DocumentDb::open(dir.path().join("documents.db")).unwrap();
            Self {
                _dir: dir,
                db,
                index: Arc::new(InMemoryChunkIndex::new()),
                cache: CacheService::local(16, EvictionPolicy::InsertionOrder),
            }
        }

        fn handler(&self) -> GenerateSummaryHandler {
            GenerateSummaryHandler::new(
                self.db.clone(),
                self.index.clone(),
                Arc::new(ExtractiveSummarizer::default()),
                self.cache.clone(),
            )
        }

        async fn document(&self, status: DocumentStatus) -> DocumentId {
            let record = DocumentRecord::new(DocumentId::new(), "a.pdf", "/uploads/a.pdf", 1)
                .with_status(status);
            self.db.session().unwrap().insert(&record).unwrap();
            self.index
                .add_chunks(&record.id, &[Chunk::new("First point. Second point.", 0)])
                .await
                .unwrap();
            record.id
        }
    }

    async fn context() -> Arc<JobContext> {
        let store = Arc::new(MemoryJobStore::new());
        let mut record = JobRecord::new(handlers::GENERATE_SUMMARY, "document_processing", json!({}));
        store.create(&record).await.unwrap();
        record.start("unit-0").unwrap();
        let logger = JobLogger::new(&record.id, &record.handler);
        Arc::new(JobContext::new(record, store, logger))
    }

    #[tokio::test]
    async fn test_second_request_is_cached() {
        let fx = Fixture::new();
        let doc = fx.document(DocumentStatus::Completed).await;
        let args = json!({ "document_id": doc });

        let first: DocumentSummary =
            serde_json::from_value(fx.handler().run(context().await, args.clone()).await.unwrap())
                .unwrap();
        assert!(!first.cached);
        assert_eq!(first.summary, "First point. Second point.");

        let second: DocumentSummary =
            serde_json::from_value(fx.handler().run(context().await, args).await.unwrap())
                .unwrap();
        assert!(second.cached);
        assert_eq!(second.summary, first.summary);
    }

    #[tokio::test]
    async fn test_requires_completed_document() {
        let fx = Fixture::new();
        let doc = fx.document(DocumentStatus::Processing).await;

        let err = fx
            .handler()
            .run(context().await, json!({ "document_id": doc }))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            WorkerError::DocumentState { status: DocumentStatus::Processing, .. }
        ));
    }

    #[tokio::test]
    async fn test_missing_document() {
        let fx = Fixture::new();
        let err = fx
            .handler()
            .run(context().await, json!({ "document_id": "missing" }))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::DocumentNotFound(_)));
    }

    #[tokio::test]
    async fn test_focus_summarizes_matching_chunks() {
        let fx = Fixture::new();
        let doc = fx.document(DocumentStatus::Completed).await;
        fx.index
            .add_chunks(
                &doc,
                &[
                    Chunk::new("Invoices are due in thirty days.", 0),
                    Chunk::new("Failed uploads are swept nightly.", 1),
                ],
            )
            .await
            .unwrap();
        let args = json!({ "document_id": doc, "focus": "uploads swept" });

        let summary: DocumentSummary =
            serde_json::from_value(fx.handler().run(context().await, args).await.unwrap())
                .unwrap();
        assert!(summary.summary.contains("Failed uploads"));
        assert!(!summary.summary.contains("Invoices"));
        // The plain summary cache is left alone.
        assert!(fx
            .cache
            .get::<DocumentSummary>(&summary_key(doc.as_str()))
            .await
            .is_none());
    }
}
