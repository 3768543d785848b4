//! Extract, chunk and index an uploaded document.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use docpipe_models::{DocumentId, DocumentStatus, JobId};
use docpipe_processing::{DocumentProcessor, TextExtractor};
use docpipe_queue::handlers;
use docpipe_store::{DocumentDb, DocumentSession};
use serde::{Deserialize, Serialize};

use crate::context::JobContext;
use crate::error::{WorkerError, WorkerResult};
use crate::handler::{parse_args, JobHandler};
use crate::logging::JobLogger;
use crate::retry::{retry_async, RetryConfig};
use crate::services::DocumentSearch;

#[derive(Debug, Deserialize)]
struct ProcessArgs {
    document_id: DocumentId,
    file_path: String,
}

/// Result of a successful run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingResult {
    pub status: DocumentStatus,
    pub pages: u32,
    pub chunk_count: u32,
    pub message: String,
}

pub struct ProcessDocumentHandler {
    db: DocumentDb,
    processor: DocumentProcessor,
    extractor: Option<Arc<dyn TextExtractor>>,
    search: DocumentSearch,
}

impl ProcessDocumentHandler {
    pub fn new(db: DocumentDb, processor: DocumentProcessor, search: DocumentSearch) -> Self {
        Self {
            db,
            processor,
            extractor: None,
            search,
        }
    }

    /// Use one extractor for every file instead of choosing by extension.
    pub fn with_extractor(mut self, extractor: Arc<dyn TextExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    async fn process(
        &self,
        ctx: &JobContext,
        session: &mut DocumentSession,
        args: &ProcessArgs,
    ) -> WorkerResult<ProcessingResult> {
        let id = &args.document_id;
        let record = session
            .get(id)?
            .ok_or_else(|| WorkerError::DocumentNotFound(id.clone()))?;

        match record.status {
            DocumentStatus::Pending => {
                session.mark_processing(id)?;
            }
            // Redelivered after a worker crash.
            DocumentStatus::Processing => ctx
                .logger()
                .log_warning(&format!("Document {} already processing, resuming", id)),
            status => {
                return Err(WorkerError::document_state(id, status, "already processed"));
            }
        }

        ctx.report_progress("extracting_text", 20).await?;
        let processor = self.processor;
        let extractor = self.extractor.clone();
        let path = PathBuf::from(&args.file_path);
        let processed = tokio::task::spawn_blocking(move || match extractor {
            Some(extractor) => processor.process_with(extractor.as_ref(), &path),
            None => processor.process(&path),
        })
        .await
        .map_err(|e| WorkerError::job_failed(format!("extraction task failed: {}", e)))??;

        ctx.report_progress("indexing_chunks", 60).await?;
        self.search.index().add_chunks(id, &processed.chunks).await?;
        self.search.invalidate_summary(id).await;

        ctx.report_progress("updating_database", 90).await?;
        let pages = processed.metadata.pages;
        let chunk_count = processed.chunk_count as u32;
        if !session.mark_completed(id, pages, chunk_count)? {
            let status = session
                .get(id)?
                .map(|r| r.status)
                .ok_or_else(|| WorkerError::DocumentNotFound(id.clone()))?;
            return Err(WorkerError::document_state(id, status, "changed during processing"));
        }

        Ok(ProcessingResult {
            status: DocumentStatus::Completed,
            pages,
            chunk_count,
            message: format!(
                "Processed {} into {} pages and {} chunks",
                record.filename, pages, chunk_count
            ),
        })
    }
}

/// Move the document to `failed`, retrying while the database is busy.
async fn mark_failed(session: &mut DocumentSession, id: &DocumentId, logger: &JobLogger) {
    let retry = RetryConfig::new(format!("mark document {} failed", id))
        .with_base_delay(Duration::from_millis(50));
    let outcome = retry_async(&retry, move || std::future::ready(session.mark_failed(id))).await;
    match outcome {
        Ok(true) => logger.log_warning(&format!("Document {} marked failed", id)),
        Ok(false) => {}
        Err(e) => logger.log_error(&format!("Failed to mark document {} failed: {}", id, e)),
    }
}

#[async_trait]
impl JobHandler for ProcessDocumentHandler {
    fn name(&self) -> &'static str {
        handlers::PROCESS_DOCUMENT
    }

    async fn run(
        &self,
        ctx: Arc<JobContext>,
        args: serde_json::Value,
    ) -> WorkerResult<serde_json::Value> {
        let args: ProcessArgs = parse_args(args)?;
        let mut session = self.db.session()?;

        match self.process(&ctx, &mut session, &args).await {
            Ok(result) => {
                ctx.logger().log_completion(&result.message);
                Ok(serde_json::to_value(result)?)
            }
            Err(e) => {
                mark_failed(&mut session, &args.document_id, ctx.logger()).await;
                Err(e)
            }
        }
    }

    async fn recover(&self, job_id: &JobId, args: &serde_json::Value) {
        let Ok(args) = parse_args::<ProcessArgs>(args.clone()) else {
            return;
        };
        let logger = JobLogger::new(job_id, self.name());
        match self.db.session() {
            Ok(mut session) => mark_failed(&mut session, &args.document_id, &logger).await,
            Err(e) => logger.log_error(&format!(
                "Failed to open session to mark {} failed: {}",
                args.document_id, e
            )),
        }
    }
}
