//! Upload intake: validate, store, record, submit.

use std::path::PathBuf;

use docpipe_models::{DocumentId, DocumentRecord, JobId};
use docpipe_queue::{handlers, JobClient};
use docpipe_store::{stored_path, DocumentDb};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use crate::error::{WorkerError, WorkerResult};
use crate::metrics;

/// An accepted upload and the job processing it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptedDocument {
    pub document_id: DocumentId,
    pub job_id: JobId,
    pub filename: String,
    pub file_size: u64,
}

pub struct DocumentIntake {
    db: DocumentDb,
    client: JobClient,
    uploads_dir: PathBuf,
    max_bytes: u64,
}

impl DocumentIntake {
    pub fn new(
        db: DocumentDb,
        client: JobClient,
        uploads_dir: impl Into<PathBuf>,
        max_bytes: u64,
    ) -> Self {
        Self {
            db,
            client,
            uploads_dir: uploads_dir.into(),
            max_bytes,
        }
    }

    fn validate(&self, filename: &str, size: u64) -> WorkerResult<()> {
        if !filename.to_lowercase().ends_with(".pdf") {
            metrics::record_document_rejected("type");
            return Err(WorkerError::rejected("only PDF files are supported"));
        }
        if size > self.max_bytes {
            metrics::record_document_rejected("size");
            return Err(WorkerError::rejected(format!(
                "file is {} bytes, the limit is {} bytes",
                size, self.max_bytes
            )));
        }
        Ok(())
    }

    /// Store an upload as a pending document and queue it for processing.
    pub async fn accept(&self, filename: &str, bytes: &[u8]) -> WorkerResult<AcceptedDocument> {
        let file_size = bytes.len() as u64;
        self.validate(filename, file_size)?;

        let document_id = DocumentId::new();
        let path = stored_path(&self.uploads_dir, &document_id, filename);
        tokio::fs::create_dir_all(&self.uploads_dir).await?;
        tokio::fs::write(&path, bytes).await?;

        let file_path = path.display().to_string();
        let record =
            DocumentRecord::new(document_id.clone(), filename, file_path.clone(), file_size);
        let inserted = self.db.session().and_then(|session| session.insert(&record));
        if let Err(e) = inserted {
            if let Err(remove) = tokio::fs::remove_file(&path).await {
                warn!("Failed to remove {} after insert error: {}", file_path, remove);
            }
            return Err(e.into());
        }

        let args = json!({ "document_id": document_id, "file_path": file_path });
        let job_id = match self.client.submit(handlers::PROCESS_DOCUMENT, args).await {
            Ok(job_id) => job_id,
            Err(e) => {
                // Left for the retention sweep.
                if let Err(mark) = self.db.session().and_then(|s| s.mark_failed(&document_id)) {
                    warn!(
                        document_id = %document_id,
                        "Failed to mark unqueued document failed: {}", mark
                    );
                }
                return Err(e.into());
            }
        };

        metrics::record_document_accepted();
        info!(
            document_id = %document_id,
            job_id = %job_id,
            "Accepted {} ({} bytes)", filename, file_size
        );
        Ok(AcceptedDocument {
            document_id,
            job_id,
            filename: filename.to_string(),
            file_size,
        })
    }
}
