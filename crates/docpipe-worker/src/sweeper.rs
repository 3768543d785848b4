//! Retention sweep of failed documents.
//!
//! Runs synchronously on a blocking thread. One failed item never aborts the
//! sweep: it is counted and the next record is tried.

use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use docpipe_models::DocumentRecord;
use docpipe_store::DocumentDb;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::WorkerResult;
use crate::metrics;

/// Outcome of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Records and files removed
    pub deleted_count: u64,
    /// Records left in place because their file or row could not be removed
    pub failed_count: u64,
    /// Records that changed status or vanished before they could be deleted
    pub skipped_count: u64,
}

#[derive(Debug, Clone)]
pub struct RetentionSweeper {
    db: DocumentDb,
}

impl RetentionSweeper {
    pub fn new(db: DocumentDb) -> Self {
        Self { db }
    }

    /// Delete failed documents uploaded more than `retention` ago.
    pub fn sweep(&self, retention: Duration) -> WorkerResult<SweepReport> {
        self.sweep_at(Utc::now(), retention)
    }

    pub fn sweep_at(&self, now: DateTime<Utc>, retention: Duration) -> WorkerResult<SweepReport> {
        let cutoff = now - retention;
        let mut session = self.db.session()?;
        let tx = session.transaction()?;
        let expired = tx.expired_failed(cutoff)?;
        debug!("{} failed documents older than {}", expired.len(), cutoff);

        let mut report = SweepReport::default();
        for record in &expired {
            if let Err(e) = remove_file(record) {
                warn!(
                    document_id = %record.id,
                    "Failed to delete file {}: {}", record.file_path, e
                );
                report.failed_count += 1;
                continue;
            }

            match tx.delete_failed(&record.id) {
                Ok(true) => {
                    debug!(document_id = %record.id, "Deleted failed document {}", record.filename);
                    report.deleted_count += 1;
                }
                Ok(false) => report.skipped_count += 1,
                Err(e) => {
                    warn!(document_id = %record.id, "Failed to delete record: {}", e);
                    report.failed_count += 1;
                }
            }
        }
        tx.commit()?;

        metrics::record_sweep(report.deleted_count, report.failed_count);
        info!(
            deleted = report.deleted_count,
            failed = report.failed_count,
            skipped = report.skipped_count,
            "Cleaned up {} failed documents",
            report.deleted_count
        );
        Ok(report)
    }
}

/// A missing file counts as removed.
fn remove_file(record: &DocumentRecord) -> std::io::Result<()> {
    match std::fs::remove_file(Path::new(&record.file_path)) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}
