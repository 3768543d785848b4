//! Prometheus metrics for the worker.

use std::net::SocketAddr;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;

use crate::error::{WorkerError, WorkerResult};

/// Metric names as constants for consistency.
pub mod names {
    // Job metrics
    pub const JOBS_STARTED_TOTAL: &str = "docpipe_jobs_started_total";
    pub const JOBS_COMPLETED_TOTAL: &str = "docpipe_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "docpipe_jobs_failed_total";
    pub const JOB_DURATION_SECONDS: &str = "docpipe_job_duration_seconds";

    // Pool metrics
    pub const WORKER_RETIREMENTS_TOTAL: &str = "docpipe_worker_retirements_total";

    // Retention metrics
    pub const SWEEP_DELETED_TOTAL: &str = "docpipe_sweep_deleted_total";
    pub const SWEEP_FAILED_TOTAL: &str = "docpipe_sweep_failed_total";

    // Intake metrics
    pub const DOCUMENTS_ACCEPTED_TOTAL: &str = "docpipe_documents_accepted_total";
    pub const DOCUMENTS_REJECTED_TOTAL: &str = "docpipe_documents_rejected_total";
}

/// Install the Prometheus recorder, serving `/metrics` on `addr`.
///
/// Without an address metrics calls are no-ops.
pub fn init_metrics(addr: Option<SocketAddr>) -> WorkerResult<()> {
    let Some(addr) = addr else {
        return Ok(());
    };
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| WorkerError::config_error(format!("metrics exporter: {}", e)))?;
    info!("Serving metrics on {}", addr);
    Ok(())
}

pub fn record_job_started(handler: &str) {
    let labels = [("handler", handler.to_string())];
    counter!(names::JOBS_STARTED_TOTAL, &labels).increment(1);
}

pub fn record_job_finished(handler: &str, outcome: &str, duration_secs: f64) {
    let labels = [
        ("handler", handler.to_string()),
        ("outcome", outcome.to_string()),
    ];
    let name = if outcome == "success" {
        names::JOBS_COMPLETED_TOTAL
    } else {
        names::JOBS_FAILED_TOTAL
    };
    counter!(name, &labels).increment(1);
    histogram!(names::JOB_DURATION_SECONDS, &labels).record(duration_secs);
}

pub fn record_worker_retired(jobs: u32) {
    counter!(names::WORKER_RETIREMENTS_TOTAL).increment(1);
    tracing::debug!("Worker unit retired after {} jobs", jobs);
}

pub fn record_sweep(deleted: u64, failed: u64) {
    counter!(names::SWEEP_DELETED_TOTAL).increment(deleted);
    counter!(names::SWEEP_FAILED_TOTAL).increment(failed);
}

pub fn record_document_accepted() {
    counter!(names::DOCUMENTS_ACCEPTED_TOTAL).increment(1);
}

pub fn record_document_rejected(reason: &str) {
    let labels = [("reason", reason.to_string())];
    counter!(names::DOCUMENTS_REJECTED_TOTAL, &labels).increment(1);
}
