//! Worker configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use docpipe_queue::lanes;

/// Where lanes and job records live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueueBackend {
    /// Redis Streams and Redis job records, shared across processes
    #[default]
    Redis,
    /// In-process lanes and records, for single-process deployments
    Memory,
}

impl FromStr for QueueBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "redis" => Ok(QueueBackend::Redis),
            "memory" => Ok(QueueBackend::Memory),
            other => Err(format!("unknown queue backend: {}", other)),
        }
    }
}

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Number of worker units consuming concurrently
    pub concurrency: usize,
    /// Jobs a unit executes before it is retired and replaced
    pub max_jobs_per_worker: u32,
    /// Hard wall-clock limit per job
    pub job_timeout: Duration,
    /// Lanes consumed, round-robin
    pub lanes: Vec<String>,
    /// How long one consume call waits for a message
    pub block_timeout: Duration,
    /// How often the worker should scan for orphaned pending jobs
    pub claim_interval: Duration,
    /// Minimum idle time before a pending job can be claimed (crash recovery)
    pub claim_min_idle: Duration,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    pub queue_backend: QueueBackend,
    /// Root directory for uploaded files
    pub uploads_dir: PathBuf,
    /// SQLite file holding document records
    pub database_path: PathBuf,
    /// Largest accepted upload
    pub max_upload_bytes: u64,
    /// Age after which failed documents are swept
    pub retention_days: u32,
    /// Chunks fed to the summarizer per document
    pub summary_max_chunks: usize,
    /// Daily cleanup time (UTC)
    pub cleanup_hour: u32,
    pub cleanup_minute: u32,
    /// Run the calendar scheduler in this process
    pub scheduler_enabled: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 2,
            max_jobs_per_worker: 50,
            job_timeout: Duration::from_secs(1800), // 30 minutes
            lanes: vec![
                lanes::DOCUMENT_PROCESSING.to_string(),
                lanes::MAINTENANCE.to_string(),
            ],
            block_timeout: Duration::from_secs(1),
            claim_interval: Duration::from_secs(30),
            claim_min_idle: Duration::from_secs(2100), // job timeout + 5 minutes
            shutdown_timeout: Duration::from_secs(60),
            queue_backend: QueueBackend::Redis,
            uploads_dir: PathBuf::from("./uploads"),
            database_path: PathBuf::from("./data/documents.db"),
            max_upload_bytes: 50 * 1024 * 1024,
            retention_days: 7,
            summary_max_chunks: 20,
            cleanup_hour: 2,
            cleanup_minute: 0,
            scheduler_enabled: true,
        }
    }
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            concurrency: env_parse("WORKER_CONCURRENCY").unwrap_or(defaults.concurrency),
            max_jobs_per_worker: env_parse::<u32>("WORKER_MAX_JOBS_PER_UNIT")
                .unwrap_or(defaults.max_jobs_per_worker)
                .max(1),
            job_timeout: env_parse("WORKER_JOB_TIMEOUT")
                .map(Duration::from_secs)
                .unwrap_or(defaults.job_timeout),
            lanes: std::env::var("WORKER_LANES")
                .ok()
                .map(|s| {
                    s.split(',')
                        .map(str::trim)
                        .filter(|l| !l.is_empty())
                        .map(str::to_string)
                        .collect::<Vec<_>>()
                })
                .filter(|lanes| !lanes.is_empty())
                .unwrap_or(defaults.lanes),
            block_timeout: env_parse("WORKER_BLOCK_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.block_timeout),
            claim_interval: env_parse("WORKER_CLAIM_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.claim_interval),
            claim_min_idle: env_parse("WORKER_CLAIM_MIN_IDLE_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.claim_min_idle),
            shutdown_timeout: env_parse("WORKER_SHUTDOWN_TIMEOUT")
                .map(Duration::from_secs)
                .unwrap_or(defaults.shutdown_timeout),
            queue_backend: env_parse("QUEUE_BACKEND").unwrap_or_default(),
            uploads_dir: std::env::var("UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.uploads_dir),
            database_path: std::env::var("DATABASE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.database_path),
            max_upload_bytes: env_parse("MAX_FILE_SIZE").unwrap_or(defaults.max_upload_bytes),
            retention_days: env_parse("RETENTION_DAYS").unwrap_or(defaults.retention_days),
            summary_max_chunks: env_parse::<usize>("SUMMARY_MAX_CHUNKS")
                .unwrap_or(defaults.summary_max_chunks)
                .max(1),
            cleanup_hour: env_parse("CLEANUP_HOUR").unwrap_or(defaults.cleanup_hour),
            cleanup_minute: env_parse("CLEANUP_MINUTE").unwrap_or(defaults.cleanup_minute),
            scheduler_enabled: std::env::var("SCHEDULER_ENABLED")
                .map(|v| v.to_lowercase() == "true" || v == "1")
                .unwrap_or(defaults.scheduler_enabled),
        }
    }
}
