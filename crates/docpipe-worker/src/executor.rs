//! Worker pool.
//!
//! A supervisor keeps `concurrency` worker units alive. Each unit consumes
//! one message at a time round-robin across its lanes, runs it to a terminal
//! state, acks it, and retires after `max_jobs_per_worker` executions; the
//! supervisor then spawns a replacement under a fresh consumer name.

use std::sync::Arc;
use std::time::{Duration, Instant};

use docpipe_queue::{Delivery, JobBroker, JobStore, QueuedJob};
use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

use crate::config::WorkerConfig;
use crate::context::JobContext;
use crate::error::{WorkerError, WorkerResult};
use crate::handler::HandlerRegistry;
use crate::logging::JobLogger;
use crate::metrics;
use crate::retry::{FailureTracker, RetryConfig};

/// How long an aborted handler gets to unwind before it is abandoned.
const ABORT_GRACE: Duration = Duration::from_secs(5);

/// What happened to one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded,
    Failed(String),
    TimedOut,
    /// Record missing or already terminal; acked and dropped
    Skipped(&'static str),
    /// Job store unreachable; left pending for a later claim
    Deferred,
}

impl JobOutcome {
    fn label(&self) -> &'static str {
        match self {
            JobOutcome::Succeeded => "success",
            JobOutcome::Failed(_) => "failure",
            JobOutcome::TimedOut => "timeout",
            JobOutcome::Skipped(_) => "skipped",
            JobOutcome::Deferred => "deferred",
        }
    }
}

enum UnitExit {
    Retired { slot: usize, generation: u64, jobs: u32 },
    Shutdown,
}

/// Sends the pool's shutdown signal from another task.
#[derive(Clone)]
pub struct ShutdownHandle(Arc<watch::Sender<bool>>);

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.0.send_replace(true);
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.0.subscribe()
    }
}

struct PoolShared {
    config: WorkerConfig,
    broker: Arc<dyn JobBroker>,
    store: Arc<dyn JobStore>,
    registry: HandlerRegistry,
}

pub struct WorkerPool {
    shared: Arc<PoolShared>,
    shutdown: Arc<watch::Sender<bool>>,
    pool_id: String,
}

impl WorkerPool {
    pub fn new(
        config: WorkerConfig,
        broker: Arc<dyn JobBroker>,
        store: Arc<dyn JobStore>,
        registry: HandlerRegistry,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        let uuid = Uuid::new_v4().simple().to_string();
        Self {
            shared: Arc::new(PoolShared {
                config,
                broker,
                store,
                registry,
            }),
            shutdown: Arc::new(shutdown),
            pool_id: format!("worker-{}", &uuid[..8]),
        }
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle(Arc::clone(&self.shutdown))
    }

    pub fn pool_id(&self) -> &str {
        &self.pool_id
    }

    fn consumer_name(&self, slot: usize, generation: u64) -> String {
        format!("{}-{}-{}", self.pool_id, slot, generation)
    }

    fn spawn_unit(&self, units: &mut JoinSet<UnitExit>, slot: usize, generation: u64) {
        let shared = Arc::clone(&self.shared);
        let consumer = self.consumer_name(slot, generation);
        let shutdown = self.shutdown.subscribe();
        units.spawn(run_unit(shared, slot, generation, consumer, shutdown));
    }

    /// Run until shutdown is signalled, then wait for in-flight jobs.
    pub async fn run(&self) -> WorkerResult<()> {
        let config = &self.shared.config;
        info!(
            "Starting worker pool '{}' with {} units on lanes {:?} (handlers: {:?})",
            self.pool_id,
            config.concurrency,
            config.lanes,
            self.shared.registry.names()
        );

        let mut units = JoinSet::new();
        let mut next_slot = config.concurrency.max(1);
        for slot in 0..next_slot {
            self.spawn_unit(&mut units, slot, 0);
        }

        let claim_task = tokio::spawn(claim_loop(
            Arc::clone(&self.shared),
            format!("{}-claim", self.pool_id),
            self.shutdown.subscribe(),
        ));

        let mut shutdown_rx = self.shutdown.subscribe();
        loop {
            if *shutdown_rx.borrow() {
                break;
            }
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
                Some(joined) = units.join_next() => match joined {
                    Ok(UnitExit::Retired { slot, generation, jobs }) => {
                        metrics::record_worker_retired(jobs);
                        info!("Worker unit {} retired after {} jobs, replacing", slot, jobs);
                        self.spawn_unit(&mut units, slot, generation + 1);
                    }
                    Ok(UnitExit::Shutdown) => {}
                    Err(e) => {
                        error!("Worker unit crashed: {}", e);
                        self.spawn_unit(&mut units, next_slot, 0);
                        next_slot += 1;
                    }
                },
            }
        }

        info!("Shutdown signal received, stopping worker pool");
        claim_task.abort();

        info!("Waiting for in-flight jobs to complete...");
        let drain = async { while units.join_next().await.is_some() {} };
        if tokio::time::timeout(config.shutdown_timeout, drain).await.is_err() {
            warn!(
                "In-flight jobs still running after {:?}, aborting",
                config.shutdown_timeout
            );
            units.abort_all();
        }

        info!("Worker pool stopped");
        Ok(())
    }

    /// Execute one delivery outside the consume loop.
    pub async fn execute(&self, consumer: &str, delivery: Delivery) -> JobOutcome {
        self.shared.execute(consumer, delivery).await
    }
}

async fn run_unit(
    shared: Arc<PoolShared>,
    slot: usize,
    generation: u64,
    consumer: String,
    mut shutdown: watch::Receiver<bool>,
) -> UnitExit {
    let config = &shared.config;
    let backoff = RetryConfig::new("consume").with_base_delay(Duration::from_millis(200));
    let mut failures = FailureTracker::new(3);
    let mut jobs = 0u32;
    let mut cursor = 0usize;

    debug!(consumer = %consumer, "Worker unit started");
    loop {
        if *shutdown.borrow() {
            return UnitExit::Shutdown;
        }
        if jobs >= config.max_jobs_per_worker.max(1) {
            return UnitExit::Retired {
                slot,
                generation,
                jobs,
            };
        }
        let Some(lane) = config.lanes.get(cursor % config.lanes.len().max(1)) else {
            warn!("Worker unit {} has no lanes", consumer);
            return UnitExit::Shutdown;
        };
        cursor = cursor.wrapping_add(1);

        let consumed = tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() {
                    return UnitExit::Shutdown;
                }
                continue;
            }
            consumed = shared.broker.consume(lane, &consumer, config.block_timeout) => consumed,
        };

        match consumed {
            Ok(Some(delivery)) => {
                failures.record_success();
                let outcome = shared.execute(&consumer, delivery).await;
                if !matches!(outcome, JobOutcome::Skipped(_) | JobOutcome::Deferred) {
                    jobs += 1;
                }
            }
            Ok(None) => failures.record_success(),
            Err(e) => {
                if failures.record_failure() {
                    error!("Failed to consume from {}: {}", lane, e);
                }
                tokio::time::sleep(backoff.delay_for_attempt(failures.failure_count())).await;
            }
        }
    }
}

/// Periodically take over messages left pending by crashed workers.
async fn claim_loop(
    shared: Arc<PoolShared>,
    consumer: String,
    mut shutdown: watch::Receiver<bool>,
) {
    let config = &shared.config;
    let mut interval = tokio::time::interval(config.claim_interval);
    let mut failures = FailureTracker::new(3);

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = interval.tick() => {
                for lane in &config.lanes {
                    match shared.broker.claim_stale(lane, &consumer, config.claim_min_idle).await {
                        Ok(deliveries) => {
                            failures.record_success();
                            if !deliveries.is_empty() {
                                info!("Claimed {} stale jobs on {}", deliveries.len(), lane);
                            }
                            for delivery in deliveries {
                                shared.execute(&consumer, delivery).await;
                            }
                        }
                        Err(e) => {
                            if failures.record_failure() {
                                warn!("Failed to claim stale jobs on {}: {}", lane, e);
                            }
                        }
                    }
                }
            }
        }
    }
}

fn panic_message(err: JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }
    let payload = err.into_panic();
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl PoolShared {
    /// Run a delivery to completion, then ack it.
    async fn execute(&self, consumer: &str, delivery: Delivery) -> JobOutcome {
        let Delivery {
            message_id,
            lane,
            job,
        } = delivery;

        let logger = JobLogger::new(&job.job_id, &job.handler);
        let span = logger.create_span();
        let outcome = self
            .execute_job(consumer, &job, &logger)
            .instrument(span)
            .await;

        if outcome == JobOutcome::Deferred {
            return outcome;
        }
        if let Err(e) = self.broker.ack(&lane, &message_id).await {
            error!("Failed to ack job {}: {}", job.job_id, e);
        }
        let finished = matches!(
            outcome,
            JobOutcome::Succeeded | JobOutcome::Failed(_) | JobOutcome::TimedOut
        );
        if let (true, Some(key)) = (finished, &job.dedup_key) {
            if let Err(e) = self.broker.release_dedup(key).await {
                warn!("Failed to clear dedup key for job {}: {}", job.job_id, e);
            }
        }
        outcome
    }

    async fn execute_job(
        &self,
        consumer: &str,
        job: &QueuedJob,
        logger: &JobLogger,
    ) -> JobOutcome {
        let mut record = match self.store.get(&job.job_id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                logger.log_warning("no job record, dropping message");
                return JobOutcome::Skipped("missing record");
            }
            Err(e) => {
                logger.log_error(&format!("job store unavailable: {}", e));
                return JobOutcome::Deferred;
            }
        };
        if record.is_terminal() || record.start(consumer).is_err() {
            logger.log_warning(&format!("already {}, dropping message", record.state));
            return JobOutcome::Skipped("already finished");
        }
        match self.store.save(&record).await {
            Ok(true) => {}
            Ok(false) => return JobOutcome::Skipped("already finished"),
            Err(e) => {
                logger.log_error(&format!("failed to persist start: {}", e));
                return JobOutcome::Deferred;
            }
        }

        logger.log_start(&format!("on {} (lane {})", consumer, job.queue));
        metrics::record_job_started(&job.handler);
        let started = Instant::now();

        let ctx = Arc::new(JobContext::new(
            record,
            Arc::clone(&self.store),
            logger.clone(),
        ));
        let outcome = self.run_handler(&ctx, job).await;

        match &outcome {
            JobOutcome::Succeeded => logger.log_completion(&format!(
                "in {:.2}s",
                started.elapsed().as_secs_f64()
            )),
            JobOutcome::Failed(error) => logger.log_error(error),
            JobOutcome::TimedOut => logger.log_error("time limit exceeded"),
            JobOutcome::Skipped(_) | JobOutcome::Deferred => {}
        }
        metrics::record_job_finished(
            &job.handler,
            outcome.label(),
            started.elapsed().as_secs_f64(),
        );
        outcome
    }

    async fn run_handler(&self, ctx: &Arc<JobContext>, job: &QueuedJob) -> JobOutcome {
        let Some(handler) = self.registry.get(&job.handler) else {
            let error = format!("Unknown handler: {}", job.handler);
            return fail(ctx, error).await;
        };

        let mut task = {
            let handler = Arc::clone(&handler);
            let ctx = Arc::clone(ctx);
            let args = job.args.clone();
            tokio::spawn(async move { handler.run(ctx, args).await }.in_current_span())
        };

        let limit = self.config.job_timeout;
        let joined = tokio::select! {
            joined = &mut task => Some(joined),
            _ = tokio::time::sleep(limit) => None,
        };

        match joined {
            Some(Ok(Ok(result))) => match ctx.complete(result).await {
                Ok(_) => JobOutcome::Succeeded,
                Err(WorkerError::Queue(_)) => JobOutcome::Deferred,
                Err(e) => JobOutcome::Failed(e.to_string()),
            },
            Some(Ok(Err(e))) => fail(ctx, e.to_string()).await,
            Some(Err(e)) => {
                handler.recover(&job.job_id, &job.args).await;
                fail(ctx, format!("Handler panicked: {}", panic_message(e))).await
            }
            None => {
                task.abort();
                if tokio::time::timeout(ABORT_GRACE, task).await.is_err() {
                    ctx.logger().log_warning("handler did not stop after abort");
                }
                // Clean up before the failure becomes visible to pollers.
                handler.recover(&job.job_id, &job.args).await;
                match fail(ctx, format!("Job exceeded time limit of {:?}", limit)).await {
                    JobOutcome::Deferred => JobOutcome::Deferred,
                    _ => JobOutcome::TimedOut,
                }
            }
        }
    }
}

/// Record the failure. If the store stays down the message is left unacked
/// so another unit claims it once it goes stale.
async fn fail(ctx: &JobContext, error: String) -> JobOutcome {
    match ctx.fail(&error).await {
        Ok(_) => JobOutcome::Failed(error),
        Err(WorkerError::Queue(_)) => JobOutcome::Deferred,
        Err(e) => {
            ctx.logger().log_warning(&format!("could not record failure: {}", e));
            JobOutcome::Failed(error)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::JobHandler;
    use async_trait::async_trait;
    use docpipe_models::{JobId, JobRecord, JobState};
    use docpipe_queue::{MemoryBroker, MemoryJobStore, QueueError, QueueResult};
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Scripted;

    #[async_trait]
    impl JobHandler for Scripted {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn run(
            &self,
            ctx: Arc<JobContext>,
            args: serde_json::Value,
        ) -> WorkerResult<serde_json::Value> {
            ctx.report_progress("working", 50).await?;
            match args["mode"].as_str() {
                Some("fail") => Err(WorkerError::job_failed("boom")),
                Some("panic") => panic!("handler exploded"),
                Some("sleep") => {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok(json!("late"))
                }
                _ => Ok(json!({"ok": true})),
            }
        }
    }

    /// Rejects terminal writes until `outages` runs out.
    #[derive(Default)]
    struct Unreliable {
        inner: MemoryJobStore,
        outages: AtomicU32,
    }

    #[async_trait]
    impl JobStore for Unreliable {
        async fn create(&self, record: &JobRecord) -> QueueResult<()> {
            self.inner.create(record).await
        }

        async fn get(&self, id: &JobId) -> QueueResult<Option<JobRecord>> {
            self.inner.get(id).await
        }

        async fn save(&self, record: &JobRecord) -> QueueResult<bool> {
            let down = record.is_terminal()
                && self
                    .outages
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok();
            if down {
                return Err(QueueError::connection_failed("connection reset"));
            }
            self.inner.save(record).await
        }

        async fn remove(&self, id: &JobId) -> QueueResult<()> {
            self.inner.remove(id).await
        }
    }

    fn pool_with(store: Arc<dyn JobStore>, job_timeout: Duration) -> WorkerPool {
        let config = WorkerConfig {
            job_timeout,
            ..WorkerConfig::default()
        };
        let registry = HandlerRegistry::new().register(Arc::new(Scripted));
        let broker = Arc::new(MemoryBroker::default());
        WorkerPool::new(config, broker, store, registry)
    }

    fn pool(job_timeout: Duration) -> (Arc<MemoryJobStore>, WorkerPool) {
        let store = Arc::new(MemoryJobStore::new());
        let pool = pool_with(store.clone(), job_timeout);
        (store, pool)
    }

    async fn delivery(store: &dyn JobStore, handler: &str, args: serde_json::Value) -> Delivery {
        let record = JobRecord::new(handler, "document_processing", args);
        store.create(&record).await.unwrap();
        Delivery {
            message_id: "1-0".to_string(),
            lane: "document_processing".to_string(),
            job: QueuedJob::from_record(&record),
        }
    }

    async fn run(mode: &str, timeout: Duration) -> (JobOutcome, JobRecord) {
        let (store, pool) = pool(timeout);
        let delivery = delivery(store.as_ref(), "scripted", json!({ "mode": mode })).await;
        let job_id = delivery.job.job_id.clone();
        let outcome = pool.execute("unit", delivery).await;
        (outcome, store.get(&job_id).await.unwrap().unwrap())
    }

    #[tokio::test]
    async fn test_success_stores_result() {
        let (outcome, record) = run("ok", Duration::from_secs(5)).await;
        assert_eq!(outcome, JobOutcome::Succeeded);
        assert_eq!(record.state, JobState::Success);
        assert_eq!(record.result, Some(json!({"ok": true})));
        assert_eq!(record.worker.as_deref(), Some("unit"));
    }

    #[tokio::test]
    async fn test_handler_error_fails_job() {
        let (outcome, record) = run("fail", Duration::from_secs(5)).await;
        assert!(matches!(outcome, JobOutcome::Failed(_)));
        assert_eq!(record.state, JobState::Failure);
        assert_eq!(record.error.as_deref(), Some("Job failed: boom"));
    }

    #[tokio::test]
    async fn test_panic_fails_job() {
        let (outcome, record) = run("panic", Duration::from_secs(5)).await;
        assert!(matches!(outcome, JobOutcome::Failed(_)));
        assert_eq!(record.state, JobState::Failure);
        assert!(record.error.unwrap().contains("handler exploded"));
    }

    #[tokio::test]
    async fn test_time_limit() {
        let (outcome, record) = run("sleep", Duration::from_millis(100)).await;
        assert_eq!(outcome, JobOutcome::TimedOut);
        assert_eq!(record.state, JobState::Failure);
        assert!(record.error.unwrap().contains("time limit"));
    }

    #[tokio::test]
    async fn test_unknown_handler_fails_job() {
        let (store, pool) = pool(Duration::from_secs(5));
        let delivery = delivery(store.as_ref(), "nope", json!({})).await;
        let job_id = delivery.job.job_id.clone();

        let outcome = pool.execute("unit", delivery).await;
        assert_eq!(outcome, JobOutcome::Failed("Unknown handler: nope".to_string()));
        let record = store.get(&job_id).await.unwrap().unwrap();
        assert_eq!(record.state, JobState::Failure);
    }

    #[tokio::test]
    async fn test_terminal_and_missing_records_are_skipped() {
        let (store, pool) = pool(Duration::from_secs(5));
        let first = delivery(store.as_ref(), "scripted", json!({})).await;
        let again = first.clone();
        assert_eq!(pool.execute("unit", first).await, JobOutcome::Succeeded);
        assert_eq!(
            pool.execute("unit", again).await,
            JobOutcome::Skipped("already finished")
        );

        let orphan = delivery(store.as_ref(), "scripted", json!({})).await;
        store.remove(&orphan.job.job_id).await.unwrap();
        assert_eq!(
            pool.execute("unit", orphan).await,
            JobOutcome::Skipped("missing record")
        );
    }

    #[tokio::test]
    async fn test_terminal_write_is_retried() {
        let store = Arc::new(Unreliable {
            outages: AtomicU32::new(1),
            ..Unreliable::default()
        });
        let pool = pool_with(store.clone(), Duration::from_secs(5));
        let delivery = delivery(store.as_ref(), "scripted", json!({})).await;
        let job_id = delivery.job.job_id.clone();

        assert_eq!(pool.execute("unit", delivery).await, JobOutcome::Succeeded);
        let record = store.get(&job_id).await.unwrap().unwrap();
        assert_eq!(record.state, JobState::Success);
        assert_eq!(store.outages.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unrecorded_failure_is_deferred() {
        let store = Arc::new(Unreliable {
            outages: AtomicU32::new(u32::MAX),
            ..Unreliable::default()
        });
        let pool = pool_with(store.clone(), Duration::from_secs(5));
        let delivery = delivery(store.as_ref(), "scripted", json!({"mode": "fail"})).await;
        let job_id = delivery.job.job_id.clone();

        // Left unacked so a later claim can finish it.
        assert_eq!(pool.execute("unit", delivery).await, JobOutcome::Deferred);
        let record = store.get(&job_id).await.unwrap().unwrap();
        assert_eq!(record.state, JobState::Processing);

        store.outages.store(0, Ordering::SeqCst);
        let redelivered = Delivery {
            message_id: "1-0".to_string(),
            lane: "document_processing".to_string(),
            job: QueuedJob::from_record(&record),
        };
        assert!(matches!(
            pool.execute("unit-b", redelivered).await,
            JobOutcome::Failed(_)
        ));
        let record = store.get(&job_id).await.unwrap().unwrap();
        assert_eq!(record.state, JobState::Failure);
        assert_eq!(record.worker.as_deref(), Some("unit-b"));
    }
}
