//! Wiring shared by the binaries.

use std::sync::Arc;
use std::time::Duration;

use docpipe_cache::CacheService;
use docpipe_processing::DocumentProcessor;
use docpipe_queue::{
    JobBroker, JobClient, JobStore, MemoryBroker, MemoryJobStore, QueueConfig, RedisBroker,
    RedisJobStore, RouteTable,
};
use docpipe_store::DocumentDb;
use tracing::info;

use crate::config::{QueueBackend, WorkerConfig};
use crate::error::WorkerResult;
use crate::handler::HandlerRegistry;
use crate::handlers::{CleanupHandler, GenerateSummaryHandler, ProcessDocumentHandler};
use crate::retry::{retry_async, RetryConfig};
use crate::services::{ChunkIndex, DocumentSearch, ExtractiveSummarizer, InMemoryChunkIndex};
use crate::sweeper::RetentionSweeper;

/// Broker and job store for the configured backend.
#[derive(Clone)]
pub struct QueueBackends {
    pub broker: Arc<dyn JobBroker>,
    pub store: Arc<dyn JobStore>,
}

impl QueueBackends {
    /// Connect, retrying Redis for a few seconds while it comes up.
    pub async fn connect(config: &WorkerConfig, queue: &QueueConfig) -> WorkerResult<Self> {
        match config.queue_backend {
            QueueBackend::Memory => {
                info!("Using in-process queue");
                Ok(Self::memory(queue))
            }
            QueueBackend::Redis => {
                let retry = RetryConfig::new("redis_connect")
                    .with_max_retries(5)
                    .with_base_delay(Duration::from_millis(250));
                let lanes = RouteTable::default().lanes();

                let broker = retry_async(&retry, || RedisBroker::connect(queue.clone(), &lanes))
                    .await?;
                let store = retry_async(&retry, || RedisJobStore::connect(queue))
                    .await?;
                info!("Connected to Redis queue at {}", queue.redis_url);
                Ok(Self {
                    broker: Arc::new(broker),
                    store: Arc::new(store),
                })
            }
        }
    }

    pub fn memory(queue: &QueueConfig) -> Self {
        Self {
            broker: Arc::new(MemoryBroker::new(queue.dedup_ttl)),
            store: Arc::new(MemoryJobStore::with_result_ttl(queue.result_ttl)),
        }
    }

    pub fn client(&self) -> JobClient {
        JobClient::new(
            Arc::clone(&self.broker),
            Arc::clone(&self.store),
            RouteTable::default(),
        )
    }
}

/// Registry with the three built-in handlers.
pub fn default_registry(
    config: &WorkerConfig,
    db: &DocumentDb,
    cache: &CacheService,
    index: Arc<dyn ChunkIndex>,
) -> HandlerRegistry {
    let search = DocumentSearch::new(Arc::clone(&index), cache.clone());
    HandlerRegistry::new()
        .register(Arc::new(ProcessDocumentHandler::new(
            db.clone(),
            DocumentProcessor::default(),
            search,
        )))
        .register(Arc::new(GenerateSummaryHandler::new(
            db.clone(),
            index,
            Arc::new(ExtractiveSummarizer::default()),
            cache.clone(),
        )
        .with_max_chunks(config.summary_max_chunks)))
        .register(Arc::new(CleanupHandler::new(
            RetentionSweeper::new(db.clone()),
            config.retention_days,
        )))
}

/// Process-local index used when no external index is wired in.
pub fn local_index() -> Arc<dyn ChunkIndex> {
    Arc::new(InMemoryChunkIndex::new())
}
