//! Document worker binary: worker pool plus the daily scheduler.

use std::net::SocketAddr;

use tracing::{error, info};

use docpipe_cache::{CacheConfig, CacheService};
use docpipe_queue::QueueConfig;
use docpipe_store::DocumentDb;
use docpipe_worker::{
    default_entries, default_registry, init_tracing, local_index, metrics, QueueBackends,
    Scheduler, WorkerConfig, WorkerPool,
};

#[tokio::main]
async fn main() {
    // Load environment variables
    dotenvy::dotenv().ok();
    init_tracing();

    info!("Starting docpipe-worker");

    let config = WorkerConfig::from_env();
    let queue_config = QueueConfig::from_env();
    info!("Worker config: {:?}", config);

    let metrics_addr = std::env::var("METRICS_ADDR")
        .ok()
        .and_then(|s| s.parse::<SocketAddr>().ok());
    if let Err(e) = metrics::init_metrics(metrics_addr) {
        error!("Failed to start metrics exporter: {}", e);
        std::process::exit(1);
    }

    let db = match DocumentDb::open(&config.database_path) {
        Ok(db) => db,
        Err(e) => {
            error!("Failed to open document database: {}", e);
            std::process::exit(1);
        }
    };

    let backends = match QueueBackends::connect(&config, &queue_config).await {
        Ok(backends) => backends,
        Err(e) => {
            error!("Failed to connect job queue: {}", e);
            std::process::exit(1);
        }
    };

    let cache = CacheService::connect(&CacheConfig::from_env()).await;
    let registry = default_registry(&config, &db, &cache, local_index());

    let pool = WorkerPool::new(
        config.clone(),
        backends.broker.clone(),
        backends.store.clone(),
        registry,
    );
    info!("Worker pool {} created", pool.pool_id());
    let shutdown = pool.shutdown_handle();

    let scheduler_task = if config.scheduler_enabled {
        let entries = match default_entries(&config) {
            Ok(entries) => entries,
            Err(e) => {
                error!("Invalid schedule: {}", e);
                std::process::exit(1);
            }
        };
        let scheduler = Scheduler::new(backends.client(), entries);
        let rx = shutdown.subscribe();
        Some(tokio::spawn(async move { scheduler.run(rx).await }))
    } else {
        None
    };

    // Setup signal handlers
    let signal_task = tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            tokio::signal::ctrl_c().await.ok();
            info!("Received shutdown signal");
            shutdown.shutdown();
        }
    });

    if let Err(e) = pool.run().await {
        error!("Worker pool error: {}", e);
        std::process::exit(1);
    }

    signal_task.abort();
    if let Some(task) = scheduler_task {
        task.await.ok();
    }

    info!("Worker shutdown complete");
}
