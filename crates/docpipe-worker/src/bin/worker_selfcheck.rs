use std::path::Path;

use docpipe_models::DocumentStatus;
use docpipe_queue::{QueueConfig, RedisJobStore};
use docpipe_store::DocumentDb;
use docpipe_worker::{QueueBackend, WorkerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = WorkerConfig::from_env();

    println!(
        "worker-selfcheck: starting with uploads_dir={} database={}",
        config.uploads_dir.display(),
        config.database_path.display()
    );
    ensure_writable_dir(&config.uploads_dir).await?;
    let db = DocumentDb::open(&config.database_path)
        .map_err(|e| anyhow::anyhow!("document database unusable: {}", e))?;
    report_backlog(&db)?;

    if config.queue_backend == QueueBackend::Redis {
        ensure_env_present(&["REDIS_URL"])?;
        RedisJobStore::connect(&QueueConfig::from_env())
            .await
            .map_err(|e| anyhow::anyhow!("redis not reachable: {}", e))?;
    }

    println!("worker-selfcheck: ok");
    Ok(())
}

/// Documents a fresh worker would find unfinished or awaiting the sweep.
fn report_backlog(db: &DocumentDb) -> anyhow::Result<()> {
    let session = db.session()?;
    for status in [
        DocumentStatus::Pending,
        DocumentStatus::Processing,
        DocumentStatus::Failed,
    ] {
        let records = session.list_by_status(status)?;
        println!("worker-selfcheck: {} {} documents", records.len(), status);
        if let Some(oldest) = records.first() {
            println!(
                "worker-selfcheck:   oldest {} uploaded {}",
                oldest.id, oldest.upload_time
            );
        }
    }
    Ok(())
}

async fn ensure_writable_dir(path: &Path) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(path).await?;
    let marker = path.join(".selfcheck");
    tokio::fs::write(&marker, b"ok")
        .await
        .map_err(|e| anyhow::anyhow!("{} not writable: {}", path.display(), e))?;
    tokio::fs::remove_file(&marker).await?;
    Ok(())
}

fn ensure_env_present(vars: &[&str]) -> anyhow::Result<()> {
    for var in vars {
        if std::env::var(var).is_err() {
            return Err(anyhow::anyhow!("missing required env var {}", var));
        }
    }
    Ok(())
}
