//! Upload a document (or trigger a job) and poll it to completion.
//!
//! ```text
//! docpipe-submit <file.pdf>
//! docpipe-submit --summary <document_id> [focus query...]
//! docpipe-submit --cleanup [retention_days]
//! ```

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context};
use serde_json::json;

use docpipe_models::JobId;
use docpipe_queue::{handlers, JobClient, QueueConfig};
use docpipe_store::DocumentDb;
use docpipe_worker::{init_tracing, DocumentIntake, QueueBackend, QueueBackends, WorkerConfig};

const POLL_INTERVAL: Duration = Duration::from_millis(500);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let config = WorkerConfig::from_env();
    if config.queue_backend != QueueBackend::Redis {
        bail!("docpipe-submit talks to running workers and needs QUEUE_BACKEND=redis");
    }
    let backends = QueueBackends::connect(&config, &QueueConfig::from_env())
        .await
        .context("connecting to the job queue")?;
    let client = backends.client();

    let job_id = match args.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
        ["--summary", document_id] => {
            client
                .submit(handlers::GENERATE_SUMMARY, json!({ "document_id": document_id }))
                .await?
        }
        ["--summary", document_id, focus @ ..] => {
            let job_args = json!({ "document_id": document_id, "focus": focus.join(" ") });
            client.submit(handlers::GENERATE_SUMMARY, job_args).await?
        }
        ["--cleanup"] => client.submit(handlers::CLEANUP, json!(null)).await?,
        ["--cleanup", days] => {
            let days: u32 = days.parse().context("retention_days must be a number")?;
            client
                .submit(handlers::CLEANUP, json!({ "retention_days": days }))
                .await?
        }
        [file] if !file.starts_with("--") => upload(&config, client.clone(), file).await?,
        _ => bail!(
            "usage: docpipe-submit <file.pdf> | --summary <document_id> [focus] | --cleanup [days]"
        ),
    };

    println!("submitted job {}", job_id);
    poll(&client, &job_id).await
}

async fn upload(config: &WorkerConfig, client: JobClient, file: &str) -> anyhow::Result<JobId> {
    let path = Path::new(file);
    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .context("file name is not valid UTF-8")?;
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading {}", file))?;

    let db = DocumentDb::open(&config.database_path)?;
    let intake = DocumentIntake::new(db, client, &config.uploads_dir, config.max_upload_bytes);
    let accepted = intake.accept(filename, &bytes).await?;
    println!("accepted document {}", accepted.document_id);
    Ok(accepted.job_id)
}

async fn poll(client: &JobClient, job_id: &JobId) -> anyhow::Result<()> {
    let mut last_step = None;
    loop {
        let status = client.get_status(job_id).await?;
        if status.state.is_terminal() {
            println!("{}", serde_json::to_string_pretty(&status)?);
            return Ok(());
        }
        if let Some(progress) = &status.progress {
            if last_step.as_ref() != Some(&progress.step) {
                println!("{} {}%", progress.step, progress.percent);
                last_step = Some(progress.step.clone());
            }
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}
