//! Scheduled retention sweep.

use std::sync::Arc;

use async_trait::async_trait;
use docpipe_queue::handlers;
use serde::Deserialize;

use crate::context::JobContext;
use crate::error::{WorkerError, WorkerResult};
use crate::handler::{parse_args, JobHandler};
use crate::sweeper::RetentionSweeper;

#[derive(Debug, Default, Deserialize)]
struct CleanupArgs {
    #[serde(default)]
    retention_days: Option<u32>,
}

pub struct CleanupHandler {
    sweeper: RetentionSweeper,
    retention_days: u32,
}

impl CleanupHandler {
    pub fn new(sweeper: RetentionSweeper, retention_days: u32) -> Self {
        Self {
            sweeper,
            retention_days,
        }
    }
}

#[async_trait]
impl JobHandler for CleanupHandler {
    fn name(&self) -> &'static str {
        handlers::CLEANUP
    }

    async fn run(
        &self,
        ctx: Arc<JobContext>,
        args: serde_json::Value,
    ) -> WorkerResult<serde_json::Value> {
        let args: CleanupArgs = if args.is_null() {
            CleanupArgs::default()
        } else {
            parse_args(args)?
        };
        let days = args.retention_days.unwrap_or(self.retention_days);

        ctx.report_progress("sweeping", 10).await?;
        let sweeper = self.sweeper.clone();
        let report = tokio::task::spawn_blocking(move || {
            sweeper.sweep(chrono::Duration::days(i64::from(days)))
        })
        .await
        .map_err(|e| WorkerError::job_failed(format!("sweep task failed: {}", e)))??;

        Ok(serde_json::to_value(report)?)
    }
}
