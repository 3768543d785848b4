//! Calendar scheduler for periodic jobs.

use chrono::{DateTime, Duration, NaiveTime, Utc};
use docpipe_queue::{handlers, JobClient, QueueError};
use serde_json::json;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};

/// Name of the built-in retention entry.
pub const CLEANUP_ENTRY: &str = "cleanup-failed-documents";

/// Fires once a day at a fixed UTC time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailyTrigger {
    time: NaiveTime,
}

impl DailyTrigger {
    pub fn new(hour: u32, minute: u32) -> WorkerResult<Self> {
        let time = NaiveTime::from_hms_opt(hour, minute, 0).ok_or_else(|| {
            WorkerError::config_error(format!("invalid daily time {:02}:{:02}", hour, minute))
        })?;
        Ok(Self { time })
    }

    /// First fire time strictly after `now`.
    pub fn next_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let today = now.date_naive().and_time(self.time).and_utc();
        if today > now {
            today
        } else {
            today + Duration::days(1)
        }
    }
}

/// One periodic job.
#[derive(Debug, Clone)]
pub struct ScheduleEntry {
    pub name: String,
    pub trigger: DailyTrigger,
    pub handler: String,
    pub args: serde_json::Value,
}

impl ScheduleEntry {
    pub fn new(
        name: impl Into<String>,
        trigger: DailyTrigger,
        handler: impl Into<String>,
        args: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            trigger,
            handler: handler.into(),
            args,
        }
    }
}

/// Entries every deployment runs.
pub fn default_entries(config: &WorkerConfig) -> WorkerResult<Vec<ScheduleEntry>> {
    let trigger = DailyTrigger::new(config.cleanup_hour, config.cleanup_minute)?;
    Ok(vec![ScheduleEntry::new(
        CLEANUP_ENTRY,
        trigger,
        handlers::CLEANUP,
        json!({ "retention_days": config.retention_days }),
    )])
}

pub struct Scheduler {
    client: JobClient,
    entries: Vec<ScheduleEntry>,
}

impl Scheduler {
    pub fn new(client: JobClient, entries: Vec<ScheduleEntry>) -> Self {
        Self { client, entries }
    }

    pub fn entries(&self) -> &[ScheduleEntry] {
        &self.entries
    }

    /// Earliest fire time after `now` and the entries due then.
    pub fn next_due(&self, now: DateTime<Utc>) -> Option<(DateTime<Utc>, Vec<&ScheduleEntry>)> {
        let due = self
            .entries
            .iter()
            .map(|entry| entry.trigger.next_after(now))
            .min()?;
        let entries = self
            .entries
            .iter()
            .filter(|entry| entry.trigger.next_after(now) == due)
            .collect();
        Some((due, entries))
    }

    /// Submit one entry. A run still in flight is not an error.
    pub async fn fire(&self, entry: &ScheduleEntry) {
        match self.client.submit(&entry.handler, entry.args.clone()).await {
            Ok(job_id) => info!(
                entry = %entry.name,
                job_id = %job_id,
                "Submitted scheduled job"
            ),
            Err(QueueError::Duplicate(key)) => warn!(
                entry = %entry.name,
                "Previous run still in flight ({}), skipping", key
            ),
            Err(e) => error!(entry = %entry.name, "Failed to submit scheduled job: {}", e),
        }
    }

    /// Sleep until entries are due and submit them, until shutdown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut last_fired: Option<DateTime<Utc>> = None;

        loop {
            // Never fire the same slot twice, even if the wall clock lags
            // the timer slightly.
            let now = match last_fired {
                Some(fired) => Utc::now().max(fired),
                None => Utc::now(),
            };
            let Some((due, entries)) = self.next_due(now) else {
                info!("No scheduled entries");
                return;
            };
            info!(
                entries = entries.len(),
                "Next scheduled run at {}",
                due.to_rfc3339()
            );

            let wait = (due - Utc::now()).to_std().unwrap_or_default();
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Scheduler stopping");
                        return;
                    }
                    continue;
                }
            }

            for entry in entries {
                self.fire(entry).await;
            }
            last_fired = Some(due);
        }
    }
}
