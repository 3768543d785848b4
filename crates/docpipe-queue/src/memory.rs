//! In-process broker.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::broker::JobBroker;
use crate::error::{QueueError, QueueResult};
use crate::job::{Delivery, QueuedJob};

/// A message consumed but not yet acked.
struct InFlight {
    lane: String,
    job: QueuedJob,
    since: Instant,
}

#[derive(Default)]
struct MemoryState {
    lanes: HashMap<String, VecDeque<(String, QueuedJob)>>,
    /// keyed by message id
    in_flight: HashMap<String, InFlight>,
    /// dedup key -> expiry
    dedup: HashMap<String, Instant>,
    next_id: u64,
}

/// FIFO lanes held in memory, shared by every worker unit in the process.
///
/// Nothing survives a restart. Within the process, deliveries left unacked
/// for longer than `min_idle` are handed out again by `claim_stale`.
pub struct MemoryBroker {
    state: Mutex<MemoryState>,
    notify: Notify,
    dedup_ttl: Duration,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new(Duration::from_secs(2100))
    }
}

impl MemoryBroker {
    pub fn new(dedup_ttl: Duration) -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            notify: Notify::new(),
            dedup_ttl,
        }
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Messages waiting on a lane.
    pub fn len(&self, lane: &str) -> usize {
        self.state().lanes.get(lane).map_or(0, VecDeque::len)
    }

    /// Messages consumed but not acked.
    pub fn in_flight(&self) -> usize {
        self.state().in_flight.len()
    }

    fn try_pop(&self, lane: &str) -> Option<Delivery> {
        let mut state = self.state();
        let (message_id, job) = state.lanes.get_mut(lane)?.pop_front()?;
        state.in_flight.insert(
            message_id.clone(),
            InFlight {
                lane: lane.to_string(),
                job: job.clone(),
                since: Instant::now(),
            },
        );
        Some(Delivery {
            message_id,
            lane: lane.to_string(),
            job,
        })
    }
}

#[async_trait]
impl JobBroker for MemoryBroker {
    async fn enqueue(&self, job: &QueuedJob) -> QueueResult<String> {
        let message_id = {
            let mut state = self.state();
            let now = Instant::now();

            if let Some(key) = &job.dedup_key {
                match state.dedup.get(key) {
                    Some(expires_at) if *expires_at > now => {
                        warn!("Duplicate job rejected: {}", key);
                        return Err(QueueError::Duplicate(key.clone()));
                    }
                    _ => {
                        state.dedup.insert(key.clone(), now + self.dedup_ttl);
                    }
                }
            }

            state.next_id += 1;
            let message_id = format!("{}-0", state.next_id);
            state
                .lanes
                .entry(job.queue.clone())
                .or_default()
                .push_back((message_id.clone(), job.clone()));
            message_id
        };

        self.notify.notify_waiters();
        debug!("Enqueued job {} on {} as {}", job.job_id, job.queue, message_id);
        Ok(message_id)
    }

    async fn consume(
        &self,
        lane: &str,
        _consumer: &str,
        block: Duration,
    ) -> QueueResult<Option<Delivery>> {
        let deadline = tokio::time::Instant::now() + block;
        loop {
            // Register interest before checking so an enqueue between the
            // check and the wait is not missed.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(delivery) = self.try_pop(lane) {
                return Ok(Some(delivery));
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn ack(&self, _lane: &str, message_id: &str) -> QueueResult<()> {
        self.state().in_flight.remove(message_id);
        Ok(())
    }

    async fn claim_stale(
        &self,
        lane: &str,
        consumer: &str,
        min_idle: Duration,
    ) -> QueueResult<Vec<Delivery>> {
        let mut state = self.state();
        let now = Instant::now();
        let claimed: Vec<Delivery> = state
            .in_flight
            .iter_mut()
            .filter(|(_, entry)| {
                entry.lane == lane && now.duration_since(entry.since) >= min_idle
            })
            .map(|(message_id, entry)| {
                entry.since = now;
                Delivery {
                    message_id: message_id.clone(),
                    lane: entry.lane.clone(),
                    job: entry.job.clone(),
                }
            })
            .collect();
        if !claimed.is_empty() {
            debug!("{} claimed {} stale deliveries on {}", consumer, claimed.len(), lane);
        }
        Ok(claimed)
    }

    async fn release_dedup(&self, key: &str) -> QueueResult<()> {
        self.state().dedup.remove(key);
        Ok(())
    }
}
