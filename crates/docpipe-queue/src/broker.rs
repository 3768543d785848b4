//! Broker interface and the Redis Streams implementation.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::streams::{StreamClaimReply, StreamId, StreamPendingCountReply, StreamReadReply};
use redis::AsyncCommands;
use tracing::{debug, info, warn};

use crate::config::QueueConfig;
use crate::error::{QueueError, QueueResult};
use crate::job::{Delivery, QueuedJob};

/// Moves job messages between submitters and worker units.
///
/// Delivery is at-least-once: a consumed message stays pending until acked
/// and can be reclaimed by another consumer after it goes stale.
#[async_trait]
pub trait JobBroker: Send + Sync {
    /// Append a job to its lane. Fails with [`QueueError::Duplicate`] when
    /// the job's dedup key is already held.
    async fn enqueue(&self, job: &QueuedJob) -> QueueResult<String>;

    /// Take at most one message from `lane`, waiting up to `block`.
    async fn consume(
        &self,
        lane: &str,
        consumer: &str,
        block: Duration,
    ) -> QueueResult<Option<Delivery>>;

    /// Acknowledge and drop a message.
    async fn ack(&self, lane: &str, message_id: &str) -> QueueResult<()>;

    /// Take over messages another consumer left pending for `min_idle`.
    async fn claim_stale(
        &self,
        lane: &str,
        consumer: &str,
        min_idle: Duration,
    ) -> QueueResult<Vec<Delivery>>;

    /// Free a dedup key so the target can be submitted again.
    async fn release_dedup(&self, key: &str) -> QueueResult<()>;
}

fn dedup_redis_key(key: &str) -> String {
    format!("docpipe:dedup:{}", key)
}

/// Redis Streams broker: one stream per lane, one shared consumer group.
pub struct RedisBroker {
    client: redis::Client,
    conn: MultiplexedConnection,
    config: QueueConfig,
}

impl RedisBroker {
    /// Connect and create the consumer group for every lane.
    pub async fn connect(config: QueueConfig, lanes: &[String]) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::connection_failed(e.to_string()))?;

        let broker = Self {
            client,
            conn,
            config,
        };
        for lane in lanes {
            broker.init_lane(lane).await?;
        }
        Ok(broker)
    }

    /// Create the consumer group for a lane (ignore error if it exists).
    ///
    /// The group starts at the beginning of the stream so messages enqueued
    /// before the first worker came up are not skipped.
    async fn init_lane(&self, lane: &str) -> QueueResult<()> {
        let mut conn = self.conn.clone();
        let stream = self.config.stream_key(lane);

        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&stream)
            .arg(&self.config.consumer_group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => info!("Created consumer group {} on {}", self.config.consumer_group, stream),
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!("Consumer group already exists on {}", stream);
            }
            Err(e) => return Err(QueueError::Redis(e)),
        }
        Ok(())
    }

    /// Get lane length.
    pub async fn len(&self, lane: &str) -> QueueResult<u64> {
        let mut conn = self.conn.clone();
        let len: u64 = conn.xlen(self.config.stream_key(lane)).await?;
        Ok(len)
    }

    /// Turn a stream entry into a delivery. Malformed payloads are acked
    /// so they are not redelivered forever.
    async fn decode(&self, lane: &str, entry: &StreamId) -> Option<Delivery> {
        let parsed = entry
            .get::<String>("job")
            .ok_or_else(|| "missing job field".to_string())
            .and_then(|payload| {
                serde_json::from_str::<QueuedJob>(&payload).map_err(|e| e.to_string())
            });

        match parsed {
            Ok(job) => Some(Delivery {
                message_id: entry.id.clone(),
                lane: lane.to_string(),
                job,
            }),
            Err(e) => {
                warn!("Dropping malformed message {} on {}: {}", entry.id, lane, e);
                if let Err(e) = self.ack(lane, &entry.id).await {
                    warn!("Failed to ack malformed message {}: {}", entry.id, e);
                }
                None
            }
        }
    }
}

#[async_trait]
impl JobBroker for RedisBroker {
    async fn enqueue(&self, job: &QueuedJob) -> QueueResult<String> {
        let mut conn = self.conn.clone();
        let payload = serde_json::to_string(job)?;

        if let Some(key) = &job.dedup_key {
            let reserved: Option<String> = redis::cmd("SET")
                .arg(dedup_redis_key(key))
                .arg(job.job_id.as_str())
                .arg("NX")
                .arg("EX")
                .arg(self.config.dedup_ttl.as_secs().max(1))
                .query_async(&mut conn)
                .await?;
            if reserved.is_none() {
                warn!("Duplicate job rejected: {}", key);
                return Err(QueueError::Duplicate(key.clone()));
            }
        }

        let added: Result<String, redis::RedisError> = redis::cmd("XADD")
            .arg(self.config.stream_key(&job.queue))
            .arg("*")
            .arg("job")
            .arg(&payload)
            .query_async(&mut conn)
            .await;

        let message_id = match added {
            Ok(id) => id,
            Err(e) => {
                if let Some(key) = &job.dedup_key {
                    self.release_dedup(key).await.ok();
                }
                return Err(QueueError::enqueue_failed(e.to_string()));
            }
        };

        info!(
            "Enqueued job {} on {} with message ID {}",
            job.job_id, job.queue, message_id
        );
        Ok(message_id)
    }

    async fn consume(
        &self,
        lane: &str,
        consumer: &str,
        block: Duration,
    ) -> QueueResult<Option<Delivery>> {
        // Blocking reads get their own connection so they do not stall the
        // shared multiplexed one.
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let reply: Option<StreamReadReply> = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(consumer)
            .arg("COUNT")
            .arg(1)
            .arg("BLOCK")
            .arg((block.as_millis() as u64).max(1))
            .arg("STREAMS")
            .arg(self.config.stream_key(lane))
            .arg(">")
            .query_async(&mut conn)
            .await?;

        let Some(reply) = reply else {
            return Ok(None);
        };

        for stream_key in reply.keys {
            for entry in stream_key.ids {
                if let Some(delivery) = self.decode(lane, &entry).await {
                    debug!("Consumed job {} from {}", delivery.job.job_id, lane);
                    return Ok(Some(delivery));
                }
            }
        }
        Ok(None)
    }

    async fn ack(&self, lane: &str, message_id: &str) -> QueueResult<()> {
        let mut conn = self.conn.clone();
        let stream = self.config.stream_key(lane);

        redis::cmd("XACK")
            .arg(&stream)
            .arg(&self.config.consumer_group)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        redis::cmd("XDEL")
            .arg(&stream)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        debug!("Acknowledged message {} on {}", message_id, lane);
        Ok(())
    }

    async fn claim_stale(
        &self,
        lane: &str,
        consumer: &str,
        min_idle: Duration,
    ) -> QueueResult<Vec<Delivery>> {
        let mut conn = self.conn.clone();
        let stream = self.config.stream_key(lane);
        let min_idle_ms = min_idle.as_millis() as u64;

        let pending: StreamPendingCountReply = redis::cmd("XPENDING")
            .arg(&stream)
            .arg(&self.config.consumer_group)
            .arg("-")
            .arg("+")
            .arg(self.config.claim_batch)
            .query_async(&mut conn)
            .await?;

        let stale: Vec<String> = pending
            .ids
            .into_iter()
            .filter(|p| p.last_delivered_ms as u64 >= min_idle_ms)
            .map(|p| p.id)
            .collect();

        if stale.is_empty() {
            return Ok(Vec::new());
        }

        // XCLAIM re-checks idle time, so a message acked or claimed in the
        // meantime is skipped.
        let claimed: StreamClaimReply = redis::cmd("XCLAIM")
            .arg(&stream)
            .arg(&self.config.consumer_group)
            .arg(consumer)
            .arg(min_idle_ms)
            .arg(&stale)
            .query_async(&mut conn)
            .await?;

        let mut deliveries = Vec::new();
        for entry in claimed.ids {
            if let Some(delivery) = self.decode(lane, &entry).await {
                info!("Claimed stale job {} from {}", delivery.job.job_id, lane);
                deliveries.push(delivery);
            }
        }
        Ok(deliveries)
    }

    async fn release_dedup(&self, key: &str) -> QueueResult<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(dedup_redis_key(key)).await?;
        debug!("Released dedup key {}", key);
        Ok(())
    }
}
