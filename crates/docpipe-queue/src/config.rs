//! Queue configuration.

use std::time::Duration;

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis URL
    pub redis_url: String,
    /// Stream name prefix; each lane is `{prefix}:{lane}`
    pub stream_prefix: String,
    /// Consumer group shared by every worker unit
    pub consumer_group: String,
    /// How long finished job records stay pollable
    pub result_ttl: Duration,
    /// Upper bound on how long a dedup key can block resubmission
    pub dedup_ttl: Duration,
    /// Max stale messages reclaimed per pass
    pub claim_batch: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            stream_prefix: "docpipe:queue".to_string(),
            consumer_group: "docpipe:workers".to_string(),
            result_ttl: Duration::from_secs(86400), // 24 hours
            dedup_ttl: Duration::from_secs(2100),   // job timeout + 5 minutes
            claim_batch: 10,
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            stream_prefix: std::env::var("QUEUE_STREAM_PREFIX").unwrap_or(defaults.stream_prefix),
            consumer_group: std::env::var("QUEUE_CONSUMER_GROUP")
                .unwrap_or(defaults.consumer_group),
            result_ttl: std::env::var("JOB_RESULT_TTL")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.result_ttl),
            dedup_ttl: std::env::var("DEDUP_TTL")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.dedup_ttl),
            claim_batch: std::env::var("QUEUE_CLAIM_BATCH")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.claim_batch),
        }
    }

    /// Stream key for a lane.
    pub fn stream_key(&self, lane: &str) -> String {
        format!("{}:{}", self.stream_prefix, lane)
    }
}
