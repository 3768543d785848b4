//! Job state store polled by callers.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use docpipe_models::{JobId, JobRecord};
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tracing::debug;

use crate::config::QueueConfig;
use crate::error::{QueueError, QueueResult};

/// Durable job records.
///
/// Once a stored record is terminal it is never overwritten.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create(&self, record: &JobRecord) -> QueueResult<()>;

    async fn get(&self, id: &JobId) -> QueueResult<Option<JobRecord>>;

    /// Write `record` unless the stored copy is already terminal.
    /// Returns whether the write was applied.
    async fn save(&self, record: &JobRecord) -> QueueResult<bool>;

    async fn remove(&self, id: &JobId) -> QueueResult<()>;
}

fn job_key(id: &JobId) -> String {
    format!("docpipe:job:{}", id)
}

const SAVE_UNLESS_TERMINAL: &str = r#"
local current = redis.call('GET', KEYS[1])
if current then
  local ok, decoded = pcall(cjson.decode, current)
  if ok and (decoded.state == 'SUCCESS' or decoded.state == 'FAILURE') then
    return 0
  end
end
redis.call('SET', KEYS[1], ARGV[1], 'EX', ARGV[2])
return 1
"#;

/// Job records as JSON strings with a result TTL.
pub struct RedisJobStore {
    conn: MultiplexedConnection,
    result_ttl: Duration,
    save_script: redis::Script,
}

impl RedisJobStore {
    pub async fn connect(config: &QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::connection_failed(e.to_string()))?;
        Ok(Self {
            conn,
            result_ttl: config.result_ttl,
            save_script: redis::Script::new(SAVE_UNLESS_TERMINAL),
        })
    }

    fn ttl_secs(&self) -> u64 {
        self.result_ttl.as_secs().max(1)
    }
}

#[async_trait]
impl JobStore for RedisJobStore {
    async fn create(&self, record: &JobRecord) -> QueueResult<()> {
        let mut conn = self.conn.clone();
        let payload = serde_json::to_string(record)?;
        conn.set_ex::<_, _, ()>(job_key(&record.id), payload, self.ttl_secs())
            .await?;
        Ok(())
    }

    async fn get(&self, id: &JobId) -> QueueResult<Option<JobRecord>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(job_key(id)).await?;
        match raw {
            Some(payload) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, record: &JobRecord) -> QueueResult<bool> {
        let mut conn = self.conn.clone();
        let payload = serde_json::to_string(record)?;
        let applied: i32 = self
            .save_script
            .key(job_key(&record.id))
            .arg(payload)
            .arg(self.ttl_secs())
            .invoke_async(&mut conn)
            .await?;
        if applied == 0 {
            debug!("Job {} already terminal, update dropped", record.id);
        }
        Ok(applied == 1)
    }

    async fn remove(&self, id: &JobId) -> QueueResult<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(job_key(id)).await?;
        Ok(())
    }
}

/// Stored copy plus the instant it stops being visible.
struct StoredRecord {
    record: JobRecord,
    expires_at: Instant,
}

/// In-process job records, expired after `result_ttl` like the Redis keys.
pub struct MemoryJobStore {
    records: Mutex<HashMap<JobId, StoredRecord>>,
    result_ttl: Duration,
}

impl Default for MemoryJobStore {
    fn default() -> Self {
        Self::with_result_ttl(QueueConfig::default().result_ttl)
    }
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_result_ttl(result_ttl: Duration) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            result_ttl,
        }
    }

    fn records(&self) -> MutexGuard<'_, HashMap<JobId, StoredRecord>> {
        self.records.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn insert(&self, records: &mut HashMap<JobId, StoredRecord>, record: &JobRecord) {
        let now = Instant::now();
        records.retain(|_, stored| stored.expires_at > now);
        records.insert(
            record.id.clone(),
            StoredRecord {
                record: record.clone(),
                expires_at: now + self.result_ttl,
            },
        );
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, record: &JobRecord) -> QueueResult<()> {
        let mut records = self.records();
        self.insert(&mut records, record);
        Ok(())
    }

    async fn get(&self, id: &JobId) -> QueueResult<Option<JobRecord>> {
        let now = Instant::now();
        Ok(self
            .records()
            .get(id)
            .filter(|stored| stored.expires_at > now)
            .map(|stored| stored.record.clone()))
    }

    async fn save(&self, record: &JobRecord) -> QueueResult<bool> {
        let mut records = self.records();
        let now = Instant::now();
        let terminal = records
            .get(&record.id)
            .is_some_and(|stored| stored.expires_at > now && stored.record.is_terminal());
        if terminal {
            debug!("Job {} already terminal, update dropped", record.id);
            return Ok(false);
        }
        self.insert(&mut records, record);
        Ok(true)
    }

    async fn remove(&self, id: &JobId) -> QueueResult<()> {
        self.records().remove(id);
        Ok(())
    }
}
