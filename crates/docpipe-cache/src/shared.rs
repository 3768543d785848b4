//! Shared cache backed by Redis.

use std::time::Duration;

use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tracing::debug;

use crate::error::{CacheError, CacheResult};

/// Redis-backed cache. Values are stored as JSON text with a native TTL.
#[derive(Clone)]
pub struct SharedCache {
    conn: MultiplexedConnection,
}

impl SharedCache {
    /// Connect and verify the server answers `PING` within `timeout`.
    pub async fn connect(redis_url: &str, timeout: Duration) -> CacheResult<Self> {
        let client = redis::Client::open(redis_url)?;

        let connect = async {
            let mut conn = client.get_multiplexed_async_connection().await?;
            let _: String = redis::cmd("PING").query_async(&mut conn).await?;
            Ok::<_, CacheError>(conn)
        };

        let conn = tokio::time::timeout(timeout, connect)
            .await
            .map_err(|_| CacheError::connection_failed(format!("no answer within {:?}", timeout)))??;

        debug!("Connected to shared cache");
        Ok(Self { conn })
    }

    pub async fn get(&self, key: &str) -> CacheResult<Option<serde_json::Value>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(key).await?;
        match raw {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    pub async fn set(&self, key: &str, value: &serde_json::Value, ttl: Duration) -> CacheResult<()> {
        let mut conn = self.conn.clone();
        let payload = serde_json::to_string(value)?;
        // PSETEX rejects a zero expiry.
        let ttl_ms = (ttl.as_millis() as u64).max(1);
        conn.pset_ex::<_, _, ()>(key, payload, ttl_ms).await?;
        Ok(())
    }

    pub async fn delete(&self, key: &str) -> CacheResult<bool> {
        let mut conn = self.conn.clone();
        let removed: u64 = conn.del(key).await?;
        Ok(removed > 0)
    }
}
