//! Cache service handed to every component that caches results.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::CacheConfig;
use crate::error::CacheResult;
use crate::local::{EvictionPolicy, LocalCache};
use crate::shared::SharedCache;

/// Metric recording cache lookups by backend and outcome.
pub const CACHE_REQUESTS_TOTAL: &str = "docpipe_cache_requests_total";

enum Backend {
    Shared(SharedCache),
    Local(LocalCache),
}

impl Backend {
    fn name(&self) -> &'static str {
        match self {
            Backend::Shared(_) => "redis",
            Backend::Local(_) => "local",
        }
    }
}

/// Best-effort key/value cache.
///
/// Cheap to clone; clones share the same backend.
#[derive(Clone)]
pub struct CacheService {
    backend: Arc<Backend>,
    default_ttl: Duration,
}

impl CacheService {
    /// Select a backend. Falls back to the local cache when Redis is
    /// disabled, unconfigured or unreachable; never fails.
    pub async fn connect(config: &CacheConfig) -> Self {
        let local = || {
            Backend::Local(LocalCache::new(config.max_local_entries, config.eviction))
        };

        let backend = match (&config.redis_url, config.use_redis) {
            (Some(url), true) => match SharedCache::connect(url, config.connect_timeout).await {
                Ok(shared) => {
                    info!("Redis cache connected");
                    Backend::Shared(shared)
                }
                Err(e) => {
                    warn!(
                        "Redis cache unavailable, using local cache ({} entries): {}",
                        config.max_local_entries, e
                    );
                    local()
                }
            },
            _ => {
                info!("Using local cache ({} entries)", config.max_local_entries);
                local()
            }
        };

        Self {
            backend: Arc::new(backend),
            default_ttl: config.default_ttl,
        }
    }

    /// Local-only cache.
    pub fn local(max_entries: usize, eviction: EvictionPolicy) -> Self {
        Self {
            backend: Arc::new(Backend::Local(LocalCache::new(max_entries, eviction))),
            default_ttl: CacheConfig::default().default_ttl,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Look up a value. Errors and undecodable payloads count as a miss.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let backend = self.backend.name();
        let raw = match self.get_raw(key).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key = %key, "Cache get failed: {}", e);
                counter!(CACHE_REQUESTS_TOTAL, "backend" => backend, "outcome" => "error").increment(1);
                return None;
            }
        };

        let Some(raw) = raw else {
            debug!(key = %key, "Cache MISS");
            counter!(CACHE_REQUESTS_TOTAL, "backend" => backend, "outcome" => "miss").increment(1);
            return None;
        };

        match serde_json::from_value(raw) {
            Ok(value) => {
                debug!(key = %key, "Cache HIT");
                counter!(CACHE_REQUESTS_TOTAL, "backend" => backend, "outcome" => "hit").increment(1);
                Some(value)
            }
            Err(e) => {
                warn!(key = %key, "Cached value has unexpected shape: {}", e);
                counter!(CACHE_REQUESTS_TOTAL, "backend" => backend, "outcome" => "error").increment(1);
                None
            }
        }
    }

    /// Store a value for `ttl`. Returns false if the write was dropped.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> bool {
        match self.set_raw(key, value, ttl).await {
            Ok(()) => true,
            Err(e) => {
                warn!(key = %key, "Cache set failed: {}", e);
                false
            }
        }
    }

    /// Remove a value. Returns true if something was removed.
    pub async fn delete(&self, key: &str) -> bool {
        let result = match self.backend.as_ref() {
            Backend::Shared(shared) => shared.delete(key).await,
            Backend::Local(local) => Ok(local.delete(key)),
        };
        result.unwrap_or_else(|e| {
            warn!(key = %key, "Cache delete failed: {}", e);
            false
        })
    }

    async fn get_raw(&self, key: &str) -> CacheResult<Option<serde_json::Value>> {
        match self.backend.as_ref() {
            Backend::Shared(shared) => shared.get(key).await,
            Backend::Local(local) => Ok(local.get(key)),
        }
    }

    async fn set_raw<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> CacheResult<()> {
        let value = serde_json::to_value(value)?;
        match self.backend.as_ref() {
            Backend::Shared(shared) => shared.set(key, &value, ttl).await,
            Backend::Local(local) => {
                if let Some(evicted) = local.set(key, value, ttl) {
                    debug!(evicted = %evicted, "Local cache full, evicted entry");
                }
                Ok(())
            }
        }
    }
}
