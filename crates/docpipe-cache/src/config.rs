//! Cache configuration.

use std::time::Duration;

use crate::local::EvictionPolicy;

/// Cache configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Redis URL for the shared backend
    pub redis_url: Option<String>,
    /// Try the shared backend at startup
    pub use_redis: bool,
    /// Give up on the shared backend after this long
    pub connect_timeout: Duration,
    /// Capacity of the local fallback
    pub max_local_entries: usize,
    /// Which entry the local fallback drops when full
    pub eviction: EvictionPolicy,
    /// TTL applied when a caller has no better choice
    pub default_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            use_redis: true,
            connect_timeout: Duration::from_secs(2),
            max_local_entries: 1000,
            eviction: EvictionPolicy::InsertionOrder,
            default_ttl: Duration::from_secs(3600),
        }
    }
}

impl CacheConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            redis_url: std::env::var("REDIS_URL").ok(),
            use_redis: std::env::var("USE_REDIS")
                .map(|v| v.to_lowercase() == "true" || v == "1")
                .unwrap_or(true),
            connect_timeout: Duration::from_millis(
                std::env::var("CACHE_CONNECT_TIMEOUT_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(2000),
            ),
            max_local_entries: std::env::var("CACHE_MAX_ENTRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1000),
            eviction: std::env::var("CACHE_EVICTION")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or_default(),
            default_ttl: Duration::from_secs(
                std::env::var("CACHE_DEFAULT_TTL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(3600),
            ),
        }
    }

    /// Local-only configuration.
    pub fn local(max_local_entries: usize) -> Self {
        Self {
            use_redis: false,
            max_local_entries,
            ..Default::default()
        }
    }
}
