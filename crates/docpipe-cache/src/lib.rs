//! Result cache for derived query and summary payloads.
//!
//! This crate provides:
//! - A shared Redis backend with native TTL expiry
//! - A bounded in-process fallback used when Redis is unreachable
//! - Deterministic, namespace-prefixed cache keys
//!
//! Every operation is best-effort: backend errors are logged and reported
//! as a miss or a no-op, never returned to the caller.

pub mod config;
pub mod error;
pub mod key;
pub mod local;
pub mod service;
pub mod shared;

pub use config::CacheConfig;
pub use error::{CacheError, CacheResult};
pub use key::{derive_key, namespaces, search_key, summary_key};
pub use local::{EvictionPolicy, LocalCache};
pub use service::CacheService;
pub use shared::SharedCache;
