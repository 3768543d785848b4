//! Job lanes and job state for the document pipeline.
//!
//! This crate provides:
//! - Job enqueueing via Redis Streams, one stream per lane
//! - An in-process broker for single-node deployments and tests
//! - The durable job state store polled by callers
//! - Static handler-to-lane routing and the submission client

pub mod broker;
pub mod client;
pub mod config;
pub mod error;
pub mod job;
pub mod memory;
pub mod routes;
pub mod store;

pub use broker::{JobBroker, RedisBroker};
pub use client::{dedup_key_for, JobClient};
pub use config::QueueConfig;
pub use error::{QueueError, QueueResult};
pub use job::{handlers, lanes, Delivery, QueuedJob};
pub use memory::MemoryBroker;
pub use routes::RouteTable;
pub use store::{JobStore, MemoryJobStore, RedisJobStore};
