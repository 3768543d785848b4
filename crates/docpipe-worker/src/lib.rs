//! Document job worker.
//!
//! This crate provides:
//! - The handler interface, registry and per-job context
//! - `process_document`, `generate_summary` and `cleanup` handlers
//! - A worker pool with time limits, retirement and graceful shutdown
//! - The retention sweeper and the daily scheduler
//! - Upload intake feeding the pipeline

pub mod bootstrap;
pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod handler;
pub mod handlers;
pub mod intake;
pub mod logging;
pub mod metrics;
pub mod retry;
pub mod scheduler;
pub mod services;
pub mod sweeper;

pub use bootstrap::{default_registry, local_index, QueueBackends};
pub use config::{QueueBackend, WorkerConfig};
pub use context::JobContext;
pub use error::{WorkerError, WorkerResult};
pub use executor::{JobOutcome, ShutdownHandle, WorkerPool};
pub use handler::{parse_args, HandlerRegistry, JobHandler};
pub use intake::{AcceptedDocument, DocumentIntake};
pub use logging::{init_tracing, JobLogger};
pub use scheduler::{default_entries, DailyTrigger, ScheduleEntry, Scheduler};
pub use sweeper::{RetentionSweeper, SweepReport};
