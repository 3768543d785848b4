//! Document record persistence.
//!
//! Every job opens its own [`DocumentSession`] from the shared
//! [`DocumentDb`]; the connection is closed when the session is dropped.

mod db;
mod documents;
mod migrations;
pub mod error;
pub mod paths;

pub use db::{DocumentDb, DocumentSession, DocumentTransaction};
pub use error::{StoreError, StoreResult};
pub use paths::stored_path;
