//! Built-in job handlers.

mod cleanup;
mod generate_summary;
mod process_document;

pub use cleanup::CleanupHandler;
pub use generate_summary::GenerateSummaryHandler;
pub use process_document::{ProcessDocumentHandler, ProcessingResult};
