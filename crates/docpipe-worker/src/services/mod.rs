//! Downstream collaborators the handlers call: chunk index, summarizer and
//! cached search.

pub mod index;
pub mod search;
pub mod summarizer;

pub use index::{ChunkIndex, InMemoryChunkIndex, SearchHit};
pub use search::DocumentSearch;
pub use summarizer::{DocumentSummary, ExtractiveSummarizer, Summarizer};
