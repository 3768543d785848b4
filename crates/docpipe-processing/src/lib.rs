//! Document processing pipeline.
//!
//! Extraction then chunking, composed by [`DocumentProcessor`]. Extraction
//! failures come back as [`ExtractionError`] values and short-circuit
//! chunking; a chunking failure degrades to an empty chunk list.

pub mod error;
pub mod extractor;
pub mod processor;
pub mod splitter;

pub use error::{ChunkingError, ExtractionError, ExtractionResult};
pub use extractor::{extractor_for, ExtractedDocument, PdfExtractor, PlainTextExtractor, TextExtractor};
pub use processor::{DocumentProcessor, ProcessedDocument, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};
pub use splitter::RecursiveSplitter;
