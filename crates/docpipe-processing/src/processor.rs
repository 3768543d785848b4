//! Extraction followed by chunking.

use std::path::Path;

use docpipe_models::{Chunk, DocumentMetadata, PageText};
use tracing::{info, warn};

use crate::error::{ChunkingError, ExtractionResult};
use crate::extractor::{extractor_for, TextExtractor};
use crate::splitter::RecursiveSplitter;

pub const DEFAULT_CHUNK_SIZE: usize = 1000;
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

/// Output of a successful run.
#[derive(Debug, Clone)]
pub struct ProcessedDocument {
    pub metadata: DocumentMetadata,
    pub full_text: String,
    pub pages: Vec<PageText>,
    pub chunks: Vec<Chunk>,
    pub chunk_count: usize,
}

/// Stateless pipeline: extract, then split into overlapping windows.
#[derive(Debug, Clone, Copy)]
pub struct DocumentProcessor {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl Default for DocumentProcessor {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE, DEFAULT_CHUNK_OVERLAP)
    }
}

impl DocumentProcessor {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            chunk_size,
            chunk_overlap,
        }
    }

    /// Process a stored file with the extractor matching its extension.
    pub fn process(&self, path: &Path) -> ExtractionResult<ProcessedDocument> {
        let extractor = extractor_for(path)?;
        self.process_with(extractor.as_ref(), path)
    }

    /// Process with an explicit extractor.
    ///
    /// An extraction error is returned as is and chunking never runs. A
    /// chunking error yields an empty chunk list.
    pub fn process_with(
        &self,
        extractor: &dyn TextExtractor,
        path: &Path,
    ) -> ExtractionResult<ProcessedDocument> {
        let extracted = extractor.extract(path)?;

        let chunks = self.chunk(&extracted.full_text).unwrap_or_else(|e| {
            warn!("Chunking {} produced no chunks: {}", path.display(), e);
            Vec::new()
        });

        info!(
            pages = extracted.metadata.pages,
            chunks = chunks.len(),
            "Processed {}",
            path.display()
        );

        Ok(ProcessedDocument {
            metadata: extracted.metadata,
            full_text: extracted.full_text,
            pages: extracted.pages,
            chunk_count: chunks.len(),
            chunks,
        })
    }

    /// Split text into chunks with content-derived ids.
    pub fn chunk(&self, text: &str) -> Result<Vec<Chunk>, ChunkingError> {
        let splitter = RecursiveSplitter::new(self.chunk_size, self.chunk_overlap)?;
        Ok(splitter
            .split(text)
            .into_iter()
            .enumerate()
            .map(|(index, content)| Chunk::new(content, index))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExtractionError;
    use crate::extractor::tests::build_pdf;
    use std::collections::HashSet;

    fn page_text(page: usize) -> String {
        (0..40)
            .map(|i| format!("Page {} sentence {} covers retention and chunking.", page, i))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn test_ten_page_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ten.pdf");
        let pages: Vec<String> = (1..=10).map(page_text).collect();
        std::fs::write(&path, build_pdf(&pages, None)).unwrap();

        let processed = DocumentProcessor::default().process(&path).unwrap();
        assert_eq!(processed.metadata.pages, 10);
        assert_eq!(processed.pages.len(), 10);
        assert!(!processed.chunks.is_empty());
        assert_eq!(processed.chunk_count, processed.chunks.len());

        let ids: HashSet<&str> = processed.chunks.iter().map(|c| c.chunk_id.as_str()).collect();
        assert_eq!(ids.len(), processed.chunks.len());
        assert!(processed.chunks.iter().all(|c| c.length <= DEFAULT_CHUNK_SIZE));
    }

    #[test]
    fn test_chunk_ids_are_reproducible() {
        let processor = DocumentProcessor::new(100, 20);
        let text = page_text(1);
        assert_eq!(processor.chunk(&text).unwrap(), processor.chunk(&text).unwrap());
    }

    #[test]
    fn test_extraction_failure_short_circuits() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corrupt.pdf");
        std::fs::write(&path, b"this is not a valid pdf file").unwrap();

        let err = DocumentProcessor::default().process(&path).unwrap_err();
        assert!(matches!(err, ExtractionError::Corrupt(_)));
        assert!(!err.to_string().is_empty());
    }

    #[test]
    fn test_bad_window_degrades_to_no_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "some text worth keeping").unwrap();

        let processed = DocumentProcessor::new(10, 10).process(&path).unwrap();
        assert_eq!(processed.chunk_count, 0);
        assert!(processed.chunks.is_empty());
        assert!(processed.full_text.contains("worth keeping"));
    }
}
