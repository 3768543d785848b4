//! Summaries over indexed chunks.

use async_trait::async_trait;
use docpipe_models::{Chunk, DocumentId};
use serde::{Deserialize, Serialize};

use crate::error::{WorkerError, WorkerResult};

/// Result of the `generate_summary` job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub document_id: DocumentId,
    pub summary: String,
    pub key_points: Vec<String>,
    /// Chunks the summary was built from
    pub source_chunks: usize,
    /// Served from the summary cache
    #[serde(default)]
    pub cached: bool,
}

#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(
        &self,
        document_id: &DocumentId,
        chunks: &[Chunk],
    ) -> WorkerResult<DocumentSummary>;
}

/// Builds a summary from the leading sentences of a document.
#[derive(Debug, Clone)]
pub struct ExtractiveSummarizer {
    summary_sentences: usize,
    max_key_points: usize,
}

impl Default for ExtractiveSummarizer {
    fn default() -> Self {
        Self {
            summary_sentences: 3,
            max_key_points: 5,
        }
    }
}

impl ExtractiveSummarizer {
    pub fn new(summary_sentences: usize, max_key_points: usize) -> Self {
        Self {
            summary_sentences,
            max_key_points,
        }
    }
}

fn is_page_marker(line: &str) -> bool {
    line.starts_with("--- Page ") && line.ends_with(" ---")
}

/// Sentences in document order, page markers and overlap repeats dropped.
fn sentences(chunks: &[Chunk]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();

    for chunk in chunks {
        for line in chunk.content.lines().map(str::trim) {
            if line.is_empty() || is_page_marker(line) {
                continue;
            }
            for sentence in line.split_inclusive(". ") {
                let sentence = sentence.trim();
                if sentence.len() < 3 {
                    continue;
                }
                if seen.insert(sentence.to_string()) {
                    out.push(sentence.to_string());
                }
            }
        }
    }
    out
}

#[async_trait]
impl Summarizer for ExtractiveSummarizer {
    async fn summarize(
        &self,
        document_id: &DocumentId,
        chunks: &[Chunk],
    ) -> WorkerResult<DocumentSummary> {
        let sentences = sentences(chunks);
        if sentences.is_empty() {
            return Err(WorkerError::service_failed(format!(
                "no text indexed for document {}",
                document_id
            )));
        }

        let split = self.summary_sentences.min(sentences.len());
        let summary = sentences[..split].join(" ");
        let key_points = sentences[split..]
            .iter()
            .take(self.max_key_points)
            .cloned()
            .collect();

        Ok(DocumentSummary {
            document_id: document_id.clone(),
            summary,
            key_points,
            source_chunks: chunks.len(),
            cached: false,
        })
    }
}
