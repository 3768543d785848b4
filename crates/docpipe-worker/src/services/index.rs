//! Chunk index.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;
use docpipe_models::{Chunk, DocumentId};
use serde::{Deserialize, Serialize};

use crate::error::WorkerResult;

/// One scored chunk returned by a search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub chunk_id: String,
    pub content: String,
    pub index: usize,
    pub score: f32,
}

/// Where processed chunks go to be searched.
#[async_trait]
pub trait ChunkIndex: Send + Sync {
    /// Replace the chunks stored for a document.
    async fn add_chunks(&self, document_id: &DocumentId, chunks: &[Chunk]) -> WorkerResult<()>;

    /// Best `k` chunks for `query`, highest score first.
    async fn search(
        &self,
        document_id: &DocumentId,
        query: &str,
        k: usize,
    ) -> WorkerResult<Vec<SearchHit>>;

    /// Leading chunks in document order.
    async fn chunks(&self, document_id: &DocumentId, limit: usize) -> WorkerResult<Vec<Chunk>>;

    async fn remove(&self, document_id: &DocumentId) -> WorkerResult<()>;
}

/// Process-local index scoring chunks by query-term overlap.
#[derive(Debug, Default)]
pub struct InMemoryChunkIndex {
    documents: RwLock<HashMap<DocumentId, Vec<Chunk>>>,
}

impl InMemoryChunkIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn chunk_count(&self, document_id: &DocumentId) -> usize {
        self.documents
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(document_id)
            .map_or(0, Vec::len)
    }
}

fn terms(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 1)
        .map(str::to_lowercase)
        .collect()
}

/// Fraction of query terms present in the chunk.
fn overlap_score(query_terms: &HashSet<String>, content: &str) -> f32 {
    if query_terms.is_empty() {
        return 0.0;
    }
    let chunk_terms = terms(content);
    let matched = query_terms.iter().filter(|t| chunk_terms.contains(*t)).count();
    matched as f32 / query_terms.len() as f32
}

#[async_trait]
impl ChunkIndex for InMemoryChunkIndex {
    async fn add_chunks(&self, document_id: &DocumentId, chunks: &[Chunk]) -> WorkerResult<()> {
        self.documents
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(document_id.clone(), chunks.to_vec());
        Ok(())
    }

    async fn search(
        &self,
        document_id: &DocumentId,
        query: &str,
        k: usize,
    ) -> WorkerResult<Vec<SearchHit>> {
        let query_terms = terms(query);
        let documents = self
            .documents
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut hits: Vec<SearchHit> = documents
            .get(document_id)
            .into_iter()
            .flatten()
            .map(|chunk| SearchHit {
                chunk_id: chunk.chunk_id.clone(),
                content: chunk.content.clone(),
                index: chunk.index,
                score: overlap_score(&query_terms, &chunk.content),
            })
            .filter(|hit| hit.score > 0.0)
            .collect();

        // Ties keep document order.
        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.index.cmp(&b.index)));
        hits.truncate(k);
        Ok(hits)
    }

    async fn chunks(&self, document_id: &DocumentId, limit: usize) -> WorkerResult<Vec<Chunk>> {
        let documents = self
            .documents
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(documents
            .get(document_id)
            .map(|chunks| chunks.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn remove(&self, document_id: &DocumentId) -> WorkerResult<()> {
        self.documents
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(document_id);
        Ok(())
    }
}
