//! Search with a result cache in front of the index.

use std::sync::Arc;
use std::time::Duration;

use docpipe_cache::{search_key, summary_key, CacheService};
use docpipe_models::DocumentId;
use tracing::debug;

use crate::error::WorkerResult;
use crate::services::index::{ChunkIndex, SearchHit};

#[derive(Clone)]
pub struct DocumentSearch {
    index: Arc<dyn ChunkIndex>,
    cache: CacheService,
    ttl: Duration,
}

impl DocumentSearch {
    pub fn new(index: Arc<dyn ChunkIndex>, cache: CacheService) -> Self {
        let ttl = cache.default_ttl();
        Self { index, cache, ttl }
    }

    pub fn index(&self) -> &Arc<dyn ChunkIndex> {
        &self.index
    }

    /// Top `k` hits for `query`. Cached hits are returned without touching
    /// the index; a cache outage only costs the lookup.
    pub async fn search(
        &self,
        document_id: &DocumentId,
        query: &str,
        k: usize,
    ) -> WorkerResult<Vec<SearchHit>> {
        let key = search_key(document_id.as_str(), query, k);
        if let Some(hits) = self.cache.get::<Vec<SearchHit>>(&key).await {
            debug!(document_id = %document_id, "Search served from cache");
            return Ok(hits);
        }

        let hits = self.index.search(document_id, query, k).await?;
        self.cache.set(&key, &hits, self.ttl).await;
        Ok(hits)
    }

    /// Drop the cached summary for a document.
    pub async fn invalidate_summary(&self, document_id: &DocumentId) -> bool {
        self.cache.delete(&summary_key(document_id.as_str())).await
    }
}
