// ============================================
// Retrieval Seams
// ============================================
//
// The vector index and the embedding provider are external collaborators.
// The pipeline only depends on these two capabilities; their internals (ANN
// construction, model hosting) live elsewhere.

use crate::models::{Candidate, SearchFilters};
use async_trait::async_trait;

/// Turns query text into the catalog's embedding space.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>>;
}

/// Approximate nearest-neighbour retrieval over the catalog.
///
/// Returns at most `k` candidates sorted by ascending cosine distance
/// (distance in [0, 2]), honouring the categorical and bpm filters.
#[async_trait]
pub trait VectorRetriever: Send + Sync {
    async fn retrieve(
        &self,
        query_embedding: &[f32],
        k: usize,
        filters: &SearchFilters,
    ) -> anyhow::Result<Vec<Candidate>>;
}

/// Filter predicate shared by in-process retriever implementations.
pub fn matches_filters(candidate: &Candidate, filters: &SearchFilters) -> bool {
    let item = &candidate.item;
    if let Some(genre) = &filters.genre {
        if item.genre.as_deref() != Some(genre.as_str()) {
            return false;
        }
    }
    if let Some(mood) = &filters.mood {
        if item.mood.as_deref() != Some(mood.as_str()) {
            return false;
        }
    }
    if let Some(format) = &filters.format {
        if item.format.as_deref() != Some(format.as_str()) {
            return false;
        }
    }
    if let Some(bpm_min) = filters.bpm_min {
        if item.bpm.map_or(true, |bpm| bpm < bpm_min) {
            return false;
        }
    }
    if let Some(bpm_max) = filters.bpm_max {
        if item.bpm.map_or(true, |bpm| bpm > bpm_max) {
            return false;
        }
    }
    true
}
