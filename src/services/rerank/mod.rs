// ============================================
// Neural Rerank Seam
// ============================================
//
// Cross-encoder reranking is an external collaborator behind a single
// method. Its scores are blended with the composite score; when the call
// fails or times out the pipeline keeps the composite ordering and flags the
// response, so the critical path never depends on the model being up.

use crate::models::{AudioItem, ScoredCandidate};
use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::HashMap;

/// Scores query/passage pairs in [0, 1], preserving pair identity.
#[async_trait]
pub trait NeuralReranker: Send + Sync {
    async fn rerank(
        &self,
        query: &str,
        passages: &[(String, String)],
    ) -> anyhow::Result<HashMap<String, f64>>;
}

/// Text surface handed to the cross-encoder for one item: title, sound
/// description, and the key catalog attributes.
pub fn build_passage_text(item: &AudioItem) -> String {
    let mut parts: Vec<String> = Vec::new();
    parts.push(item.title.clone());
    if let Some(description) = &item.description {
        parts.push(description.clone());
    }

    let mut metadata: Vec<String> = Vec::new();
    if let Some(genre) = &item.genre {
        metadata.push(format!("Genre: {}", genre));
    }
    if let Some(mood) = &item.mood {
        metadata.push(format!("Mood: {}", mood));
    }
    if let Some(bpm) = item.bpm {
        metadata.push(format!("BPM: {}", bpm));
    }
    if !metadata.is_empty() {
        parts.push(metadata.join(". "));
    }

    parts.join(". ")
}

/// Blend neural scores into the candidates and re-sort on the blended score.
///
/// `blended = blend * neural + (1 - blend) * composite`; pairs the reranker
/// did not score keep their composite score.
pub fn blend_scores(
    candidates: &mut Vec<ScoredCandidate>,
    neural_scores: &HashMap<String, f64>,
    blend: f64,
) {
    for candidate in candidates.iter_mut() {
        match neural_scores.get(candidate.item_id()) {
            Some(&score) => {
                let neural = score.clamp(0.0, 1.0);
                candidate.neural = Some(neural);
                candidate.blended = blend * neural + (1.0 - blend) * candidate.composite;
            }
            None => {
                candidate.neural = None;
                candidate.blended = candidate.composite;
            }
        }
    }
    sort_by_blended(candidates);
}

/// Descending blended score; ties broken by descending semantic similarity,
/// then ascending item id, so orderings are reproducible.
pub fn sort_by_blended(candidates: &mut [ScoredCandidate]) {
    candidates.sort_by(|a, b| {
        b.blended
            .partial_cmp(&a.blended)
            .unwrap_or(Ordering::Equal)
            .then_with(|| {
                b.signals
                    .semantic
                    .partial_cmp(&a.signals.semantic)
                    .unwrap_or(Ordering::Equal)
            })
            .then_with(|| a.item_id().cmp(b.item_id()))
    });
}
