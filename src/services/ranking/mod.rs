// ============================================
// Composite Scoring Layer
// ============================================
//
// Combines the four normalized signals into one score per candidate:
//
//   composite = w_s * semantic + w_p * popularity
//             + w_e * exploration + w_f * freshness
//
// Signals are bounded [0, 1] at their sources and the weights sum to one, so
// the composite is in [0, 1] without clamping here. There is deliberately no
// per-query min-max renormalization: rescaling within the candidate set
// makes an item's score depend on which other items happened to be
// retrieved.

use crate::config::{RankingConfig, SignalWeights};
use crate::models::{Candidate, ItemStatistics, ScoredCandidate, SignalScores};
use crate::services::signals::{ExplorationEstimator, FreshnessEstimator, PopularityEstimator};
use chrono::{DateTime, Utc};
use rand::Rng;
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::debug;

pub struct CompositeScorer {
    weights: SignalWeights,
    popularity: PopularityEstimator,
    exploration: ExplorationEstimator,
    freshness: FreshnessEstimator,
    /// Candidates kept for the rerank stage (K2).
    output_limit: usize,
}

impl CompositeScorer {
    pub fn from_config(config: &RankingConfig) -> Self {
        Self {
            weights: config.weights,
            popularity: PopularityEstimator::from_config(config),
            exploration: ExplorationEstimator::from_config(config),
            freshness: FreshnessEstimator::from_config(config),
            output_limit: config.rerank_k,
        }
    }

    /// Score every candidate against its statistics snapshot and return the
    /// top candidates in deterministic order. Missing snapshots score as
    /// cold items. Pure CPU; never suspends.
    pub fn score<R: Rng + ?Sized>(
        &self,
        candidates: Vec<Candidate>,
        statistics: &HashMap<String, ItemStatistics>,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> Vec<ScoredCandidate> {
        let cold = ItemStatistics::default();

        let mut scored: Vec<ScoredCandidate> = candidates
            .into_iter()
            .map(|candidate| {
                let stats = statistics
                    .get(&candidate.item.item_id)
                    .unwrap_or(&cold);

                let signals = SignalScores {
                    semantic: candidate.semantic_similarity(),
                    popularity: self.popularity.estimate(stats),
                    exploration: self.exploration.score(stats, rng),
                    freshness: self.freshness.estimate(candidate.item.created_at, now),
                };
                let composite = self.combine(&signals);

                debug!(
                    item_id = %candidate.item.item_id,
                    semantic = signals.semantic,
                    popularity = signals.popularity,
                    exploration = signals.exploration,
                    freshness = signals.freshness,
                    composite = composite,
                    "Candidate scored"
                );

                ScoredCandidate {
                    candidate,
                    signals,
                    composite,
                    neural: None,
                    blended: composite,
                    mmr: None,
                }
            })
            .collect();

        sort_by_composite(&mut scored);
        scored.truncate(self.output_limit);
        scored
    }

    fn combine(&self, signals: &SignalScores) -> f64 {
        self.weights.semantic * signals.semantic
            + self.weights.popularity * signals.popularity
            + self.weights.exploration * signals.exploration
            + self.weights.freshness * signals.freshness
    }
}

/// Descending composite; ties broken by descending semantic similarity, then
/// ascending item id.
pub fn sort_by_composite(candidates: &mut [ScoredCandidate]) {
    candidates.sort_by(|a, b| {
        b.composite
            .partial_cmp(&a.composite)
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AudioItem;
    use chrono::Duration;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn item(id: &str, created_at: Option<DateTime<Utc>>) -> AudioItem {
        AudioItem {
            item_id: id.to_string(),
            title: id.to_string(),
            embedding: vec![1.0, 0.0],
            genre: None,
            mood: None,
            format: None,
            bpm: None,
            created_at,
            audio_url: None,
            description: None,
        }
    }

    fn candidate(id: &str, distance: f32) -> Candidate {
        Candidate {
            item: item(id, Some(Utc::now())),
            distance,
        }
    }

    fn scorer() -> CompositeScorer {
        CompositeScorer::from_config(&RankingConfig::default())
    }

    fn rng() -> StdRng {
        StdRng::seed_from_u64(0)
    }

    #[test]
    fn composite_stays_in_unit_interval() {
        let scorer = scorer();
        let candidates = vec![candidate("a", 0.0), candidate("b", 1.0), candidate("c", 2.0)];
        let scored = scorer.score(candidates, &HashMap::new(), Utc::now(), &mut rng());

        for candidate in &scored {
            assert!((0.0..=1.0).contains(&candidate.composite));
            assert_eq!(candidate.blended, candidate.composite);
        }
    }

    #[test]
    fn semantic_dominates_with_default_weights() {
        let scorer = scorer();
        let scored = scorer.score(
            vec![candidate("far", 1.5), candidate("near", 0.1)],
            &HashMap::new(),
            Utc::now(),
            &mut rng(),
        );

        assert_eq!(scored[0].item_id(), "near");
    }

    #[test]
    fn clicked_item_outranks_cold_twin() {
        let scorer = scorer();
        let mut statistics = HashMap::new();
        statistics.insert(
            "hot".to_string(),
            ItemStatistics {
                impression_count: 100,
                click_count: 50,
                debiased_impressions: 100.0,
                debiased_clicks: 50.0,
                ..Default::default()
            },
        );

        let scored = scorer.score(
            vec![candidate("cold", 0.0), candidate("hot", 0.0)],
            &statistics,
            Utc::now(),
            &mut rng(),
        );

        assert_eq!(scored[0].item_id(), "hot");
        // The cold item is not buried: its prior popularity and wide
        // posterior keep it adjacent.
        assert_eq!(scored[1].item_id(), "cold");
        assert!(scored[0].composite - scored[1].composite < 0.2);
    }

    #[test]
    fn equal_scores_tie_break_on_freshness_then_id() {
        let scorer = scorer();
        let now = Utc::now();
        let fresh = Candidate {
            item: item("newer", Some(now)),
            distance: 0.0,
        };
        let stale = Candidate {
            item: item("older", Some(now - Duration::days(60))),
            distance: 0.0,
        };

        let scored = scorer.score(vec![stale, fresh], &HashMap::new(), now, &mut rng());
        assert_eq!(scored[0].item_id(), "newer");

        // Identical items differing only in id: lexicographic ascending.
        let scored = scorer.score(
            vec![
                Candidate {
                    item: item("b", Some(now)),
                    distance: 0.0,
                },
                Candidate {
                    item: item("a", Some(now)),
                    distance: 0.0,
                },
            ],
            &HashMap::new(),
            now,
            &mut rng(),
        );
        assert_eq!(scored[0].item_id(), "a");
        assert_eq!(scored[1].item_id(), "b");
    }

    #[test]
    fn truncates_to_rerank_pool() {
        let mut config = RankingConfig::default();
        config.rerank_k = 3;
        config.result_n = 2;
        let scorer = CompositeScorer::from_config(&config);

        let candidates: Vec<Candidate> = (0..10)
            .map(|i| candidate(&format!("item-{:02}", i), 0.1 * i as f32))
            .collect();
        let scored = scorer.score(candidates, &HashMap::new(), Utc::now(), &mut rng());

        assert_eq!(scored.len(), 3);
    }

    #[test]
    fn ordering_is_deterministic_for_identical_inputs() {
        let scorer = scorer();
        let now = Utc::now();
        let candidates: Vec<Candidate> = (0..20)
            .map(|i| candidate(&format!("item-{:02}", i), (i % 5) as f32 * 0.3))
            .collect();

        let first: Vec<String> = scorer
            .score(candidates.clone(), &HashMap::new(), now, &mut rng())
            .iter()
            .map(|c| c.item_id().to_string())
            .collect();
        let second: Vec<String> = scorer
            .score(candidates, &HashMap::new(), now, &mut rng())
            .iter()
            .map(|c| c.item_id().to_string())
            .collect();

        assert_eq!(first, second);
    }
}
