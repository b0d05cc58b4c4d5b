// ============================================
// Diversity Layer
// ============================================
//
// Final selection over the blended candidates, in two phases:
//
// Phase A allocates result slots to genres: every genre present is
// guaranteed `min_per_genre` slots (capped by its bucket size), and the
// remaining slots are split proportionally to bucket sizes with
// largest-remainder rounding. When the guarantees alone would overflow the
// result count, the guarantee shrinks to floor(N / G) and the leftover goes
// to the largest buckets.
//
// Phase B picks candidates with Maximal Marginal Relevance:
//
//   mmr(c | S) = lambda * rel(c) - (1 - lambda) * max_{s in S} cos(c, s)
//
// selection runs in rounds across all buckets still owed slots, always
// taking the single globally best candidate. If the buckets run dry before
// N items are selected, the remainder is filled from all leftover
// candidates by the same rule without bucket constraints.

use crate::config::RankingConfig;
use crate::models::ScoredCandidate;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use tracing::debug;

pub const UNKNOWN_GENRE: &str = "__unknown__";

pub struct DiversityLayer {
    /// Relevance/diversity balance: 1.0 is pure relevance.
    lambda: f64,
    min_per_genre: usize,
}

impl DiversityLayer {
    pub fn new(lambda: f64, min_per_genre: usize) -> Self {
        Self {
            lambda,
            min_per_genre,
        }
    }

    pub fn from_config(config: &RankingConfig) -> Self {
        Self::new(config.mmr_lambda, config.min_per_genre)
    }

    /// Select up to `top_n` candidates, diversified across genres and
    /// embeddings. Returns them in selection order; each carries the MMR
    /// score it was selected with. Pure CPU; never suspends.
    pub fn select(&self, candidates: Vec<ScoredCandidate>, top_n: usize) -> Vec<ScoredCandidate> {
        if candidates.is_empty() || top_n == 0 {
            return Vec::new();
        }

        // Normalize embeddings once so cosine is a dot product.
        let normalized: Vec<Vec<f32>> = candidates
            .iter()
            .map(|c| normalize(&c.candidate.item.embedding))
            .collect();

        let genres: Vec<String> = candidates
            .iter()
            .map(|c| {
                c.candidate
                    .item
                    .genre
                    .clone()
                    .unwrap_or_else(|| UNKNOWN_GENRE.to_string())
            })
            .collect();

        let mut bucket_sizes: BTreeMap<String, usize> = BTreeMap::new();
        for genre in &genres {
            *bucket_sizes.entry(genre.clone()).or_insert(0) += 1;
        }

        let mut owed = allocate_genre_slots(&bucket_sizes, top_n, self.min_per_genre);
        debug!(genres = bucket_sizes.len(), ?owed, "Genre slots allocated");

        let mut selected: Vec<usize> = Vec::with_capacity(top_n);
        let mut selected_flags = vec![false; candidates.len()];
        let mut mmr_scores: Vec<f64> = Vec::with_capacity(top_n);

        // Constrained rounds: only buckets still owed slots compete.
        while selected.len() < top_n {
            let pick = self.best_candidate(&candidates, &normalized, &selected, |idx| {
                !selected_flags[idx] && owed.get(&genres[idx]).copied().unwrap_or(0) > 0
            });
            let Some((idx, mmr)) = pick else { break };

            selected_flags[idx] = true;
            if let Some(slots) = owed.get_mut(&genres[idx]) {
                *slots -= 1;
            }
            selected.push(idx);
            mmr_scores.push(mmr);
        }

        // Fill phase: small pools can leave slots unfilled; ignore buckets.
        while selected.len() < top_n {
            let pick = self.best_candidate(&candidates, &normalized, &selected, |idx| {
                !selected_flags[idx]
            });
            let Some((idx, mmr)) = pick else { break };

            selected_flags[idx] = true;
            selected.push(idx);
            mmr_scores.push(mmr);
        }

        let mut pool: Vec<Option<ScoredCandidate>> = candidates.into_iter().map(Some).collect();
        selected
            .iter()
            .zip(mmr_scores)
            .map(|(idx, mmr)| {
                let mut candidate = pool[*idx].take().expect("candidate selected twice");
                candidate.mmr = Some(mmr);
                candidate
            })
            .collect()
    }

    /// Highest-MMR eligible candidate; ties by descending relevance, then
    /// ascending item id.
    fn best_candidate<F>(
        &self,
        candidates: &[ScoredCandidate],
        normalized: &[Vec<f32>],
        selected: &[usize],
        eligible: F,
    ) -> Option<(usize, f64)>
    where
        F: Fn(usize) -> bool,
    {
        let mut best: Option<(usize, f64)> = None;

        for idx in 0..candidates.len() {
            if !eligible(idx) {
                continue;
            }

            let redundancy = if selected.is_empty() {
                0.0
            } else {
                selected
                    .iter()
                    .map(|s| dot(&normalized[idx], &normalized[*s]))
                    .fold(f64::MIN, f64::max)
            };
            let mmr =
                self.lambda * candidates[idx].blended - (1.0 - self.lambda) * redundancy;

            let is_better = match best {
                None => true,
                Some((best_idx, best_mmr)) => {
                    match mmr.partial_cmp(&best_mmr).unwrap_or(Ordering::Equal) {
                        Ordering::Greater => true,
                        Ordering::Less => false,
                        Ordering::Equal => match candidates[idx]
                            .blended
                            .partial_cmp(&candidates[best_idx].blended)
                            .unwrap_or(Ordering::Equal)
                        {
                            Ordering::Greater => true,
                            Ordering::Less => false,
                            Ordering::Equal => {
                                candidates[idx].item_id() < candidates[best_idx].item_id()
                            }
                        },
                    }
                }
            };
            if is_better {
                best = Some((idx, mmr));
            }
        }

        best
    }
}

/// Phase A slot allocation. Deterministic for a given bucket map.
fn allocate_genre_slots(
    bucket_sizes: &BTreeMap<String, usize>,
    top_n: usize,
    min_per_genre: usize,
) -> BTreeMap<String, usize> {
    let genre_count = bucket_sizes.len();
    if genre_count == 0 || top_n == 0 {
        return BTreeMap::new();
    }

    let overflow = genre_count * min_per_genre > top_n;
    let guarantee = if overflow {
        top_n / genre_count
    } else {
        min_per_genre
    };

    let mut slots: BTreeMap<String, usize> = bucket_sizes
        .iter()
        .map(|(genre, size)| (genre.clone(), guarantee.min(*size)))
        .collect();
    let assigned: usize = slots.values().sum();
    let mut remaining = top_n.saturating_sub(assigned);

    if remaining == 0 {
        return slots;
    }

    // Largest buckets first; lexicographic genre breaks ties.
    let mut by_size: Vec<(&String, usize)> =
        bucket_sizes.iter().map(|(g, s)| (g, *s)).collect();
    by_size.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));

    if overflow {
        // Hand the leftover one slot at a time to the largest buckets with
        // spare capacity.
        while remaining > 0 {
            let mut gave_any = false;
            for (genre, size) in &by_size {
                if remaining == 0 {
                    break;
                }
                let current = slots[*genre];
                if current < *size {
                    *slots.get_mut(*genre).expect("genre present") = current + 1;
                    remaining -= 1;
                    gave_any = true;
                }
            }
            if !gave_any {
                break;
            }
        }
        return slots;
    }

    // Proportional split with largest-remainder rounding, capped by what
    // each bucket can still absorb.
    let total_candidates: usize = bucket_sizes.values().sum();
    let mut remainders: Vec<(&String, f64, usize)> = Vec::with_capacity(genre_count);
    let mut handed_out = 0usize;

    for (genre, size) in bucket_sizes {
        let quota = remaining as f64 * *size as f64 / total_candidates as f64;
        let spare = size - slots[genre];
        let floor = (quota.floor() as usize).min(spare);
        *slots.get_mut(genre).expect("genre present") += floor;
        handed_out += floor;
        remainders.push((genre, quota - quota.floor(), *size));
    }

    let mut leftover = remaining - handed_out;
    remainders.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.2.cmp(&a.2))
            .then_with(|| a.0.cmp(b.0))
    });

    while leftover > 0 {
        let mut gave_any = false;
        for (genre, _, size) in &remainders {
            if leftover == 0 {
                break;
            }
            let current = slots[*genre];
            if current < *size {
                *slots.get_mut(*genre).expect("genre present") = current + 1;
                leftover -= 1;
                gave_any = true;
            }
        }
        if !gave_any {
            break;
        }
    }

    slots
}

fn normalize(embedding: &[f32]) -> Vec<f32> {
    let norm: f32 = embedding.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm <= f32::EPSILON {
        return vec![0.0; embedding.len()];
    }
    embedding.iter().map(|v| v / norm).collect()
}

fn dot(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| f64::from(x * y))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AudioItem, Candidate, SignalScores};

    fn scored(id: &str, genre: Option<&str>, blended: f64, embedding: Vec<f32>) -> ScoredCandidate {
        ScoredCandidate {
            candidate: Candidate {
                item: AudioItem {
                    item_id: id.to_string(),
                    title: id.to_string(),
                    embedding,
                    genre: genre.map(str::to_string),
                    mood: None,
                    format: None,
                    bpm: None,
                    created_at: None,
                    audio_url: None,
                    description: None,
                },
                distance: 0.2,
            },
            signals: SignalScores {
                semantic: blended,
                ..Default::default()
            },
            composite: blended,
            neural: None,
            blended,
            mmr: None,
        }
    }

    fn sizes(pairs: &[(&str, usize)]) -> BTreeMap<String, usize> {
        pairs
            .iter()
            .map(|(genre, size)| (genre.to_string(), *size))
            .collect()
    }

    #[test]
    fn allocation_guarantees_min_per_genre() {
        let slots = allocate_genre_slots(&sizes(&[("folk", 2), ("pop", 8)]), 5, 2);
        assert_eq!(slots["folk"], 2);
        assert_eq!(slots["pop"], 3);
    }

    #[test]
    fn allocation_is_capped_by_bucket_size() {
        let slots = allocate_genre_slots(&sizes(&[("folk", 1), ("pop", 20)]), 10, 2);
        assert_eq!(slots["folk"], 1);
        assert_eq!(slots["pop"], 9);
    }

    #[test]
    fn allocation_shrinks_guarantee_when_genres_overflow() {
        // 7 genres * 2 > 10: guarantee becomes floor(10/7) = 1, remainder to
        // the largest buckets, lexicographic tie-break.
        let buckets = sizes(&[
            ("a", 5),
            ("b", 5),
            ("c", 3),
            ("d", 3),
            ("e", 1),
            ("f", 1),
            ("g", 1),
        ]);
        let slots = allocate_genre_slots(&buckets, 10, 2);

        let total: usize = slots.values().sum();
        assert_eq!(total, 10);
        assert_eq!(slots["a"], 2);
        assert_eq!(slots["b"], 2);
        assert_eq!(slots["c"], 2);
        // d ties c on size but loses the lexicographic tie for the last
        // extra slot.
        assert_eq!(slots["d"], 1);
        assert_eq!(slots["e"], 1);
    }

    #[test]
    fn allocation_distributes_proportionally() {
        let slots = allocate_genre_slots(&sizes(&[("pop", 30), ("folk", 10)]), 20, 2);
        let total: usize = slots.values().sum();
        assert_eq!(total, 20);
        // 16 free slots split 3:1.
        assert_eq!(slots["pop"], 14);
        assert_eq!(slots["folk"], 6);
    }

    #[test]
    fn selects_top_relevance_when_all_distinct() {
        let layer = DiversityLayer::new(0.7, 2);
        let candidates = vec![
            scored("a", Some("pop"), 0.9, vec![1.0, 0.0, 0.0]),
            scored("b", Some("folk"), 0.8, vec![0.0, 1.0, 0.0]),
            scored("c", Some("jazz"), 0.7, vec![0.0, 0.0, 1.0]),
        ];

        let selected = layer.select(candidates, 3);
        let ids: Vec<&str> = selected.iter().map(|c| c.item_id()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert!(selected.iter().all(|c| c.mmr.is_some()));
    }

    #[test]
    fn near_duplicates_are_broken_up() {
        // Eight near-identical pop tracks and two dissimilar folk tracks.
        let layer = DiversityLayer::new(0.7, 2);
        let mut candidates = Vec::new();
        for i in 0..8 {
            // Pairwise cosine ~0.95 within the pop block.
            let mut embedding = vec![1.0f32, 0.0, 0.0, 0.0];
            embedding[1] = 0.22 + 0.01 * i as f32;
            candidates.push(scored(
                &format!("pop-{}", i),
                Some("pop"),
                0.9 - 0.01 * i as f64,
                embedding,
            ));
        }
        candidates.push(scored("folk-0", Some("folk"), 0.60, vec![0.0, 0.0, 1.0, 0.0]));
        candidates.push(scored("folk-1", Some("folk"), 0.58, vec![0.0, 0.0, 0.0, 1.0]));

        let selected = layer.select(candidates, 5);
        assert_eq!(selected.len(), 5);

        let folk_count = selected
            .iter()
            .filter(|c| c.candidate.item.genre.as_deref() == Some("folk"))
            .count();
        assert!(folk_count >= 2, "folk tracks should hold their slots");

        // After the first two pop picks the redundancy penalty must let
        // something else in; pop cannot run wall-to-wall.
        let genres: Vec<&str> = selected
            .iter()
            .map(|c| c.candidate.item.genre.as_deref().unwrap())
            .collect();
        let first_three = &genres[..3];
        assert!(
            first_three.iter().any(|g| *g == "folk"),
            "expected a folk break in {:?}",
            genres
        );
    }

    #[test]
    fn unknown_genres_share_one_bucket() {
        let layer = DiversityLayer::new(0.7, 2);
        let candidates = vec![
            scored("a", None, 0.9, vec![1.0, 0.0]),
            scored("b", None, 0.8, vec![0.9, 0.1]),
            scored("c", Some("pop"), 0.7, vec![0.0, 1.0]),
        ];

        let selected = layer.select(candidates, 3);
        assert_eq!(selected.len(), 3);
    }

    #[test]
    fn selection_is_idempotent() {
        let layer = DiversityLayer::new(0.7, 2);
        let mut candidates = Vec::new();
        for i in 0..12 {
            let genre = if i % 3 == 0 { "pop" } else { "folk" };
            let embedding = vec![(i as f32).cos(), (i as f32).sin(), 1.0];
            candidates.push(scored(
                &format!("item-{:02}", i),
                Some(genre),
                0.9 - 0.05 * i as f64,
                embedding,
            ));
        }

        let first = layer.select(candidates, 6);
        let first_ids: Vec<String> = first.iter().map(|c| c.item_id().to_string()).collect();

        let second = layer.select(first, 6);
        let second_ids: Vec<String> = second.iter().map(|c| c.item_id().to_string()).collect();

        assert_eq!(first_ids, second_ids);
    }

    #[test]
    fn short_pool_returns_everything() {
        let layer = DiversityLayer::new(0.7, 2);
        let candidates = vec![
            scored("a", Some("pop"), 0.9, vec![1.0, 0.0]),
            scored("b", Some("pop"), 0.8, vec![0.0, 1.0]),
        ];

        let selected = layer.select(candidates, 20);
        assert_eq!(selected.len(), 2);
    }

    #[test]
    fn zero_norm_embeddings_do_not_poison_selection() {
        let layer = DiversityLayer::new(0.7, 2);
        let candidates = vec![
            scored("a", Some("pop"), 0.9, vec![0.0, 0.0]),
            scored("b", Some("pop"), 0.8, vec![0.0, 0.0]),
        ];

        let selected = layer.select(candidates, 2);
        assert_eq!(selected.len(), 2);
        assert_eq!(selected[0].item_id(), "a");
    }

    #[test]
    fn ties_resolve_by_relevance_then_id() {
        let layer = DiversityLayer::new(1.0, 0);
        // Pure relevance at lambda = 1.0; b and c tie on score, b wins on id.
        let candidates = vec![
            scored("c", Some("pop"), 0.8, vec![1.0, 0.0]),
            scored("b", Some("pop"), 0.8, vec![0.0, 1.0]),
            scored("a", Some("pop"), 0.9, vec![0.5, 0.5]),
        ];

        let selected = layer.select(candidates, 3);
        let ids: Vec<&str> = selected.iter().map(|c| c.item_id()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }
}
