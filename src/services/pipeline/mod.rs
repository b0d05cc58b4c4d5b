// ============================================
// Search Pipeline
// ============================================
//
// Orchestrates one search request across the four stages:
//
// 1. Retrieval:  query embedding + ANN lookup           (suspends, deadline)
// 2. Ranking:    composite scoring over statistics      (pure CPU)
// 3. Reranking:  neural blend, optional                 (suspends, deadline)
// 4. Diversity:  genre slots + MMR                      (pure CPU)
//
// plus the feedback side channel into the statistics store. Only retrieval
// failure aborts a request; statistics and rerank degradations keep the
// response alive and observable via flags. Impressions for returned items
// are recorded fire-and-forget after the response is assembled.

use crate::config::RankingConfig;
use crate::error::{Result, SearchError};
use crate::models::{
    FeedbackAction, FeedbackEvent, RankedResult, ScoreBreakdown, ScoredCandidate, SearchFilters,
    SearchRequest, SearchResponse, StageTimings,
};
use crate::services::diversity::DiversityLayer;
use crate::services::ranking::CompositeScorer;
use crate::services::rerank::{self, NeuralReranker};
use crate::services::retrieval::{EmbeddingProvider, VectorRetriever};
use crate::services::statistics::StatisticsStore;
use chrono::Utc;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{info, warn};
use uuid::Uuid;

const MAX_QUERY_CHARS: usize = 500;
const MAX_LIMIT: usize = 100;
const BPM_RANGE: std::ops::RangeInclusive<u32> = 20..=300;

pub struct SearchPipeline {
    config: RankingConfig,
    embedder: Arc<dyn EmbeddingProvider>,
    retriever: Arc<dyn VectorRetriever>,
    reranker: Option<Arc<dyn NeuralReranker>>,
    statistics: Arc<dyn StatisticsStore>,
    scorer: CompositeScorer,
    diversity: DiversityLayer,
}

impl SearchPipeline {
    /// Build the pipeline, rejecting invalid configuration up front.
    pub fn new(
        config: RankingConfig,
        embedder: Arc<dyn EmbeddingProvider>,
        retriever: Arc<dyn VectorRetriever>,
        reranker: Option<Arc<dyn NeuralReranker>>,
        statistics: Arc<dyn StatisticsStore>,
    ) -> Result<Self> {
        config.validate()?;
        let scorer = CompositeScorer::from_config(&config);
        let diversity = DiversityLayer::from_config(&config);
        Ok(Self {
            config,
            embedder,
            retriever,
            reranker,
            statistics,
            scorer,
            diversity,
        })
    }

    /// Run one search request through the full pipeline.
    pub async fn search(&self, request: SearchRequest) -> Result<SearchResponse> {
        self.validate_request(&request)?;

        let query_id = Uuid::new_v4();
        let total_start = Instant::now();
        let mut timings = StageTimings::default();
        let filters = request.filters.clone().unwrap_or_default();

        info!(
            query_id = %query_id,
            limit = request.limit,
            session_id = request.session_id.as_deref().unwrap_or(""),
            "Search accepted"
        );

        // Stage 1: embedding + retrieval. The only stage whose failure
        // aborts the request.
        let stage_start = Instant::now();
        let retrieval_deadline = Duration::from_millis(self.config.retrieval_timeout_ms);

        let query_embedding = match timeout(retrieval_deadline, self.embedder.embed(&request.query))
            .await
        {
            Ok(Ok(embedding)) => embedding,
            Ok(Err(e)) => return Err(SearchError::RetrievalFailed(format!("embedding: {}", e))),
            Err(_) => {
                return Err(SearchError::RetrievalFailed(
                    "embedding timed out".to_string(),
                ))
            }
        };

        let candidates = match timeout(
            retrieval_deadline,
            self.retriever
                .retrieve(&query_embedding, self.config.retrieval_k, &filters),
        )
        .await
        {
            Ok(Ok(candidates)) => candidates,
            Ok(Err(e)) => return Err(SearchError::RetrievalFailed(e.to_string())),
            Err(_) => {
                return Err(SearchError::RetrievalFailed(
                    "retriever timed out".to_string(),
                ))
            }
        };
        timings.retrieval_ms = elapsed_ms(stage_start);

        let total_candidates = candidates.len();
        info!(
            query_id = %query_id,
            candidates = total_candidates,
            latency_ms = timings.retrieval_ms,
            "Stage 1 (retrieval) complete"
        );

        if candidates.is_empty() {
            timings.total_ms = elapsed_ms(total_start);
            return Ok(SearchResponse {
                query: request.query,
                results: Vec::new(),
                total_candidates: 0,
                rerank_skipped: false,
                timings,
            });
        }

        // Batched statistics snapshot. Failures degrade to cold-start rows.
        let item_ids: Vec<String> = candidates
            .iter()
            .map(|c| c.item.item_id.clone())
            .collect();
        let statistics_deadline = Duration::from_millis(self.config.statistics_timeout_ms);
        let statistics = match timeout(statistics_deadline, self.statistics.get_many(&item_ids))
            .await
        {
            Ok(Ok(rows)) => rows,
            Ok(Err(e)) => {
                warn!(query_id = %query_id, error = %e, "Statistics read failed, scoring cold");
                HashMap::new()
            }
            Err(_) => {
                warn!(query_id = %query_id, "Statistics read timed out, scoring cold");
                HashMap::new()
            }
        };

        // Stage 2: composite scoring.
        let stage_start = Instant::now();
        let mut rng = match request.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut scored = self
            .scorer
            .score(candidates, &statistics, Utc::now(), &mut rng);
        timings.ranking_ms = elapsed_ms(stage_start);
        info!(
            query_id = %query_id,
            kept = scored.len(),
            latency_ms = timings.ranking_ms,
            "Stage 2 (ranking) complete"
        );

        // Stage 2.5: neural rerank blend, recovered locally on failure.
        let stage_start = Instant::now();
        let mut rerank_skipped = false;
        if self.config.rerank_enabled {
            if let Some(reranker) = &self.reranker {
                let passages: Vec<(String, String)> = scored
                    .iter()
                    .map(|c| {
                        (
                            c.item_id().to_string(),
                            rerank::build_passage_text(&c.candidate.item),
                        )
                    })
                    .collect();

                let rerank_deadline = Duration::from_millis(self.config.rerank_timeout_ms);
                match timeout(rerank_deadline, reranker.rerank(&request.query, &passages)).await {
                    Ok(Ok(neural_scores)) => {
                        rerank::blend_scores(&mut scored, &neural_scores, self.config.rerank_blend);
                    }
                    Ok(Err(e)) => {
                        warn!(query_id = %query_id, error = %e, "Neural rerank failed, keeping composite order");
                        rerank_skipped = true;
                    }
                    Err(_) => {
                        warn!(query_id = %query_id, "Neural rerank timed out, keeping composite order");
                        rerank_skipped = true;
                    }
                }
            }
        }
        timings.rerank_ms = elapsed_ms(stage_start);

        // Stage 3: diversity.
        let stage_start = Instant::now();
        let final_candidates = self.diversity.select(scored, request.limit);
        timings.diversity_ms = elapsed_ms(stage_start);
        info!(
            query_id = %query_id,
            results = final_candidates.len(),
            latency_ms = timings.diversity_ms,
            "Stage 3 (diversity) complete"
        );

        // Best-effort impression recording; never blocks or cancels.
        let impressions: Vec<(String, u32)> = final_candidates
            .iter()
            .enumerate()
            .map(|(i, c)| (c.item_id().to_string(), (i + 1) as u32))
            .collect();
        let store = Arc::clone(&self.statistics);
        tokio::spawn(async move {
            let now = Utc::now();
            for (item_id, rank) in impressions {
                if let Err(e) = store
                    .record(&item_id, FeedbackAction::Impression, rank, now)
                    .await
                {
                    warn!(item_id = %item_id, error = %e, "Impression record failed");
                }
            }
        });

        let results = build_results(final_candidates, request.include_scores);
        timings.total_ms = elapsed_ms(total_start);
        info!(
            query_id = %query_id,
            results = results.len(),
            rerank_skipped = rerank_skipped,
            total_ms = timings.total_ms,
            "Search complete"
        );

        Ok(SearchResponse {
            query: request.query,
            results,
            total_candidates,
            rerank_skipped,
            timings,
        })
    }

    /// Apply one feedback event to the statistics store. Errors surface to
    /// the caller; the serving path is unaffected.
    pub async fn record_feedback(&self, event: FeedbackEvent) -> Result<()> {
        if event.item_id.is_empty() {
            return Err(SearchError::InvalidInput(
                "item_id must not be empty".to_string(),
            ));
        }
        if event.position_shown < 1 {
            return Err(SearchError::InvalidInput(
                "position_shown must be >= 1".to_string(),
            ));
        }

        self.statistics
            .record(
                &event.item_id,
                event.action,
                event.position_shown,
                event.timestamp,
            )
            .await
    }

    fn validate_request(&self, request: &SearchRequest) -> Result<()> {
        if request.query.trim().is_empty() {
            return Err(SearchError::InvalidInput(
                "query must not be empty".to_string(),
            ));
        }
        if request.query.chars().count() > MAX_QUERY_CHARS {
            return Err(SearchError::InvalidInput(format!(
                "query exceeds {} characters",
                MAX_QUERY_CHARS
            )));
        }
        if request.limit < 1 || request.limit > MAX_LIMIT {
            return Err(SearchError::InvalidInput(format!(
                "limit must be in 1..={}, got {}",
                MAX_LIMIT, request.limit
            )));
        }
        if let Some(filters) = &request.filters {
            validate_filters(filters)?;
        }
        Ok(())
    }
}

fn validate_filters(filters: &SearchFilters) -> Result<()> {
    for (name, bpm) in [("bpm_min", filters.bpm_min), ("bpm_max", filters.bpm_max)] {
        if let Some(bpm) = bpm {
            if !BPM_RANGE.contains(&bpm) {
                return Err(SearchError::InvalidInput(format!(
                    "{} must be in {}..={}, got {}",
                    name,
                    BPM_RANGE.start(),
                    BPM_RANGE.end(),
                    bpm
                )));
            }
        }
    }
    if let (Some(min), Some(max)) = (filters.bpm_min, filters.bpm_max) {
        if min > max {
            return Err(SearchError::InvalidInput(format!(
                "bpm_min {} exceeds bpm_max {}",
                min, max
            )));
        }
    }
    Ok(())
}

fn build_results(candidates: Vec<ScoredCandidate>, include_scores: bool) -> Vec<RankedResult> {
    candidates
        .into_iter()
        .enumerate()
        .map(|(i, c)| {
            let scores = include_scores.then(|| ScoreBreakdown {
                semantic: c.signals.semantic,
                popularity: c.signals.popularity,
                exploration: c.signals.exploration,
                freshness: c.signals.freshness,
                composite: c.composite,
                neural: c.neural,
                blended: c.blended,
                mmr: c.mmr,
            });
            let item = c.candidate.item;
            RankedResult {
                item_id: item.item_id,
                rank: (i + 1) as u32,
                title: item.title,
                audio_url: item.audio_url,
                genre: item.genre,
                mood: item.mood,
                bpm: item.bpm,
                scores,
            }
        })
        .collect()
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AudioItem, Candidate};
    use crate::services::statistics::MemoryStatisticsStore;
    use async_trait::async_trait;

    struct FixedEmbedder;

    #[async_trait]
    impl EmbeddingProvider for FixedEmbedder {
        async fn embed(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
            Ok(vec![1.0, 0.0, 0.0])
        }
    }

    struct StaticRetriever {
        candidates: Vec<Candidate>,
    }

    #[async_trait]
    impl VectorRetriever for StaticRetriever {
        async fn retrieve(
            &self,
            _query_embedding: &[f32],
            k: usize,
            filters: &SearchFilters,
        ) -> anyhow::Result<Vec<Candidate>> {
            Ok(self
                .candidates
                .iter()
                .filter(|c| crate::services::retrieval::matches_filters(c, filters))
                .take(k)
                .cloned()
                .collect())
        }
    }

    fn item(id: &str, genre: &str, embedding: Vec<f32>) -> AudioItem {
        AudioItem {
            item_id: id.to_string(),
            title: format!("title {}", id),
            embedding,
            genre: Some(genre.to_string()),
            mood: None,
            format: None,
            bpm: Some(120),
            created_at: Some(Utc::now()),
            audio_url: None,
            description: None,
        }
    }

    fn pipeline(candidates: Vec<Candidate>) -> SearchPipeline {
        SearchPipeline::new(
            RankingConfig::default(),
            Arc::new(FixedEmbedder),
            Arc::new(StaticRetriever { candidates }),
            None,
            Arc::new(MemoryStatisticsStore::default()),
        )
        .unwrap()
    }

    fn request(query: &str) -> SearchRequest {
        SearchRequest {
            query: query.to_string(),
            limit: 20,
            include_scores: false,
            seed: None,
            session_id: None,
            filters: None,
        }
    }

    #[tokio::test]
    async fn empty_query_is_invalid() {
        let pipeline = pipeline(Vec::new());
        let err = pipeline.search(request("   ")).await.unwrap_err();
        assert!(matches!(err, SearchError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn limit_out_of_range_is_invalid() {
        let pipeline = pipeline(Vec::new());
        let mut req = request("lofi beats");
        req.limit = 0;
        assert!(matches!(
            pipeline.search(req).await,
            Err(SearchError::InvalidInput(_))
        ));

        let mut req = request("lofi beats");
        req.limit = 101;
        assert!(matches!(
            pipeline.search(req).await,
            Err(SearchError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn inverted_bpm_bounds_are_invalid() {
        let pipeline = pipeline(Vec::new());
        let mut req = request("fast drums");
        req.filters = Some(SearchFilters {
            bpm_min: Some(180),
            bpm_max: Some(90),
            ..Default::default()
        });

        assert!(matches!(
            pipeline.search(req).await,
            Err(SearchError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn empty_catalog_returns_empty_response() {
        let pipeline = pipeline(Vec::new());
        let response = pipeline.search(request("anything")).await.unwrap();
        assert!(response.results.is_empty());
        assert_eq!(response.total_candidates, 0);
        assert!(!response.rerank_skipped);
    }

    #[tokio::test]
    async fn feedback_validation_rejects_rank_zero() {
        let pipeline = pipeline(Vec::new());
        let err = pipeline
            .record_feedback(FeedbackEvent {
                item_id: "a".to_string(),
                action: FeedbackAction::Click,
                position_shown: 0,
                timestamp: Utc::now(),
                session_id: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SearchError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn search_returns_ranked_results_with_timings() {
        let candidates = vec![
            Candidate {
                item: item("a", "pop", vec![1.0, 0.0, 0.0]),
                distance: 0.1,
            },
            Candidate {
                item: item("b", "folk", vec![0.0, 1.0, 0.0]),
                distance: 0.4,
            },
            Candidate {
                item: item("c", "jazz", vec![0.0, 0.0, 1.0]),
                distance: 0.8,
            },
        ];
        let pipeline = pipeline(candidates);

        let mut req = request("acoustic morning");
        req.include_scores = true;
        let response = pipeline.search(req).await.unwrap();

        assert_eq!(response.total_candidates, 3);
        assert_eq!(response.results.len(), 3);
        assert_eq!(response.results[0].rank, 1);
        assert_eq!(response.results[0].item_id, "a");
        assert!(response.results[0].scores.is_some());
        assert!(response.timings.total_ms >= 0.0);
        assert!(!response.rerank_skipped);
    }

    #[tokio::test]
    async fn genre_filter_restricts_results() {
        let candidates = vec![
            Candidate {
                item: item("a", "pop", vec![1.0, 0.0, 0.0]),
                distance: 0.1,
            },
            Candidate {
                item: item("b", "folk", vec![0.0, 1.0, 0.0]),
                distance: 0.2,
            },
        ];
        let pipeline = pipeline(candidates);

        let mut req = request("strings");
        req.filters = Some(SearchFilters {
            genre: Some("folk".to_string()),
            ..Default::default()
        });
        let response = pipeline.search(req).await.unwrap();

        assert_eq!(response.results.len(), 1);
        assert_eq!(response.results[0].item_id, "b");
    }
}
