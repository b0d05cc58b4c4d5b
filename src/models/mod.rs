use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Catalog entry: a music track or sound effect with its ranking attributes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioItem {
    pub item_id: String,
    pub title: String,
    /// Dense embedding, fixed dimension across the catalog.
    pub embedding: Vec<f32>,
    pub genre: Option<String>,
    pub mood: Option<String>,
    pub format: Option<String>,
    pub bpm: Option<u32>,
    pub created_at: Option<DateTime<Utc>>,
    pub audio_url: Option<String>,
    /// Free-text sound description, used for the reranker passage.
    pub description: Option<String>,
}

/// A retrieved item paired with its cosine distance to the query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub item: AudioItem,
    /// Cosine distance in [0, 2], ascending from the retriever.
    pub distance: f32,
}

impl Candidate {
    /// Maps the retriever's cosine distance into a [0, 1] similarity.
    pub fn semantic_similarity(&self) -> f64 {
        (1.0 - f64::from(self.distance) / 2.0).clamp(0.0, 1.0)
    }
}

/// Per-item engagement counters with their IPW-debiased companions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemStatistics {
    pub impression_count: u64,
    pub click_count: u64,
    pub like_count: u64,
    /// Sum of 1/p(position) over impressions.
    pub debiased_impressions: f64,
    /// Sum of 1/p(position) over clicked impressions.
    pub debiased_clicks: f64,
    pub last_event_at: Option<DateTime<Utc>>,
}

/// Catalog-wide aggregates, for diagnostics and dashboards.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalStatistics {
    pub total_items: u64,
    pub total_impressions: u64,
    pub total_clicks: u64,
    pub global_ctr: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackAction {
    Impression,
    Click,
    Like,
    /// The item was examined and passed over; counts as an impression.
    Skip,
}

impl FeedbackAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedbackAction::Impression => "impression",
            FeedbackAction::Click => "click",
            FeedbackAction::Like => "like",
            FeedbackAction::Skip => "skip",
        }
    }
}

/// One user interaction with a displayed result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackEvent {
    pub item_id: String,
    pub action: FeedbackAction,
    /// 1-based display rank at which the item was shown.
    pub position_shown: u32,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// The four normalized ranking signals, each in [0, 1] by construction.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SignalScores {
    pub semantic: f64,
    pub popularity: f64,
    pub exploration: f64,
    pub freshness: f64,
}

/// A candidate carrying every score the pipeline has computed for it.
#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    pub candidate: Candidate,
    pub signals: SignalScores,
    pub composite: f64,
    /// Cross-encoder score in [0, 1], when reranking ran.
    pub neural: Option<f64>,
    /// `rerank_blend * neural + (1 - rerank_blend) * composite`, or the
    /// composite itself when reranking did not apply.
    pub blended: f64,
    /// MMR score at the moment the diversifier selected this candidate.
    pub mmr: Option<f64>,
}

impl ScoredCandidate {
    pub fn item_id(&self) -> &str {
        &self.candidate.item.item_id
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchFilters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub genre: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mood: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bpm_min: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bpm_max: Option<u32>,
}

fn default_limit() -> usize {
    20
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub include_scores: bool,
    /// Seeds the request-scoped RNG for Thompson exploration; absent means
    /// a fresh entropy seed per request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filters: Option<SearchFilters>,
}

/// Score breakdown attached to results when `include_scores` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub semantic: f64,
    pub popularity: f64,
    pub exploration: f64,
    pub freshness: f64,
    pub composite: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub neural: Option<f64>,
    pub blended: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mmr: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedResult {
    pub item_id: String,
    /// 1-based position in the final list.
    pub rank: u32,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub genre: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mood: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bpm: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scores: Option<ScoreBreakdown>,
}

/// Wall-clock duration of each pipeline stage, in milliseconds.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct StageTimings {
    pub retrieval_ms: f64,
    pub ranking_ms: f64,
    pub rerank_ms: f64,
    pub diversity_ms: f64,
    pub total_ms: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub query: String,
    pub results: Vec<RankedResult>,
    /// Candidates the retriever produced before ranking.
    pub total_candidates: usize,
    /// Set when reranking was enabled but failed or timed out; the ordering
    /// then falls back to the pure composite score.
    pub rerank_skipped: bool,
    pub timings: StageTimings,
}
