use crate::error::{Result, SearchError};
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;

const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

/// Weights for the four ranking signals. Must sum to 1.0.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SignalWeights {
    pub semantic: f64,
    pub popularity: f64,
    pub exploration: f64,
    pub freshness: f64,
}

impl Default for SignalWeights {
    fn default() -> Self {
        Self {
            semantic: 0.50,
            popularity: 0.25,
            exploration: 0.15,
            freshness: 0.10,
        }
    }
}

impl SignalWeights {
    pub fn sum(&self) -> f64 {
        self.semantic + self.popularity + self.exploration + self.freshness
    }
}

/// How the exploration signal summarizes the Beta posterior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExplorationMode {
    /// Deterministic upper confidence bound. Identical queries at the same
    /// instant produce identical orderings.
    Ucb,
    /// One posterior draw per request, using the request-scoped RNG.
    Thompson,
}

impl ExplorationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExplorationMode::Ucb => "ucb",
            ExplorationMode::Thompson => "thompson",
        }
    }
}

impl FromStr for ExplorationMode {
    type Err = SearchError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "ucb" => Ok(ExplorationMode::Ucb),
            "thompson" => Ok(ExplorationMode::Thompson),
            other => Err(SearchError::ConfigurationInvalid(format!(
                "unknown exploration mode: {}",
                other
            ))),
        }
    }
}

/// Full ranking pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankingConfig {
    pub weights: SignalWeights,

    /// Candidates fetched from the vector index (K1).
    pub retrieval_k: usize,
    /// Candidates kept after composite scoring, fed to the reranker (K2).
    pub rerank_k: usize,
    /// Default result count when the request does not set a limit (N).
    pub result_n: usize,

    /// MMR relevance/diversity balance in [0, 1].
    pub mmr_lambda: f64,
    /// Neural score weight in the blended score, in [0, 1].
    pub rerank_blend: f64,
    pub rerank_enabled: bool,
    /// Slots guaranteed to every genre present in the candidate set.
    pub min_per_genre: usize,

    /// Beta prior over click-through rate.
    pub prior_alpha: f64,
    pub prior_beta: f64,

    pub freshness_half_life_days: f64,

    /// Examination probability decay exponent: p(r) = max(floor, 1 / r^alpha).
    pub position_bias_alpha: f64,
    pub position_bias_floor: f64,

    pub exploration_mode: ExplorationMode,

    /// Soft deadlines for the suspending stages, in milliseconds.
    pub retrieval_timeout_ms: u64,
    pub rerank_timeout_ms: u64,
    pub statistics_timeout_ms: u64,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            weights: SignalWeights::default(),
            retrieval_k: 500,
            rerank_k: 50,
            result_n: 20,
            mmr_lambda: 0.7,
            rerank_blend: 0.6,
            rerank_enabled: true,
            min_per_genre: 2,
            prior_alpha: 1.0,
            prior_beta: 9.0,
            freshness_half_life_days: 30.0,
            position_bias_alpha: 1.0,
            position_bias_floor: 0.01,
            exploration_mode: ExplorationMode::Ucb,
            retrieval_timeout_ms: 800,
            rerank_timeout_ms: 400,
            statistics_timeout_ms: 200,
        }
    }
}

impl RankingConfig {
    /// Load from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let defaults = Self::default();
        let config = Self {
            weights: SignalWeights {
                semantic: parse_env("WEIGHT_SEMANTIC", defaults.weights.semantic)?,
                popularity: parse_env("WEIGHT_POPULARITY", defaults.weights.popularity)?,
                exploration: parse_env("WEIGHT_EXPLORATION", defaults.weights.exploration)?,
                freshness: parse_env("WEIGHT_FRESHNESS", defaults.weights.freshness)?,
            },
            retrieval_k: parse_env("RETRIEVAL_K", defaults.retrieval_k)?,
            rerank_k: parse_env("RERANK_K", defaults.rerank_k)?,
            result_n: parse_env("RESULT_N", defaults.result_n)?,
            mmr_lambda: parse_env("MMR_LAMBDA", defaults.mmr_lambda)?,
            rerank_blend: parse_env("RERANK_BLEND", defaults.rerank_blend)?,
            rerank_enabled: parse_env("RERANK_ENABLED", defaults.rerank_enabled)?,
            min_per_genre: parse_env("MIN_PER_GENRE", defaults.min_per_genre)?,
            prior_alpha: parse_env("PRIOR_ALPHA", defaults.prior_alpha)?,
            prior_beta: parse_env("PRIOR_BETA", defaults.prior_beta)?,
            freshness_half_life_days: parse_env(
                "FRESHNESS_HALF_LIFE_DAYS",
                defaults.freshness_half_life_days,
            )?,
            position_bias_alpha: parse_env("POSITION_BIAS_ALPHA", defaults.position_bias_alpha)?,
            position_bias_floor: parse_env("POSITION_BIAS_FLOOR", defaults.position_bias_floor)?,
            exploration_mode: match env::var("EXPLORATION_MODE") {
                Ok(value) => value.parse()?,
                Err(_) => defaults.exploration_mode,
            },
            retrieval_timeout_ms: parse_env("RETRIEVAL_TIMEOUT_MS", defaults.retrieval_timeout_ms)?,
            rerank_timeout_ms: parse_env("RERANK_TIMEOUT_MS", defaults.rerank_timeout_ms)?,
            statistics_timeout_ms: parse_env(
                "STATISTICS_TIMEOUT_MS",
                defaults.statistics_timeout_ms,
            )?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the pipeline cannot serve. Fatal at startup.
    pub fn validate(&self) -> Result<()> {
        let sum = self.weights.sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(SearchError::ConfigurationInvalid(format!(
                "signal weights must sum to 1.0, got {}",
                sum
            )));
        }
        for (name, w) in [
            ("semantic", self.weights.semantic),
            ("popularity", self.weights.popularity),
            ("exploration", self.weights.exploration),
            ("freshness", self.weights.freshness),
        ] {
            if !(0.0..=1.0).contains(&w) {
                return Err(SearchError::ConfigurationInvalid(format!(
                    "weight {} out of [0, 1]: {}",
                    name, w
                )));
            }
        }
        if !(0.0..=1.0).contains(&self.mmr_lambda) {
            return Err(SearchError::ConfigurationInvalid(format!(
                "mmr_lambda out of [0, 1]: {}",
                self.mmr_lambda
            )));
        }
        if !(0.0..=1.0).contains(&self.rerank_blend) {
            return Err(SearchError::ConfigurationInvalid(format!(
                "rerank_blend out of [0, 1]: {}",
                self.rerank_blend
            )));
        }
        if self.result_n == 0 {
            return Err(SearchError::ConfigurationInvalid(
                "result_n must be at least 1".to_string(),
            ));
        }
        if self.retrieval_k < self.rerank_k || self.rerank_k < self.result_n {
            return Err(SearchError::ConfigurationInvalid(format!(
                "stage limits must satisfy retrieval_k >= rerank_k >= result_n, got {} / {} / {}",
                self.retrieval_k, self.rerank_k, self.result_n
            )));
        }
        if self.prior_alpha <= 0.0 || self.prior_beta <= 0.0 {
            return Err(SearchError::ConfigurationInvalid(format!(
                "beta prior parameters must be positive, got alpha={} beta={}",
                self.prior_alpha, self.prior_beta
            )));
        }
        if self.freshness_half_life_days <= 0.0 {
            return Err(SearchError::ConfigurationInvalid(format!(
                "freshness_half_life_days must be positive, got {}",
                self.freshness_half_life_days
            )));
        }
        if self.position_bias_alpha < 0.0 {
            return Err(SearchError::ConfigurationInvalid(format!(
                "position_bias_alpha must be non-negative, got {}",
                self.position_bias_alpha
            )));
        }
        if !(self.position_bias_floor > 0.0 && self.position_bias_floor <= 1.0) {
            return Err(SearchError::ConfigurationInvalid(format!(
                "position_bias_floor out of (0, 1]: {}",
                self.position_bias_floor
            )));
        }
        Ok(())
    }
}

fn parse_env<T: FromStr>(key: &str, default: T) -> Result<T> {
    match env::var(key) {
        Ok(value) => value.parse().map_err(|_| {
            SearchError::ConfigurationInvalid(format!("{} is not a valid value for {}", value, key))
        }),
        Err(_) => Ok(default),
    }
}
