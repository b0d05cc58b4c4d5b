use crate::config::RankingConfig;
use chrono::{DateTime, Utc};

/// Exponential decay on item age: `exp(-age_days / tau)` with
/// `tau = half_life_days / ln 2`, so an item half a life old scores 0.5.
/// Items without a creation timestamp score a neutral 0.5.
#[derive(Debug, Clone, Copy)]
pub struct FreshnessEstimator {
    tau_days: f64,
}

impl FreshnessEstimator {
    pub fn new(half_life_days: f64) -> Self {
        Self {
            tau_days: half_life_days / std::f64::consts::LN_2,
        }
    }

    pub fn from_config(config: &RankingConfig) -> Self {
        Self::new(config.freshness_half_life_days)
    }

    pub fn estimate(&self, created_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> f64 {
        let Some(created_at) = created_at else {
            return 0.5;
        };
        // Clock skew can put created_at in the future; treat it as brand new.
        let age_days = ((now - created_at).num_seconds().max(0) as f64) / 86_400.0;
        (-age_days / self.tau_days).exp()
    }
}
