use crate::config::RankingConfig;
use crate::models::ItemStatistics;

/// Smoothed, debiased click-through rate in [0, 1].
///
/// The Beta prior acts as pseudo-counts: an item with no feedback scores the
/// prior mean (0.1 with the default (1, 9) prior) and converges to its
/// debiased CTR as evidence accumulates.
#[derive(Debug, Clone, Copy)]
pub struct PopularityEstimator {
    prior_alpha: f64,
    prior_beta: f64,
}

impl PopularityEstimator {
    pub fn new(prior_alpha: f64, prior_beta: f64) -> Self {
        Self {
            prior_alpha,
            prior_beta,
        }
    }

    pub fn from_config(config: &RankingConfig) -> Self {
        Self::new(config.prior_alpha, config.prior_beta)
    }

    pub fn estimate(&self, stats: &ItemStatistics) -> f64 {
        let ctr = (stats.debiased_clicks + self.prior_alpha)
            / (stats.debiased_impressions + self.prior_alpha + self.prior_beta);
        ctr.clamp(0.0, 1.0)
    }
}
