// ============================================
// Exploration Estimator
// ============================================
//
// Explore-exploit balance for cold items. The CTR posterior is
// Beta(alpha0 + debiased_clicks, beta0 + max(debiased_impressions -
// debiased_clicks, 0)); items with little evidence have a wide posterior and
// earn an optimism bonus.
//
// Two summaries of the posterior:
//   - UCB (default):  min(1.0, mean + 2 * sqrt(variance)), deterministic
//   - Thompson:       one posterior draw per request, via the injected RNG

use crate::config::{ExplorationMode, RankingConfig};
use crate::models::ItemStatistics;
use rand::Rng;
use rand_distr::{Beta, Distribution};

#[derive(Debug, Clone, Copy)]
pub struct ExplorationEstimator {
    prior_alpha: f64,
    prior_beta: f64,
    mode: ExplorationMode,
}

impl ExplorationEstimator {
    pub fn new(prior_alpha: f64, prior_beta: f64, mode: ExplorationMode) -> Self {
        Self {
            prior_alpha,
            prior_beta,
            mode,
        }
    }

    pub fn from_config(config: &RankingConfig) -> Self {
        Self::new(config.prior_alpha, config.prior_beta, config.exploration_mode)
    }

    fn posterior(&self, stats: &ItemStatistics) -> (f64, f64) {
        let alpha = self.prior_alpha + stats.debiased_clicks;
        let beta = self.prior_beta
            + (stats.debiased_impressions - stats.debiased_clicks).max(0.0);
        (alpha, beta)
    }

    /// Deterministic upper confidence bound on the posterior CTR.
    pub fn ucb_score(&self, stats: &ItemStatistics) -> f64 {
        let (alpha, beta) = self.posterior(stats);
        let total = alpha + beta;
        let mean = alpha / total;
        let variance = (alpha * beta) / (total * total * (total + 1.0));
        (mean + 2.0 * variance.sqrt()).min(1.0)
    }

    /// One draw from the posterior. Falls back to the posterior mean if the
    /// distribution cannot be constructed (degenerate parameters).
    pub fn thompson_sample<R: Rng + ?Sized>(&self, stats: &ItemStatistics, rng: &mut R) -> f64 {
        let (alpha, beta) = self.posterior(stats);
        match Beta::new(alpha, beta) {
            Ok(distribution) => distribution.sample(rng).clamp(0.0, 1.0),
            Err(_) => alpha / (alpha + beta),
        }
    }

    /// Score under the configured mode.
    pub fn score<R: Rng + ?Sized>(&self, stats: &ItemStatistics, rng: &mut R) -> f64 {
        match self.mode {
            ExplorationMode::Ucb => self.ucb_score(stats),
            ExplorationMode::Thompson => self.thompson_sample(stats, rng),
        }
    }
}
