// ============================================
// Position Bias Model
// ============================================
//
// Users examine top-ranked results far more often than low-ranked ones, so
// raw click counts overstate whatever was already shown first. Each displayed
// rank gets an examination probability, and feedback events are weighted by
// its inverse (IPW) before entering the click statistics.
//
// Contract:
//   p(1) = 1.0
//   p(r) = max(p_floor, 1 / r^alpha)
//   weight(r) = 1 / p(r), always finite and >= 1

use crate::config::RankingConfig;

#[derive(Debug, Clone, Copy)]
pub struct PositionBiasModel {
    /// Decay exponent; 1.0 gives the classic 1/rank falloff.
    alpha: f64,
    /// Lower bound on examination probability, so weights stay bounded.
    floor: f64,
}

impl Default for PositionBiasModel {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            floor: 0.01,
        }
    }
}

impl PositionBiasModel {
    pub fn new(alpha: f64, floor: f64) -> Self {
        Self { alpha, floor }
    }

    pub fn from_config(config: &RankingConfig) -> Self {
        Self::new(config.position_bias_alpha, config.position_bias_floor)
    }

    /// Probability that a user examines the result at `rank` (1-based).
    /// A rank of 0 is treated as rank 1.
    pub fn examination_probability(&self, rank: u32) -> f64 {
        let rank = f64::from(rank.max(1));
        (1.0 / rank.powf(self.alpha)).max(self.floor)
    }

    /// Inverse propensity weight applied to an event observed at `rank`.
    pub fn weight(&self, rank: u32) -> f64 {
        1.0 / self.examination_probability(rank)
    }
}
