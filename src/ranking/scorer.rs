use serde::Serialize;

use crate::config::RankingWeights;

/// Normalised sub-scores, each in 0..1. `cost` is already inverted: higher
/// means cheaper to trade.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ScoreComponents {
    pub volatility: f64,
    pub trend: f64,
    pub momentum: f64,
    pub cost: f64,
}

/// Weighted blend of the normalised components, clipped into 0..1. Weights
/// are non-negative and need not sum to one.
pub fn compute_score(components: &ScoreComponents, weights: &RankingWeights) -> f64 {
    let total_w = (weights.volatility + weights.trend + weights.momentum + weights.cost).max(1e-12);
    let score = (weights.volatility * components.volatility
        + weights.trend * components.trend
        + weights.momentum * components.momentum
        + weights.cost * components.cost)
        / total_w;
    score.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_stays_in_unit_interval() {
        let weights = RankingWeights {
            volatility: 2.0,
            trend: 1.0,
            momentum: 0.5,
            cost: 0.0,
        };
        let c = ScoreComponents {
            volatility: 1.0,
            trend: 1.0,
            momentum: 1.0,
            cost: 1.0,
        };
        let s = compute_score(&c, &weights);
        assert!((0.0..=1.0).contains(&s));
        assert!((s - 1.0).abs() < 1e-9);
    }

    #[test]
    fn zero_weights_do_not_divide_by_zero() {
        let weights = RankingWeights {
            volatility: 0.0,
            trend: 0.0,
            momentum: 0.0,
            cost: 0.0,
        };
        let c = ScoreComponents::default();
        assert_eq!(compute_score(&c, &weights), 0.0);
    }
}
