// =============================================================================
// Signal aggregation — normalized components and the weighted composite
// =============================================================================
//
// The news-absent rescaling lives here, in one place, so persistence logging
// and sizing always see the same weights and the same composite. When news is
// unavailable (or its weight is zero) the remaining weights are renormalized
// so the |score| >= trade_threshold admission stays calibrated.
// =============================================================================

pub mod breakout;
pub mod meanrev;
pub mod momentum;
pub mod news;
pub mod normalizer;

use serde::{Deserialize, Serialize};

use crate::config::SignalWeights;

/// Normalized per-signal scores, each loosely in [-1, +1].
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SignalComponents {
    pub momentum: f64,
    pub meanrev: f64,
    pub breakout: f64,
    pub news: f64,
}

impl SignalComponents {
    /// Component values paired with their configured weights, in a stable
    /// order. Used by the challenger to reason over active signals.
    pub fn weighted_pairs(&self, weights: &SignalWeights) -> [(&'static str, f64, f64); 4] {
        [
            ("momentum", self.momentum, weights.momentum),
            ("meanrev", self.meanrev, weights.meanrev),
            ("breakout", self.breakout, weights.breakout),
            ("news", self.news, weights.news),
        ]
    }
}

/// Raw (pre-normalization) scores, retained for logging.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RawSignals {
    pub momentum: f64,
    pub meanrev: f64,
    pub breakout: f64,
    pub news: f64,
}

/// The weights actually applied to a composite (renormalized when news is
/// absent), logged next to the scores they produced.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct WeightsUsed {
    pub momentum: f64,
    pub meanrev: f64,
    pub breakout: f64,
    pub news: f64,
}

/// Everything known about one symbol's signal evaluation this cycle.
#[derive(Debug, Clone, Default)]
pub struct SignalDetail {
    pub components: SignalComponents,
    pub raw: RawSignals,
    pub weights_used: WeightsUsed,
    pub final_score: f64,
}

/// Compute the weighted composite and the weights actually used.
///
/// With news present the weighted sum is divided by the total active weight;
/// without news (value exactly zero, or weight zero) the non-news weights are
/// renormalized to sum to one so the composite stays on the same scale.
pub fn effective_weights(
    components: &SignalComponents,
    weights: &SignalWeights,
) -> (WeightsUsed, f64) {
    let news_active = components.news != 0.0 && weights.news > 0.0;

    if news_active {
        let total = weights.momentum + weights.meanrev + weights.breakout + weights.news;
        if total <= 0.0 {
            return (WeightsUsed::default(), 0.0);
        }
        let raw_score = components.momentum * weights.momentum
            + components.meanrev * weights.meanrev
            + components.breakout * weights.breakout
            + components.news * weights.news;
        let used = WeightsUsed {
            momentum: weights.momentum,
            meanrev: weights.meanrev,
            breakout: weights.breakout,
            news: weights.news,
        };
        (used, raw_score / total)
    } else {
        let total = weights.momentum + weights.meanrev + weights.breakout;
        if total <= 0.0 {
            return (WeightsUsed::default(), 0.0);
        }
        let raw_score = components.momentum * weights.momentum
            + components.meanrev * weights.meanrev
            + components.breakout * weights.breakout;
        let used = WeightsUsed {
            momentum: weights.momentum / total,
            meanrev: weights.meanrev / total,
            breakout: weights.breakout / total,
            news: 0.0,
        };
        (used, raw_score / total)
    }
}
