// =============================================================================
// Signal Normalizer — rolling z-score per signal family
// =============================================================================
//
// Keeps a rolling buffer of raw scores per signal family (shared across
// symbols, so every symbol's momentum is judged against the same
// distribution). With fewer than 10 samples, or a zero-variance window, falls
// back to tanh scaling.
// =============================================================================

use std::collections::{HashMap, VecDeque};

/// Minimum samples before the z-score path activates.
const MIN_SAMPLES: usize = 10;

pub struct SignalNormalizer {
    lookback: usize,
    history: HashMap<String, VecDeque<f64>>,
}

impl SignalNormalizer {
    pub fn new(lookback: usize) -> Self {
        Self {
            lookback: lookback.max(MIN_SAMPLES),
            history: HashMap::new(),
        }
    }

    /// Record `raw` for `family` and return the normalized score in [-1, +1].
    pub fn normalize(&mut self, family: &str, raw: f64) -> f64 {
        let buf = self
            .history
            .entry(family.to_string())
            .or_insert_with(|| VecDeque::with_capacity(self.lookback));

        if buf.len() == self.lookback {
            buf.pop_front();
        }
        buf.push_back(raw);

        if buf.len() < MIN_SAMPLES {
            // Scale factor 100 puts a typical 0.005 raw move near tanh(0.5).
            return (raw * 100.0).tanh();
        }

        let n = buf.len() as f64;
        let mean = buf.iter().sum::<f64>() / n;
        let var = buf.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
        let std = var.sqrt();

        if std < 1e-10 {
            return (raw * 100.0).tanh();
        }

        let z = (raw - mean) / std;
        // ±3σ maps to ±1.
        (z / 3.0).clamp(-1.0, 1.0)
    }
}
