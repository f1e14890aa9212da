// =============================================================================
// HMM Regime Detector — 3-state hidden Markov model over discretized returns
// =============================================================================
//
// States:
//   0 = Bull  (trending up, low vol)
//   1 = Bear  (trending down, high vol)
//   2 = Transition (uncertain, regime change in progress)
//
// Observations are benchmark returns z-scored and binned into 7 buckets with
// fixed edges at {-2, -1, -0.5, +0.5, +1, +2}. Parameters are seeded to favor
// regime persistence and refined with scaled Baum-Welch; emissions are
// smoothed after every M-step so zero-probability pockets cannot trap the
// forward pass.
// =============================================================================

use serde::Serialize;

/// Number of discrete observation buckets.
pub const N_BINS: usize = 7;

/// Number of hidden states.
pub const N_STATES: usize = 3;

pub const STATE_LABELS: [&str; N_STATES] = ["bull", "bear", "transition"];

/// Index of the bear state in all parameter matrices.
const BEAR: usize = 1;

/// Emission smoothing applied after each M-step.
const SMOOTHING: f64 = 0.05;

/// Filtered regime estimate from the forward algorithm.
#[derive(Debug, Clone, Serialize)]
pub struct HmmPrediction {
    pub state: usize,
    pub state_label: String,
    /// Posterior over [bull, bear, transition]; sums to 1.
    pub probabilities: [f64; N_STATES],
    /// P(next state = bear) under the current posterior.
    pub transition_risk: f64,
    /// Max posterior probability.
    pub confidence: f64,
}

pub struct HmmRegimeDetector {
    pi: [f64; N_STATES],
    a: [[f64; N_STATES]; N_STATES],
    b: [[f64; N_BINS]; N_STATES],
    #[allow(dead_code)]
    lookback: usize,
    fitted: bool,
    fit_count: u64,
}

impl HmmRegimeDetector {
    pub fn new(lookback: usize) -> Self {
        Self {
            // Prior: mostly bull.
            pi: [0.70, 0.10, 0.20],
            // Bull tends to stay bull; bear exits usually go via transition.
            a: [
                [0.90, 0.02, 0.08],
                [0.03, 0.85, 0.12],
                [0.30, 0.25, 0.45],
            ],
            // Bins: very_neg, neg, slight_neg, neutral, slight_pos, pos, very_pos.
            b: [
                [0.02, 0.05, 0.08, 0.20, 0.25, 0.25, 0.15], // bull: skew positive
                [0.20, 0.25, 0.20, 0.15, 0.10, 0.05, 0.05], // bear: skew negative
                [0.10, 0.12, 0.15, 0.26, 0.15, 0.12, 0.10], // transition: uniform-ish
            ],
            lookback,
            fitted: false,
            fit_count: 0,
        }
    }

    pub fn is_fitted(&self) -> bool {
        self.fitted
    }

    pub fn fit_count(&self) -> u64 {
        self.fit_count
    }

    // -------------------------------------------------------------------------
    // Discretization
    // -------------------------------------------------------------------------

    /// Convert a price series into discrete observation indices via return
    /// z-scores bucketed at fixed edges {-2, -1, -0.5, +0.5, +1, +2}.
    pub fn discretize(prices: &[f64]) -> Vec<usize> {
        let prices: Vec<f64> = prices.iter().copied().filter(|p| p.is_finite()).collect();
        if prices.len() < 2 {
            return vec![N_BINS / 2];
        }

        let mut returns = Vec::with_capacity(prices.len() - 1);
        for w in prices.windows(2) {
            if w[0] != 0.0 {
                let r = (w[1] - w[0]) / w[0];
                if r.is_finite() {
                    returns.push(r);
                }
            }
        }
        if returns.is_empty() {
            return vec![N_BINS / 2];
        }

        let n = returns.len() as f64;
        let mu = returns.iter().sum::<f64>() / n;
        let mut sigma = (returns.iter().map(|r| (r - mu).powi(2)).sum::<f64>() / n).sqrt();
        if sigma < 1e-12 {
            sigma = 1e-6;
        }

        const EDGES: [f64; 6] = [-2.0, -1.0, -0.5, 0.5, 1.0, 2.0];
        returns
            .iter()
            .map(|r| {
                let z = (r - mu) / sigma;
                EDGES.iter().filter(|&&e| z >= e).count().min(N_BINS - 1)
            })
            .collect()
    }

    // -------------------------------------------------------------------------
    // Forward / backward
    // -------------------------------------------------------------------------

    fn forward(&self, obs: &[usize]) -> (Vec<[f64; N_STATES]>, Vec<f64>) {
        let t_len = obs.len();
        let mut alpha = vec![[0.0; N_STATES]; t_len];
        let mut scales = vec![0.0; t_len];

        for i in 0..N_STATES {
            alpha[0][i] = self.pi[i] * self.b[i][obs[0]];
        }
        scales[0] = alpha[0].iter().sum();
        if scales[0] > 0.0 {
            for v in alpha[0].iter_mut() {
                *v /= scales[0];
            }
        }

        for t in 1..t_len {
            for j in 0..N_STATES {
                let mut acc = 0.0;
                for i in 0..N_STATES {
                    acc += alpha[t - 1][i] * self.a[i][j];
                }
                alpha[t][j] = acc * self.b[j][obs[t]];
            }
            scales[t] = alpha[t].iter().sum();
            if scales[t] > 0.0 {
                for v in alpha[t].iter_mut() {
                    *v /= scales[t];
                }
            }
        }

        (alpha, scales)
    }

    fn backward(&self, obs: &[usize], scales: &[f64]) -> Vec<[f64; N_STATES]> {
        let t_len = obs.len();
        let mut beta = vec![[0.0; N_STATES]; t_len];
        beta[t_len - 1] = [1.0; N_STATES];

        for t in (0..t_len - 1).rev() {
            for i in 0..N_STATES {
                let mut acc = 0.0;
                for j in 0..N_STATES {
                    acc += self.a[i][j] * self.b[j][obs[t + 1]] * beta[t + 1][j];
                }
                beta[t][i] = acc;
            }
            if scales[t + 1] > 0.0 {
                for v in beta[t].iter_mut() {
                    *v /= scales[t + 1];
                }
            }
        }

        beta
    }

    // -------------------------------------------------------------------------
    // Baum-Welch fit
    // -------------------------------------------------------------------------

    /// Refine parameters from an observation sequence. Up to 20 iterations,
    /// tolerance 1e-4 on the max parameter delta.
    pub fn fit(&mut self, observations: &[usize]) {
        let obs: Vec<usize> = observations.iter().map(|&o| o.min(N_BINS - 1)).collect();
        let t_len = obs.len();
        if t_len < 3 {
            return;
        }

        const MAX_ITER: usize = 20;
        const TOL: f64 = 1e-4;

        for _ in 0..MAX_ITER {
            // E-step.
            let (alpha, scales) = self.forward(&obs);
            let beta = self.backward(&obs, &scales);

            let mut gamma = vec![[0.0; N_STATES]; t_len];
            for t in 0..t_len {
                let mut sum = 0.0;
                for i in 0..N_STATES {
                    gamma[t][i] = alpha[t][i] * beta[t][i];
                    sum += gamma[t][i];
                }
                let sum = sum.max(1e-300);
                for v in gamma[t].iter_mut() {
                    *v /= sum;
                }
            }

            let mut xi_sum = [[0.0; N_STATES]; N_STATES];
            for t in 0..t_len - 1 {
                let mut denom = 0.0;
                let mut numer = [[0.0; N_STATES]; N_STATES];
                for i in 0..N_STATES {
                    for j in 0..N_STATES {
                        numer[i][j] =
                            alpha[t][i] * self.a[i][j] * self.b[j][obs[t + 1]] * beta[t + 1][j];
                        denom += numer[i][j];
                    }
                }
                if denom > 1e-300 {
                    for i in 0..N_STATES {
                        for j in 0..N_STATES {
                            xi_sum[i][j] += numer[i][j] / denom;
                        }
                    }
                }
            }

            // M-step.
            let gamma0_sum: f64 = gamma[0].iter().sum();
            let mut new_pi = self.pi;
            if gamma0_sum > 0.0 {
                for i in 0..N_STATES {
                    new_pi[i] = gamma[0][i] / gamma0_sum;
                }
            }

            let mut new_a = [[0.0; N_STATES]; N_STATES];
            for i in 0..N_STATES {
                let row_sum: f64 = xi_sum[i].iter().sum::<f64>().max(1e-300);
                for j in 0..N_STATES {
                    new_a[i][j] = xi_sum[i][j] / row_sum;
                }
            }

            let mut new_b = [[0.0; N_BINS]; N_STATES];
            for t in 0..t_len {
                for i in 0..N_STATES {
                    new_b[i][obs[t]] += gamma[t][i];
                }
            }
            for row in new_b.iter_mut() {
                let row_sum: f64 = row.iter().sum::<f64>().max(1e-300);
                for v in row.iter_mut() {
                    *v /= row_sum;
                }
            }

            // Smoothing keeps every emission strictly positive.
            for row in new_b.iter_mut() {
                for v in row.iter_mut() {
                    *v = *v * (1.0 - SMOOTHING) + SMOOTHING / N_BINS as f64;
                }
            }

            // Convergence on the max parameter delta.
            let mut delta: f64 = 0.0;
            for i in 0..N_STATES {
                for j in 0..N_STATES {
                    delta = delta.max((new_a[i][j] - self.a[i][j]).abs());
                }
                for k in 0..N_BINS {
                    delta = delta.max((new_b[i][k] - self.b[i][k]).abs());
                }
            }

            self.pi = new_pi;
            self.a = new_a;
            self.b = new_b;

            if delta < TOL {
                break;
            }
        }

        self.fitted = true;
        self.fit_count += 1;
    }

    // -------------------------------------------------------------------------
    // Prediction
    // -------------------------------------------------------------------------

    /// Filtered posterior over states from the forward algorithm.
    pub fn predict(&self, observations: &[usize]) -> HmmPrediction {
        let obs: Vec<usize> = observations.iter().map(|&o| o.min(N_BINS - 1)).collect();
        if obs.is_empty() {
            return Self::default_prediction();
        }

        let (alpha, _) = self.forward(&obs);
        let last = alpha[alpha.len() - 1];
        let sum: f64 = last.iter().sum();

        let probs = if sum > 1e-300 {
            [last[0] / sum, last[1] / sum, last[2] / sum]
        } else {
            self.pi
        };

        let state = probs
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(i, _)| i)
            .unwrap_or(0);

        let transition_risk: f64 = (0..N_STATES).map(|i| probs[i] * self.a[i][BEAR]).sum();

        HmmPrediction {
            state,
            state_label: STATE_LABELS[state].to_string(),
            probabilities: probs,
            transition_risk,
            confidence: probs[state],
        }
    }

    fn default_prediction() -> HmmPrediction {
        HmmPrediction {
            state: 0,
            state_label: "bull".to_string(),
            probabilities: [0.70, 0.10, 0.20],
            transition_risk: 0.10,
            confidence: 0.70,
        }
    }
}
