// =============================================================================
// Kalman Filter — adaptive [level, trend] estimation of a price series
// =============================================================================
//
// 2D state [price_level, trend], scalar observation (close). Replaces static
// moving averages with an adaptive filter that tracks the true level and
// velocity, exposes uncertainty bounds, and standardizes the residual as a
// signal: (z - level) / uncertainty.
//
// Process noise Q adapts toward the recent innovation magnitude with a small
// learning rate, so the filter loosens in fast markets and tightens in quiet
// ones.
// =============================================================================

use serde::Serialize;

/// Learning rate for the adaptive process noise.
const ADAPT_ALPHA: f64 = 0.05;

/// One filter step's outputs.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct KalmanEstimate {
    pub level: f64,
    pub trend: f64,
    /// level + 2σ.
    pub upper: f64,
    /// level - 2σ.
    pub lower: f64,
    /// √P[0,0] — strictly positive after the first update.
    pub uncertainty: f64,
    /// Standardized residual (z - level) / uncertainty.
    pub signal: f64,
}

pub struct KalmanFilter {
    process_variance: f64,
    measurement_variance: f64,
    /// State vector [level, trend].
    x: [f64; 2],
    /// State covariance (2x2, row-major).
    p: [[f64; 2]; 2],
    /// Process noise (diagonal; trend noise runs at a tenth of level noise).
    q: [[f64; 2]; 2],
    initialized: bool,
    n_updates: u64,
}

impl KalmanFilter {
    pub fn new(process_variance: f64, measurement_variance: f64) -> Self {
        Self {
            process_variance,
            measurement_variance,
            x: [0.0, 0.0],
            p: [[1.0, 0.0], [0.0, 1.0]],
            q: [
                [process_variance, 0.0],
                [0.0, process_variance * 0.1],
            ],
            initialized: false,
            n_updates: 0,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn n_updates(&self) -> u64 {
        self.n_updates
    }

    /// Latest estimate without consuming a new observation, or `None` before
    /// the first update.
    pub fn current(&self) -> Option<KalmanEstimate> {
        if !self.initialized {
            return None;
        }
        let unc = self.p[0][0].max(1e-12).sqrt();
        Some(KalmanEstimate {
            level: self.x[0],
            trend: self.x[1],
            upper: self.x[0] + 2.0 * unc,
            lower: self.x[0] - 2.0 * unc,
            uncertainty: unc,
            signal: 0.0,
        })
    }

    /// Process a new price observation.
    pub fn update(&mut self, measurement: f64) -> KalmanEstimate {
        if !measurement.is_finite() {
            // Hold the last state on a bad tick.
            return self.current().unwrap_or(KalmanEstimate {
                level: 0.0,
                trend: 0.0,
                upper: 0.0,
                lower: 0.0,
                uncertainty: 0.0,
                signal: 0.0,
            });
        }

        let z = measurement;

        if !self.initialized {
            self.x = [z, 0.0];
            self.p = [
                [self.measurement_variance, 0.0],
                [0.0, self.measurement_variance],
            ];
            self.initialized = true;
            self.n_updates = 1;
            return KalmanEstimate {
                level: z,
                trend: 0.0,
                upper: z,
                lower: z,
                uncertainty: self.measurement_variance.sqrt(),
                signal: 0.0,
            };
        }

        // --- Predict: x' = Fx, P' = FPF' + Q with F = [[1,1],[0,1]] ---
        let x_pred = [self.x[0] + self.x[1], self.x[1]];
        let p = &self.p;
        let mut p_pred = [
            [
                p[0][0] + p[1][0] + p[0][1] + p[1][1],
                p[0][1] + p[1][1],
            ],
            [p[1][0] + p[1][1], p[1][1]],
        ];
        p_pred[0][0] += self.q[0][0];
        p_pred[1][1] += self.q[1][1];

        // --- Update: H = [1, 0] observes the level only ---
        let y = z - x_pred[0];
        let s = p_pred[0][0] + self.measurement_variance;
        let s_inv = 1.0 / s;
        let k = [p_pred[0][0] * s_inv, p_pred[1][0] * s_inv];

        self.x = [x_pred[0] + k[0] * y, x_pred[1] + k[1] * y];

        // P = (I - KH) P'
        self.p = [
            [
                (1.0 - k[0]) * p_pred[0][0],
                (1.0 - k[0]) * p_pred[0][1],
            ],
            [
                p_pred[1][0] - k[1] * p_pred[0][0],
                p_pred[1][1] - k[1] * p_pred[0][1],
            ],
        ];

        // Adaptive process noise: scale Q toward the innovation magnitude.
        let adaptive_scale = (y * y * s_inv).max(1.0);
        self.q[0][0] =
            self.q[0][0] * (1.0 - ADAPT_ALPHA) + ADAPT_ALPHA * adaptive_scale * self.process_variance;
        self.q[1][1] = self.q[1][1] * (1.0 - ADAPT_ALPHA)
            + ADAPT_ALPHA * adaptive_scale * self.process_variance * 0.1;

        self.n_updates += 1;

        let unc = self.p[0][0].max(1e-12).sqrt();
        let level = self.x[0];
        let trend = self.x[1];
        let signal = if unc > 1e-12 { (z - level) / unc } else { 0.0 };

        KalmanEstimate {
            level,
            trend,
            upper: level + 2.0 * unc,
            lower: level - 2.0 * unc,
            uncertainty: unc,
            signal,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn filter() -> KalmanFilter {
        KalmanFilter::new(1e-5, 1e-3)
    }

    #[test]
    fn first_observation_initializes_state() {
        let mut kf = filter();
        let est = kf.update(100.0);
        assert_eq!(est.level, 100.0);
        assert_eq!(est.trend, 0.0);
        assert!(kf.is_initialized());
        assert_eq!(kf.n_updates(), 1);
    }

    #[test]
    fn uncertainty_strictly_positive_after_updates() {
        let mut kf = filter();
        for i in 0..50 {
            let est = kf.update(100.0 + i as f64 * 0.1);
            assert!(est.uncertainty > 0.0, "uncertainty must stay positive");
        }
    }

    #[test]
    fn level_tracks_a_constant_price() {
        let mut kf = filter();
        let mut last = None;
        for _ in 0..100 {
            last = Some(kf.update(50.0));
        }
        let est = last.unwrap();
        assert!((est.level - 50.0).abs() < 0.01, "level = {}", est.level);
        assert!(est.trend.abs() < 0.01);
    }

    #[test]
    fn trend_turns_positive_on_a_steady_climb() {
        let mut kf = filter();
        let mut last = None;
        for i in 0..200 {
            last = Some(kf.update(100.0 + i as f64));
        }
        let est = last.unwrap();
        assert!(est.trend > 0.5, "trend = {}", est.trend);
    }

    #[test]
    fn bands_straddle_level() {
        let mut kf = filter();
        let mut est = kf.update(100.0);
        for i in 0..30 {
            est = kf.update(100.0 + (i as f64 * 0.3).sin());
        }
        assert!(est.upper > est.level);
        assert!(est.lower < est.level);
    }

    #[test]
    fn signal_is_standardized_residual() {
        let mut kf = filter();
        for _ in 0..100 {
            kf.update(100.0);
        }
        // A sudden jump should produce a large positive signal.
        let est = kf.update(101.0);
        assert!(est.signal > 1.0, "signal = {}", est.signal);
    }

    #[test]
    fn nan_observation_holds_state() {
        let mut kf = filter();
        kf.update(100.0);
        kf.update(100.5);
        let before = kf.current().unwrap();
        let held = kf.update(f64::NAN);
        assert_eq!(held.level, before.level);
        assert_eq!(kf.n_updates(), 2);
    }

    #[test]
    fn current_is_none_before_first_update() {
        let kf = filter();
        assert!(kf.current().is_none());
    }
}
