// =============================================================================
// Shadow Runner — Kalman + HMM beside the live path, logging only
// =============================================================================
//
// Runs the advanced models on every cycle without affecting order flow. One
// shadow_predictions row is written per (symbol, tick); the Kalman estimates
// are additionally exposed read-only so the pre-execution filters can consult
// trend agreement. Later evaluation joins rows with outcome_filled = 1
// against realized returns.
// =============================================================================

use std::collections::HashMap;

use tracing::{info, warn};

use crate::config::ShadowModeConfig;
use crate::regime::hmm::{HmmPrediction, HmmRegimeDetector};
use crate::regime::kalman::{KalmanEstimate, KalmanFilter};
use crate::store::{Database, ShadowPredictionRow};

/// Per-cycle shadow outcome summary.
#[derive(Debug, Clone)]
pub struct ShadowSummary {
    pub kalman_symbols: usize,
    /// Kalman signal sign agreed with the live composite.
    pub kalman_agree: usize,
    /// Symbols with a non-zero live composite to compare against.
    pub kalman_total_compared: usize,
    pub hmm: Option<HmmPrediction>,
}

pub struct ShadowRunner {
    filters: HashMap<String, KalmanFilter>,
    hmm: HmmRegimeDetector,
    process_variance: f64,
    measurement_variance: f64,
    refit_interval: u64,
    run_count: u64,
    last_estimates: HashMap<String, KalmanEstimate>,
}

impl ShadowRunner {
    pub fn new(cfg: &ShadowModeConfig) -> Self {
        Self {
            filters: HashMap::new(),
            hmm: HmmRegimeDetector::new(cfg.hmm.lookback),
            process_variance: cfg.kalman.process_variance,
            measurement_variance: cfg.kalman.measurement_variance,
            refit_interval: cfg.hmm.refit_interval.max(1),
            run_count: 0,
            last_estimates: HashMap::new(),
        }
    }

    /// Kalman estimates from the most recent run, keyed by symbol.
    pub fn kalman_estimates(&self) -> &HashMap<String, KalmanEstimate> {
        &self.last_estimates
    }

    pub fn hmm(&self) -> &HmmRegimeDetector {
        &self.hmm
    }

    /// Run the shadow models over this cycle's price data and log one row per
    /// symbol. Store failures are swallowed — shadow output never fails a run.
    pub fn run(
        &mut self,
        price_series: &HashMap<String, Vec<f64>>,
        spy_closes: Option<&[f64]>,
        existing_signals: &HashMap<String, f64>,
        existing_regime_label: &str,
        db: &Database,
        timestamp: &str,
    ) -> ShadowSummary {
        self.run_count += 1;

        // --- Kalman per symbol -------------------------------------------------
        self.last_estimates.clear();
        let mut records = Vec::new();
        let (pv, mv) = (self.process_variance, self.measurement_variance);

        for (sym, prices) in price_series {
            let clean: Vec<f64> = prices.iter().copied().filter(|p| p.is_finite()).collect();
            if clean.is_empty() {
                continue;
            }

            let kf = self
                .filters
                .entry(sym.clone())
                .or_insert_with(|| KalmanFilter::new(pv, mv));

            let mut estimate = None;
            for p in clean {
                estimate = Some(kf.update(p));
            }
            let Some(est) = estimate else { continue };

            self.last_estimates.insert(sym.clone(), est);

            records.push(ShadowPredictionRow {
                timestamp: timestamp.to_string(),
                symbol: sym.clone(),
                kalman_signal: est.signal,
                kalman_level: est.level,
                kalman_trend: est.trend,
                kalman_uncertainty: est.uncertainty,
                existing_signal: existing_signals.get(sym).copied().unwrap_or(0.0),
                hmm_state: None,
                hmm_bull_prob: None,
                hmm_bear_prob: None,
                hmm_transition_prob: None,
                hmm_transition_risk: None,
                existing_regime: existing_regime_label.to_string(),
            });
        }

        // --- HMM regime --------------------------------------------------------
        let mut hmm_result = None;
        if let Some(spy) = spy_closes {
            let spy: Vec<f64> = spy.iter().copied().filter(|p| p.is_finite()).collect();
            if spy.len() >= 5 {
                let obs = HmmRegimeDetector::discretize(&spy);

                if self.run_count % self.refit_interval == 0 && obs.len() >= 10 {
                    self.hmm.fit(&obs);
                }

                let pred = self.hmm.predict(&obs);
                for rec in records.iter_mut() {
                    rec.hmm_state = Some(pred.state_label.clone());
                    rec.hmm_bull_prob = Some(pred.probabilities[0]);
                    rec.hmm_bear_prob = Some(pred.probabilities[1]);
                    rec.hmm_transition_prob = Some(pred.probabilities[2]);
                    rec.hmm_transition_risk = Some(pred.transition_risk);
                }
                hmm_result = Some(pred);
            }
        }

        // --- Persist -----------------------------------------------------------
        for rec in &records {
            if let Err(e) = db.log_shadow_prediction(rec) {
                warn!(symbol = %rec.symbol, error = %e, "shadow prediction write failed");
            }
        }

        // --- Agreement summary -------------------------------------------------
        let mut agree = 0usize;
        let mut total = 0usize;
        for (sym, est) in &self.last_estimates {
            let live = existing_signals.get(sym).copied().unwrap_or(0.0);
            if live != 0.0 {
                total += 1;
                if (est.signal > 0.0 && live > 0.0) || (est.signal < 0.0 && live < 0.0) {
                    agree += 1;
                }
            }
        }

        let summary = ShadowSummary {
            kalman_symbols: self.last_estimates.len(),
            kalman_agree: agree,
            kalman_total_compared: total,
            hmm: hmm_result,
        };

        match &summary.hmm {
            Some(h) => info!(
                kalman_agree = agree,
                kalman_total = total,
                hmm_state = %h.state_label,
                hmm_confidence = h.confidence,
                "shadow run complete"
            ),
            None => info!(kalman_agree = agree, kalman_total = total, "shadow run complete"),
        }

        summary
    }
}
