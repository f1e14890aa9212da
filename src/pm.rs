// =============================================================================
// PM — candidate construction, correlation filter, and position sizing
// =============================================================================
//
// Pipeline:
//   1. Build candidates from ranked symbols where |score| >= trade_threshold
//      (boundary inclusive). BUYs are dropped for symbols already held long
//      and dropped wholesale in a downtrend; shorts pass both filters.
//   2. Sort by conviction (|score| descending).
//   3. Correlation filter: walk candidates in conviction order and drop any
//      whose return correlation with an already-selected name exceeds the
//      threshold. Keep at most max_trades survivors.
//   4. Size each survivor (volatility / fixed-fractional / half-Kelly),
//      halved in a fear regime.
//   5. Agent memory may apply a bounded score adjustment; if its guardrail
//      fires, memory is ignored for the remainder of this run.
// =============================================================================

use std::collections::{HashMap, HashSet};

use tracing::{debug, info, warn};

use crate::config::{Config, SizingMethod};
use crate::indicators::stats;
use crate::memory::{AgentMemory, MemoryDecision, Observation, Outcome};
use crate::regime::simple::SimpleRegime;
use crate::scout::ScoutRank;
use crate::types::{Plan, PlanKind, Side};

/// Volatility target for the volatility sizing method.
const TARGET_VOL: f64 = 0.20;

/// Inputs assembled by the workflow for one planning pass.
pub struct PlanInputs<'a> {
    pub ranked: &'a [ScoutRank],
    pub signals: &'a HashMap<String, f64>,
    pub regime: &'a SimpleRegime,
    /// Symbols currently held long (BUY candidates for these are dropped).
    pub held_long: HashSet<String>,
    /// Close series per symbol, for the correlation filter.
    pub price_series: &'a HashMap<String, Vec<f64>>,
    pub equity: f64,
    pub cash: f64,
}

pub struct PmAgent {
    trade_threshold: f64,
    max_trades: usize,
    max_positions: usize,
    correlation_threshold: f64,
    sizing_method: SizingMethod,
    fixed_fraction: f64,
    stop_loss: f64,
    momentum_weight: f64,
    fallback_equity: f64,
}

impl PmAgent {
    pub fn new(cfg: &Config) -> Self {
        Self {
            trade_threshold: cfg.signals.trade_threshold,
            max_trades: cfg.signals.max_trades_per_cycle.max(1),
            max_positions: cfg.risk.max_positions.max(1),
            correlation_threshold: cfg.signals.correlation_threshold,
            sizing_method: cfg.signals.sizing_method,
            fixed_fraction: cfg.signals.fixed_fraction,
            stop_loss: cfg.risk.stop_loss,
            momentum_weight: cfg.signals.weights.momentum,
            fallback_equity: cfg.risk.equity,
        }
    }

    /// Build the cycle's entry plans. Returns the plans and a notes string
    /// for the event log.
    pub fn create_plan(
        &self,
        inputs: &PlanInputs<'_>,
        mut memory: Option<&mut AgentMemory>,
    ) -> (Vec<Plan>, String) {
        // --- 1. Candidates -----------------------------------------------------
        let mut candidates: Vec<(Plan, f64)> = Vec::new();
        for item in inputs.ranked {
            let score = inputs.signals.get(&item.symbol).copied().unwrap_or(0.0);

            // Regime filter: no new longs in a downtrend.
            if inputs.regime.is_downtrend && score > 0.0 {
                continue;
            }

            if score >= self.trade_threshold {
                if inputs.held_long.contains(&item.symbol) {
                    continue;
                }
                candidates.push((Plan::entry(&item.symbol, Side::Buy, score), item.vol));
            } else if score <= -self.trade_threshold {
                candidates.push((Plan::entry(&item.symbol, Side::Sell, score), item.vol));
            }
        }

        // --- 2. Conviction order ----------------------------------------------
        candidates.sort_by(|a, b| {
            b.0.score()
                .abs()
                .partial_cmp(&a.0.score().abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        // --- 3. Correlation filter ---------------------------------------------
        let mut selected: Vec<(Plan, f64)> = Vec::new();
        for (plan, vol) in candidates {
            if selected.len() >= self.max_trades {
                break;
            }
            let correlated = inputs.price_series.get(&plan.symbol).map_or(false, |series| {
                selected.iter().any(|(kept, _)| {
                    inputs
                        .price_series
                        .get(&kept.symbol)
                        .map_or(false, |kept_series| {
                            let corr = stats::tail_correlation(series, kept_series);
                            corr.abs() > self.correlation_threshold
                        })
                })
            });
            if correlated {
                debug!(symbol = %plan.symbol, "dropped by correlation filter");
                continue;
            }
            selected.push((plan, vol));
        }

        // --- 4. Sizing -----------------------------------------------------------
        let mut equity = inputs.equity;
        if !equity.is_finite() || equity <= 0.0 {
            equity = self.fallback_equity;
        }
        let mut cash = inputs.cash;
        if !cash.is_finite() || cash <= 0.0 {
            cash = equity;
        }
        let sizing_capital = cash.min(equity / self.max_positions as f64);

        let mut plans = Vec::with_capacity(selected.len());
        for (mut plan, vol) in selected {
            let annual_vol = if vol > 0.0 { vol } else { TARGET_VOL };

            let mut dollar_size = match self.sizing_method {
                SizingMethod::Kelly => {
                    kelly_size(plan.score(), annual_vol, sizing_capital, self.max_trades)
                }
                SizingMethod::FixedFractional => {
                    (sizing_capital * self.fixed_fraction) / self.stop_loss.max(0.01)
                }
                SizingMethod::Volatility => {
                    let base_alloc = sizing_capital / self.max_trades as f64;
                    let factor = (TARGET_VOL / annual_vol).clamp(0.5, 1.5);
                    base_alloc * factor
                }
            };

            if inputs.regime.is_fear {
                dollar_size *= 0.5;
            }

            plan.target_value = dollar_size;
            plans.push(plan);
        }

        // --- 5. Memory integration ----------------------------------------------
        if let Some(mem) = memory.as_deref_mut() {
            for plan in plans.iter_mut() {
                if mem.is_disabled() {
                    break;
                }
                match mem.suggest_weight_adjustment(self.momentum_weight) {
                    Ok(MemoryDecision::Disable) => {
                        warn!("pm memory auto-disabled due to underperformance");
                        break;
                    }
                    Ok(MemoryDecision::Adjust { adjustment, .. }) => {
                        if let PlanKind::Entry { score } = &mut plan.kind {
                            *score *= 1.0 + adjustment;
                        }
                        plan.memory_influenced = true;
                    }
                    Ok(MemoryDecision::Insufficient) => {}
                    Err(e) => {
                        warn!(error = %e, "memory suggestion failed");
                    }
                }

                let obs = Observation {
                    symbol: plan.symbol.clone(),
                    signal_type: plan.side.to_string(),
                    signal_value: plan.score(),
                    outcome: Outcome::Pending,
                    pnl: 0.0,
                    confidence: plan.score().abs(),
                    memory_influenced: plan.memory_influenced,
                    timestamp: None,
                };
                if let Err(e) = mem.record(&obs, inputs.regime) {
                    warn!(symbol = %plan.symbol, error = %e, "memory record failed");
                }
            }
        }

        let notes = format!(
            "pm generated {} plans (top-{} conviction, corr-filtered)",
            plans.len(),
            self.max_trades
        );
        info!(plans = plans.len(), sizing = %self.sizing_method, "plan created");
        (plans, notes)
    }
}

/// Simplified half-Kelly sizing: |score| proxies the edge, volatility proxies
/// the odds.
fn kelly_size(score: f64, vol: f64, equity: f64, max_trades: usize) -> f64 {
    let edge = score.abs().min(0.5);
    let vol = if vol > 0.0 { vol } else { TARGET_VOL };
    let b = 1.0 / vol;

    let p = 0.5 + edge;
    let q = 1.0 - p;
    let kelly_f = ((p * b - q) / b.max(0.01)).clamp(0.0, 0.25);

    let half_kelly = kelly_f * 0.5;
    let max_alloc = equity / max_trades.max(1) as f64;
    (equity * half_kelly).min(max_alloc)
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::regime::simple;

    fn bull_regime() -> SimpleRegime {
        simple::detect(&(0..30).map(|i| 100.0 + i as f64).collect::<Vec<_>>(), Some(15.0))
    }

    fn bear_regime() -> SimpleRegime {
        simple::detect(&(0..30).map(|i| 130.0 - i as f64).collect::<Vec<_>>(), Some(15.0))
    }

    fn fear_regime() -> SimpleRegime {
        simple::detect(&(0..30).map(|i| 100.0 + i as f64).collect::<Vec<_>>(), Some(30.0))
    }

    fn ranked(symbols: &[(&str, f64)]) -> Vec<ScoutRank> {
        symbols
            .iter()
            .map(|(s, vol)| ScoutRank {
                symbol: s.to_string(),
                trend: 0.01,
                vol: *vol,
            })
            .collect()
    }

    fn agent() -> PmAgent {
        PmAgent::new(&Config::default())
    }

    fn base_inputs<'a>(
        ranked: &'a [ScoutRank],
        signals: &'a HashMap<String, f64>,
        regime: &'a SimpleRegime,
        prices: &'a HashMap<String, Vec<f64>>,
    ) -> PlanInputs<'a> {
        PlanInputs {
            ranked,
            signals,
            regime,
            held_long: HashSet::new(),
            price_series: prices,
            equity: 5000.0,
            cash: 5000.0,
        }
    }

    #[test]
    fn threshold_boundary_is_inclusive() {
        let r = ranked(&[("AT", 0.2), ("BELOW", 0.2)]);
        let mut signals = HashMap::new();
        signals.insert("AT".to_string(), 0.15); // exactly at threshold
        signals.insert("BELOW".to_string(), 0.1499);
        let prices = HashMap::new();
        let regime = bull_regime();

        let (plans, _) = agent().create_plan(&base_inputs(&r, &signals, &regime, &prices), None);
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].symbol, "AT");
        assert_eq!(plans[0].side, Side::Buy);
    }

    #[test]
    fn downtrend_drops_buys_keeps_sells() {
        let r = ranked(&[("LONG", 0.2), ("SHORT", 0.2)]);
        let mut signals = HashMap::new();
        signals.insert("LONG".to_string(), 0.4);
        signals.insert("SHORT".to_string(), -0.4);
        let prices = HashMap::new();
        let regime = bear_regime();

        let (plans, _) = agent().create_plan(&base_inputs(&r, &signals, &regime, &prices), None);
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].symbol, "SHORT");
        assert_eq!(plans[0].side, Side::Sell);
    }

    #[test]
    fn held_long_blocks_reentry_buy_but_not_short() {
        let r = ranked(&[("HELD", 0.2), ("SHORTME", 0.2)]);
        let mut signals = HashMap::new();
        signals.insert("HELD".to_string(), 0.5);
        signals.insert("SHORTME".to_string(), -0.5);
        let prices = HashMap::new();
        let regime = bull_regime();

        let mut inputs = base_inputs(&r, &signals, &regime, &prices);
        inputs.held_long.insert("HELD".to_string());
        inputs.held_long.insert("SHORTME".to_string());

        let (plans, _) = agent().create_plan(&inputs, None);
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].symbol, "SHORTME");
    }

    #[test]
    fn correlation_filter_keeps_higher_conviction() {
        let r = ranked(&[("A", 0.2), ("B", 0.2), ("C", 0.2)]);
        let mut signals = HashMap::new();
        signals.insert("A".to_string(), 0.6);
        signals.insert("B".to_string(), 0.5); // perfectly correlated with A
        signals.insert("C".to_string(), 0.4); // independent

        let base: Vec<f64> = (0..30).map(|i| 100.0 + (i as f64 * 0.7).sin() * 5.0).collect();
        let anti: Vec<f64> = (0..30).map(|i| 100.0 - (i as f64 * 1.3).cos() * 4.0).collect();
        let mut prices = HashMap::new();
        prices.insert("A".to_string(), base.clone());
        prices.insert("B".to_string(), base);
        prices.insert("C".to_string(), anti);

        let regime = bull_regime();
        let (plans, _) = agent().create_plan(&base_inputs(&r, &signals, &regime, &prices), None);
        let symbols: Vec<&str> = plans.iter().map(|p| p.symbol.as_str()).collect();
        assert!(symbols.contains(&"A"));
        assert!(!symbols.contains(&"B"), "B should be dropped as correlated with A");
        assert!(symbols.contains(&"C"));
    }

    #[test]
    fn max_trades_caps_survivors() {
        let mut cfg = Config::default();
        cfg.signals.max_trades_per_cycle = 2;
        let pm = PmAgent::new(&cfg);

        let r = ranked(&[("A", 0.2), ("B", 0.2), ("C", 0.2)]);
        let mut signals = HashMap::new();
        signals.insert("A".to_string(), 0.6);
        signals.insert("B".to_string(), 0.5);
        signals.insert("C".to_string(), 0.4);
        let prices = HashMap::new();
        let regime = bull_regime();

        let (plans, _) = pm.create_plan(&base_inputs(&r, &signals, &regime, &prices), None);
        assert_eq!(plans.len(), 2);
        // Conviction order preserved.
        assert_eq!(plans[0].symbol, "A");
        assert_eq!(plans[1].symbol, "B");
    }

    #[test]
    fn volatility_sizing_clamps_factor() {
        // max_positions=3, max_trades=3: sizing_capital = 5000/3.
        let r = ranked(&[("CALM", 0.05), ("WILD", 2.0)]);
        let mut signals = HashMap::new();
        signals.insert("CALM".to_string(), 0.5);
        signals.insert("WILD".to_string(), 0.4);
        let prices = HashMap::new();
        let regime = bull_regime();

        let (plans, _) = agent().create_plan(&base_inputs(&r, &signals, &regime, &prices), None);
        let base_alloc = (5000.0 / 3.0) / 3.0;
        let calm = plans.iter().find(|p| p.symbol == "CALM").unwrap();
        let wild = plans.iter().find(|p| p.symbol == "WILD").unwrap();
        // 0.20 / 0.05 = 4 → clamped at 1.5; 0.20 / 2.0 = 0.1 → clamped at 0.5.
        assert!((calm.target_value - base_alloc * 1.5).abs() < 1e-6);
        assert!((wild.target_value - base_alloc * 0.5).abs() < 1e-6);
    }

    #[test]
    fn fear_halves_size() {
        let r = ranked(&[("A", 0.2)]);
        let mut signals = HashMap::new();
        signals.insert("A".to_string(), 0.5);
        let prices = HashMap::new();

        let calm_regime = bull_regime();
        let (calm_plans, _) =
            agent().create_plan(&base_inputs(&r, &signals, &calm_regime, &prices), None);

        let fear = fear_regime();
        let (fear_plans, _) = agent().create_plan(&base_inputs(&r, &signals, &fear, &prices), None);

        assert!((fear_plans[0].target_value - calm_plans[0].target_value / 2.0).abs() < 1e-9);
    }

    #[test]
    fn fixed_fractional_sizing() {
        let mut cfg = Config::default();
        cfg.signals.sizing_method = SizingMethod::FixedFractional;
        cfg.signals.fixed_fraction = 0.02;
        cfg.risk.stop_loss = 0.02;
        let pm = PmAgent::new(&cfg);

        let r = ranked(&[("A", 0.2)]);
        let mut signals = HashMap::new();
        signals.insert("A".to_string(), 0.5);
        let prices = HashMap::new();
        let regime = bull_regime();

        let (plans, _) = pm.create_plan(&base_inputs(&r, &signals, &regime, &prices), None);
        // sizing_capital = min(5000, 5000/3); size = capital * 0.02 / 0.02.
        let capital: f64 = 5000.0 / 3.0;
        assert!((plans[0].target_value - capital).abs() < 1e-6);
    }

    #[test]
    fn kelly_size_bounded_by_equal_allocation() {
        let size = kelly_size(0.9, 0.05, 3000.0, 3);
        assert!(size <= 3000.0 / 3.0 + 1e-9);
        assert!(size > 0.0);
    }

    #[test]
    fn kelly_zero_edge_gives_zero_size_on_poor_odds() {
        // High vol → odds b = 0.5; with no edge the Kelly fraction is
        // negative and clamps to zero.
        let size = kelly_size(0.0, 2.0, 3000.0, 3);
        assert_eq!(size, 0.0);
        let with_edge = kelly_size(0.5, 2.0, 3000.0, 3);
        assert!(with_edge > 0.0);
    }
}
