// =============================================================================
// Exit Manager — layered exit ladder + portfolio kill switch
// =============================================================================
//
// Evaluated every cycle against each open position, in order:
//   1. Portfolio kill switch — total unrealized loss >= portfolio_kill_pct of
//      equity closes EVERY position, full stop.
//   2. Take profit           — entry PnL >= take_profit.
//   3. ATR stop              — entry PnL <= -stop, where the stop is
//      ATR-derived (clamped to [0.5 %, 5 %]) with the hard stop as fallback.
//   4. Trailing stop         — armed once peak gain >= trailing_trigger;
//      closes on a trailing_pct giveback from the watermark. Once peak gain
//      reaches wide_trail_trigger the wider wide_trail_pct distance applies,
//      letting big winners breathe.
//   5. Breakeven stop        — armed once peak gain >= breakeven_trigger;
//      closes if the position falls back to flat or negative.
//
// Longs measure from the high watermark, shorts from the low watermark.
// =============================================================================

use std::collections::HashMap;

use tracing::{info, warn};

use crate::config::Config;
use crate::indicators::atr;
use crate::market_data::BarSeries;
use crate::portfolio::Portfolio;
use crate::types::{ExitReason, Plan, Side};

/// Stop-percent clamp bounds for the ATR-derived stop.
const ATR_STOP_MIN: f64 = 0.005;
const ATR_STOP_MAX: f64 = 0.05;

pub struct ExitManager {
    hard_stop: f64,
    atr_multiplier: f64,
    atr_period: usize,
    breakeven_trigger: f64,
    trail_trigger: f64,
    trail_pct: f64,
    wide_trail_trigger: f64,
    wide_trail_pct: f64,
    take_profit: f64,
    portfolio_kill_pct: f64,
    max_positions: usize,
}

impl ExitManager {
    pub fn new(cfg: &Config) -> Self {
        Self {
            hard_stop: cfg.risk.stop_loss,
            atr_multiplier: cfg.risk.atr_stop_multiplier,
            atr_period: cfg.risk.atr_period,
            breakeven_trigger: cfg.risk.trailing_breakeven_trigger,
            trail_trigger: cfg.risk.trailing_trigger,
            trail_pct: cfg.risk.trailing_pct,
            wide_trail_trigger: cfg.risk.wide_trail_trigger,
            wide_trail_pct: cfg.risk.wide_trail_pct,
            take_profit: cfg.risk.take_profit,
            portfolio_kill_pct: cfg.risk.portfolio_kill_pct,
            max_positions: cfg.risk.max_positions,
        }
    }

    /// ATR-derived stop distance as a fraction of entry price, clamped, with
    /// the hard stop as fallback when ATR cannot be computed.
    fn atr_stop(&self, symbol: &str, bar_windows: &HashMap<String, BarSeries>) -> f64 {
        let Some(series) = bar_windows.get(symbol) else {
            return self.hard_stop;
        };
        match atr::atr_pct(&series.bars, self.atr_period) {
            Some(pct) if pct > 0.0 => (pct * self.atr_multiplier).clamp(ATR_STOP_MIN, ATR_STOP_MAX),
            _ => self.hard_stop,
        }
    }

    /// Evaluate all open positions and return the forced exits for this
    /// cycle.
    pub fn check_exits(
        &self,
        portfolio: &Portfolio,
        bar_windows: &HashMap<String, BarSeries>,
    ) -> Vec<Plan> {
        let mut exits = Vec::new();

        // --- 1. Portfolio kill switch ------------------------------------------
        let total_unrealized = portfolio.total_unrealized();
        let equity = portfolio.state.equity;
        if equity > 0.0 && total_unrealized < 0.0 {
            let loss_pct = total_unrealized.abs() / equity;
            if loss_pct >= self.portfolio_kill_pct {
                warn!(
                    loss_pct,
                    threshold = self.portfolio_kill_pct,
                    "PORTFOLIO KILL SWITCH — closing all positions"
                );
                for pos in portfolio.state.positions.values() {
                    let side = if pos.is_long() { Side::Sell } else { Side::Buy };
                    exits.push(Plan::exit(&pos.symbol, side, ExitReason::KillSwitch));
                }
                return exits;
            }
        }

        // --- 2..5 Per-position ladder ------------------------------------------
        for pos in portfolio.state.positions.values() {
            if pos.current_price <= 0.0 || pos.avg_price <= 0.0 {
                continue;
            }

            let atr_stop = self.atr_stop(&pos.symbol, bar_windows);
            let is_long = pos.is_long();
            let close_side = if is_long { Side::Sell } else { Side::Buy };

            let (entry_pnl_pct, peak_gain, giveback) = if is_long {
                let entry_pnl = (pos.current_price - pos.avg_price) / pos.avg_price;
                let hwm = if pos.highest_price > 0.0 {
                    pos.highest_price
                } else {
                    pos.avg_price
                };
                let peak = (hwm - pos.avg_price) / pos.avg_price;
                let drawdown = (pos.current_price - hwm) / hwm;
                (entry_pnl, peak, -drawdown)
            } else {
                let entry_pnl = (pos.avg_price - pos.current_price) / pos.avg_price;
                let lwm = if pos.lowest_price > 0.0 {
                    pos.lowest_price
                } else {
                    pos.avg_price
                };
                let peak = (pos.avg_price - lwm) / pos.avg_price;
                let drawup = (pos.current_price - lwm) / lwm;
                (entry_pnl, peak, drawup)
            };

            // Take profit.
            if entry_pnl_pct >= self.take_profit {
                info!(
                    symbol = %pos.symbol,
                    entry_pnl_pct,
                    take_profit = self.take_profit,
                    "exit: take profit"
                );
                exits.push(Plan::exit(&pos.symbol, close_side, ExitReason::TakeProfit));
                continue;
            }

            // ATR stop.
            if entry_pnl_pct <= -atr_stop {
                info!(
                    symbol = %pos.symbol,
                    entry_pnl_pct,
                    atr_stop,
                    "exit: ATR stop"
                );
                exits.push(Plan::exit(&pos.symbol, close_side, ExitReason::AtrStop));
                continue;
            }

            // Trailing stop (wide tier once the gain is large enough).
            if peak_gain >= self.trail_trigger {
                let trail_distance = if peak_gain >= self.wide_trail_trigger {
                    self.wide_trail_pct
                } else {
                    self.trail_pct
                };
                if giveback >= trail_distance {
                    info!(
                        symbol = %pos.symbol,
                        peak_gain,
                        giveback,
                        trail_distance,
                        "exit: trailing stop"
                    );
                    exits.push(Plan::exit(&pos.symbol, close_side, ExitReason::TrailingStop));
                    continue;
                }
            } else if peak_gain >= self.breakeven_trigger && entry_pnl_pct <= 0.0 {
                // Breakeven stop.
                info!(
                    symbol = %pos.symbol,
                    peak_gain,
                    entry_pnl_pct,
                    "exit: breakeven stop"
                );
                exits.push(Plan::exit(&pos.symbol, close_side, ExitReason::BreakevenStop));
                continue;
            }
        }

        exits
    }

    /// Cap new entries to the open position slots, keeping the highest
    /// conviction plans.
    pub fn check_max_positions(&self, portfolio: &Portfolio, new_plans: Vec<Plan>) -> Vec<Plan> {
        let current = portfolio.state.positions.len();
        let available = self.max_positions.saturating_sub(current);

        if available >= new_plans.len() {
            return new_plans;
        }

        info!(
            current,
            max = self.max_positions,
            allowed = available,
            requested = new_plans.len(),
            "position cap: trimming new entries"
        );

        let mut sorted = new_plans;
        sorted.sort_by(|a, b| {
            b.score()
                .abs()
                .partial_cmp(&a.score().abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        sorted.truncate(available);
        sorted
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::portfolio::Portfolio;

    fn setup(kill_pct: f64) -> (Portfolio, ExitManager, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = Config::default();
        cfg.logging.portfolio_file = dir
            .path()
            .join("portfolio.json")
            .to_string_lossy()
            .into_owned();
        cfg.risk.equity = 5000.0;
        cfg.execution.slippage_bps = 0.0;
        cfg.execution.commission = 0.0;
        cfg.risk.portfolio_kill_pct = kill_pct;
        cfg.risk.stop_loss = 0.02;
        cfg.risk.trailing_trigger = 0.025;
        cfg.risk.trailing_pct = 0.012;
        cfg.risk.trailing_breakeven_trigger = 0.015;
        cfg.risk.take_profit = 0.05;

        let portfolio = Portfolio::load(&cfg);
        let manager = ExitManager::new(&cfg);
        (portfolio, manager, dir)
    }

    fn mark(p: &mut Portfolio, sym: &str, price: f64) {
        let mut prices = HashMap::new();
        prices.insert(sym.to_string(), price);
        p.mark_to_market(&prices);
    }

    fn mark_all(p: &mut Portfolio, quotes: &[(&str, f64)]) {
        let prices: HashMap<String, f64> =
            quotes.iter().map(|(s, v)| (s.to_string(), *v)).collect();
        p.mark_to_market(&prices);
    }

    #[test]
    fn kill_switch_closes_everything() {
        // Seed scenario: long 10 @ 100 now 92, long 20 @ 50 now 46.
        // Unrealized = -80 + -80 = -160; kill_pct = 0.03.
        let (mut p, mgr, _dir) = setup(0.03);
        p.execute("AAA", Side::Buy, 100.0, 10, 0.0);
        p.execute("BBB", Side::Buy, 50.0, 20, 0.0);
        mark_all(&mut p, &[("AAA", 92.0), ("BBB", 46.0)]);

        let exits = mgr.check_exits(&p, &HashMap::new());
        assert_eq!(exits.len(), 2);
        assert!(exits.iter().all(|e| e.side == Side::Sell));
        assert!(exits.iter().all(|e| matches!(
            e.kind,
            crate::types::PlanKind::Exit {
                reason: ExitReason::KillSwitch
            }
        )));
    }

    #[test]
    fn atr_stop_fires_on_long() {
        // Entry 100, current 97 → -3 %; no bars, so the 2 % hard stop applies.
        let (mut p, mgr, _dir) = setup(0.50);
        p.execute("AAA", Side::Buy, 100.0, 10, 0.0);
        mark(&mut p, "AAA", 97.0);

        let exits = mgr.check_exits(&p, &HashMap::new());
        assert_eq!(exits.len(), 1);
        assert_eq!(exits[0].side, Side::Sell);
        assert!(matches!(
            exits[0].kind,
            crate::types::PlanKind::Exit {
                reason: ExitReason::AtrStop
            }
        ));
    }

    #[test]
    fn trailing_stop_fires_after_peak_gain() {
        // Long entry 50, highest 60 (peak +20 %), current 58.5 → giveback
        // from watermark 2.5 % >= 1.2 % trail. Take profit and the wide
        // tier are pushed out of the way so the narrow trail decides.
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = Config::default();
        cfg.logging.portfolio_file = dir
            .path()
            .join("portfolio.json")
            .to_string_lossy()
            .into_owned();
        cfg.execution.slippage_bps = 0.0;
        cfg.execution.commission = 0.0;
        cfg.risk.portfolio_kill_pct = 0.50;
        cfg.risk.take_profit = 0.50;
        cfg.risk.trailing_trigger = 0.025;
        cfg.risk.trailing_pct = 0.012;
        cfg.risk.wide_trail_trigger = 0.50;

        let mut p = Portfolio::load(&cfg);
        let mgr = ExitManager::new(&cfg);
        p.execute("AAA", Side::Buy, 50.0, 10, 0.0);
        mark(&mut p, "AAA", 60.0);
        mark(&mut p, "AAA", 58.5);

        let exits = mgr.check_exits(&p, &HashMap::new());
        assert_eq!(exits.len(), 1);
        assert!(matches!(
            exits[0].kind,
            crate::types::PlanKind::Exit {
                reason: ExitReason::TrailingStop
            }
        ));
    }

    #[test]
    fn wide_trail_lets_big_winner_breathe() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = Config::default();
        cfg.logging.portfolio_file = dir
            .path()
            .join("portfolio.json")
            .to_string_lossy()
            .into_owned();
        cfg.execution.slippage_bps = 0.0;
        cfg.execution.commission = 0.0;
        cfg.risk.portfolio_kill_pct = 0.50;
        cfg.risk.take_profit = 0.50; // keep TP out of the way
        cfg.risk.trailing_trigger = 0.025;
        cfg.risk.trailing_pct = 0.012;
        cfg.risk.wide_trail_trigger = 0.04;
        cfg.risk.wide_trail_pct = 0.02;

        let mut p = Portfolio::load(&cfg);
        let mgr = ExitManager::new(&cfg);

        // Peak gain 10 % (>= wide trigger). Giveback 1.5 % — would hit the
        // narrow 1.2 % trail, but the wide 2 % distance holds.
        p.execute("AAA", Side::Buy, 100.0, 10, 0.0);
        mark(&mut p, "AAA", 110.0);
        mark(&mut p, "AAA", 108.35);

        let exits = mgr.check_exits(&p, &HashMap::new());
        assert!(exits.is_empty(), "wide trail should still be holding");

        // A 2.5 % giveback breaches the wide trail.
        mark(&mut p, "AAA", 107.25);
        let exits = mgr.check_exits(&p, &HashMap::new());
        assert_eq!(exits.len(), 1);
    }

    #[test]
    fn breakeven_stop_fires_when_gain_round_trips() {
        // Peak +2 % (>= 1.5 % breakeven trigger, < 2.5 % trail trigger),
        // now back to entry.
        let (mut p, mgr, _dir) = setup(0.50);
        p.execute("AAA", Side::Buy, 100.0, 10, 0.0);
        mark(&mut p, "AAA", 102.0);
        mark(&mut p, "AAA", 100.0);

        let exits = mgr.check_exits(&p, &HashMap::new());
        assert_eq!(exits.len(), 1);
        assert!(matches!(
            exits[0].kind,
            crate::types::PlanKind::Exit {
                reason: ExitReason::BreakevenStop
            }
        ));
    }

    #[test]
    fn take_profit_fires_first() {
        let (mut p, mgr, _dir) = setup(0.50);
        p.execute("AAA", Side::Buy, 100.0, 10, 0.0);
        mark(&mut p, "AAA", 105.5);

        let exits = mgr.check_exits(&p, &HashMap::new());
        assert_eq!(exits.len(), 1);
        assert!(matches!(
            exits[0].kind,
            crate::types::PlanKind::Exit {
                reason: ExitReason::TakeProfit
            }
        ));
    }

    #[test]
    fn short_position_take_profit_and_stop() {
        let (mut p, mgr, _dir) = setup(0.50);
        p.execute("SSS", Side::Sell, 100.0, 10, 0.0);

        // Price falls 6 % → short is up 6 % → take profit (BUY to cover).
        mark(&mut p, "SSS", 94.0);
        let exits = mgr.check_exits(&p, &HashMap::new());
        assert_eq!(exits.len(), 1);
        assert_eq!(exits[0].side, Side::Buy);

        // Fresh short that rallies against us 3 % → ATR/hard stop.
        let (mut p2, mgr2, _dir2) = setup(0.50);
        p2.execute("SSS", Side::Sell, 100.0, 10, 0.0);
        mark(&mut p2, "SSS", 103.0);
        let exits = mgr2.check_exits(&p2, &HashMap::new());
        assert_eq!(exits.len(), 1);
        assert_eq!(exits[0].side, Side::Buy);
        assert!(matches!(
            exits[0].kind,
            crate::types::PlanKind::Exit {
                reason: ExitReason::AtrStop
            }
        ));
    }

    #[test]
    fn healthy_position_is_left_alone() {
        let (mut p, mgr, _dir) = setup(0.50);
        p.execute("AAA", Side::Buy, 100.0, 10, 0.0);
        mark(&mut p, "AAA", 101.0);
        assert!(mgr.check_exits(&p, &HashMap::new()).is_empty());
    }

    #[test]
    fn max_positions_keeps_highest_conviction() {
        let (mut p, mgr, _dir) = setup(0.50);
        // Fill 2 of 3 slots.
        p.execute("AAA", Side::Buy, 100.0, 5, 0.0);
        p.execute("BBB", Side::Buy, 100.0, 5, 0.0);

        let plans = vec![
            Plan::entry("CCC", Side::Buy, 0.3),
            Plan::entry("DDD", Side::Buy, 0.7),
        ];
        let kept = mgr.check_max_positions(&p, plans);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].symbol, "DDD");
    }

    #[test]
    fn max_positions_noop_when_room() {
        let (p, mgr, _dir) = setup(0.50);
        let plans = vec![
            Plan::entry("CCC", Side::Buy, 0.3),
            Plan::entry("DDD", Side::Buy, 0.7),
        ];
        let kept = mgr.check_max_positions(&p, plans);
        assert_eq!(kept.len(), 2);
        // Order untouched when nothing is trimmed.
        assert_eq!(kept[0].symbol, "CCC");
    }
}
