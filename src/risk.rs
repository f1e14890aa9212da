// =============================================================================
// Risk — volatility band, sector sentiment, and net-position cap
// =============================================================================
//
// Per BUY candidate: compute ATR% from the bar window and drop symbols whose
// volatility falls outside [min_atr_pct, max_atr_pct]; then consult the
// sector-news filter. Forced exits and SELLs skip both checks.
//
// Finally the net post-plan position count (existing - exits + new entries)
// must not exceed max_positions, or the whole evaluation fails.
// =============================================================================

use std::collections::HashMap;

use tracing::{info, warn};

use crate::config::Config;
use crate::indicators::atr;
use crate::market_data::BarSeries;
use crate::sectors::SectorFilter;
use crate::types::{Plan, Side};

/// Outcome of the risk evaluation.
#[derive(Debug, Clone)]
pub struct RiskVerdict {
    pub ok: bool,
    pub notes: String,
}

pub struct RiskAgent {
    max_positions: usize,
    max_atr_pct: f64,
    min_atr_pct: f64,
    atr_period: usize,
    sector_filter: SectorFilter,
}

impl RiskAgent {
    pub fn new(cfg: &Config) -> Self {
        Self {
            max_positions: cfg.risk.max_positions,
            max_atr_pct: cfg.risk.max_atr_pct,
            min_atr_pct: cfg.risk.min_atr_pct,
            atr_period: cfg.risk.atr_period,
            sector_filter: SectorFilter::new(cfg.risk.sector_filter_threshold),
        }
    }

    /// Filter `plans` in place and check the net position cap.
    pub async fn evaluate(
        &self,
        plans: &mut Vec<Plan>,
        bar_windows: &HashMap<String, BarSeries>,
        existing_positions: usize,
    ) -> RiskVerdict {
        let mut kept: Vec<Plan> = Vec::with_capacity(plans.len());
        let mut rejected: Vec<String> = Vec::new();

        for plan in plans.drain(..) {
            // Exits and sells bypass the entry-side filters.
            if plan.is_exit() || plan.side == Side::Sell {
                kept.push(plan);
                continue;
            }

            // --- Volatility band ------------------------------------------------
            let atr_pct = bar_windows
                .get(&plan.symbol)
                .and_then(|series| atr::atr_pct(&series.bars, self.atr_period));

            if let Some(pct) = atr_pct {
                if pct > self.max_atr_pct {
                    warn!(
                        symbol = %plan.symbol,
                        atr_pct = pct,
                        max = self.max_atr_pct,
                        "volatility filter: too volatile — rejected"
                    );
                    rejected.push(plan.symbol);
                    continue;
                }
                if pct < self.min_atr_pct {
                    warn!(
                        symbol = %plan.symbol,
                        atr_pct = pct,
                        min = self.min_atr_pct,
                        "volatility filter: too flat — rejected"
                    );
                    rejected.push(plan.symbol);
                    continue;
                }
            }

            // --- Sector sentiment ----------------------------------------------
            let verdict = self.sector_filter.check(&plan.symbol).await;
            if !verdict.passed {
                rejected.push(plan.symbol);
                continue;
            }

            kept.push(plan);
        }

        *plans = kept;

        // --- Net position cap ---------------------------------------------------
        let exits = plans.iter().filter(|p| p.is_exit()).count();
        let new_entries = plans.len() - exits;
        let net_positions = existing_positions.saturating_sub(exits) + new_entries;

        let ok = net_positions <= self.max_positions;
        let mut notes = format!(
            "risk: {existing_positions} existing - {exits} exits + {new_entries} new = \
             {net_positions} (max {})",
            self.max_positions
        );
        if !rejected.is_empty() {
            notes.push_str(&format!(
                " | volatility/sector rejected {}: {}",
                rejected.len(),
                rejected.join(", ")
            ));
        }
        if !ok {
            notes.push_str(" EXCEEDED");
        }

        info!(ok, %notes, "risk evaluation");
        RiskVerdict { ok, notes }
    }
}
