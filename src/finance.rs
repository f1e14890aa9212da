// =============================================================================
// Finance sub-review — second opinion on single-warning "caution" trades
// =============================================================================
//
// Invoked only when the challenge system returns exactly one warning. A
// deterministic rule bundle rejects the trade when the portfolio is already
// stressed or the signal is not strong enough to justify the flagged risk.
// =============================================================================

use tracing::info;

use crate::store::Database;
use crate::types::{Plan, Side};

/// Minimum cash-to-equity ratio for a cautioned trade.
const MIN_CASH_RATIO: f64 = 0.15;

/// Daily per-symbol loss beyond which a cautioned re-entry is refused.
const MAX_SYMBOL_DAY_LOSS: f64 = -50.0;

/// Portfolio facts the review needs.
pub struct FinanceContext<'a> {
    pub cash: f64,
    pub equity: f64,
    pub open_positions: usize,
    pub max_positions: usize,
    pub caution_min_score: f64,
    /// "YYYY-MM-DD" in the market timezone.
    pub today: &'a str,
}

/// Review a cautioned plan. Returns `(approved, reason)`.
pub fn review(plan: &Plan, ctx: &FinanceContext<'_>, db: &Database) -> (bool, String) {
    let cash_ratio = ctx.cash / ctx.equity.max(1.0);
    if cash_ratio < MIN_CASH_RATIO {
        return (
            false,
            format!("cash ratio {:.1}% too low for cautioned trade", cash_ratio * 100.0),
        );
    }

    if plan.side == Side::Buy && ctx.open_positions >= ctx.max_positions {
        return (
            false,
            format!("at max positions ({})", ctx.max_positions),
        );
    }

    if plan.score().abs() < ctx.caution_min_score {
        return (
            false,
            format!(
                "score {:.3} too weak for cautioned trade (min {:.2})",
                plan.score(),
                ctx.caution_min_score
            ),
        );
    }

    if let Ok(today_pnl) = db.symbol_pnl_on(&plan.symbol, ctx.today) {
        if today_pnl < MAX_SYMBOL_DAY_LOSS {
            return (
                false,
                format!("already lost ${today_pnl:.2} on {} today", plan.symbol),
            );
        }
    }

    info!(
        symbol = %plan.symbol,
        side = %plan.side,
        score = plan.score(),
        "finance review approved cautioned trade"
    );
    (true, "finance review approved".to_string())
}
