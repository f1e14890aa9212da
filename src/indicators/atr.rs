// =============================================================================
// Volatility estimation — ATR as a fraction of price, with a returns proxy
// =============================================================================
//
// The risk band and the exit ladder both reason in fractions of the current
// price, so this module exposes the smoothed true range already divided by
// the last close. Bar windows too short for a true-range estimate fall back
// to the standard deviation of close-to-close returns.
// =============================================================================

use crate::indicators::stats;
use crate::market_data::Bar;

/// Smoothed-true-range volatility as a fraction of the last close (e.g.
/// 0.02 = 2 %).
///
/// The true-range path needs `period + 1` bars with real high/low spans.
/// Close-only windows (every bar's high equals its low, as synthesized
/// series have) use the std of the last `period` bar-to-bar returns instead.
/// Returns `None` when neither can be computed or the last close is
/// non-positive.
pub fn atr_pct(bars: &[Bar], period: usize) -> Option<f64> {
    let last_close = bars.last()?.close;
    if period == 0 || last_close <= 0.0 {
        return None;
    }

    let has_range = bars.iter().any(|b| b.high > b.low);
    if bars.len() > period && has_range {
        // One pass over consecutive bar pairs. The running value grows as an
        // incremental mean until `period` ranges are in, then switches to the
        // smoothed recursion so old shocks decay instead of dropping out.
        let mut smoothed = 0.0;
        for (i, pair) in bars.windows(2).enumerate() {
            let (prev, bar) = (&pair[0], &pair[1]);
            let range = bar.high - bar.low;
            let up_gap = (bar.high - prev.close).abs();
            let down_gap = (bar.low - prev.close).abs();
            // f64::max ignores NaN, so a bad bar must be rejected before the
            // fold rather than trusted to poison it.
            if !(range.is_finite() && up_gap.is_finite() && down_gap.is_finite()) {
                return None;
            }
            let true_range = range.max(up_gap).max(down_gap);

            smoothed = if i < period {
                (smoothed * i as f64 + true_range) / (i + 1) as f64
            } else {
                (smoothed * (period - 1) as f64 + true_range) / period as f64
            };
        }
        return Some(smoothed / last_close);
    }

    // Close-to-close proxy for windows without usable high/low spans.
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let returns = stats::pct_changes(&closes);
    if returns.len() < period {
        return None;
    }
    let std = stats::std_dev(&returns[returns.len() - period..]);
    if std.is_finite() {
        Some(std)
    } else {
        None
    }
}
