// =============================================================================
// Mean-reversion signal — distance of the long SMA from the last close
// =============================================================================
//
// Positive score = price below its long average (oversold, upward
// mean-reversion pressure). Negative = stretched above the average.
// =============================================================================

use crate::indicators::stats;
use crate::market_data::BarSeries;

/// Raw mean-reversion score: (SMA_long - last_close) / SMA_long.
///
/// Returns 0.0 when there is not enough history or the SMA is zero.
pub fn score(series: &BarSeries, long: usize) -> f64 {
    if series.len() < long {
        return 0.0;
    }
    let closes = series.closes();
    let last = match closes.last() {
        Some(&c) => c,
        None => return 0.0,
    };
    match stats::sma(&closes, long) {
        Some(sma) if sma != 0.0 => (sma - last) / sma,
        _ => 0.0,
    }
}
