// =============================================================================
// Breakout signal — position of the last close in the prior bars' range
// =============================================================================
//
// The last close is located within the high/low range of the preceding
// `lookback` bars and mapped linearly to [-1, +1]. When history permits, the
// current bar is excluded from the range so a fresh high does not pin the
// score at +1 on the bar that defines it.
// =============================================================================

use crate::market_data::BarSeries;

/// Raw breakout score in [-1, +1]. Returns 0.0 on short history or a
/// degenerate (zero-width) range.
pub fn score(series: &BarSeries, lookback: usize) -> f64 {
    if lookback == 0 || series.len() < lookback {
        return 0.0;
    }

    let bars = &series.bars;
    let last_close = bars[bars.len() - 1].close;

    // Range over the prior `lookback` bars, excluding the current bar when
    // there is enough history to do so.
    let range = if bars.len() > lookback {
        &bars[bars.len() - 1 - lookback..bars.len() - 1]
    } else {
        &bars[bars.len() - lookback..]
    };

    let mut high = f64::NEG_INFINITY;
    let mut low = f64::INFINITY;
    for bar in range {
        if bar.high > high {
            high = bar.high;
        }
        if bar.low < low {
            low = bar.low;
        }
    }

    if !high.is_finite() || !low.is_finite() || high <= low {
        return 0.0;
    }

    let position = (last_close - low) / (high - low);
    (2.0 * position - 1.0).clamp(-1.0, 1.0)
}
