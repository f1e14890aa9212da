// =============================================================================
// Momentum signal — distance of the last close from its short SMA
// =============================================================================

use crate::indicators::stats;
use crate::market_data::BarSeries;

/// Raw momentum score: (last_close - SMA_short) / SMA_short.
///
/// Returns 0.0 when there is not enough history or the SMA is zero.
pub fn score(series: &BarSeries, short: usize) -> f64 {
    if series.len() < short {
        return 0.0;
    }
    let closes = series.closes();
    let last = match closes.last() {
        Some(&c) => c,
        None => return 0.0,
    };
    match stats::sma(&closes, short) {
        Some(sma) if sma != 0.0 => (last - sma) / sma,
        _ => 0.0,
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::Bar;
    use chrono::Utc;

    fn series(closes: &[f64]) -> BarSeries {
        let bars = closes
            .iter()
            .map(|&c| Bar {
                ts: Utc::now(),
                open: c,
                high: c,
                low: c,
                close: c,
                volume: 0.0,
            })
            .collect();
        BarSeries::new("TEST", bars)
    }

    #[test]
    fn rising_closes_give_positive_momentum() {
        let s = series(&[100.0, 101.0, 102.0, 103.0, 104.0, 110.0]);
        assert!(score(&s, 5) > 0.0);
    }

    #[test]
    fn falling_closes_give_negative_momentum() {
        let s = series(&[110.0, 108.0, 106.0, 104.0, 102.0, 95.0]);
        assert!(score(&s, 5) < 0.0);
    }

    #[test]
    fn flat_closes_give_zero() {
        let s = series(&[100.0; 10]);
        assert_eq!(score(&s, 5), 0.0);
    }

    #[test]
    fn insufficient_history_gives_zero() {
        let s = series(&[100.0, 101.0]);
        assert_eq!(score(&s, 5), 0.0);
    }

    #[test]
    fn exact_value() {
        // SMA(5) of the last five closes = 102, last = 110.
        let s = series(&[100.0, 101.0, 102.0, 103.0, 104.0]);
        let sma = 102.0;
        let expected = (104.0 - sma) / sma;
        assert!((score(&s, 5) - expected).abs() < 1e-12);
    }
}
