// =============================================================================
// Scout — ranks the universe by trend and volatility to gate heavy scoring
// =============================================================================
//
// Only the top-N ranked symbols get the full four-signal treatment each
// cycle; everything below the cut is skipped entirely.
// =============================================================================

use std::collections::HashMap;

use serde::Serialize;
use tracing::debug;

use crate::indicators::stats;
use crate::market_data::BarSeries;

/// One ranked symbol: window trend and annualized volatility.
#[derive(Debug, Clone, Serialize)]
pub struct ScoutRank {
    pub symbol: String,
    /// (last_close - first_close) / first_close over the window.
    pub trend: f64,
    /// Std of bar-to-bar returns, annualized by √252.
    pub vol: f64,
}

/// Rank symbols by (trend descending, volatility ascending). Empty or
/// degenerate series are skipped.
pub fn rank(windowed: &HashMap<String, BarSeries>) -> Vec<ScoutRank> {
    let mut ranked = Vec::with_capacity(windowed.len());

    for (sym, series) in windowed {
        if series.len() < 2 {
            continue;
        }
        let closes = series.closes();
        let first = closes[0];
        let last = closes[closes.len() - 1];
        if first <= 0.0 {
            continue;
        }

        ranked.push(ScoutRank {
            symbol: sym.clone(),
            trend: (last - first) / first,
            vol: stats::annualized_vol(&closes),
        });
    }

    ranked.sort_by(|a, b| {
        b.trend
            .partial_cmp(&a.trend)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.vol.partial_cmp(&b.vol).unwrap_or(std::cmp::Ordering::Equal))
    });

    debug!(ranked = ranked.len(), "scout ranking complete");
    ranked
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::Bar;
    use chrono::Utc;

    fn series(sym: &str, closes: &[f64]) -> (String, BarSeries) {
        let bars = closes
            .iter()
            .map(|&c| Bar {
                ts: Utc::now(),
                open: c,
                high: c,
                low: c,
                close: c,
                volume: 1000.0,
            })
            .collect();
        (sym.to_string(), BarSeries::new(sym, bars))
    }

    #[test]
    fn ranks_by_trend_descending() {
        let mut data = HashMap::new();
        data.extend([series("UP", &[100.0, 102.0, 110.0])]);
        data.extend([series("FLAT", &[100.0, 100.0, 100.0])]);
        data.extend([series("DOWN", &[100.0, 98.0, 90.0])]);

        let ranked = rank(&data);
        let order: Vec<&str> = ranked.iter().map(|r| r.symbol.as_str()).collect();
        assert_eq!(order, vec!["UP", "FLAT", "DOWN"]);
    }

    #[test]
    fn equal_trend_prefers_lower_vol() {
        let mut data = HashMap::new();
        // Both end 10 % up, but one gets there with wild swings.
        data.extend([series("CALM", &[100.0, 102.0, 104.0, 106.0, 108.0, 110.0])]);
        data.extend([series("WILD", &[100.0, 120.0, 90.0, 125.0, 95.0, 110.0])]);

        let ranked = rank(&data);
        assert_eq!(ranked[0].symbol, "CALM");
        assert_eq!(ranked[1].symbol, "WILD");
    }

    #[test]
    fn short_series_are_skipped() {
        let mut data = HashMap::new();
        data.extend([series("ONE", &[100.0])]);
        data.extend([series("NONE", &[])]);
        assert!(rank(&data).is_empty());
    }
}
