// =============================================================================
// Market data types — OHLCV bars and the trading-window filter
// =============================================================================

pub mod provider;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Data types
// ---------------------------------------------------------------------------

/// A single OHLCV bar. Timestamps are stored in UTC and converted to the
/// market timezone at the comparison boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bar {
    pub ts: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// All bars fetched for one symbol, oldest first.
#[derive(Debug, Clone, Default)]
pub struct BarSeries {
    pub symbol: String,
    pub bars: Vec<Bar>,
}

impl BarSeries {
    pub fn new(symbol: impl Into<String>, bars: Vec<Bar>) -> Self {
        Self {
            symbol: symbol.into(),
            bars,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    /// Closing prices, oldest first.
    pub fn closes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.close).collect()
    }

    /// Volumes, oldest first.
    pub fn volumes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.volume).collect()
    }

    pub fn last_close(&self) -> Option<f64> {
        self.bars.last().map(|b| b.close)
    }
}

// ---------------------------------------------------------------------------
// Trading-window filter
// ---------------------------------------------------------------------------

/// Parse an "HH:MM" clock string.
pub fn parse_hhmm(s: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M").with_context(|| format!("invalid HH:MM time: {s}"))
}

/// Keep only bars whose market-local time falls within `[start, end]`.
pub fn filter_trading_window(
    series: &BarSeries,
    tz: Tz,
    start: NaiveTime,
    end: NaiveTime,
) -> BarSeries {
    let bars = series
        .bars
        .iter()
        .filter(|b| {
            let local = b.ts.with_timezone(&tz).time();
            local >= start && local <= end
        })
        .cloned()
        .collect();
    BarSeries::new(series.symbol.clone(), bars)
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn bar_at(tz: Tz, y: i32, mo: u32, d: u32, h: u32, mi: u32, close: f64) -> Bar {
        let local = tz.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap();
        Bar {
            ts: local.with_timezone(&Utc),
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 1000.0,
        }
    }

    #[test]
    fn parse_hhmm_accepts_clock_strings() {
        assert_eq!(
            parse_hhmm("09:30").unwrap(),
            NaiveTime::from_hms_opt(9, 30, 0).unwrap()
        );
        assert!(parse_hhmm("930").is_err());
    }

    #[test]
    fn window_filter_keeps_only_in_window_bars() {
        let tz: Tz = "America/New_York".parse().unwrap();
        let series = BarSeries::new(
            "AAPL",
            vec![
                bar_at(tz, 2026, 3, 2, 9, 0, 100.0),  // pre-open
                bar_at(tz, 2026, 3, 2, 9, 30, 101.0), // open (inclusive)
                bar_at(tz, 2026, 3, 2, 12, 0, 102.0),
                bar_at(tz, 2026, 3, 2, 16, 0, 103.0), // close (inclusive)
                bar_at(tz, 2026, 3, 2, 17, 0, 104.0), // after hours
            ],
        );

        let start = parse_hhmm("09:30").unwrap();
        let end = parse_hhmm("16:00").unwrap();
        let windowed = filter_trading_window(&series, tz, start, end);

        assert_eq!(windowed.len(), 3);
        assert_eq!(windowed.closes(), vec![101.0, 102.0, 103.0]);
    }

    #[test]
    fn window_filter_on_empty_series() {
        let tz: Tz = "America/New_York".parse().unwrap();
        let series = BarSeries::new("AAPL", vec![]);
        let windowed = filter_trading_window(
            &series,
            tz,
            parse_hhmm("09:30").unwrap(),
            parse_hhmm("16:00").unwrap(),
        );
        assert!(windowed.is_empty());
    }
}
