// =============================================================================
// Simple regime classifier — SPY vs its 20-period SMA, VIX fear gauge
// =============================================================================

use serde::{Deserialize, Serialize};

/// VIX level above which the market counts as fearful.
const VIX_FEAR_LEVEL: f64 = 25.0;

/// Distance from the 20-SMA (as a fraction) that separates bull/bear from
/// sideways.
const TREND_BAND: f64 = 0.01;

/// Coarse market regime consumed by the PM filter and agent memory tagging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimpleRegime {
    /// "bull" | "bear" | "sideways".
    pub spy_trend: String,
    /// "low" | "high".
    pub vix_level: String,
    /// Combined label, e.g. "bull_low_vol".
    pub label: String,
    pub is_downtrend: bool,
    pub is_fear: bool,
}

impl Default for SimpleRegime {
    fn default() -> Self {
        detect(&[], None)
    }
}

/// Classify the regime from SPY closes and the latest VIX reading.
pub fn detect(spy_closes: &[f64], vix: Option<f64>) -> SimpleRegime {
    let ma20 = if spy_closes.len() >= 20 {
        spy_closes[spy_closes.len() - 20..].iter().sum::<f64>() / 20.0
    } else if !spy_closes.is_empty() {
        spy_closes.iter().sum::<f64>() / spy_closes.len() as f64
    } else {
        0.0
    };

    let current = spy_closes.last().copied().unwrap_or(0.0);
    let pct_from_ma = if ma20 > 0.0 { (current - ma20) / ma20 } else { 0.0 };

    let spy_trend = if pct_from_ma > TREND_BAND {
        "bull"
    } else if pct_from_ma < -TREND_BAND {
        "bear"
    } else {
        "sideways"
    };

    let vix_val = vix.unwrap_or(20.0);
    let is_fear = vix_val > VIX_FEAR_LEVEL;
    let vix_level = if is_fear { "high" } else { "low" };

    SimpleRegime {
        spy_trend: spy_trend.to_string(),
        vix_level: vix_level.to_string(),
        label: format!("{spy_trend}_{vix_level}_vol"),
        is_downtrend: current > 0.0 && ma20 > 0.0 && current < ma20,
        is_fear,
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rising_spy_is_bull() {
        let closes: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        let r = detect(&closes, Some(15.0));
        assert_eq!(r.spy_trend, "bull");
        assert_eq!(r.label, "bull_low_vol");
        assert!(!r.is_downtrend);
        assert!(!r.is_fear);
    }

    #[test]
    fn falling_spy_is_bear_and_downtrend() {
        let closes: Vec<f64> = (0..30).map(|i| 130.0 - i as f64).collect();
        let r = detect(&closes, Some(30.0));
        assert_eq!(r.spy_trend, "bear");
        assert!(r.is_downtrend);
        assert!(r.is_fear);
        assert_eq!(r.label, "bear_high_vol");
    }

    #[test]
    fn flat_spy_is_sideways() {
        let closes = vec![100.0; 30];
        let r = detect(&closes, None);
        assert_eq!(r.spy_trend, "sideways");
        assert!(!r.is_downtrend);
    }

    #[test]
    fn vix_boundary_is_exclusive() {
        let closes = vec![100.0; 30];
        assert!(!detect(&closes, Some(25.0)).is_fear);
        assert!(detect(&closes, Some(25.1)).is_fear);
    }

    #[test]
    fn empty_data_defaults_sane() {
        let r = detect(&[], None);
        assert_eq!(r.spy_trend, "sideways");
        assert!(!r.is_downtrend);
        assert!(!r.is_fear);
    }
}
