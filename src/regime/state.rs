// =============================================================================
// Shared regime-monitor state — read-only view of regime_state.json
// =============================================================================
//
// An external monitor task re-evaluates the market regime on a short cadence
// and writes this document. The engine only reads it: the pre-execution
// regime recheck consults the monitor's latest reading, its short history,
// and any flagged regime change. A missing or unreadable file simply means
// "no monitor data" — the caller falls back to the live HMM.
// =============================================================================

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::regime::simple::SimpleRegime;

/// Monitor's HMM reading.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorHmm {
    pub state_label: String,
    pub confidence: f64,
    pub probabilities: MonitorProbs,
    #[serde(default)]
    pub transition_risk: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorProbs {
    pub bull: f64,
    pub bear: f64,
    pub transition: f64,
}

/// BTC benchmark snapshot for the crypto-correlation filter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorBtc {
    pub price: f64,
    pub momentum_10: f64,
    #[serde(default)]
    pub trending: String,
}

/// One history entry (the monitor keeps the last 12 readings).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorReading {
    pub ts: String,
    pub label: String,
    pub confidence: f64,
    pub bear_prob: f64,
}

/// Flagged label flip between the two most recent readings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeChange {
    pub from: String,
    pub to: String,
    pub at: String,
}

/// Full monitor document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeStateDoc {
    pub timestamp: String,
    #[serde(default)]
    pub hmm: Option<MonitorHmm>,
    #[serde(default)]
    pub simple_regime: Option<SimpleRegime>,
    #[serde(default)]
    pub btc: Option<MonitorBtc>,
    #[serde(default)]
    pub history: Vec<MonitorReading>,
    #[serde(default)]
    pub regime_change: Option<RegimeChange>,
}

impl RegimeStateDoc {
    /// Load the monitor document; `None` when missing or unreadable.
    pub fn load(path: impl AsRef<Path>) -> Option<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).ok()?;
        match serde_json::from_str(&content) {
            Ok(doc) => Some(doc),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "regime state unreadable");
                None
            }
        }
    }

    /// Rise in bear probability across the last three readings, when there
    /// are at least three.
    pub fn recent_bear_prob_rise(&self) -> Option<f64> {
        if self.history.len() < 3 {
            return None;
        }
        let tail = &self.history[self.history.len() - 3..];
        Some(tail[2].bear_prob - tail[0].bear_prob)
    }
}
