// =============================================================================
// Shared types used across the Meridian trading engine
// =============================================================================

use serde::{Deserialize, Serialize};

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// Side implied by the sign of a composite score.
    pub fn from_score(score: f64) -> Self {
        if score >= 0.0 {
            Self::Buy
        } else {
            Self::Sell
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

/// Why the exit manager forced a position closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    KillSwitch,
    TakeProfit,
    AtrStop,
    TrailingStop,
    BreakevenStop,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::KillSwitch => write!(f, "KillSwitch"),
            Self::TakeProfit => write!(f, "TakeProfit"),
            Self::AtrStop => write!(f, "AtrStop"),
            Self::TrailingStop => write!(f, "TrailingStop"),
            Self::BreakevenStop => write!(f, "BreakevenStop"),
        }
    }
}

/// What a plan is: a scored new entry, or a forced exit that bypasses all
/// entry-side gates and executes ahead of entries in the same cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PlanKind {
    Entry { score: f64 },
    Exit { reason: ExitReason },
}

/// A single planned order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub symbol: String,
    pub side: Side,
    pub kind: PlanKind,
    /// Dollar size target for entries; ignored for exits (exits close the
    /// full position).
    pub target_value: f64,
    /// Set when agent memory adjusted this plan's score.
    pub memory_influenced: bool,
}

impl Plan {
    pub fn entry(symbol: impl Into<String>, side: Side, score: f64) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            kind: PlanKind::Entry { score },
            target_value: 0.0,
            memory_influenced: false,
        }
    }

    pub fn exit(symbol: impl Into<String>, side: Side, reason: ExitReason) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            kind: PlanKind::Exit { reason },
            target_value: 0.0,
            memory_influenced: false,
        }
    }

    pub fn is_exit(&self) -> bool {
        matches!(self.kind, PlanKind::Exit { .. })
    }

    /// Conviction score for entries, 0.0 for exits.
    pub fn score(&self) -> f64 {
        match self.kind {
            PlanKind::Entry { score } => score,
            PlanKind::Exit { .. } => 0.0,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn side_from_score_sign() {
        assert_eq!(Side::from_score(0.4), Side::Buy);
        assert_eq!(Side::from_score(-0.4), Side::Sell);
        assert_eq!(Side::from_score(0.0), Side::Buy);
    }

    #[test]
    fn plan_kind_accessors() {
        let entry = Plan::entry("AAPL", Side::Buy, 0.42);
        assert!(!entry.is_exit());
        assert!((entry.score() - 0.42).abs() < f64::EPSILON);

        let exit = Plan::exit("AAPL", Side::Sell, ExitReason::AtrStop);
        assert!(exit.is_exit());
        assert_eq!(exit.score(), 0.0);
    }
}
