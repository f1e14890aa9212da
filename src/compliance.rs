// =============================================================================
// Compliance — universe whitelist check
// =============================================================================

use std::collections::HashSet;

use tracing::warn;

use crate::types::Plan;

/// Reject the whole batch when any plan symbol is outside the configured
/// universe. Returns `(ok, notes)`.
pub fn review(plans: &[Plan], universe: &[String]) -> (bool, String) {
    let allowed: HashSet<&str> = universe.iter().map(|s| s.as_str()).collect();

    for plan in plans {
        if !allowed.contains(plan.symbol.as_str()) {
            warn!(symbol = %plan.symbol, "compliance: symbol not in universe");
            return (false, format!("symbol not allowed: {}", plan.symbol));
        }
    }

    (true, "compliance ok".to_string())
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Side;

    fn universe() -> Vec<String> {
        vec!["AAPL".to_string(), "MSFT".to_string()]
    }

    #[test]
    fn all_in_universe_passes() {
        let plans = vec![
            Plan::entry("AAPL", Side::Buy, 0.4),
            Plan::entry("MSFT", Side::Sell, -0.3),
        ];
        let (ok, notes) = review(&plans, &universe());
        assert!(ok);
        assert_eq!(notes, "compliance ok");
    }

    #[test]
    fn any_outsider_rejects_batch() {
        let plans = vec![
            Plan::entry("AAPL", Side::Buy, 0.4),
            Plan::entry("TSLA", Side::Buy, 0.9),
        ];
        let (ok, notes) = review(&plans, &universe());
        assert!(!ok);
        assert!(notes.contains("TSLA"));
    }

    #[test]
    fn empty_plan_passes() {
        let (ok, _) = review(&[], &universe());
        assert!(ok);
    }
}
