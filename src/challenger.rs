// =============================================================================
// Trade Challenger — rule agents that question illogical trades
// =============================================================================
//
// Each check can raise a challenge with a severity (warn or block) and a
// reason. Challenges stack:
//   - any block            → trade rejected
//   - two or more warns    → trade rejected
//   - exactly one warn     → caution, routed to the finance sub-review
//   - none                 → proceed
//
// Checks: signal disagreement, same-day re-entry, re-entry signal quality,
// regime mismatch, news absence, consecutive losses, mean-reversion
// opposition (BUYs only — an "oversold" name still being sold confirms the
// breakdown, so SELLs are not challenged on it).
// =============================================================================

use tracing::{debug, warn};

use crate::config::{ChallengesConfig, SignalWeights};
use crate::signals::SignalComponents;
use crate::store::Database;
use crate::types::{Plan, Side};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warn,
    Block,
}

#[derive(Debug, Clone)]
pub struct Challenge {
    /// Which agent raised it (risk / compliance / strategy).
    pub agent: &'static str,
    pub severity: Severity,
    pub reason: String,
}

/// Folded outcome of a set of challenges.
#[derive(Debug, Clone, PartialEq)]
pub enum ChallengeVerdict {
    Proceed,
    /// Exactly one warning: needs the finance sub-review.
    Caution(String),
    Blocked(String),
}

/// Market context a challenge run needs beyond the plan itself.
pub struct ChallengeContext<'a> {
    pub components: Option<&'a SignalComponents>,
    pub weights: &'a SignalWeights,
    /// HMM posterior from the shadow run (0.0 when unavailable).
    pub hmm_bull_prob: f64,
    pub hmm_bear_prob: f64,
    /// "YYYY-MM-DD" in the market timezone.
    pub today: &'a str,
}

// ---------------------------------------------------------------------------
// Challenger
// ---------------------------------------------------------------------------

pub struct Challenger {
    disagreement_threshold: f64,
    max_consecutive_losses: usize,
}

impl Challenger {
    pub fn new(cfg: &ChallengesConfig) -> Self {
        Self {
            disagreement_threshold: cfg.disagreement_threshold,
            max_consecutive_losses: cfg.max_consecutive_losses,
        }
    }

    /// Run every check against one plan. Forced exits are never challenged.
    pub fn challenge_plan(
        &self,
        plan: &Plan,
        ctx: &ChallengeContext<'_>,
        db: &Database,
    ) -> Vec<Challenge> {
        if plan.is_exit() {
            return Vec::new();
        }

        let mut challenges = Vec::new();

        if let Some(c) = self.check_signal_disagreement(ctx) {
            challenges.push(c);
        }

        let reentered = self.check_reentry(plan, ctx, db);
        if let Some(c) = reentered.clone() {
            challenges.push(c);
        }
        if reentered.is_some() {
            if let Some(c) = self.check_reentry_signal_quality(plan, ctx) {
                challenges.push(c);
            }
        }

        if let Some(c) = self.check_regime_mismatch(plan, ctx) {
            challenges.push(c);
        }
        if let Some(c) = self.check_news_absence(plan, ctx) {
            challenges.push(c);
        }
        if let Some(c) = self.check_consecutive_losses(plan, db) {
            challenges.push(c);
        }
        if let Some(c) = self.check_meanrev_opposition(plan, ctx) {
            challenges.push(c);
        }

        for c in &challenges {
            warn!(
                symbol = %plan.symbol,
                side = %plan.side,
                agent = c.agent,
                severity = ?c.severity,
                reason = %c.reason,
                "challenge raised"
            );
        }

        challenges
    }

    /// Fold challenges into a verdict.
    pub fn verdict(challenges: &[Challenge]) -> ChallengeVerdict {
        if challenges.is_empty() {
            return ChallengeVerdict::Proceed;
        }

        let blocks: Vec<&Challenge> = challenges
            .iter()
            .filter(|c| c.severity == Severity::Block)
            .collect();
        let warns: Vec<&Challenge> = challenges
            .iter()
            .filter(|c| c.severity == Severity::Warn)
            .collect();

        if !blocks.is_empty() {
            let reasons: Vec<&str> = blocks.iter().map(|c| c.reason.as_str()).collect();
            return ChallengeVerdict::Blocked(format!(
                "BLOCKED ({} blocks): {}",
                blocks.len(),
                reasons.join("; ")
            ));
        }

        if warns.len() >= 2 {
            let reasons: Vec<&str> = warns.iter().map(|c| c.reason.as_str()).collect();
            return ChallengeVerdict::Blocked(format!(
                "BLOCKED (multiple warnings): {}",
                reasons.join("; ")
            ));
        }

        ChallengeVerdict::Caution(format!("CAUTION (needs finance review): {}", warns[0].reason))
    }

    // -------------------------------------------------------------------------
    // Individual checks
    // -------------------------------------------------------------------------

    /// Violently disagreeing active signals suggest an uncertain direction.
    fn check_signal_disagreement(&self, ctx: &ChallengeContext<'_>) -> Option<Challenge> {
        let components = ctx.components?;
        let active: Vec<(&str, f64)> = components
            .weighted_pairs(ctx.weights)
            .into_iter()
            .filter(|(_, _, w)| *w > 0.0)
            .map(|(name, value, _)| (name, value))
            .collect();

        if active.len() < 2 {
            return None;
        }

        let max = active.iter().map(|(_, v)| *v).fold(f64::NEG_INFINITY, f64::max);
        let min = active.iter().map(|(_, v)| *v).fold(f64::INFINITY, f64::min);
        let spread = max - min;

        if spread < self.disagreement_threshold {
            return None;
        }

        let bulls: Vec<&str> = active.iter().filter(|(_, v)| *v > 0.3).map(|(n, _)| *n).collect();
        let bears: Vec<&str> = active.iter().filter(|(_, v)| *v < -0.3).map(|(n, _)| *n).collect();

        Some(Challenge {
            agent: "risk",
            severity: if spread >= 1.5 {
                Severity::Block
            } else {
                Severity::Warn
            },
            reason: format!(
                "signal disagreement: spread={spread:.2}, bull={bulls:?}, bear={bears:?}"
            ),
        })
    }

    /// A symbol already exited today needs overwhelming evidence to re-enter.
    fn check_reentry(
        &self,
        plan: &Plan,
        ctx: &ChallengeContext<'_>,
        db: &Database,
    ) -> Option<Challenge> {
        match db.last_closed_trade_on(&plan.symbol, ctx.today) {
            Ok(Some(last)) => {
                let outcome = if last.pnl > 0.0 {
                    format!("profit ${:+.2}", last.pnl)
                } else {
                    format!("loss ${:+.2}", last.pnl)
                };
                Some(Challenge {
                    agent: "compliance",
                    severity: Severity::Warn,
                    reason: format!(
                        "re-entry caution: {} already exited today via {} at {} ({outcome}); all signals must agree",
                        plan.symbol, last.side, last.timestamp
                    ),
                })
            }
            Ok(None) => None,
            Err(e) => {
                debug!(error = %e, "re-entry check failed");
                None
            }
        }
    }

    /// Re-entries require every component to agree in direction with news
    /// confirmation; anything short of unanimity stacks a second warning.
    fn check_reentry_signal_quality(
        &self,
        plan: &Plan,
        ctx: &ChallengeContext<'_>,
    ) -> Option<Challenge> {
        let components = ctx.components?;
        let pairs = components.weighted_pairs(ctx.weights);

        let bulls: Vec<&str> = pairs.iter().filter(|(_, v, _)| *v > 0.1).map(|(n, _, _)| *n).collect();
        let bears: Vec<&str> = pairs.iter().filter(|(_, v, _)| *v < -0.1).map(|(n, _, _)| *n).collect();
        let neutral: Vec<&str> = pairs
            .iter()
            .filter(|(_, v, _)| (-0.1..=0.1).contains(v))
            .map(|(n, _, _)| *n)
            .collect();

        let mut problems = Vec::new();
        match plan.side {
            Side::Buy if !bears.is_empty() => problems.push(format!("{} bearish", bears.join(", "))),
            Side::Sell if !bulls.is_empty() => problems.push(format!("{} bullish", bulls.join(", "))),
            _ => {}
        }
        if !neutral.is_empty() {
            problems.push(format!("{} neutral/weak", neutral.join(", ")));
        }
        if components.news.abs() < 0.05 {
            problems.push("no news confirmation".to_string());
        }

        if problems.is_empty() {
            return None;
        }

        Some(Challenge {
            agent: "strategy",
            severity: Severity::Warn,
            reason: format!(
                "re-entry needs unanimous signals for {}, but: {}",
                plan.symbol,
                problems.join("; ")
            ),
        })
    }

    /// Buying into a confident bear regime (or shorting a confident bull) is
    /// counter-trend risk.
    fn check_regime_mismatch(
        &self,
        plan: &Plan,
        ctx: &ChallengeContext<'_>,
    ) -> Option<Challenge> {
        match plan.side {
            Side::Buy if ctx.hmm_bear_prob > 0.75 => Some(Challenge {
                agent: "strategy",
                severity: Severity::Warn,
                reason: format!(
                    "buying in strong bear regime (bear prob={:.0}%)",
                    ctx.hmm_bear_prob * 100.0
                ),
            }),
            Side::Sell if ctx.hmm_bull_prob > 0.75 => Some(Challenge {
                agent: "strategy",
                severity: Severity::Warn,
                reason: format!(
                    "shorting in strong bull regime (bull prob={:.0}%)",
                    ctx.hmm_bull_prob * 100.0
                ),
            }),
            _ => None,
        }
    }

    /// A zero news component means we are entering blind.
    fn check_news_absence(&self, plan: &Plan, ctx: &ChallengeContext<'_>) -> Option<Challenge> {
        let components = ctx.components?;
        if components.news == 0.0 {
            return Some(Challenge {
                agent: "risk",
                severity: Severity::Warn,
                reason: format!("zero news signal for {} — entering blind", plan.symbol),
            });
        }
        None
    }

    /// A name that has lost money N times in a row is off limits.
    fn check_consecutive_losses(&self, plan: &Plan, db: &Database) -> Option<Challenge> {
        let pnls = match db.recent_closed_pnls(&plan.symbol, self.max_consecutive_losses) {
            Ok(p) => p,
            Err(e) => {
                debug!(error = %e, "consecutive-loss check failed");
                return None;
            }
        };

        if pnls.len() >= self.max_consecutive_losses && pnls.iter().all(|&p| p < 0.0) {
            let total: f64 = pnls.iter().sum();
            return Some(Challenge {
                agent: "strategy",
                severity: Severity::Block,
                reason: format!(
                    "{} has {} consecutive losses (total ${total:+.2}); stop trading this name",
                    plan.symbol,
                    pnls.len()
                ),
            });
        }
        None
    }

    /// Strong mean-reversion opposition challenges BUYs only.
    fn check_meanrev_opposition(
        &self,
        plan: &Plan,
        ctx: &ChallengeContext<'_>,
    ) -> Option<Challenge> {
        let components = ctx.components?;
        if plan.side == Side::Buy && components.meanrev < -0.5 {
            return Some(Challenge {
                agent: "strategy",
                severity: Severity::Warn,
                reason: format!(
                    "mean reversion strongly bearish ({:+.2}) — opposes BUY on {}",
                    components.meanrev, plan.symbol
                ),
            });
        }
        None
    }
}
