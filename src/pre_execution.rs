// =============================================================================
// Pre-Execution Filters — final gates between an approved plan and the fill
// =============================================================================
//
// These run AFTER signal generation, PM planning, and the challenge system,
// but BEFORE portfolio execution. Any failing filter blocks that candidate
// only; forced exits never pass through here.
//
// Filters:
//   1. Regime re-check   — shared monitor state first, live HMM fallback
//   2. Volume            — last bar vs the prior N-bar average
//   3. Time-of-day       — stronger signals required in the first hour
//   4. Crypto correlation — BTC momentum gate for crypto-cluster names
//   5. Kalman agreement  — filter trend must match the order side
//   6. Minimum price     — no sub-$N names
//   7. Last-entry cutoff — no new entries near the window close
// =============================================================================

use std::collections::HashMap;

use chrono::{DateTime, Duration, NaiveTime, Timelike};
use chrono_tz::Tz;
use tracing::{debug, warn};

use crate::config::PreExecutionConfig;
use crate::regime::hmm::HmmRegimeDetector;
use crate::regime::kalman::KalmanEstimate;
use crate::regime::state::RegimeStateDoc;
use crate::sectors::get_sector;
use crate::types::Side;

/// Monitor/live HMM confidence above which a directional regime call blocks
/// the opposing side.
const REGIME_CONF_BLOCK: f64 = 0.70;

/// Bear-probability rise across the monitor's last three readings that
/// blocks everything.
const BEAR_RISE_BLOCK: f64 = 0.20;

/// Everything the filters need beyond the candidate itself.
pub struct PreExecContext<'a> {
    pub cfg: &'a PreExecutionConfig,
    /// Trading-window bounds in the market timezone.
    pub window_start: NaiveTime,
    pub window_end: NaiveTime,
    pub now: DateTime<Tz>,
    /// Shared regime-monitor document, when present.
    pub regime_doc: Option<&'a RegimeStateDoc>,
    /// Live HMM for the fallback re-check.
    pub hmm: Option<&'a HmmRegimeDetector>,
    pub spy_closes: Option<&'a [f64]>,
    /// HMM label observed at signal time, to detect a flip.
    pub original_regime_label: Option<&'a str>,
    pub btc_closes: Option<&'a [f64]>,
    pub kalman: &'a HashMap<String, KalmanEstimate>,
}

/// Run every filter for one candidate. Returns `(proceed, reasons)` where
/// `reasons` carries one line per filter for the event log.
pub fn run_all(
    symbol: &str,
    side: Side,
    score: f64,
    price: f64,
    volumes: Option<&[f64]>,
    ctx: &PreExecContext<'_>,
) -> (bool, Vec<String>) {
    let mut reasons = Vec::new();
    let mut blocked = false;

    // 1. Regime re-check.
    let (ok, msg) = check_regime_recheck(side, ctx);
    if !ok {
        blocked = true;
    }
    reasons.push(format!("regime: {msg}"));

    // 2. Volume confirmation.
    let (ok, msg) = check_volume(volumes, ctx.cfg);
    if !ok {
        blocked = true;
    }
    reasons.push(format!("volume: {msg}"));

    // 5. Kalman agreement (checked early so time-of-day can use the answer).
    let (ok, msg, kalman_agrees) = check_kalman_agreement(symbol, side, ctx);
    if !ok {
        blocked = true;
    }
    reasons.push(format!("kalman: {msg}"));

    // 3. Time-of-day.
    let (ok, msg) = check_time_of_day(score, kalman_agrees, ctx);
    if !ok {
        blocked = true;
    }
    reasons.push(format!("time: {msg}"));

    // 4. Crypto correlation.
    let (ok, msg) = check_crypto_correlation(symbol, side, ctx);
    if !ok {
        blocked = true;
    }
    reasons.push(format!("crypto: {msg}"));

    // 6. Minimum price.
    if price > 0.0 {
        let (ok, msg) = check_min_price(price, ctx.cfg);
        if !ok {
            blocked = true;
        }
        reasons.push(format!("min_price: {msg}"));
    }

    // 7. Last-entry cutoff.
    let (ok, msg) = check_last_entry_cutoff(ctx);
    if !ok {
        blocked = true;
    }
    reasons.push(format!("last_entry: {msg}"));

    if blocked {
        warn!(symbol, side = %side, reasons = ?reasons, "pre-execution blocked");
    } else {
        debug!(symbol, side = %side, "pre-execution filters passed");
    }

    (!blocked, reasons)
}

// ---------------------------------------------------------------------------
// 1. Regime re-check
// ---------------------------------------------------------------------------

fn check_regime_recheck(side: Side, ctx: &PreExecContext<'_>) -> (bool, String) {
    // Prefer the shared monitor state: it runs on a shorter cadence than the
    // engine and sees regime turns first.
    if let Some(doc) = ctx.regime_doc {
        if let Some(change) = &doc.regime_change {
            return (
                false,
                format!(
                    "regime monitor: regime changed {}→{} at {}; trade blocked",
                    change.from, change.to, change.at
                ),
            );
        }

        if let Some(hmm) = &doc.hmm {
            if side == Side::Buy && hmm.state_label == "bear" && hmm.confidence > REGIME_CONF_BLOCK
            {
                return (
                    false,
                    format!(
                        "BUY blocked: regime monitor says bear ({:.0}%)",
                        hmm.confidence * 100.0
                    ),
                );
            }
            if side == Side::Sell && hmm.state_label == "bull" && hmm.confidence > REGIME_CONF_BLOCK
            {
                return (
                    false,
                    format!(
                        "SELL blocked: regime monitor says bull ({:.0}%)",
                        hmm.confidence * 100.0
                    ),
                );
            }

            if let Some(rise) = doc.recent_bear_prob_rise() {
                if rise > BEAR_RISE_BLOCK {
                    return (
                        false,
                        format!(
                            "regime monitor: bear probability spiking (+{:.0}% over last 3 readings)",
                            rise * 100.0
                        ),
                    );
                }
            }
        }
    }

    // Fallback: live HMM over SPY.
    let Some(hmm) = ctx.hmm else {
        return (true, "no HMM available for regime recheck".to_string());
    };
    let Some(spy) = ctx.spy_closes else {
        if let Some(doc) = ctx.regime_doc {
            if let Some(mon) = &doc.hmm {
                return (true, format!("regime OK (from monitor): {}", mon.state_label));
            }
        }
        return (true, "no SPY data for regime recheck".to_string());
    };

    if spy.len() < 5 {
        return (true, "insufficient SPY data".to_string());
    }

    let obs = HmmRegimeDetector::discretize(spy);
    let pred = hmm.predict(&obs);

    if let Some(original) = ctx.original_regime_label {
        if original != pred.state_label {
            return (
                false,
                format!(
                    "regime flipped: was '{original}', now '{}' ({:.0}%); trade blocked",
                    pred.state_label,
                    pred.confidence * 100.0
                ),
            );
        }
    }

    if side == Side::Buy && pred.state_label == "bear" && pred.confidence > REGIME_CONF_BLOCK {
        return (
            false,
            format!("BUY blocked: HMM says bear regime ({:.0}%)", pred.confidence * 100.0),
        );
    }
    if side == Side::Sell && pred.state_label == "bull" && pred.confidence > REGIME_CONF_BLOCK {
        return (
            false,
            format!("SELL blocked: HMM says bull regime ({:.0}%)", pred.confidence * 100.0),
        );
    }

    (
        true,
        format!("regime OK: {} ({:.0}%)", pred.state_label, pred.confidence * 100.0),
    )
}

// ---------------------------------------------------------------------------
// 2. Volume confirmation
// ---------------------------------------------------------------------------

fn check_volume(volumes: Option<&[f64]>, cfg: &PreExecutionConfig) -> (bool, String) {
    let lookback = cfg.volume_lookback;
    let Some(volumes) = volumes else {
        return (true, "no volume data".to_string());
    };

    if volumes.len() < lookback + 1 {
        return (
            true,
            format!("insufficient volume data ({} < {})", volumes.len(), lookback + 1),
        );
    }

    let current = volumes[volumes.len() - 1];
    let prior = &volumes[volumes.len() - 1 - lookback..volumes.len() - 1];
    let avg = prior.iter().sum::<f64>() / lookback as f64;

    if avg <= 0.0 {
        return (true, "zero average volume".to_string());
    }

    let ratio = current / avg;
    if ratio < cfg.volume_min_ratio {
        return (
            false,
            format!(
                "volume too low: {current:.0} vs {lookback}-bar avg {avg:.0} (ratio {ratio:.2} < {:.2})",
                cfg.volume_min_ratio
            ),
        );
    }

    (true, format!("volume OK: ratio {ratio:.2}"))
}

// ---------------------------------------------------------------------------
// 3. Time-of-day
// ---------------------------------------------------------------------------

fn check_time_of_day(
    score: f64,
    kalman_agrees: Option<bool>,
    ctx: &PreExecContext<'_>,
) -> (bool, String) {
    let cfg = ctx.cfg;
    let now_time = ctx.now.time();
    let cutoff = NaiveTime::from_hms_opt(cfg.morning_cutoff_hour, cfg.morning_cutoff_minute, 0)
        .unwrap_or(ctx.window_start);

    if now_time < ctx.window_start || now_time > cutoff {
        return (true, "outside morning window".to_string());
    }

    if score.abs() < cfg.morning_min_score {
        return (
            false,
            format!(
                "morning filter: |score|={:.3} < {:.2} before {:02}:{:02}",
                score.abs(),
                cfg.morning_min_score,
                cutoff.hour(),
                cutoff.minute()
            ),
        );
    }

    if cfg.morning_require_kalman && kalman_agrees == Some(false) {
        return (
            false,
            "morning filter: Kalman disagrees during first hour".to_string(),
        );
    }

    (true, "morning filter passed".to_string())
}

// ---------------------------------------------------------------------------
// 4. Crypto correlation
// ---------------------------------------------------------------------------

fn check_crypto_correlation(symbol: &str, side: Side, ctx: &PreExecContext<'_>) -> (bool, String) {
    let cfg = ctx.cfg;

    let in_crypto_sector = get_sector(symbol)
        .map(|s| cfg.crypto_sectors.iter().any(|cs| cs == s))
        .unwrap_or(false);
    let is_crypto = cfg.crypto_symbols.iter().any(|s| s == symbol) || in_crypto_sector;
    if !is_crypto {
        return (true, "not crypto-adjacent".to_string());
    }

    let Some(btc) = ctx.btc_closes else {
        return (true, "no BTC data for correlation check".to_string());
    };

    let periods = cfg.crypto_momentum_periods;
    let clean: Vec<f64> = btc.iter().copied().filter(|p| p.is_finite()).collect();
    if clean.len() < periods + 1 {
        return (true, "insufficient BTC data".to_string());
    }

    let base = clean[clean.len() - periods];
    if base <= 0.0 {
        return (true, "degenerate BTC series".to_string());
    }
    let momentum = (clean[clean.len() - 1] - base) / base;

    if side == Side::Sell && momentum > cfg.crypto_momentum_threshold {
        return (
            false,
            format!(
                "crypto correlation block: shorting {symbol} while BTC trending up ({momentum:+.2}%)",
            ),
        );
    }
    if side == Side::Buy && momentum < -cfg.crypto_momentum_threshold {
        return (
            false,
            format!(
                "crypto correlation block: buying {symbol} while BTC trending down ({momentum:+.2}%)",
            ),
        );
    }

    (true, format!("crypto correlation OK (BTC momentum {momentum:+.4})"))
}

// ---------------------------------------------------------------------------
// 5. Kalman agreement
// ---------------------------------------------------------------------------

fn check_kalman_agreement(
    symbol: &str,
    side: Side,
    ctx: &PreExecContext<'_>,
) -> (bool, String, Option<bool>) {
    let required = ctx.cfg.kalman_agreement_required;

    let Some(est) = ctx.kalman.get(symbol) else {
        if required {
            return (
                false,
                format!("Kalman has no data for {symbol} — required but unavailable"),
                Some(false),
            );
        }
        return (true, "no Kalman data (not required)".to_string(), None);
    };

    let agrees = (side == Side::Buy && est.trend > 0.0) || (side == Side::Sell && est.trend < 0.0);

    if !agrees && required {
        return (
            false,
            format!("Kalman disagrees: trend={:+.6} vs side={side}", est.trend),
            Some(false),
        );
    }

    (
        true,
        format!(
            "Kalman {} (trend={:+.6})",
            if agrees { "agrees" } else { "disagrees" },
            est.trend
        ),
        Some(agrees),
    )
}

// ---------------------------------------------------------------------------
// 6. Minimum price
// ---------------------------------------------------------------------------

fn check_min_price(price: f64, cfg: &PreExecutionConfig) -> (bool, String) {
    if price < cfg.min_price {
        return (
            false,
            format!("price ${price:.2} below ${:.2} minimum", cfg.min_price),
        );
    }
    (true, format!("price OK: ${price:.2}"))
}

// ---------------------------------------------------------------------------
// 7. Last-entry cutoff
// ---------------------------------------------------------------------------

fn check_last_entry_cutoff(ctx: &PreExecContext<'_>) -> (bool, String) {
    let cutoff = ctx.window_end - Duration::minutes(ctx.cfg.last_entry_minutes);
    if ctx.now.time() >= cutoff {
        return (
            false,
            format!(
                "last-entry cutoff: no new entries within {} min of window end",
                ctx.cfg.last_entry_minutes
            ),
        );
    }
    (true, "within entry window".to_string())
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn tz() -> Tz {
        "America/New_York".parse().unwrap()
    }

    fn at(h: u32, m: u32) -> DateTime<Tz> {
        tz().with_ymd_and_hms(2026, 3, 2, h, m, 0).unwrap()
    }

    fn base_cfg() -> PreExecutionConfig {
        PreExecutionConfig {
            kalman_agreement_required: false,
            ..Default::default()
        }
    }

    fn ctx<'a>(
        cfg: &'a PreExecutionConfig,
        now: DateTime<Tz>,
        kalman: &'a HashMap<String, KalmanEstimate>,
    ) -> PreExecContext<'a> {
        PreExecContext {
            cfg,
            window_start: NaiveTime::from_hms_opt(9, 30, 0).unwrap(),
            window_end: NaiveTime::from_hms_opt(16, 0, 0).unwrap(),
            now,
            regime_doc: None,
            hmm: None,
            spy_closes: None,
            original_regime_label: None,
            btc_closes: None,
            kalman,
        }
    }

    fn estimate(trend: f64) -> KalmanEstimate {
        KalmanEstimate {
            level: 100.0,
            trend,
            upper: 101.0,
            lower: 99.0,
            uncertainty: 0.5,
            signal: 0.0,
        }
    }

    #[test]
    fn clean_candidate_passes_all_filters() {
        let cfg = base_cfg();
        let kalman = HashMap::new();
        let c = ctx(&cfg, at(12, 0), &kalman);
        let volumes: Vec<f64> = vec![1000.0; 21];

        let (ok, reasons) = run_all("ZZT1", Side::Buy, 0.4, 50.0, Some(&volumes), &c);
        assert!(ok, "reasons: {reasons:?}");
    }

    #[test]
    fn low_volume_blocks() {
        let cfg = base_cfg();
        let kalman = HashMap::new();
        let c = ctx(&cfg, at(12, 0), &kalman);
        // Prior average 1000, last bar 400 → ratio 0.4 < 1.0.
        let mut volumes = vec![1000.0; 20];
        volumes.push(400.0);

        let (ok, reasons) = run_all("ZZT1", Side::Buy, 0.4, 50.0, Some(&volumes), &c);
        assert!(!ok);
        assert!(reasons.iter().any(|r| r.contains("volume too low")));
    }

    #[test]
    fn morning_requires_stronger_score() {
        let cfg = base_cfg();
        let kalman = HashMap::new();
        let c = ctx(&cfg, at(10, 0), &kalman);

        let (ok, _) = run_all("ZZT1", Side::Buy, 0.4, 50.0, None, &c);
        assert!(!ok, "0.4 < 0.6 morning minimum");

        let (ok, _) = run_all("ZZT1", Side::Buy, 0.7, 50.0, None, &c);
        assert!(ok);
    }

    #[test]
    fn morning_kalman_requirement() {
        let mut cfg = base_cfg();
        cfg.morning_require_kalman = true;
        cfg.kalman_agreement_required = false;

        let mut kalman = HashMap::new();
        kalman.insert("ZZT1".to_string(), estimate(-0.5));
        let c = ctx(&cfg, at(10, 0), &kalman);

        // Strong score, but Kalman trend opposes the BUY during the first hour.
        let (ok, reasons) = run_all("ZZT1", Side::Buy, 0.8, 50.0, None, &c);
        assert!(!ok);
        assert!(reasons.iter().any(|r| r.contains("Kalman disagrees during first hour")));
    }

    #[test]
    fn afternoon_ignores_morning_gate() {
        let cfg = base_cfg();
        let kalman = HashMap::new();
        let c = ctx(&cfg, at(13, 0), &kalman);
        let (ok, _) = run_all("ZZT1", Side::Buy, 0.2, 50.0, None, &c);
        assert!(ok);
    }

    #[test]
    fn kalman_agreement_required_blocks_disagreement() {
        let mut cfg = base_cfg();
        cfg.kalman_agreement_required = true;

        let mut kalman = HashMap::new();
        kalman.insert("ZZT1".to_string(), estimate(-0.5));
        let c = ctx(&cfg, at(12, 0), &kalman);

        let (ok, reasons) = run_all("ZZT1", Side::Buy, 0.4, 50.0, None, &c);
        assert!(!ok);
        assert!(reasons.iter().any(|r| r.contains("Kalman disagrees")));

        // A SELL agrees with the negative trend.
        let (ok, _) = run_all("ZZT1", Side::Sell, -0.4, 50.0, None, &c);
        assert!(ok);
    }

    #[test]
    fn kalman_required_but_missing_blocks() {
        let mut cfg = base_cfg();
        cfg.kalman_agreement_required = true;
        let kalman = HashMap::new();
        let c = ctx(&cfg, at(12, 0), &kalman);

        let (ok, _) = run_all("ZZT1", Side::Buy, 0.4, 50.0, None, &c);
        assert!(!ok);
    }

    #[test]
    fn crypto_symbol_blocked_against_btc_momentum() {
        let cfg = base_cfg();
        let kalman = HashMap::new();
        let mut c = ctx(&cfg, at(12, 0), &kalman);

        // BTC down 5 % over the window → block BUY of a crypto name.
        let btc: Vec<f64> = (0..20).map(|i| 60_000.0 - i as f64 * 150.0).collect();
        c.btc_closes = Some(&btc);

        let (ok, reasons) = run_all("MARA", Side::Buy, 0.7, 20.0, None, &c);
        assert!(!ok);
        assert!(reasons.iter().any(|r| r.contains("BTC trending down")));

        // Shorting with BTC falling is fine.
        let (ok, _) = run_all("MARA", Side::Sell, -0.7, 20.0, None, &c);
        assert!(ok);

        // BTC up blocks the short.
        let btc_up: Vec<f64> = (0..20).map(|i| 60_000.0 + i as f64 * 150.0).collect();
        c.btc_closes = Some(&btc_up);
        let (ok, _) = run_all("MARA", Side::Sell, -0.7, 20.0, None, &c);
        assert!(!ok);
    }

    #[test]
    fn non_crypto_symbol_skips_btc_gate() {
        let cfg = base_cfg();
        let kalman = HashMap::new();
        let mut c = ctx(&cfg, at(12, 0), &kalman);
        let btc: Vec<f64> = (0..20).map(|i| 60_000.0 - i as f64 * 150.0).collect();
        c.btc_closes = Some(&btc);

        let (ok, _) = run_all("ZZT1", Side::Buy, 0.4, 50.0, None, &c);
        assert!(ok);
    }

    #[test]
    fn min_price_blocks_cheap_names() {
        let cfg = base_cfg();
        let kalman = HashMap::new();
        let c = ctx(&cfg, at(12, 0), &kalman);

        let (ok, reasons) = run_all("ZZT1", Side::Buy, 0.4, 3.50, None, &c);
        assert!(!ok);
        assert!(reasons.iter().any(|r| r.contains("below")));

        let (ok, _) = run_all("ZZT1", Side::Buy, 0.4, 5.0, None, &c);
        assert!(ok, "exactly at the minimum passes");
    }

    #[test]
    fn last_entry_cutoff_blocks_late_entries() {
        let cfg = base_cfg();
        let kalman = HashMap::new();

        // Window ends 16:00, cutoff 30 min → 15:30 exactly is rejected.
        let c = ctx(&cfg, at(15, 30), &kalman);
        let (ok, reasons) = run_all("ZZT1", Side::Buy, 0.4, 50.0, None, &c);
        assert!(!ok);
        assert!(reasons.iter().any(|r| r.contains("last-entry cutoff")));

        let c = ctx(&cfg, at(15, 29), &kalman);
        let (ok, _) = run_all("ZZT1", Side::Buy, 0.4, 50.0, None, &c);
        assert!(ok);
    }

    #[test]
    fn monitor_regime_change_blocks_everything() {
        let cfg = base_cfg();
        let kalman = HashMap::new();
        let mut c = ctx(&cfg, at(12, 0), &kalman);

        let doc: RegimeStateDoc = serde_json::from_str(
            r#"{
                "timestamp": "t",
                "regime_change": { "from": "bull", "to": "bear", "at": "t" }
            }"#,
        )
        .unwrap();
        c.regime_doc = Some(&doc);

        let (ok, reasons) = run_all("ZZT1", Side::Buy, 0.4, 50.0, None, &c);
        assert!(!ok);
        assert!(reasons.iter().any(|r| r.contains("regime changed")));
    }

    #[test]
    fn monitor_confident_bear_blocks_buys_only() {
        let cfg = base_cfg();
        let kalman = HashMap::new();
        let mut c = ctx(&cfg, at(12, 0), &kalman);

        let doc: RegimeStateDoc = serde_json::from_str(
            r#"{
                "timestamp": "t",
                "hmm": {
                    "state_label": "bear", "confidence": 0.85,
                    "probabilities": { "bull": 0.05, "bear": 0.85, "transition": 0.10 }
                }
            }"#,
        )
        .unwrap();
        c.regime_doc = Some(&doc);

        let (ok, _) = run_all("ZZT1", Side::Buy, 0.4, 50.0, None, &c);
        assert!(!ok);
        let (ok, _) = run_all("ZZT1", Side::Sell, -0.4, 50.0, None, &c);
        assert!(ok);
    }

    #[test]
    fn monitor_bear_spike_blocks() {
        let cfg = base_cfg();
        let kalman = HashMap::new();
        let mut c = ctx(&cfg, at(12, 0), &kalman);

        let doc: RegimeStateDoc = serde_json::from_str(
            r#"{
                "timestamp": "t",
                "hmm": {
                    "state_label": "transition", "confidence": 0.5,
                    "probabilities": { "bull": 0.3, "bear": 0.2, "transition": 0.5 }
                },
                "history": [
                    { "ts": "t1", "label": "bull", "confidence": 0.7, "bear_prob": 0.10 },
                    { "ts": "t2", "label": "bull", "confidence": 0.6, "bear_prob": 0.25 },
                    { "ts": "t3", "label": "transition", "confidence": 0.5, "bear_prob": 0.45 }
                ]
            }"#,
        )
        .unwrap();
        c.regime_doc = Some(&doc);

        let (ok, reasons) = run_all("ZZT1", Side::Buy, 0.4, 50.0, None, &c);
        assert!(!ok);
        assert!(reasons.iter().any(|r| r.contains("spiking")));
    }

    #[test]
    fn live_hmm_fallback_blocks_regime_flip() {
        let cfg = base_cfg();
        let kalman = HashMap::new();
        let mut c = ctx(&cfg, at(12, 0), &kalman);

        let hmm = HmmRegimeDetector::new(60);
        // A quiet grind up followed by a string of hard down bars: the tail
        // returns sit deep below the window mean, land in the low buckets,
        // and drive the filtered state to bear.
        let mut spy: Vec<f64> = Vec::new();
        let mut px = 500.0;
        for _ in 0..30 {
            spy.push(px);
            px *= 1.001;
        }
        for _ in 0..8 {
            spy.push(px);
            px *= 0.97;
        }
        spy.push(px);
        c.hmm = Some(&hmm);
        c.spy_closes = Some(&spy);
        c.original_regime_label = Some("bull");

        let (ok, reasons) = run_all("ZZT1", Side::Buy, 0.4, 50.0, None, &c);
        assert!(!ok, "reasons: {reasons:?}");
    }
}
