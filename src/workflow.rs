// =============================================================================
// Workflow — one end-to-end decision cycle
// =============================================================================
//
// Stage order per invocation:
//   hours gate → fetch → simple regime → mark-to-market → forced exits →
//   scout → parallel signal scoring → signal logging → persistence gate →
//   shadow models → PM plan (+ exit merge, position cap) →
//   risk / compliance / approval → per plan: challenger → [finance] →
//   pre-execution filters → execute → trade row → snapshot + reward event.
//
// The scoring fan-out is the only parallel section: a bounded pool of
// min(top_n, 8) tasks computes raw scores, and the coordinator alone writes
// the results map and feeds the (stateful) normalizer.
// =============================================================================

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, NaiveTime, Weekday};
use chrono_tz::Tz;
use serde_json::json;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};
use uuid::Uuid;

use crate::approval;
use crate::challenger::{ChallengeContext, Challenger, ChallengeVerdict};
use crate::compliance;
use crate::config::{Config, HoursConfig};
use crate::exits::ExitManager;
use crate::finance::{self, FinanceContext};
use crate::journal::Journal;
use crate::market_data::{filter_trading_window, parse_hhmm, BarSeries, provider::MarketDataProvider};
use crate::memory::AgentMemory;
use crate::pm::{PlanInputs, PmAgent};
use crate::portfolio::Portfolio;
use crate::pre_execution::{self, PreExecContext};
use crate::regime::simple;
use crate::regime::state::RegimeStateDoc;
use crate::risk::RiskAgent;
use crate::scout;
use crate::shadow::ShadowRunner;
use crate::signals::news::NewsAgent;
use crate::signals::normalizer::SignalNormalizer;
use crate::signals::{self, RawSignals, SignalComponents, SignalDetail};
use crate::store::{Database, EventRecord, SignalRecord, TradeRecord};
use crate::types::{Plan, Side};

/// Upper bound on concurrent scoring tasks.
const MAX_SCORING_WORKERS: usize = 8;

const SPY: &str = "SPY";
const VIX: &str = "^VIX";
const BTC: &str = "BTC-USD";

// ---------------------------------------------------------------------------
// Trading-hours gate
// ---------------------------------------------------------------------------

/// Weekday, non-holiday, and inside the configured window.
pub fn within_trading_hours(hours: &HoursConfig, now: DateTime<Tz>) -> Result<bool> {
    if matches!(now.weekday(), Weekday::Sat | Weekday::Sun) {
        info!("weekend — market closed, skipping");
        return Ok(false);
    }

    let today = now.format("%Y-%m-%d").to_string();
    if hours.holidays.contains(&today) {
        info!(date = %today, "market holiday, skipping");
        return Ok(false);
    }

    let start = parse_hhmm(&hours.start)?;
    let end = parse_hhmm(&hours.end)?;
    let t = now.time();
    Ok(t >= start && t <= end)
}

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

pub struct Workflow {
    cfg: Config,
    tz: Tz,
    window_start: NaiveTime,
    window_end: NaiveTime,
    provider: MarketDataProvider,
    news: Arc<NewsAgent>,
    db: Database,
    journal: Journal,
    portfolio: Portfolio,
    normalizer: SignalNormalizer,
    pm: PmAgent,
    risk: RiskAgent,
    exit_manager: ExitManager,
    challenger: Challenger,
    shadow: Option<ShadowRunner>,
    memory: Option<AgentMemory>,
}

impl Workflow {
    pub fn new(cfg: Config) -> Result<Self> {
        let tz: Tz = cfg
            .hours
            .tz
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid timezone {}: {e}", cfg.hours.tz))?;
        let window_start = parse_hhmm(&cfg.hours.start)?;
        let window_end = parse_hhmm(&cfg.hours.end)?;

        let db = Database::open(&cfg.logging.db_path)?;
        let journal = Journal::new(
            &cfg.logging.trades_csv,
            &cfg.logging.events_csv,
            &cfg.logging.signals_csv,
        );
        let portfolio = Portfolio::load(&cfg);

        let memory = if cfg.agent_memory.enabled {
            Some(
                AgentMemory::open("pm", &cfg.logging.db_path, cfg.agent_memory.clone())
                    .context("failed to open pm agent memory")?,
            )
        } else {
            None
        };

        let shadow = if cfg.shadow_mode.enabled {
            Some(ShadowRunner::new(&cfg.shadow_mode))
        } else {
            None
        };

        let provider = MarketDataProvider::new(&cfg.data.interval, &cfg.data.lookback);
        let news = Arc::new(NewsAgent::new(cfg.news.clone()));
        let normalizer = SignalNormalizer::new(cfg.signals.norm_lookback);
        let pm = PmAgent::new(&cfg);
        let risk = RiskAgent::new(&cfg);
        let exit_manager = ExitManager::new(&cfg);
        let challenger = Challenger::new(&cfg.challenges);

        Ok(Self {
            tz,
            window_start,
            window_end,
            provider,
            news,
            db,
            journal,
            portfolio,
            normalizer,
            pm,
            risk,
            exit_manager,
            challenger,
            shadow,
            memory,
            cfg,
        })
    }

    /// Run one full cycle. Never propagates gate denials — abnormal
    /// conditions manifest as empty plans plus explanatory event rows.
    pub async fn run(&mut self) -> Result<()> {
        let now = chrono::Utc::now().with_timezone(&self.tz);

        // --- 1. Trading-hours gate ---------------------------------------------
        if !within_trading_hours(&self.cfg.hours, now)? {
            info!(
                start = %self.cfg.hours.start,
                end = %self.cfg.hours.end,
                tz = %self.cfg.hours.tz,
                "outside trading hours — skipping cycle"
            );
            return Ok(());
        }

        let cycle_id = Uuid::new_v4().to_string();
        let timestamp = now.to_rfc3339();
        let today = now.format("%Y-%m-%d").to_string();
        let equity_before = self.portfolio.state.equity;

        info!(cycle_id = %cycle_id, %timestamp, "cycle start");

        // --- 2. Fetch universe + market indicators -----------------------------
        let mut fetch_list: Vec<String> = self.cfg.universe.clone();
        for extra in [SPY, VIX, BTC] {
            if !fetch_list.iter().any(|s| s == extra) {
                fetch_list.push(extra.to_string());
            }
        }
        let md = self.provider.fetch(&fetch_list).await;

        // --- 3. Simple market regime -------------------------------------------
        let spy_closes = md.get(SPY).map(|s| s.closes()).unwrap_or_default();
        let vix_last = md.get(VIX).and_then(|s| s.last_close());
        let btc_closes = md.get(BTC).map(|s| s.closes());
        let market_regime = simple::detect(&spy_closes, vix_last);
        info!(
            regime = %market_regime.label,
            downtrend = market_regime.is_downtrend,
            fear = market_regime.is_fear,
            "market regime"
        );

        // --- 4. Window + prices -------------------------------------------------
        let mut windowed: HashMap<String, BarSeries> = HashMap::new();
        let mut universe_bars: HashMap<String, BarSeries> = HashMap::new();
        let mut current_prices: HashMap<String, f64> = HashMap::new();
        let mut price_series: HashMap<String, Vec<f64>> = HashMap::new();

        for sym in &self.cfg.universe {
            let Some(series) = md.get(sym) else { continue };
            if series.is_empty() {
                continue;
            }
            windowed.insert(
                sym.clone(),
                filter_trading_window(series, self.tz, self.window_start, self.window_end),
            );
            universe_bars.insert(sym.clone(), series.clone());
            if let Some(last) = series.last_close() {
                current_prices.insert(sym.clone(), last);
            }
            price_series.insert(sym.clone(), series.closes());
        }

        self.portfolio.mark_to_market(&current_prices);

        // --- 5. Forced exits -----------------------------------------------------
        let forced_exits = self.exit_manager.check_exits(&self.portfolio, &universe_bars);

        // --- 6. Scout + parallel scoring -----------------------------------------
        let ranked = scout::rank(&windowed);
        let top_n = self.cfg.scout_top_n.max(1);
        let top_symbols: HashSet<String> =
            ranked.iter().take(top_n).map(|r| r.symbol.clone()).collect();

        let raw_scores = self.score_symbols_parallel(&windowed, &top_symbols).await;

        // Coordinator alone touches the normalizer and the results map.
        let weights = self.cfg.signals.weights.clone();
        let mut all_signals: HashMap<String, f64> = HashMap::new();
        let mut all_details: HashMap<String, SignalDetail> = HashMap::new();
        for (sym, raw) in raw_scores {
            let components = SignalComponents {
                momentum: self.normalizer.normalize("momentum", raw.momentum),
                meanrev: self.normalizer.normalize("meanrev", raw.meanrev),
                breakout: self.normalizer.normalize("breakout", raw.breakout),
                news: raw.news,
            };
            let (weights_used, final_score) = signals::effective_weights(&components, &weights);
            all_signals.insert(sym.clone(), final_score);
            all_details.insert(
                sym,
                SignalDetail {
                    components,
                    raw,
                    weights_used,
                    final_score,
                },
            );
        }

        // --- 7. Persistence gate (consults PRIOR cycles, so query first) --------
        let mut gated_signals = all_signals.clone();
        for (sym, score) in &all_signals {
            let prev = match self.db.latest_signal_score_on(sym, &today) {
                Ok(p) => p,
                Err(e) => {
                    warn!(symbol = %sym, error = %e, "persistence check failed");
                    continue;
                }
            };
            if let Some(prev) = prev {
                let cur_sign = score.partial_cmp(&0.0).map(|o| o as i8).unwrap_or(0);
                let prev_sign = prev.partial_cmp(&0.0).map(|o| o as i8).unwrap_or(0);
                if cur_sign != 0 && prev_sign != 0 && cur_sign != prev_sign {
                    info!(symbol = %sym, "signal not persistent — dropped");
                    gated_signals.remove(sym);
                }
            }
        }

        // --- 8. Log every computed signal (even if approval later blocks) --------
        for (sym, detail) in &all_details {
            tracing::debug!(
                symbol = %sym,
                raw_momentum = detail.raw.momentum,
                raw_meanrev = detail.raw.meanrev,
                raw_breakout = detail.raw.breakout,
                raw_news = detail.raw.news,
                final_score = detail.final_score,
                "signal scored"
            );
            let record = SignalRecord {
                timestamp: timestamp.clone(),
                symbol: sym.clone(),
                components: detail.components,
                weights_used: detail.weights_used,
                final_score: detail.final_score,
            };
            if let Err(e) = self.db.log_signal(&record) {
                warn!(symbol = %sym, error = %e, "signal row write failed");
            }
            if let Err(e) = self.journal.log_signal(&record) {
                warn!(symbol = %sym, error = %e, "signal csv write failed");
            }
        }

        // --- 9. Shadow models -----------------------------------------------------
        let mut kalman_estimates = HashMap::new();
        let mut hmm_prediction = None;
        if let Some(shadow) = self.shadow.as_mut() {
            let spy_opt = if spy_closes.is_empty() {
                None
            } else {
                Some(spy_closes.as_slice())
            };
            let summary = shadow.run(
                &price_series,
                spy_opt,
                &gated_signals,
                &market_regime.label,
                &self.db,
                &timestamp,
            );
            kalman_estimates = shadow.kalman_estimates().clone();
            hmm_prediction = summary.hmm;
        }

        // --- 10. PM plan + exit merge + position cap -----------------------------
        let held_long: HashSet<String> = self
            .portfolio
            .state
            .positions
            .values()
            .filter(|p| p.is_long())
            .map(|p| p.symbol.clone())
            .collect();

        let inputs = PlanInputs {
            ranked: &ranked,
            signals: &gated_signals,
            regime: &market_regime,
            held_long,
            price_series: &price_series,
            equity: self.portfolio.state.equity,
            cash: self.portfolio.state.cash,
        };
        let (entry_plans, mut plan_notes) =
            self.pm.create_plan(&inputs, self.memory.as_mut());

        let exit_symbols: HashSet<String> =
            forced_exits.iter().map(|p| p.symbol.clone()).collect();
        let new_entries: Vec<Plan> = entry_plans
            .into_iter()
            .filter(|p| !exit_symbols.contains(&p.symbol))
            .collect();
        let capped_entries = self
            .exit_manager
            .check_max_positions(&self.portfolio, new_entries);

        if !forced_exits.is_empty() {
            plan_notes = format!("{plan_notes} + {} forced exits", forced_exits.len());
        }

        let mut plans: Vec<Plan> = forced_exits;
        plans.extend(capped_entries);

        // --- 11. Risk / compliance / approval ------------------------------------
        let existing_positions = self.portfolio.state.positions.len();
        let risk_verdict = self
            .risk
            .evaluate(&mut plans, &universe_bars, existing_positions)
            .await;
        let (compliance_ok, compliance_notes) = compliance::review(&plans, &self.cfg.universe);
        let (approval_ok, approval_note) = approval::check(&self.cfg.approval, &today);

        let approval_granted = risk_verdict.ok && compliance_ok && approval_ok;
        if !approval_granted {
            plans.clear();
            plan_notes = "approval pending; plan not logged".to_string();
            if !approval_note.is_empty() {
                plan_notes = format!("{plan_notes} ({approval_note})");
            }
        }

        self.log_event(EventRecord {
            timestamp: timestamp.clone(),
            level: "INFO".to_string(),
            message: "cycle gates evaluated".to_string(),
            metadata: json!({
                "cycle_id": cycle_id,
                "risk_ok": risk_verdict.ok,
                "compliance_ok": compliance_ok,
                "approval_granted": approval_granted,
                "risk_notes": risk_verdict.notes,
                "compliance_notes": compliance_notes,
                "plan_notes": plan_notes,
            }),
        });

        // --- 12. Per-plan gauntlet + execution -----------------------------------
        if approval_granted {
            let regime_doc = RegimeStateDoc::load(&self.cfg.logging.regime_state_file);
            let original_regime_label = hmm_prediction.as_ref().map(|p| p.state_label.clone());
            let (hmm_bull, hmm_bear) = hmm_prediction
                .as_ref()
                .map(|p| (p.probabilities[0], p.probabilities[1]))
                .unwrap_or((0.0, 0.0));

            for plan in plans {
                let sym = plan.symbol.clone();
                let price = current_prices.get(&sym).copied().unwrap_or(0.0);

                if !plan.is_exit() {
                    // Challenge system: agents question illogical trades.
                    let detail = all_details.get(&sym);
                    let ctx = ChallengeContext {
                        components: detail.map(|d| &d.components),
                        weights: &self.cfg.signals.weights,
                        hmm_bull_prob: hmm_bull,
                        hmm_bear_prob: hmm_bear,
                        today: &today,
                    };
                    let challenges = self.challenger.challenge_plan(&plan, &ctx, &self.db);
                    match Challenger::verdict(&challenges) {
                        ChallengeVerdict::Blocked(summary) => {
                            warn!(symbol = %sym, %summary, "trade blocked by challenge system");
                            self.log_gate_denial(&timestamp, &cycle_id, &sym, "challenger", &summary);
                            continue;
                        }
                        ChallengeVerdict::Caution(summary) => {
                            info!(symbol = %sym, %summary, "caution — routing to finance review");
                            let fin_ctx = FinanceContext {
                                cash: self.portfolio.state.cash,
                                equity: self.portfolio.state.equity,
                                open_positions: self.portfolio.state.positions.len(),
                                max_positions: self.cfg.risk.max_positions,
                                caution_min_score: self.cfg.pre_execution.caution_min_score,
                                today: &today,
                            };
                            let (fin_ok, fin_reason) = finance::review(&plan, &fin_ctx, &self.db);
                            if !fin_ok {
                                warn!(symbol = %sym, reason = %fin_reason, "finance review rejected");
                                self.log_gate_denial(&timestamp, &cycle_id, &sym, "finance", &fin_reason);
                                continue;
                            }
                        }
                        ChallengeVerdict::Proceed => {}
                    }

                    // Final pre-execution filters.
                    let volumes = universe_bars.get(&sym).map(|s| s.volumes());
                    let pre_ctx = PreExecContext {
                        cfg: &self.cfg.pre_execution,
                        window_start: self.window_start,
                        window_end: self.window_end,
                        now,
                        regime_doc: regime_doc.as_ref(),
                        hmm: self.shadow.as_ref().map(|s| s.hmm()),
                        spy_closes: if spy_closes.is_empty() {
                            None
                        } else {
                            Some(spy_closes.as_slice())
                        },
                        original_regime_label: original_regime_label.as_deref(),
                        btc_closes: btc_closes.as_deref(),
                        kalman: &kalman_estimates,
                    };
                    let (pre_ok, reasons) = pre_execution::run_all(
                        &sym,
                        plan.side,
                        plan.score(),
                        price,
                        volumes.as_deref(),
                        &pre_ctx,
                    );
                    if !pre_ok {
                        let blocked: Vec<&String> = reasons
                            .iter()
                            .filter(|r| r.contains("block") || r.contains("too low") || r.contains("below"))
                            .collect();
                        self.log_gate_denial(
                            &timestamp,
                            &cycle_id,
                            &sym,
                            "pre_execution",
                            &format!("{blocked:?}"),
                        );
                        continue;
                    }
                }

                self.execute_plan(&plan, price, &timestamp, &cycle_id);
            }

            if let Err(e) = self.portfolio.save() {
                warn!(error = %e, "portfolio snapshot write failed");
            }
        }

        // --- 13. Reward annotations ----------------------------------------------
        self.log_event(EventRecord {
            timestamp,
            level: "INFO".to_string(),
            message: "cycle reward".to_string(),
            metadata: json!({
                "cycle_id": cycle_id,
                "risk_ok": risk_verdict.ok as i32,
                "compliance_ok": compliance_ok as i32,
                "approval_granted": approval_granted as i32,
                "equity_change": self.portfolio.state.equity - equity_before,
            }),
        });

        if let Some(mem) = &self.memory {
            match mem.stats() {
                Ok(stats) => info!(
                    agent = %stats.agent,
                    total = stats.total_observations,
                    wins = stats.wins,
                    losses = stats.losses,
                    pending = stats.pending,
                    influenced = stats.memory_influenced_count,
                    disabled = stats.disabled,
                    "agent memory summary"
                ),
                Err(e) => warn!(error = %e, "agent memory stats failed"),
            }
        }

        info!(cycle_id = %cycle_id, equity = self.portfolio.state.equity, "cycle complete");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Scoring fan-out
    // -------------------------------------------------------------------------

    /// Score the top symbols in a bounded worker pool. Workers compute pure
    /// raw scores (plus the news fetch); nothing shared is mutated until the
    /// coordinator collects the results.
    async fn score_symbols_parallel(
        &self,
        windowed: &HashMap<String, BarSeries>,
        top_symbols: &HashSet<String>,
    ) -> Vec<(String, RawSignals)> {
        let semaphore = Arc::new(Semaphore::new(top_symbols.len().clamp(1, MAX_SCORING_WORKERS)));
        let mut join_set = JoinSet::new();

        for (sym, series) in windowed {
            if series.is_empty() || !top_symbols.contains(sym) {
                continue;
            }

            let sym = sym.clone();
            let series = series.clone();
            let news = Arc::clone(&self.news);
            let permit_source = Arc::clone(&semaphore);
            let momentum_short = self.cfg.signals.momentum_short;
            let meanrev_long = self.cfg.signals.meanrev_long;
            let breakout_lookback = self.cfg.signals.breakout_lookback;

            join_set.spawn(async move {
                let _permit = permit_source.acquire_owned().await.expect("semaphore closed");

                let raw = RawSignals {
                    momentum: signals::momentum::score(&series, momentum_short),
                    meanrev: signals::meanrev::score(&series, meanrev_long),
                    breakout: signals::breakout::score(&series, breakout_lookback),
                    news: news.sentiment(&sym).await,
                };
                (sym, raw)
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(pair) => results.push(pair),
                Err(e) => warn!(error = %e, "scoring task failed"),
            }
        }
        results
    }

    // -------------------------------------------------------------------------
    // Execution + logging helpers
    // -------------------------------------------------------------------------

    /// Execute one plan against the portfolio and log the trade row.
    fn execute_plan(&mut self, plan: &Plan, price: f64, timestamp: &str, cycle_id: &str) {
        if price <= 0.0 {
            warn!(symbol = %plan.symbol, "no price for execution — skipped");
            return;
        }

        let mut pnl = 0.0;
        let mut actual_qty: i64 = 0;

        match plan.side {
            Side::Sell => {
                let held = self
                    .portfolio
                    .state
                    .positions
                    .get(&plan.symbol)
                    .map(|p| p.quantity)
                    .unwrap_or(0);
                if held > 0 {
                    // Close the existing long in full.
                    pnl = self
                        .portfolio
                        .execute(&plan.symbol, Side::Sell, price, held, 0.0);
                    actual_qty = held;
                } else if plan.is_exit() {
                    // Forced exit but no position — nothing to do.
                    return;
                } else {
                    // Open a new short sized by target value.
                    pnl = self
                        .portfolio
                        .execute(&plan.symbol, Side::Sell, price, 0, plan.target_value);
                    actual_qty = sized_quantity(plan.target_value, price, &self.portfolio, &plan.symbol);
                }
            }
            Side::Buy => {
                let held = self
                    .portfolio
                    .state
                    .positions
                    .get(&plan.symbol)
                    .map(|p| p.quantity)
                    .unwrap_or(0);
                if plan.is_exit() {
                    if held >= 0 {
                        return;
                    }
                    // Cover the short in full.
                    pnl = self
                        .portfolio
                        .execute(&plan.symbol, Side::Buy, price, -held, 0.0);
                    actual_qty = -held;
                } else {
                    pnl = self
                        .portfolio
                        .execute(&plan.symbol, Side::Buy, price, 0, plan.target_value);
                    actual_qty = sized_quantity(plan.target_value, price, &self.portfolio, &plan.symbol);
                }
            }
        }

        let strategy_data = match &plan.kind {
            crate::types::PlanKind::Entry { .. } => json!({
                "cycle_id": cycle_id,
                "kind": "entry",
                "memory_influenced": plan.memory_influenced,
                "target_value": plan.target_value,
            }),
            crate::types::PlanKind::Exit { reason } => json!({
                "cycle_id": cycle_id,
                "kind": "exit",
                "reason": reason.to_string(),
            }),
        };

        let record = TradeRecord {
            timestamp: timestamp.to_string(),
            symbol: plan.symbol.clone(),
            side: plan.side.to_string(),
            quantity: actual_qty,
            price,
            pnl,
            score: plan.score(),
            strategy_data,
        };
        if let Err(e) = self.db.log_trade(&record) {
            warn!(symbol = %plan.symbol, error = %e, "trade row write failed");
        }
        if let Err(e) = self.journal.log_trade(&record) {
            warn!(symbol = %plan.symbol, error = %e, "trade csv write failed");
        }
    }

    fn log_gate_denial(
        &self,
        timestamp: &str,
        cycle_id: &str,
        symbol: &str,
        gate: &str,
        reason: &str,
    ) {
        self.log_event(EventRecord {
            timestamp: timestamp.to_string(),
            level: "WARN".to_string(),
            message: format!("{gate} denied {symbol}"),
            metadata: json!({
                "cycle_id": cycle_id,
                "gate": gate,
                "symbol": symbol,
                "reason": reason,
            }),
        });
    }

    fn log_event(&self, event: EventRecord) {
        if let Err(e) = self.db.log_event(&event) {
            warn!(error = %e, "event row write failed");
        }
        if let Err(e) = self.journal.log_event(&event) {
            warn!(error = %e, "event csv write failed");
        }
    }
}

/// Approximate executed quantity for a target-value-sized order, preferring
/// the live position when the fill actually happened.
fn sized_quantity(target_value: f64, price: f64, portfolio: &Portfolio, symbol: &str) -> i64 {
    if price > 0.0 && target_value > 0.0 {
        (target_value / price).floor() as i64
    } else {
        portfolio
            .state
            .positions
            .get(symbol)
            .map(|p| p.quantity.abs())
            .unwrap_or(0)
    }
}
