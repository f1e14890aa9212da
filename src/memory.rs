// =============================================================================
// Agent Memory — rolling per-agent observation store with safety guardrails
// =============================================================================
//
// Each named agent records observations (signal, outcome, PnL, regime) into an
// append-only table, pruned by age and by a rolling window. Recall applies an
// exponential decay weight of 2^(-age / halflife) so stale experience fades.
//
// The weight-adjustment path carries two guardrails:
//   - No suggestion at all below `min_samples` closed outcomes.
//   - Auto-disable when memory-influenced trades measurably underperform
//     default trades; once tripped, the agent ignores its memory for the
//     rest of the process lifetime.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection};
use tracing::{debug, warn};

use crate::config::AgentMemoryConfig;
use crate::regime::simple::SimpleRegime;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Outcome of a remembered signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Win,
    Loss,
    Pending,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Win => "win",
            Self::Loss => "loss",
            Self::Pending => "pending",
        }
    }
}

/// One observation to record.
#[derive(Debug, Clone)]
pub struct Observation {
    pub symbol: String,
    pub signal_type: String,
    pub signal_value: f64,
    pub outcome: Outcome,
    pub pnl: f64,
    pub confidence: f64,
    pub memory_influenced: bool,
    /// ISO-8601; `None` stamps the current time.
    pub timestamp: Option<String>,
}

/// A recalled observation with its decay weight.
#[derive(Debug, Clone)]
pub struct RecalledObservation {
    pub symbol: String,
    pub signal_type: String,
    pub signal_value: f64,
    pub outcome: String,
    pub pnl: f64,
    pub regime_label: String,
    pub timestamp: String,
    pub decay_weight: f64,
}

/// Decay-weighted accuracy summary.
#[derive(Debug, Clone)]
pub struct SignalAccuracy {
    pub win_rate: f64,
    pub avg_pnl: f64,
    pub sample_size: usize,
}

/// What the memory recommends doing with a signal weight.
#[derive(Debug, Clone, PartialEq)]
pub enum MemoryDecision {
    /// Apply a bounded multiplicative adjustment.
    Adjust {
        new_weight: f64,
        adjustment: f64,
        win_rate: f64,
        sample_size: usize,
    },
    /// Memory-influenced trades underperform — stop consulting memory.
    Disable,
    /// Not enough data (or already disabled).
    Insufficient,
}

/// Audit summary of everything this agent remembers.
#[derive(Debug, Clone)]
pub struct MemoryStats {
    pub agent: String,
    pub total_observations: usize,
    pub memory_influenced_count: usize,
    pub disabled: bool,
    pub wins: usize,
    pub losses: usize,
    pub pending: usize,
}

// ---------------------------------------------------------------------------
// AgentMemory
// ---------------------------------------------------------------------------

pub struct AgentMemory {
    agent_name: String,
    conn: Connection,
    cfg: AgentMemoryConfig,
    disabled: bool,
}

impl AgentMemory {
    pub fn open(
        agent_name: impl Into<String>,
        db_path: impl AsRef<Path>,
        cfg: AgentMemoryConfig,
    ) -> Result<Self> {
        let conn = Connection::open(db_path.as_ref()).with_context(|| {
            format!("failed to open agent memory at {}", db_path.as_ref().display())
        })?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS agent_memory (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                agent_name TEXT NOT NULL,
                symbol TEXT,
                signal_type TEXT,
                signal_value REAL,
                outcome TEXT,
                pnl REAL DEFAULT 0,
                regime_spy TEXT,
                regime_vix TEXT,
                regime_label TEXT,
                confidence REAL,
                memory_influenced INTEGER DEFAULT 0,
                timestamp TEXT NOT NULL,
                created_at TEXT DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX IF NOT EXISTS idx_agent_memory_agent ON agent_memory(agent_name);
            CREATE INDEX IF NOT EXISTS idx_agent_memory_regime ON agent_memory(regime_label);
            CREATE INDEX IF NOT EXISTS idx_agent_memory_timestamp ON agent_memory(timestamp);",
        )
        .context("failed to initialise agent_memory table")?;

        Ok(Self {
            agent_name: agent_name.into(),
            conn,
            cfg,
            disabled: false,
        })
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    // -------------------------------------------------------------------------
    // Record + prune
    // -------------------------------------------------------------------------

    /// Store an observation tagged with the current regime, then prune.
    pub fn record(&self, obs: &Observation, regime: &SimpleRegime) -> Result<()> {
        let timestamp = obs
            .timestamp
            .clone()
            .unwrap_or_else(|| Utc::now().to_rfc3339());

        self.conn
            .execute(
                "INSERT INTO agent_memory
                 (agent_name, symbol, signal_type, signal_value, outcome, pnl,
                  regime_spy, regime_vix, regime_label, confidence,
                  memory_influenced, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    self.agent_name,
                    obs.symbol,
                    obs.signal_type,
                    obs.signal_value,
                    obs.outcome.as_str(),
                    obs.pnl,
                    regime.spy_trend,
                    regime.vix_level,
                    regime.label,
                    obs.confidence,
                    obs.memory_influenced as i64,
                    timestamp,
                ],
            )
            .context("failed to insert memory observation")?;

        self.prune()
    }

    /// Remove observations past `max_age_days` and keep only the most recent
    /// `rolling_window` rows for this agent.
    pub fn prune(&self) -> Result<()> {
        let cutoff = (Utc::now() - Duration::days(self.cfg.max_age_days)).to_rfc3339();
        self.conn
            .execute(
                "DELETE FROM agent_memory WHERE agent_name = ?1 AND timestamp < ?2",
                params![self.agent_name, cutoff],
            )
            .context("failed age prune")?;

        self.conn
            .execute(
                "DELETE FROM agent_memory WHERE agent_name = ?1 AND id NOT IN (
                    SELECT id FROM agent_memory WHERE agent_name = ?2
                    ORDER BY timestamp DESC LIMIT ?3
                )",
                params![self.agent_name, self.agent_name, self.cfg.rolling_window as i64],
            )
            .context("failed rolling-window prune")?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Recall
    // -------------------------------------------------------------------------

    /// Retrieve recent observations with exponential-decay weights.
    pub fn recall(
        &self,
        symbol: Option<&str>,
        regime: Option<&SimpleRegime>,
        limit: Option<usize>,
    ) -> Result<Vec<RecalledObservation>> {
        let limit = limit.unwrap_or(self.cfg.rolling_window);

        let mut sql = String::from(
            "SELECT symbol, signal_type, signal_value, outcome, pnl, regime_label, timestamp
             FROM agent_memory WHERE agent_name = ?1",
        );
        let mut bindings: Vec<String> = vec![self.agent_name.clone()];

        if let Some(sym) = symbol {
            bindings.push(sym.to_string());
            sql.push_str(&format!(" AND symbol = ?{}", bindings.len()));
        }
        if self.cfg.regime_matching {
            if let Some(reg) = regime {
                bindings.push(reg.label.clone());
                sql.push_str(&format!(" AND regime_label = ?{}", bindings.len()));
            }
        }
        sql.push_str(&format!(" ORDER BY timestamp DESC LIMIT {limit}"));

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(
            rusqlite::params_from_iter(bindings.iter()),
            |row| {
                Ok((
                    row.get::<_, Option<String>>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, Option<f64>>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, Option<f64>>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, String>(6)?,
                ))
            },
        )?;

        let now = Utc::now();
        let halflife = self.cfg.decay_halflife_days.max(0.01);
        let mut out = Vec::new();
        for row in rows {
            let (symbol, signal_type, signal_value, outcome, pnl, regime_label, timestamp) = row?;
            let age_days = age_in_days(&timestamp, now);
            out.push(RecalledObservation {
                symbol: symbol.unwrap_or_default(),
                signal_type: signal_type.unwrap_or_default(),
                signal_value: signal_value.unwrap_or(0.0),
                outcome: outcome.unwrap_or_default(),
                pnl: pnl.unwrap_or(0.0),
                regime_label: regime_label.unwrap_or_default(),
                timestamp,
                decay_weight: (2.0f64).powf(-age_days / halflife),
            });
        }
        Ok(out)
    }

    // -------------------------------------------------------------------------
    // Accuracy
    // -------------------------------------------------------------------------

    /// Decay-weighted win rate and average PnL over closed outcomes. `None`
    /// below `min_samples`.
    pub fn get_signal_accuracy(
        &self,
        signal_type: Option<&str>,
        regime: Option<&SimpleRegime>,
    ) -> Result<Option<SignalAccuracy>> {
        let mut sql = String::from(
            "SELECT outcome, pnl, timestamp FROM agent_memory
             WHERE agent_name = ?1 AND outcome IN ('win','loss')",
        );
        let mut bindings: Vec<String> = vec![self.agent_name.clone()];

        if let Some(st) = signal_type {
            bindings.push(st.to_string());
            sql.push_str(&format!(" AND signal_type = ?{}", bindings.len()));
        }
        if self.cfg.regime_matching {
            if let Some(reg) = regime {
                bindings.push(reg.label.clone());
                sql.push_str(&format!(" AND regime_label = ?{}", bindings.len()));
            }
        }
        sql.push_str(" ORDER BY timestamp DESC");

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(bindings.iter()), |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<f64>>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let now = Utc::now();
        let halflife = self.cfg.decay_halflife_days.max(0.01);
        let mut total_w = 0.0;
        let mut win_w = 0.0;
        let mut pnl_weighted = 0.0;
        let mut count = 0usize;

        for row in rows {
            let (outcome, pnl, timestamp) = row?;
            let age = age_in_days(&timestamp, now);
            let w = (2.0f64).powf(-age / halflife);
            total_w += w;
            if outcome == "win" {
                win_w += w;
            }
            pnl_weighted += pnl.unwrap_or(0.0) * w;
            count += 1;
        }

        if count < self.cfg.min_samples {
            return Ok(None);
        }

        Ok(Some(SignalAccuracy {
            win_rate: if total_w > 0.0 { win_w / total_w } else { 0.0 },
            avg_pnl: if total_w > 0.0 { pnl_weighted / total_w } else { 0.0 },
            sample_size: count,
        }))
    }

    // -------------------------------------------------------------------------
    // Weight adjustment
    // -------------------------------------------------------------------------

    /// Recommend what to do with `current_weight` given remembered outcomes.
    pub fn suggest_weight_adjustment(&mut self, current_weight: f64) -> Result<MemoryDecision> {
        if self.disabled {
            return Ok(MemoryDecision::Insufficient);
        }

        let accuracy = match self.get_signal_accuracy(None, None)? {
            Some(a) => a,
            None => return Ok(MemoryDecision::Insufficient),
        };

        // Compare memory-influenced vs default closed trades.
        let mem_pnls = self.closed_pnls(true)?;
        let def_pnls = self.closed_pnls(false)?;

        if mem_pnls.len() >= self.cfg.min_samples && def_pnls.len() >= self.cfg.min_samples {
            let mem_avg = mem_pnls.iter().sum::<f64>() / mem_pnls.len() as f64;
            let def_avg = def_pnls.iter().sum::<f64>() / def_pnls.len() as f64;
            if def_avg > 0.0 && (def_avg - mem_avg) / def_avg.abs() > self.cfg.underperform_threshold
            {
                self.disabled = true;
                warn!(
                    agent = %self.agent_name,
                    mem_avg,
                    def_avg,
                    "agent memory auto-disabled: memory-influenced trades underperform"
                );
                return Ok(MemoryDecision::Disable);
            }
        }

        let adjustment = ((accuracy.win_rate - 0.5) * 2.0)
            .clamp(-self.cfg.max_adjustment, self.cfg.max_adjustment);
        let new_weight = (current_weight * (1.0 + adjustment)).max(0.01);

        debug!(
            agent = %self.agent_name,
            win_rate = accuracy.win_rate,
            adjustment,
            new_weight,
            "memory weight suggestion"
        );

        Ok(MemoryDecision::Adjust {
            new_weight,
            adjustment,
            win_rate: accuracy.win_rate,
            sample_size: accuracy.sample_size,
        })
    }

    fn closed_pnls(&self, memory_influenced: bool) -> Result<Vec<f64>> {
        let mut stmt = self.conn.prepare(
            "SELECT pnl FROM agent_memory
             WHERE agent_name = ?1 AND memory_influenced = ?2 AND outcome IN ('win','loss')",
        )?;
        let rows = stmt
            .query_map(
                params![self.agent_name, memory_influenced as i64],
                |row| row.get::<_, Option<f64>>(0),
            )?
            .collect::<std::result::Result<Vec<Option<f64>>, _>>()?;
        Ok(rows.into_iter().map(|p| p.unwrap_or(0.0)).collect())
    }

    // -------------------------------------------------------------------------
    // Stats
    // -------------------------------------------------------------------------

    /// Audit summary for logging and review.
    pub fn stats(&self) -> Result<MemoryStats> {
        let total: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM agent_memory WHERE agent_name = ?1",
            params![self.agent_name],
            |r| r.get(0),
        )?;
        let influenced: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM agent_memory WHERE agent_name = ?1 AND memory_influenced = 1",
            params![self.agent_name],
            |r| r.get(0),
        )?;

        let count_for = |outcome: &str| -> Result<usize> {
            let n: i64 = self.conn.query_row(
                "SELECT COUNT(*) FROM agent_memory WHERE agent_name = ?1 AND outcome = ?2",
                params![self.agent_name, outcome],
                |r| r.get(0),
            )?;
            Ok(n as usize)
        };

        Ok(MemoryStats {
            agent: self.agent_name.clone(),
            total_observations: total as usize,
            memory_influenced_count: influenced as usize,
            disabled: self.disabled,
            wins: count_for("win")?,
            losses: count_for("loss")?,
            pending: count_for("pending")?,
        })
    }
}

fn age_in_days(timestamp: &str, now: DateTime<Utc>) -> f64 {
    match DateTime::parse_from_rfc3339(timestamp) {
        Ok(ts) => ((now - ts.with_timezone(&Utc)).num_seconds() as f64 / 86_400.0).max(0.0),
        Err(_) => 0.0,
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::regime::simple;

    fn regime() -> SimpleRegime {
        simple::detect(&(0..30).map(|i| 100.0 + i as f64).collect::<Vec<_>>(), Some(15.0))
    }

    fn memory(cfg: AgentMemoryConfig) -> (AgentMemory, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let mem = AgentMemory::open("pm", dir.path().join("trading.db"), cfg).unwrap();
        (mem, dir)
    }

    fn obs(symbol: &str, outcome: Outcome, pnl: f64, influenced: bool) -> Observation {
        Observation {
            symbol: symbol.to_string(),
            signal_type: "BUY".to_string(),
            signal_value: 0.4,
            outcome,
            pnl,
            confidence: 0.4,
            memory_influenced: influenced,
            timestamp: None,
        }
    }

    #[test]
    fn record_and_recall_with_decay_weight() {
        let (mem, _dir) = memory(AgentMemoryConfig::default());
        mem.record(&obs("AAPL", Outcome::Win, 12.0, false), &regime()).unwrap();

        let recalled = mem.recall(Some("AAPL"), None, None).unwrap();
        assert_eq!(recalled.len(), 1);
        // Fresh observation: decay weight near 1.
        assert!(recalled[0].decay_weight > 0.99);
        assert_eq!(recalled[0].outcome, "win");
        assert_eq!(recalled[0].symbol, "AAPL");
        assert_eq!(recalled[0].signal_type, "BUY");
        assert!((recalled[0].pnl - 12.0).abs() < 1e-9);
        assert_eq!(recalled[0].regime_label, "bull_low_vol");
    }

    #[test]
    fn recall_filters_by_regime_label() {
        let (mem, _dir) = memory(AgentMemoryConfig::default());
        let bull = regime();
        mem.record(&obs("AAPL", Outcome::Win, 12.0, false), &bull).unwrap();

        let bear = simple::detect(&(0..30).map(|i| 130.0 - i as f64).collect::<Vec<_>>(), Some(30.0));
        assert!(mem.recall(None, Some(&bear), None).unwrap().is_empty());
        assert_eq!(mem.recall(None, Some(&bull), None).unwrap().len(), 1);
    }

    #[test]
    fn rolling_window_prunes_oldest() {
        let cfg = AgentMemoryConfig {
            rolling_window: 5,
            ..Default::default()
        };
        let (mem, _dir) = memory(cfg);
        for i in 0..10i64 {
            let mut o = obs("AAPL", Outcome::Win, i as f64, false);
            o.signal_value = i as f64;
            o.timestamp = Some((Utc::now() - Duration::minutes(10 - i)).to_rfc3339());
            mem.record(&o, &regime()).unwrap();
        }
        let recalled = mem.recall(None, None, Some(100)).unwrap();
        assert_eq!(recalled.len(), 5);
        // Newest kept, oldest pruned.
        assert_eq!(recalled[0].signal_value, 9.0);
        assert!(recalled.iter().all(|r| r.signal_value >= 5.0));
    }

    #[test]
    fn accuracy_none_below_min_samples() {
        let (mem, _dir) = memory(AgentMemoryConfig::default());
        for _ in 0..5 {
            mem.record(&obs("AAPL", Outcome::Win, 10.0, false), &regime()).unwrap();
        }
        assert!(mem.get_signal_accuracy(None, None).unwrap().is_none());
    }

    #[test]
    fn accuracy_counts_only_closed_outcomes() {
        let cfg = AgentMemoryConfig {
            min_samples: 4,
            regime_matching: false,
            ..Default::default()
        };
        let (mem, _dir) = memory(cfg);
        for _ in 0..3 {
            mem.record(&obs("AAPL", Outcome::Win, 10.0, false), &regime()).unwrap();
        }
        mem.record(&obs("AAPL", Outcome::Loss, -5.0, false), &regime()).unwrap();
        mem.record(&obs("AAPL", Outcome::Pending, 0.0, false), &regime()).unwrap();

        let acc = mem.get_signal_accuracy(None, None).unwrap().unwrap();
        assert_eq!(acc.sample_size, 4);
        // Same-age rows: decay cancels, 3 wins of 4.
        assert!((acc.win_rate - 0.75).abs() < 0.01);
        assert!(acc.avg_pnl > 0.0);
    }

    #[test]
    fn suggestion_insufficient_without_data() {
        let (mut mem, _dir) = memory(AgentMemoryConfig::default());
        assert_eq!(
            mem.suggest_weight_adjustment(0.25).unwrap(),
            MemoryDecision::Insufficient
        );
    }

    #[test]
    fn suggestion_adjusts_up_on_high_win_rate() {
        let cfg = AgentMemoryConfig {
            min_samples: 10,
            regime_matching: false,
            ..Default::default()
        };
        let (mut mem, _dir) = memory(cfg);
        for _ in 0..12 {
            mem.record(&obs("AAPL", Outcome::Win, 10.0, false), &regime()).unwrap();
        }

        match mem.suggest_weight_adjustment(0.25).unwrap() {
            MemoryDecision::Adjust {
                new_weight,
                adjustment,
                win_rate,
                ..
            } => {
                assert!(win_rate > 0.99);
                // Clamped at +max_adjustment.
                assert!((adjustment - 0.20).abs() < 1e-9);
                assert!((new_weight - 0.30).abs() < 1e-9);
            }
            other => panic!("expected Adjust, got {other:?}"),
        }
    }

    #[test]
    fn auto_disable_when_memory_underperforms() {
        let cfg = AgentMemoryConfig {
            min_samples: 10,
            rolling_window: 100,
            regime_matching: false,
            ..Default::default()
        };
        let (mut mem, _dir) = memory(cfg);

        // Default trades: solidly profitable.
        for _ in 0..10 {
            mem.record(&obs("AAPL", Outcome::Win, 20.0, false), &regime()).unwrap();
        }
        // Memory-influenced trades: losing.
        for _ in 0..10 {
            mem.record(&obs("AAPL", Outcome::Loss, -20.0, true), &regime()).unwrap();
        }

        assert_eq!(mem.suggest_weight_adjustment(0.25).unwrap(), MemoryDecision::Disable);
        assert!(mem.is_disabled());
        // Subsequent calls short-circuit.
        assert_eq!(
            mem.suggest_weight_adjustment(0.25).unwrap(),
            MemoryDecision::Insufficient
        );
    }

    #[test]
    fn weight_floor_applies() {
        let cfg = AgentMemoryConfig {
            min_samples: 10,
            regime_matching: false,
            ..Default::default()
        };
        let (mut mem, _dir) = memory(cfg);
        for _ in 0..12 {
            mem.record(&obs("AAPL", Outcome::Loss, -10.0, false), &regime()).unwrap();
        }

        match mem.suggest_weight_adjustment(0.012).unwrap() {
            MemoryDecision::Adjust { new_weight, .. } => {
                assert!((new_weight - 0.01).abs() < 1e-9);
            }
            other => panic!("expected Adjust, got {other:?}"),
        }
    }

    #[test]
    fn stats_summarize_outcomes() {
        let (mem, _dir) = memory(AgentMemoryConfig::default());
        mem.record(&obs("AAPL", Outcome::Win, 10.0, true), &regime()).unwrap();
        mem.record(&obs("AAPL", Outcome::Loss, -4.0, false), &regime()).unwrap();
        mem.record(&obs("MSFT", Outcome::Pending, 0.0, false), &regime()).unwrap();

        let stats = mem.stats().unwrap();
        assert_eq!(stats.total_observations, 3);
        assert_eq!(stats.memory_influenced_count, 1);
        assert_eq!(stats.wins, 1);
        assert_eq!(stats.losses, 1);
        assert_eq!(stats.pending, 1);
        assert!(!stats.disabled);
    }
}
