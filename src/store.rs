// =============================================================================
// Store — append-only SQLite log of trades, signals, events, and shadow rows
// =============================================================================
//
// Single-writer discipline: only the workflow writes, and all writes happen
// serially within one invocation. Write failures are reported to the caller,
// which logs them and keeps going — in-memory state stays authoritative and
// the next successful write catches up.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use tracing::info;

use crate::signals::{SignalComponents, WeightsUsed};

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct TradeRecord {
    pub timestamp: String,
    pub symbol: String,
    pub side: String,
    pub quantity: i64,
    pub price: f64,
    pub pnl: f64,
    pub score: f64,
    pub strategy_data: Value,
}

#[derive(Debug, Clone)]
pub struct SignalRecord {
    pub timestamp: String,
    pub symbol: String,
    pub components: SignalComponents,
    pub weights_used: WeightsUsed,
    pub final_score: f64,
}

#[derive(Debug, Clone)]
pub struct EventRecord {
    pub timestamp: String,
    pub level: String,
    pub message: String,
    pub metadata: Value,
}

#[derive(Debug, Clone)]
pub struct ShadowPredictionRow {
    pub timestamp: String,
    pub symbol: String,
    pub kalman_signal: f64,
    pub kalman_level: f64,
    pub kalman_trend: f64,
    pub kalman_uncertainty: f64,
    pub existing_signal: f64,
    pub hmm_state: Option<String>,
    pub hmm_bull_prob: Option<f64>,
    pub hmm_bear_prob: Option<f64>,
    pub hmm_transition_prob: Option<f64>,
    pub hmm_transition_risk: Option<f64>,
    pub existing_regime: String,
}

/// Most recent closed trade for a symbol (used by the re-entry challenge).
#[derive(Debug, Clone)]
pub struct ClosedTrade {
    pub side: String,
    pub pnl: f64,
    pub timestamp: String,
}

// ---------------------------------------------------------------------------
// Database
// ---------------------------------------------------------------------------

pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open (or create) the store and ensure the schema exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open store at {}", path.display()))?;

        conn.execute_batch(
            "BEGIN;
            CREATE TABLE IF NOT EXISTS trades (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT,
                symbol TEXT,
                side TEXT,
                quantity INTEGER,
                price REAL,
                pnl REAL,
                score REAL,
                strategy_data TEXT
            );
            CREATE TABLE IF NOT EXISTS signals (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT,
                symbol TEXT,
                score_mom REAL,
                score_mean REAL,
                score_break REAL,
                score_news REAL,
                weight_mom REAL,
                weight_mean REAL,
                weight_break REAL,
                weight_news REAL,
                final_score REAL
            );
            CREATE TABLE IF NOT EXISTS events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT,
                level TEXT,
                message TEXT,
                metadata TEXT
            );
            CREATE TABLE IF NOT EXISTS shadow_predictions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT,
                symbol TEXT,
                kalman_signal REAL,
                kalman_level REAL,
                kalman_trend REAL,
                kalman_uncertainty REAL,
                existing_signal REAL,
                hmm_state TEXT,
                hmm_bull_prob REAL,
                hmm_bear_prob REAL,
                hmm_transition_prob REAL,
                hmm_transition_risk REAL,
                existing_regime TEXT,
                actual_return_1h REAL,
                actual_return_1d REAL,
                outcome_filled INTEGER DEFAULT 0
            );
            CREATE TABLE IF NOT EXISTS agent_memory (
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
            CREATE INDEX IF NOT EXISTS idx_agent_memory_timestamp ON agent_memory(timestamp);
            COMMIT;",
        )
        .context("failed to initialise store schema")?;

        info!(path = %path.display(), "store opened");
        Ok(Self { conn })
    }

    // -------------------------------------------------------------------------
    // Inserts
    // -------------------------------------------------------------------------

    pub fn log_trade(&self, trade: &TradeRecord) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO trades (timestamp, symbol, side, quantity, price, pnl, score, strategy_data)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    trade.timestamp,
                    trade.symbol,
                    trade.side,
                    trade.quantity,
                    trade.price,
                    trade.pnl,
                    trade.score,
                    trade.strategy_data.to_string(),
                ],
            )
            .context("failed to insert trade row")?;
        Ok(())
    }

    pub fn log_signal(&self, signal: &SignalRecord) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO signals (
                    timestamp, symbol,
                    score_mom, score_mean, score_break, score_news,
                    weight_mom, weight_mean, weight_break, weight_news,
                    final_score
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    signal.timestamp,
                    signal.symbol,
                    signal.components.momentum,
                    signal.components.meanrev,
                    signal.components.breakout,
                    signal.components.news,
                    signal.weights_used.momentum,
                    signal.weights_used.meanrev,
                    signal.weights_used.breakout,
                    signal.weights_used.news,
                    signal.final_score,
                ],
            )
            .context("failed to insert signal row")?;
        Ok(())
    }

    pub fn log_event(&self, event: &EventRecord) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO events (timestamp, level, message, metadata)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    event.timestamp,
                    event.level,
                    event.message,
                    event.metadata.to_string(),
                ],
            )
            .context("failed to insert event row")?;
        Ok(())
    }

    pub fn log_shadow_prediction(&self, row: &ShadowPredictionRow) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO shadow_predictions (
                    timestamp, symbol,
                    kalman_signal, kalman_level, kalman_trend, kalman_uncertainty,
                    existing_signal,
                    hmm_state, hmm_bull_prob, hmm_bear_prob, hmm_transition_prob, hmm_transition_risk,
                    existing_regime
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    row.timestamp,
                    row.symbol,
                    row.kalman_signal,
                    row.kalman_level,
                    row.kalman_trend,
                    row.kalman_uncertainty,
                    row.existing_signal,
                    row.hmm_state,
                    row.hmm_bull_prob,
                    row.hmm_bear_prob,
                    row.hmm_transition_prob,
                    row.hmm_transition_risk,
                    row.existing_regime,
                ],
            )
            .context("failed to insert shadow prediction row")?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// Latest logged composite for `symbol` on `date` ("YYYY-MM-DD"), for the
    /// signal-persistence gate.
    pub fn latest_signal_score_on(&self, symbol: &str, date: &str) -> Result<Option<f64>> {
        self.conn
            .query_row(
                "SELECT final_score FROM signals
                 WHERE symbol = ?1 AND date(timestamp) = ?2
                 ORDER BY id DESC LIMIT 1",
                params![symbol, date],
                |row| row.get(0),
            )
            .optional()
            .context("failed to query latest signal score")
    }

    /// PnL of the most recent `limit` closed trades (pnl != 0) for `symbol`,
    /// newest first.
    pub fn recent_closed_pnls(&self, symbol: &str, limit: usize) -> Result<Vec<f64>> {
        let mut stmt = self.conn.prepare(
            "SELECT pnl FROM trades
             WHERE symbol = ?1 AND pnl != 0
             ORDER BY timestamp DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![symbol, limit as i64], |row| row.get(0))?
            .collect::<std::result::Result<Vec<f64>, _>>()?;
        Ok(rows)
    }

    /// Most recent closed trade (pnl != 0) for `symbol` on `date`.
    pub fn last_closed_trade_on(&self, symbol: &str, date: &str) -> Result<Option<ClosedTrade>> {
        self.conn
            .query_row(
                "SELECT side, pnl, timestamp FROM trades
                 WHERE symbol = ?1 AND date(timestamp) = ?2 AND pnl != 0
                 ORDER BY timestamp DESC LIMIT 1",
                params![symbol, date],
                |row| {
                    Ok(ClosedTrade {
                        side: row.get(0)?,
                        pnl: row.get(1)?,
                        timestamp: row.get(2)?,
                    })
                },
            )
            .optional()
            .context("failed to query last closed trade")
    }

    /// Cumulative PnL for `symbol` on `date`.
    pub fn symbol_pnl_on(&self, symbol: &str, date: &str) -> Result<f64> {
        let total: Option<f64> = self.conn.query_row(
            "SELECT SUM(pnl) FROM trades WHERE symbol = ?1 AND date(timestamp) = ?2",
            params![symbol, date],
            |row| row.get(0),
        )?;
        Ok(total.unwrap_or(0.0))
    }

    /// Shared connection access for components that keep their own tables
    /// (agent memory).
    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn db() -> (Database, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().join("trading.db")).unwrap();
        (db, dir)
    }

    fn trade(sym: &str, ts: &str, pnl: f64) -> TradeRecord {
        TradeRecord {
            timestamp: ts.to_string(),
            symbol: sym.to_string(),
            side: "SELL".to_string(),
            quantity: 10,
            price: 100.0,
            pnl,
            score: 0.4,
            strategy_data: json!({}),
        }
    }

    #[test]
    fn trade_roundtrip_and_symbol_pnl() {
        let (db, _dir) = db();
        db.log_trade(&trade("AAPL", "2026-03-02T10:00:00", -12.0)).unwrap();
        db.log_trade(&trade("AAPL", "2026-03-02T11:00:00", 30.0)).unwrap();
        db.log_trade(&trade("MSFT", "2026-03-02T11:00:00", 5.0)).unwrap();

        let pnl = db.symbol_pnl_on("AAPL", "2026-03-02").unwrap();
        assert!((pnl - 18.0).abs() < 1e-9);
        assert_eq!(db.symbol_pnl_on("AAPL", "2026-03-03").unwrap(), 0.0);
    }

    #[test]
    fn recent_closed_pnls_newest_first_and_skips_open() {
        let (db, _dir) = db();
        db.log_trade(&trade("AAPL", "2026-03-02T10:00:00", -12.0)).unwrap();
        db.log_trade(&trade("AAPL", "2026-03-02T11:00:00", 0.0)).unwrap(); // open entry
        db.log_trade(&trade("AAPL", "2026-03-02T12:00:00", -7.0)).unwrap();
        db.log_trade(&trade("AAPL", "2026-03-02T13:00:00", -4.0)).unwrap();

        let pnls = db.recent_closed_pnls("AAPL", 3).unwrap();
        assert_eq!(pnls, vec![-4.0, -7.0, -12.0]);
    }

    #[test]
    fn last_closed_trade_on_date() {
        let (db, _dir) = db();
        db.log_trade(&trade("AAPL", "2026-03-01T15:00:00", 9.0)).unwrap();
        db.log_trade(&trade("AAPL", "2026-03-02T10:00:00", -3.0)).unwrap();

        let last = db.last_closed_trade_on("AAPL", "2026-03-02").unwrap().unwrap();
        assert!((last.pnl + 3.0).abs() < 1e-9);
        assert!(db.last_closed_trade_on("MSFT", "2026-03-02").unwrap().is_none());
    }

    #[test]
    fn signal_persistence_query_uses_latest_row() {
        let (db, _dir) = db();
        let mut rec = SignalRecord {
            timestamp: "2026-03-02T10:00:00".to_string(),
            symbol: "NVDA".to_string(),
            components: Default::default(),
            weights_used: Default::default(),
            final_score: 0.3,
        };
        db.log_signal(&rec).unwrap();
        rec.timestamp = "2026-03-02T10:05:00".to_string();
        rec.final_score = -0.2;
        db.log_signal(&rec).unwrap();

        let latest = db.latest_signal_score_on("NVDA", "2026-03-02").unwrap().unwrap();
        assert!((latest + 0.2).abs() < 1e-9);
        assert!(db.latest_signal_score_on("NVDA", "2026-03-03").unwrap().is_none());
    }

    #[test]
    fn event_and_shadow_rows_insert() {
        let (db, _dir) = db();
        db.log_event(&EventRecord {
            timestamp: "2026-03-02T10:00:00".to_string(),
            level: "INFO".to_string(),
            message: "cycle complete".to_string(),
            metadata: json!({"cycle_id": "abc"}),
        })
        .unwrap();

        db.log_shadow_prediction(&ShadowPredictionRow {
            timestamp: "2026-03-02T10:00:00".to_string(),
            symbol: "AAPL".to_string(),
            kalman_signal: 0.5,
            kalman_level: 100.0,
            kalman_trend: 0.1,
            kalman_uncertainty: 0.03,
            existing_signal: 0.2,
            hmm_state: Some("bull".to_string()),
            hmm_bull_prob: Some(0.7),
            hmm_bear_prob: Some(0.1),
            hmm_transition_prob: Some(0.2),
            hmm_transition_risk: Some(0.12),
            existing_regime: "bull_low_vol".to_string(),
        })
        .unwrap();

        // outcome_filled defaults to 0 for later backfill.
        let filled: i64 = db
            .connection()
            .query_row("SELECT outcome_filled FROM shadow_predictions", [], |r| r.get(0))
            .unwrap();
        assert_eq!(filled, 0);
    }
}
