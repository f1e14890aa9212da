// =============================================================================
// CSV journals — flat-file mirrors of the trades / events / signals rows
// =============================================================================
//
// Append-only CSVs next to the SQLite store, for quick eyeballing and for
// offline tooling that prefers flat files. Headers are written on first
// creation; a write failure is the caller's to log and ignore.
// =============================================================================

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::store::{EventRecord, SignalRecord, TradeRecord};

pub struct Journal {
    trades_csv: PathBuf,
    events_csv: PathBuf,
    signals_csv: PathBuf,
}

impl Journal {
    pub fn new(trades_csv: impl Into<PathBuf>, events_csv: impl Into<PathBuf>, signals_csv: impl Into<PathBuf>) -> Self {
        Self {
            trades_csv: trades_csv.into(),
            events_csv: events_csv.into(),
            signals_csv: signals_csv.into(),
        }
    }

    pub fn log_trade(&self, trade: &TradeRecord) -> Result<()> {
        let header = "timestamp,symbol,side,quantity,price,pnl,score";
        let row = format!(
            "{},{},{},{},{},{},{}",
            trade.timestamp,
            trade.symbol,
            trade.side,
            trade.quantity,
            trade.price,
            trade.pnl,
            trade.score
        );
        append_row(&self.trades_csv, header, &row)
    }

    pub fn log_event(&self, event: &EventRecord) -> Result<()> {
        let header = "timestamp,level,message";
        let row = format!(
            "{},{},{}",
            event.timestamp,
            event.level,
            csv_escape(&event.message)
        );
        append_row(&self.events_csv, header, &row)
    }

    pub fn log_signal(&self, signal: &SignalRecord) -> Result<()> {
        let header = "timestamp,symbol,score_mom,score_mean,score_break,score_news,\
                      weight_mom,weight_mean,weight_break,weight_news,final_score";
        let row = format!(
            "{},{},{},{},{},{},{},{},{},{},{}",
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
            signal.final_score
        );
        append_row(&self.signals_csv, header, &row)
    }
}

fn csv_escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn append_row(path: &Path, header: &str, row: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let exists = path.exists();
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;

    if !exists {
        writeln!(file, "{header}")?;
    }
    writeln!(file, "{row}")?;
    Ok(())
}
