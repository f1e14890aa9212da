// =============================================================================
// Portfolio — cash + position bookkeeping with execution realism
// =============================================================================
//
// Supports long and short positions with slippage and per-share commission.
// Execution semantics:
//   - Slippage moves the fill price against the order (BUY up, SELL down).
//   - Commission is charged to cash on every fill leg and baked into the
//     entry basis (long basis = fill + comm/qty, short basis = fill - comm/qty).
//   - Realized PnL nets commission.
//   - A BUY larger than an open short covers then flips to long at the fill
//     price; a SELL larger than an open long flips to short.
//
// The portfolio snapshot persists to a JSON document after every successful
// execution batch, using the atomic tmp + rename pattern.
// =============================================================================

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::types::Side;

// ---------------------------------------------------------------------------
// Position model
// ---------------------------------------------------------------------------

/// A single open position. `quantity` is signed: positive = long,
/// negative = short.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub quantity: i64,
    pub avg_price: f64,
    #[serde(default)]
    pub current_price: f64,
    /// High watermark since entry (drives the trailing stop for longs).
    #[serde(default)]
    pub highest_price: f64,
    /// Low watermark since entry (drives the trailing stop for shorts).
    #[serde(default)]
    pub lowest_price: f64,
}

impl Position {
    fn new(symbol: impl Into<String>, quantity: i64, avg_price: f64, current_price: f64) -> Self {
        Self {
            symbol: symbol.into(),
            quantity,
            avg_price,
            current_price,
            highest_price: avg_price,
            lowest_price: avg_price,
        }
    }

    pub fn market_value(&self) -> f64 {
        self.quantity as f64 * self.current_price
    }

    pub fn unrealized_pnl(&self) -> f64 {
        (self.current_price - self.avg_price) * self.quantity as f64
    }

    pub fn is_long(&self) -> bool {
        self.quantity > 0
    }
}

/// Full portfolio state: cash, open positions, and marked equity.
#[derive(Debug, Clone, Default)]
pub struct PortfolioState {
    pub cash: f64,
    pub positions: HashMap<String, Position>,
    pub equity: f64,
}

// ---------------------------------------------------------------------------
// Snapshot wire format (portfolio.json)
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
struct PositionSnapshot {
    quantity: i64,
    avg_price: f64,
    #[serde(default)]
    highest_price: f64,
    #[serde(default)]
    lowest_price: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct PortfolioSnapshot {
    cash: f64,
    #[serde(default)]
    equity: f64,
    #[serde(default)]
    positions: HashMap<String, PositionSnapshot>,
}

// ---------------------------------------------------------------------------
// Portfolio
// ---------------------------------------------------------------------------

/// Simulated broker: owns the cash ledger and all open positions for one
/// workflow invocation.
pub struct Portfolio {
    pub state: PortfolioState,
    file_path: PathBuf,
    slippage_bps: f64,
    commission: f64,
    max_positions: usize,
}

impl Portfolio {
    /// Load the portfolio from its JSON snapshot, or start fresh with the
    /// configured starting equity when the snapshot is missing or corrupt.
    pub fn load(cfg: &Config) -> Self {
        let file_path = PathBuf::from(&cfg.logging.portfolio_file);
        let starting_equity = cfg.risk.equity;

        let state = match std::fs::read_to_string(&file_path) {
            Ok(content) => match serde_json::from_str::<PortfolioSnapshot>(&content) {
                Ok(snap) => {
                    let positions = snap
                        .positions
                        .into_iter()
                        .map(|(sym, p)| {
                            let mut pos = Position::new(sym.clone(), p.quantity, p.avg_price, 0.0);
                            if p.highest_price > 0.0 {
                                pos.highest_price = p.highest_price;
                            }
                            if p.lowest_price > 0.0 {
                                pos.lowest_price = p.lowest_price;
                            }
                            (sym, pos)
                        })
                        .collect();
                    PortfolioState {
                        cash: snap.cash,
                        positions,
                        equity: snap.equity,
                    }
                }
                Err(e) => {
                    warn!(error = %e, "portfolio snapshot corrupt — starting fresh");
                    PortfolioState {
                        cash: starting_equity,
                        equity: starting_equity,
                        ..Default::default()
                    }
                }
            },
            Err(_) => PortfolioState {
                cash: starting_equity,
                equity: starting_equity,
                ..Default::default()
            },
        };

        info!(
            cash = state.cash,
            positions = state.positions.len(),
            "portfolio loaded"
        );

        Self {
            state,
            file_path,
            slippage_bps: cfg.execution.slippage_bps,
            commission: cfg.execution.commission,
            max_positions: cfg.risk.max_positions.max(1),
        }
    }

    /// Persist the current state to the snapshot file (atomic write).
    pub fn save(&self) -> Result<()> {
        let snap = PortfolioSnapshot {
            cash: self.state.cash,
            equity: self.state.equity,
            positions: self
                .state
                .positions
                .iter()
                .map(|(sym, p)| {
                    (
                        sym.clone(),
                        PositionSnapshot {
                            quantity: p.quantity,
                            avg_price: p.avg_price,
                            highest_price: p.highest_price,
                            lowest_price: p.lowest_price,
                        },
                    )
                })
                .collect(),
        };

        let content =
            serde_json::to_string_pretty(&snap).context("failed to serialise portfolio")?;
        let tmp = self.file_path.with_extension("json.tmp");
        std::fs::write(&tmp, &content)
            .with_context(|| format!("failed to write tmp snapshot to {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.file_path).with_context(|| {
            format!("failed to rename tmp snapshot to {}", self.file_path.display())
        })?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Mark to market
    // -------------------------------------------------------------------------

    /// Update current prices, watermarks, and equity from the latest quotes.
    pub fn mark_to_market(&mut self, prices: &HashMap<String, f64>) {
        let mut pos_value = 0.0;
        for pos in self.state.positions.values_mut() {
            if let Some(&price) = prices.get(&pos.symbol) {
                if price > 0.0 {
                    pos.current_price = price;
                    if price > pos.highest_price {
                        pos.highest_price = price;
                    }
                    if price < pos.lowest_price || pos.lowest_price == 0.0 {
                        pos.lowest_price = price;
                    }
                }
            }
            pos_value += pos.market_value();
        }
        self.state.equity = self.state.cash + pos_value;
        debug!(
            cash = self.state.cash,
            equity = self.state.equity,
            positions = self.state.positions.len(),
            "mark to market"
        );
    }

    // -------------------------------------------------------------------------
    // Execution
    // -------------------------------------------------------------------------

    /// Execute a trade and return the realized PnL.
    ///
    /// When `quantity` is zero the order is sized from `target_value` (or an
    /// equal-weight fallback of equity / max_positions), floored at one share.
    /// Invalid prices or targets skip the fill with a warning and return 0.0.
    pub fn execute(
        &mut self,
        symbol: &str,
        side: Side,
        price: f64,
        quantity: i64,
        target_value: f64,
    ) -> f64 {
        let slippage = self.slippage_bps * 1e-4;
        let exec_price = match side {
            Side::Buy => price * (1.0 + slippage),
            Side::Sell => price * (1.0 - slippage),
        };

        if !exec_price.is_finite() || exec_price <= 0.0 {
            warn!(symbol, exec_price, "skipping trade: invalid execution price");
            return 0.0;
        }

        let mut quantity = quantity;
        if quantity == 0 {
            if target_value > 0.0 {
                if !target_value.is_finite() {
                    warn!(symbol, target_value, "skipping trade: invalid target value");
                    return 0.0;
                }
                quantity = (target_value / exec_price).floor() as i64;
            } else {
                let target_alloc = self.state.equity / self.max_positions as f64;
                if !target_alloc.is_finite() || target_alloc <= 0.0 {
                    warn!(
                        symbol,
                        target_alloc,
                        equity = self.state.equity,
                        "skipping trade: invalid equal-weight allocation"
                    );
                    return 0.0;
                }
                quantity = (target_alloc / exec_price).floor() as i64;
            }
            if quantity < 1 {
                quantity = 1;
            }
        }

        let realized = match side {
            Side::Buy => self.execute_buy(symbol, price, exec_price, quantity),
            Side::Sell => self.execute_sell(symbol, price, exec_price, quantity),
        };

        if let Some(pos) = self.state.positions.get(symbol) {
            if pos.quantity == 0 {
                self.state.positions.remove(symbol);
            }
        }

        info!(
            symbol,
            side = %side,
            price,
            exec_price,
            quantity,
            realized,
            cash = self.state.cash,
            "trade executed"
        );

        realized
    }

    fn execute_buy(&mut self, symbol: &str, price: f64, exec_price: f64, quantity: i64) -> f64 {
        let mut realized = 0.0;

        let covering_short = self
            .state
            .positions
            .get(symbol)
            .map(|p| p.quantity < 0)
            .unwrap_or(false);

        if covering_short {
            let pos = self.state.positions.get_mut(symbol).expect("checked above");
            let qty_to_cover = quantity.min(-pos.quantity);
            let cover_comm = qty_to_cover as f64 * self.commission;

            let entry_val = pos.avg_price * qty_to_cover as f64;
            let exit_val = exec_price * qty_to_cover as f64;

            self.state.cash -= exit_val + cover_comm;
            realized += (entry_val - exit_val) - cover_comm;
            pos.quantity += qty_to_cover;

            let remaining = quantity - qty_to_cover;
            if remaining > 0 {
                let rem_comm = remaining as f64 * self.commission;
                let cost_rem = exec_price * remaining as f64 + rem_comm;
                if self.state.cash >= cost_rem && pos.quantity == 0 {
                    self.state.cash -= cost_rem;
                    pos.quantity = remaining;
                    pos.avg_price = exec_price + rem_comm / remaining as f64;
                    pos.current_price = price;
                    // Sign flipped: the watermarks restart from the new basis.
                    pos.highest_price = pos.avg_price;
                    pos.lowest_price = pos.avg_price;
                } else if remaining > 0 && pos.quantity == 0 {
                    warn!(symbol, "not enough cash to flip long");
                }
            }
        } else {
            let comm_cost = quantity as f64 * self.commission;
            let cost = exec_price * quantity as f64 + comm_cost;
            if self.state.cash >= cost {
                self.state.cash -= cost;
                if let Some(pos) = self.state.positions.get_mut(symbol) {
                    // Basis averages in the new lot including its commission.
                    let total_basis = pos.quantity as f64 * pos.avg_price
                        + exec_price * quantity as f64
                        + comm_cost;
                    pos.quantity += quantity;
                    pos.avg_price = total_basis / pos.quantity as f64;
                    pos.current_price = price;
                } else {
                    let basis_price = exec_price + comm_cost / quantity as f64;
                    self.state
                        .positions
                        .insert(symbol.to_string(), Position::new(symbol, quantity, basis_price, price));
                }
            } else {
                warn!(symbol, cost, cash = self.state.cash, "not enough cash to buy");
            }
        }

        realized
    }

    fn execute_sell(&mut self, symbol: &str, price: f64, exec_price: f64, quantity: i64) -> f64 {
        let mut realized = 0.0;

        let closing_long = self
            .state
            .positions
            .get(symbol)
            .map(|p| p.quantity > 0)
            .unwrap_or(false);

        if closing_long {
            let pos = self.state.positions.get_mut(symbol).expect("checked above");
            let qty_to_sell = quantity.min(pos.quantity);
            let part_comm = qty_to_sell as f64 * self.commission;
            let net_proceeds = exec_price * qty_to_sell as f64 - part_comm;
            let cost_basis = pos.avg_price * qty_to_sell as f64;

            self.state.cash += net_proceeds;
            realized += net_proceeds - cost_basis;
            pos.quantity -= qty_to_sell;

            let remaining = quantity - qty_to_sell;
            if remaining > 0 && pos.quantity == 0 {
                let rem_comm = remaining as f64 * self.commission;
                let short_proceeds = exec_price * remaining as f64 - rem_comm;
                self.state.cash += short_proceeds;
                pos.quantity = -remaining;
                pos.avg_price = exec_price - rem_comm / remaining as f64;
                pos.current_price = price;
                pos.highest_price = pos.avg_price;
                pos.lowest_price = pos.avg_price;
            }
        } else if self.state.equity > 0.0 {
            // Opening (or adding to) a short.
            let comm_cost = quantity as f64 * self.commission;
            let proceeds = exec_price * quantity as f64 - comm_cost;
            self.state.cash += proceeds;
            let effective_entry = exec_price - comm_cost / quantity as f64;

            if let Some(pos) = self.state.positions.get_mut(symbol) {
                let total_val =
                    pos.quantity.unsigned_abs() as f64 * pos.avg_price + effective_entry * quantity as f64;
                pos.quantity -= quantity;
                pos.avg_price = total_val / pos.quantity.unsigned_abs() as f64;
                pos.current_price = price;
            } else {
                self.state.positions.insert(
                    symbol.to_string(),
                    Position::new(symbol, -quantity, effective_entry, price),
                );
            }
        } else {
            warn!(symbol, equity = self.state.equity, "equity too low to short");
        }

        realized
    }

    /// Sum of unrealized PnL across all open positions.
    pub fn total_unrealized(&self) -> f64 {
        self.state.positions.values().map(|p| p.unrealized_pnl()).sum()
    }
}
