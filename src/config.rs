// =============================================================================
// Engine Configuration — hierarchical settings loaded from a single JSON file
// =============================================================================
//
// Every tunable parameter of the engine lives here, grouped into the same
// sections the workflow consumes them in (data, hours, signals, risk, ...).
//
// All fields carry `#[serde(default)]` so that adding new fields never breaks
// loading an older config file. Persistence uses the atomic tmp + rename
// pattern to prevent corruption on crash.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_interval() -> String {
    "5m".to_string()
}

fn default_lookback() -> String {
    "5d".to_string()
}

fn default_tz() -> String {
    "America/New_York".to_string()
}

fn default_hours_start() -> String {
    "09:30".to_string()
}

fn default_hours_end() -> String {
    "16:00".to_string()
}

fn default_universe() -> Vec<String> {
    vec![
        "AAPL".to_string(),
        "MSFT".to_string(),
        "NVDA".to_string(),
        "AMD".to_string(),
        "COIN".to_string(),
    ]
}

fn default_scout_top_n() -> usize {
    5
}

fn default_weight() -> f64 {
    0.25
}

fn default_trade_threshold() -> f64 {
    0.15
}

fn default_momentum_short() -> usize {
    5
}

fn default_breakout_lookback() -> usize {
    10
}

fn default_meanrev_long() -> usize {
    20
}

fn default_norm_lookback() -> usize {
    100
}

fn default_fixed_fraction() -> f64 {
    0.02
}

fn default_correlation_threshold() -> f64 {
    0.7
}

fn default_max_trades_per_cycle() -> usize {
    3
}

fn default_equity() -> f64 {
    5000.0
}

fn default_max_positions() -> usize {
    3
}

fn default_max_position_pct() -> f64 {
    0.35
}

fn default_stop_loss() -> f64 {
    0.02
}

fn default_atr_stop_multiplier() -> f64 {
    2.0
}

fn default_atr_period() -> usize {
    14
}

fn default_min_atr_pct() -> f64 {
    0.005
}

fn default_max_atr_pct() -> f64 {
    0.10
}

fn default_breakeven_trigger() -> f64 {
    0.015
}

fn default_trailing_trigger() -> f64 {
    0.025
}

fn default_trailing_pct() -> f64 {
    0.012
}

fn default_wide_trail_trigger() -> f64 {
    0.04
}

fn default_wide_trail_pct() -> f64 {
    0.02
}

fn default_take_profit() -> f64 {
    0.05
}

fn default_portfolio_kill_pct() -> f64 {
    0.05
}

fn default_sector_filter_threshold() -> f64 {
    -0.15
}

fn default_slippage_bps() -> f64 {
    2.0
}

fn default_volume_lookback() -> usize {
    20
}

fn default_volume_min_ratio() -> f64 {
    1.0
}

fn default_morning_cutoff_hour() -> u32 {
    10
}

fn default_morning_cutoff_minute() -> u32 {
    30
}

fn default_morning_min_score() -> f64 {
    0.6
}

fn default_true() -> bool {
    true
}

fn default_crypto_momentum_periods() -> usize {
    10
}

fn default_crypto_momentum_threshold() -> f64 {
    0.003
}

fn default_crypto_symbols() -> Vec<String> {
    vec![
        "IREN".to_string(),
        "HUT".to_string(),
        "MARA".to_string(),
        "RIOT".to_string(),
        "CORZ".to_string(),
        "BITF".to_string(),
        "MSTR".to_string(),
        "COIN".to_string(),
    ]
}

fn default_crypto_sectors() -> Vec<String> {
    vec!["Crypto/AI Infra".to_string()]
}

fn default_min_price() -> f64 {
    5.0
}

fn default_last_entry_minutes() -> i64 {
    30
}

fn default_caution_min_score() -> f64 {
    0.5
}

fn default_disagreement_threshold() -> f64 {
    1.5
}

fn default_reentry_cooldown_minutes() -> i64 {
    60
}

fn default_max_consecutive_losses() -> usize {
    3
}

fn default_process_variance() -> f64 {
    1e-5
}

fn default_measurement_variance() -> f64 {
    1e-3
}

fn default_hmm_states() -> usize {
    3
}

fn default_hmm_lookback() -> usize {
    60
}

fn default_refit_interval() -> u64 {
    5
}

fn default_rolling_window() -> usize {
    50
}

fn default_max_age_days() -> i64 {
    90
}

fn default_min_samples() -> usize {
    10
}

fn default_max_adjustment() -> f64 {
    0.20
}

fn default_underperform_threshold() -> f64 {
    0.10
}

fn default_decay_halflife_days() -> f64 {
    14.0
}

fn default_approval_file() -> String {
    "approval.json".to_string()
}

fn default_trades_csv() -> String {
    "trading_logs/trades.csv".to_string()
}

fn default_events_csv() -> String {
    "trading_logs/events.csv".to_string()
}

fn default_signals_csv() -> String {
    "trading_logs/signals.csv".to_string()
}

fn default_db_path() -> String {
    "trading.db".to_string()
}

fn default_regime_state_file() -> String {
    "regime_state.json".to_string()
}

fn default_portfolio_file() -> String {
    "portfolio.json".to_string()
}

// =============================================================================
// Sections
// =============================================================================

/// Bar interval and history window requested from the market-data source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    #[serde(default = "default_interval")]
    pub interval: String,
    #[serde(default = "default_lookback")]
    pub lookback: String,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            lookback: default_lookback(),
        }
    }
}

/// Trading window in the market's local timezone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HoursConfig {
    #[serde(default = "default_tz")]
    pub tz: String,
    /// Window start, "HH:MM".
    #[serde(default = "default_hours_start")]
    pub start: String,
    /// Window end, "HH:MM".
    #[serde(default = "default_hours_end")]
    pub end: String,
    /// Market holidays, "YYYY-MM-DD".
    #[serde(default)]
    pub holidays: Vec<String>,
}

impl Default for HoursConfig {
    fn default() -> Self {
        Self {
            tz: default_tz(),
            start: default_hours_start(),
            end: default_hours_end(),
            holidays: Vec::new(),
        }
    }
}

/// Per-signal composite weights.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalWeights {
    #[serde(default = "default_weight")]
    pub momentum: f64,
    #[serde(default = "default_weight")]
    pub meanrev: f64,
    #[serde(default = "default_weight")]
    pub breakout: f64,
    #[serde(default = "default_weight")]
    pub news: f64,
}

impl Default for SignalWeights {
    fn default() -> Self {
        Self {
            momentum: default_weight(),
            meanrev: default_weight(),
            breakout: default_weight(),
            news: default_weight(),
        }
    }
}

/// How the PM converts a conviction score into a dollar size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizingMethod {
    Volatility,
    FixedFractional,
    Kelly,
}

impl Default for SizingMethod {
    fn default() -> Self {
        Self::Volatility
    }
}

impl std::fmt::Display for SizingMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Volatility => write!(f, "volatility"),
            Self::FixedFractional => write!(f, "fixed_fractional"),
            Self::Kelly => write!(f, "kelly"),
        }
    }
}

/// Signal computation and plan-construction knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalsConfig {
    #[serde(default)]
    pub weights: SignalWeights,
    /// Minimum |composite| for a candidate to be admitted (inclusive).
    #[serde(default = "default_trade_threshold")]
    pub trade_threshold: f64,
    #[serde(default = "default_momentum_short")]
    pub momentum_short: usize,
    #[serde(default = "default_breakout_lookback")]
    pub breakout_lookback: usize,
    #[serde(default = "default_meanrev_long")]
    pub meanrev_long: usize,
    #[serde(default = "default_norm_lookback")]
    pub norm_lookback: usize,
    #[serde(default)]
    pub sizing_method: SizingMethod,
    #[serde(default = "default_fixed_fraction")]
    pub fixed_fraction: f64,
    #[serde(default = "default_correlation_threshold")]
    pub correlation_threshold: f64,
    #[serde(default = "default_max_trades_per_cycle")]
    pub max_trades_per_cycle: usize,
}

impl Default for SignalsConfig {
    fn default() -> Self {
        Self {
            weights: SignalWeights::default(),
            trade_threshold: default_trade_threshold(),
            momentum_short: default_momentum_short(),
            breakout_lookback: default_breakout_lookback(),
            meanrev_long: default_meanrev_long(),
            norm_lookback: default_norm_lookback(),
            sizing_method: SizingMethod::default(),
            fixed_fraction: default_fixed_fraction(),
            correlation_threshold: default_correlation_threshold(),
            max_trades_per_cycle: default_max_trades_per_cycle(),
        }
    }
}

/// Risk limits: volatility band, exit ladder, position caps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Starting cash when no portfolio snapshot exists yet.
    #[serde(default = "default_equity")]
    pub equity: f64,
    #[serde(default = "default_max_positions")]
    pub max_positions: usize,
    #[serde(default = "default_max_position_pct")]
    pub max_position_pct: f64,
    /// Hard stop fallback used when ATR cannot be computed.
    #[serde(default = "default_stop_loss")]
    pub stop_loss: f64,
    #[serde(default = "default_atr_stop_multiplier")]
    pub atr_stop_multiplier: f64,
    #[serde(default = "default_atr_period")]
    pub atr_period: usize,
    #[serde(default = "default_min_atr_pct")]
    pub min_atr_pct: f64,
    #[serde(default = "default_max_atr_pct")]
    pub max_atr_pct: f64,
    /// Peak gain that arms the breakeven stop.
    #[serde(default = "default_breakeven_trigger")]
    pub trailing_breakeven_trigger: f64,
    /// Peak gain that arms the trailing stop.
    #[serde(default = "default_trailing_trigger")]
    pub trailing_trigger: f64,
    #[serde(default = "default_trailing_pct")]
    pub trailing_pct: f64,
    /// Peak gain that switches to the wide trailing distance.
    #[serde(default = "default_wide_trail_trigger")]
    pub wide_trail_trigger: f64,
    #[serde(default = "default_wide_trail_pct")]
    pub wide_trail_pct: f64,
    #[serde(default = "default_take_profit")]
    pub take_profit: f64,
    /// Portfolio-wide unrealized-loss fraction that closes everything.
    #[serde(default = "default_portfolio_kill_pct")]
    pub portfolio_kill_pct: f64,
    #[serde(default = "default_sector_filter_threshold")]
    pub sector_filter_threshold: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            equity: default_equity(),
            max_positions: default_max_positions(),
            max_position_pct: default_max_position_pct(),
            stop_loss: default_stop_loss(),
            atr_stop_multiplier: default_atr_stop_multiplier(),
            atr_period: default_atr_period(),
            min_atr_pct: default_min_atr_pct(),
            max_atr_pct: default_max_atr_pct(),
            trailing_breakeven_trigger: default_breakeven_trigger(),
            trailing_trigger: default_trailing_trigger(),
            trailing_pct: default_trailing_pct(),
            wide_trail_trigger: default_wide_trail_trigger(),
            wide_trail_pct: default_wide_trail_pct(),
            take_profit: default_take_profit(),
            portfolio_kill_pct: default_portfolio_kill_pct(),
            sector_filter_threshold: default_sector_filter_threshold(),
        }
    }
}

/// Execution realism: slippage and per-share commission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default = "default_slippage_bps")]
    pub slippage_bps: f64,
    /// Commission per share, in dollars.
    #[serde(default)]
    pub commission: f64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            slippage_bps: default_slippage_bps(),
            commission: 0.0,
        }
    }
}

/// Final pre-trade gates applied per candidate just before execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreExecutionConfig {
    #[serde(default = "default_volume_lookback")]
    pub volume_lookback: usize,
    #[serde(default = "default_volume_min_ratio")]
    pub volume_min_ratio: f64,
    #[serde(default = "default_morning_cutoff_hour")]
    pub morning_cutoff_hour: u32,
    #[serde(default = "default_morning_cutoff_minute")]
    pub morning_cutoff_minute: u32,
    #[serde(default = "default_morning_min_score")]
    pub morning_min_score: f64,
    #[serde(default = "default_true")]
    pub morning_require_kalman: bool,
    #[serde(default = "default_crypto_momentum_periods")]
    pub crypto_momentum_periods: usize,
    #[serde(default = "default_crypto_momentum_threshold")]
    pub crypto_momentum_threshold: f64,
    #[serde(default = "default_crypto_symbols")]
    pub crypto_symbols: Vec<String>,
    #[serde(default = "default_crypto_sectors")]
    pub crypto_sectors: Vec<String>,
    #[serde(default = "default_true")]
    pub kalman_agreement_required: bool,
    #[serde(default = "default_min_price")]
    pub min_price: f64,
    /// No new entries within this many minutes of the window end.
    #[serde(default = "default_last_entry_minutes")]
    pub last_entry_minutes: i64,
    #[serde(default = "default_caution_min_score")]
    pub caution_min_score: f64,
}

impl Default for PreExecutionConfig {
    fn default() -> Self {
        Self {
            volume_lookback: default_volume_lookback(),
            volume_min_ratio: default_volume_min_ratio(),
            morning_cutoff_hour: default_morning_cutoff_hour(),
            morning_cutoff_minute: default_morning_cutoff_minute(),
            morning_min_score: default_morning_min_score(),
            morning_require_kalman: true,
            crypto_momentum_periods: default_crypto_momentum_periods(),
            crypto_momentum_threshold: default_crypto_momentum_threshold(),
            crypto_symbols: default_crypto_symbols(),
            crypto_sectors: default_crypto_sectors(),
            kalman_agreement_required: true,
            min_price: default_min_price(),
            last_entry_minutes: default_last_entry_minutes(),
            caution_min_score: default_caution_min_score(),
        }
    }
}

/// Thresholds for the trade challenge system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChallengesConfig {
    #[serde(default = "default_disagreement_threshold")]
    pub disagreement_threshold: f64,
    #[serde(default = "default_reentry_cooldown_minutes")]
    pub reentry_cooldown_minutes: i64,
    #[serde(default)]
    pub min_news_score: f64,
    #[serde(default = "default_max_consecutive_losses")]
    pub max_consecutive_losses: usize,
}

impl Default for ChallengesConfig {
    fn default() -> Self {
        Self {
            disagreement_threshold: default_disagreement_threshold(),
            reentry_cooldown_minutes: default_reentry_cooldown_minutes(),
            min_news_score: 0.0,
            max_consecutive_losses: default_max_consecutive_losses(),
        }
    }
}

/// Kalman filter noise parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KalmanConfig {
    #[serde(default = "default_process_variance")]
    pub process_variance: f64,
    #[serde(default = "default_measurement_variance")]
    pub measurement_variance: f64,
}

impl Default for KalmanConfig {
    fn default() -> Self {
        Self {
            process_variance: default_process_variance(),
            measurement_variance: default_measurement_variance(),
        }
    }
}

/// HMM regime detector parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HmmConfig {
    #[serde(default = "default_hmm_states")]
    pub n_states: usize,
    #[serde(default = "default_hmm_lookback")]
    pub lookback: usize,
    /// Refit via Baum-Welch every N shadow runs.
    #[serde(default = "default_refit_interval")]
    pub refit_interval: u64,
}

impl Default for HmmConfig {
    fn default() -> Self {
        Self {
            n_states: default_hmm_states(),
            lookback: default_hmm_lookback(),
            refit_interval: default_refit_interval(),
        }
    }
}

/// Shadow-mode model runner (Kalman + HMM, logged but never order-driving).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShadowModeConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub kalman: KalmanConfig,
    #[serde(default)]
    pub hmm: HmmConfig,
}

impl Default for ShadowModeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            kalman: KalmanConfig::default(),
            hmm: HmmConfig::default(),
        }
    }
}

/// Per-agent rolling memory with safety guardrails.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMemoryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_rolling_window")]
    pub rolling_window: usize,
    #[serde(default = "default_max_age_days")]
    pub max_age_days: i64,
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,
    #[serde(default = "default_max_adjustment")]
    pub max_adjustment: f64,
    #[serde(default = "default_underperform_threshold")]
    pub underperform_threshold: f64,
    #[serde(default = "default_decay_halflife_days")]
    pub decay_halflife_days: f64,
    #[serde(default = "default_true")]
    pub regime_matching: bool,
}

impl Default for AgentMemoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            rolling_window: default_rolling_window(),
            max_age_days: default_max_age_days(),
            min_samples: default_min_samples(),
            max_adjustment: default_max_adjustment(),
            underperform_threshold: default_underperform_threshold(),
            decay_halflife_days: default_decay_halflife_days(),
            regime_matching: true,
        }
    }
}

/// Human approval gate over an externally produced document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalConfig {
    #[serde(default)]
    pub required: bool,
    #[serde(default = "default_approval_file")]
    pub file: String,
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            required: false,
            file: default_approval_file(),
        }
    }
}

/// News source selection: keyword scoring always works; a structured
/// sentiment provider can be switched in when available.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsConfig {
    #[serde(default)]
    pub structured: bool,
    /// Base URL of the structured sentiment endpoint (used when `structured`).
    #[serde(default)]
    pub structured_url: String,
}

impl Default for NewsConfig {
    fn default() -> Self {
        Self {
            structured: false,
            structured_url: String::new(),
        }
    }
}

/// Output file locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_trades_csv")]
    pub trades_csv: String,
    #[serde(default = "default_events_csv")]
    pub events_csv: String,
    #[serde(default = "default_signals_csv")]
    pub signals_csv: String,
    #[serde(default = "default_db_path")]
    pub db_path: String,
    /// Shared regime-monitor output, read-only for the engine.
    #[serde(default = "default_regime_state_file")]
    pub regime_state_file: String,
    #[serde(default = "default_portfolio_file")]
    pub portfolio_file: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            trades_csv: default_trades_csv(),
            events_csv: default_events_csv(),
            signals_csv: default_signals_csv(),
            db_path: default_db_path(),
            regime_state_file: default_regime_state_file(),
            portfolio_file: default_portfolio_file(),
        }
    }
}

// =============================================================================
// Config
// =============================================================================

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub data: DataConfig,
    #[serde(default)]
    pub hours: HoursConfig,
    #[serde(default = "default_universe")]
    pub universe: Vec<String>,
    #[serde(default = "default_scout_top_n")]
    pub scout_top_n: usize,
    #[serde(default)]
    pub signals: SignalsConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub pre_execution: PreExecutionConfig,
    #[serde(default)]
    pub challenges: ChallengesConfig,
    #[serde(default)]
    pub shadow_mode: ShadowModeConfig,
    #[serde(default)]
    pub agent_memory: AgentMemoryConfig,
    #[serde(default)]
    pub approval: ApprovalConfig,
    #[serde(default)]
    pub news: NewsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data: DataConfig::default(),
            hours: HoursConfig::default(),
            universe: default_universe(),
            scout_top_n: default_scout_top_n(),
            signals: SignalsConfig::default(),
            risk: RiskConfig::default(),
            execution: ExecutionConfig::default(),
            pre_execution: PreExecutionConfig::default(),
            challenges: ChallengesConfig::default(),
            shadow_mode: ShadowModeConfig::default(),
            agent_memory: AgentMemoryConfig::default(),
            approval: ApprovalConfig::default(),
            news: NewsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse config from {}", path.display()))?;

        if config.universe.is_empty() {
            anyhow::bail!("config error: universe is empty in {}", path.display());
        }

        info!(
            path = %path.display(),
            universe = ?config.universe,
            interval = %config.data.interval,
            sizing = %config.signals.sizing_method,
            "config loaded"
        );

        Ok(config)
    }

    /// Persist the configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content =
            serde_json::to_string_pretty(self).context("failed to serialise config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = Config::default();
        assert_eq!(cfg.data.interval, "5m");
        assert_eq!(cfg.hours.tz, "America/New_York");
        assert_eq!(cfg.scout_top_n, 5);
        assert!((cfg.signals.trade_threshold - 0.15).abs() < f64::EPSILON);
        assert_eq!(cfg.signals.sizing_method, SizingMethod::Volatility);
        assert_eq!(cfg.risk.max_positions, 3);
        assert!((cfg.risk.portfolio_kill_pct - 0.05).abs() < f64::EPSILON);
        assert_eq!(cfg.pre_execution.morning_cutoff_hour, 10);
        assert_eq!(cfg.pre_execution.morning_cutoff_minute, 30);
        assert_eq!(cfg.challenges.max_consecutive_losses, 3);
        assert!(cfg.shadow_mode.enabled);
        assert!(!cfg.approval.required);
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.data.lookback, "5d");
        assert_eq!(cfg.agent_memory.rolling_window, 50);
        assert!((cfg.agent_memory.decay_halflife_days - 14.0).abs() < f64::EPSILON);
        assert_eq!(cfg.logging.db_path, "trading.db");
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{
            "universe": ["TSLA"],
            "signals": { "trade_threshold": 0.25, "sizing_method": "kelly" },
            "risk": { "max_positions": 5 }
        }"#;
        let cfg: Config = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.universe, vec!["TSLA"]);
        assert!((cfg.signals.trade_threshold - 0.25).abs() < f64::EPSILON);
        assert_eq!(cfg.signals.sizing_method, SizingMethod::Kelly);
        assert_eq!(cfg.risk.max_positions, 5);
        // Untouched sections fall back to defaults.
        assert_eq!(cfg.signals.meanrev_long, 20);
        assert!((cfg.risk.take_profit - 0.05).abs() < f64::EPSILON);
    }

    #[test]
    fn roundtrip_serialisation() {
        let cfg = Config::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let cfg2: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.universe, cfg2.universe);
        assert_eq!(cfg.signals.max_trades_per_cycle, cfg2.signals.max_trades_per_cycle);
        assert_eq!(cfg.shadow_mode.hmm.refit_interval, cfg2.shadow_mode.hmm.refit_interval);
    }

    #[test]
    fn load_rejects_empty_universe() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "universe": [] }"#).unwrap();
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn save_then_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let cfg = Config::default();
        cfg.save(&path).unwrap();
        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.universe, cfg.universe);
        assert_eq!(loaded.pre_execution.crypto_symbols, cfg.pre_execution.crypto_symbols);
    }
}
