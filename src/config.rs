//! Configuration management
//!
//! Handles loading and parsing of JSON configuration files. Every field has a
//! serde default so a partial (or empty) file yields a runnable configuration.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::indicators::MovingAverageKind;
use crate::stops::StopLossMethod;
use crate::targets::TakeProfitMethod;
use crate::{PositionSide, Symbol, TradeDirection};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub trading: TradingConfig,
    #[serde(default)]
    pub strategy: StrategyConfig,
    #[serde(default)]
    pub tickers: Vec<TickerConfig>,
    #[serde(default)]
    pub backtest: BacktestConfig,
    #[serde(default)]
    pub sweep: SweepConfig,
}

impl Config {
    /// Load configuration from JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config =
            serde_json::from_str(&contents).context("Failed to parse config JSON")?;
        config.validate()?;
        Ok(config)
    }

    /// Validate every section the engine reads
    pub fn validate(&self) -> Result<()> {
        self.trading.validate().context("Invalid trading config")?;
        self.strategy.validate().context("Invalid strategy config")?;
        for ticker in &self.tickers {
            if let Some(capital) = ticker.initial_capital {
                if !capital.is_finite() || capital <= 0.0 {
                    bail!(
                        "Invalid ticker config: {} initial_capital must be positive, got {}",
                        ticker.ticker,
                        capital
                    );
                }
            }
        }
        Ok(())
    }

    /// Copy of this config using the given stop / target method pair
    pub fn with_methods(&self, stop: StopLossMethod, target: TakeProfitMethod) -> Self {
        let mut config = self.clone();
        config.strategy.stop_loss_method = stop.name().to_string();
        config.strategy.take_profit_method = target.name().to_string();
        config
    }

    /// Look up a ticker entry by name
    pub fn ticker(&self, name: &str) -> Option<&TickerConfig> {
        self.tickers.iter().find(|t| t.ticker == name)
    }
}

/// Capital and cost model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfig {
    #[serde(default = "default_initial_capital")]
    pub initial_capital: f64,
    /// Proportional commission per fill (0.0005 = 0.05%)
    #[serde(default = "default_commission")]
    pub commission: f64,
    /// Adverse slippage fraction applied to every fill
    #[serde(default)]
    pub slippage: f64,
}

fn default_initial_capital() -> f64 {
    100_000.0
}
fn default_commission() -> f64 {
    0.0005
}

impl TradingConfig {
    /// Capital must be positive; commission and slippage are non-negative,
    /// and slippage stays below 100% so fills keep a positive price
    pub fn validate(&self) -> Result<()> {
        if !self.initial_capital.is_finite() || self.initial_capital <= 0.0 {
            bail!("initial_capital must be positive, got {}", self.initial_capital);
        }
        if !self.commission.is_finite() || self.commission < 0.0 {
            bail!("commission must be a non-negative number, got {}", self.commission);
        }
        if !self.slippage.is_finite() || !(0.0..1.0).contains(&self.slippage) {
            bail!("slippage must be in [0, 1), got {}", self.slippage);
        }
        Ok(())
    }
}

impl Default for TradingConfig {
    fn default() -> Self {
        TradingConfig {
            initial_capital: default_initial_capital(),
            commission: default_commission(),
            slippage: 0.0,
        }
    }
}

/// Strategy parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    #[serde(default)]
    pub position_side: TradeDirection,
    /// Base risk fraction used for sizing
    #[serde(default = "default_risk_percent")]
    pub risk_percent: f64,
    /// Trailing / fallback target risk fraction for longs
    #[serde(default = "default_risk_percent")]
    pub risk_percent_long: f64,
    /// Trailing / fallback target risk fraction for shorts
    #[serde(default = "default_risk_percent_short")]
    pub risk_percent_short: f64,
    #[serde(default = "default_profit_to_risk")]
    pub profit_to_risk: f64,
    #[serde(default = "default_atr_multiplier")]
    pub atr_multiplier: f64,
    #[serde(default = "default_atr_period")]
    pub atr_period: usize,
    #[serde(default = "default_rsi_period")]
    pub rsi_period: usize,
    #[serde(default = "default_ma_fast")]
    pub ma_fast: usize,
    #[serde(default = "default_ma_medium")]
    pub ma_medium: usize,
    #[serde(default = "default_ma_slow")]
    pub ma_slow: usize,
    #[serde(default)]
    pub ma_kind: MovingAverageKind,
    #[serde(default = "default_partial_exit")]
    pub partial_exit: bool,
    /// Profit fraction that triggers the partial exit
    #[serde(default = "default_partial_exit_threshold")]
    pub partial_exit_threshold: f64,
    /// Minimum bars between trade events
    #[serde(default = "default_min_trade_bars")]
    pub min_trade_bars: usize,
    #[serde(default = "default_method_name")]
    pub stop_loss_method: String,
    #[serde(default = "default_method_name")]
    pub take_profit_method: String,
    /// ATR multiple for `volatility_stop`
    #[serde(default = "default_volatility_stop_multiplier")]
    pub volatility_stop_multiplier: f64,
    /// Safety margin for `MA_50_18`
    #[serde(default = "default_ma_stop_margin")]
    pub ma_stop_margin: f64,
}

fn default_risk_percent() -> f64 {
    0.02
}
fn default_risk_percent_short() -> f64 {
    0.01
}
fn default_profit_to_risk() -> f64 {
    2.0
}
fn default_atr_multiplier() -> f64 {
    1.2
}
fn default_atr_period() -> usize {
    14
}
fn default_rsi_period() -> usize {
    7
}
fn default_ma_fast() -> usize {
    8
}
fn default_ma_medium() -> usize {
    20
}
fn default_ma_slow() -> usize {
    60
}
fn default_partial_exit() -> bool {
    true
}
fn default_partial_exit_threshold() -> f64 {
    0.3
}
fn default_min_trade_bars() -> usize {
    3
}
fn default_method_name() -> String {
    "weekly_minmax".to_string()
}
fn default_volatility_stop_multiplier() -> f64 {
    1.5
}
fn default_ma_stop_margin() -> f64 {
    0.005
}

impl Default for StrategyConfig {
    fn default() -> Self {
        StrategyConfig {
            position_side: TradeDirection::default(),
            risk_percent: default_risk_percent(),
            risk_percent_long: default_risk_percent(),
            risk_percent_short: default_risk_percent_short(),
            profit_to_risk: default_profit_to_risk(),
            atr_multiplier: default_atr_multiplier(),
            atr_period: default_atr_period(),
            rsi_period: default_rsi_period(),
            ma_fast: default_ma_fast(),
            ma_medium: default_ma_medium(),
            ma_slow: default_ma_slow(),
            ma_kind: MovingAverageKind::default(),
            partial_exit: default_partial_exit(),
            partial_exit_threshold: default_partial_exit_threshold(),
            min_trade_bars: default_min_trade_bars(),
            stop_loss_method: default_method_name(),
            take_profit_method: default_method_name(),
            volatility_stop_multiplier: default_volatility_stop_multiplier(),
            ma_stop_margin: default_ma_stop_margin(),
        }
    }
}

impl StrategyConfig {
    /// Trailing / fallback risk fraction for a side
    pub fn risk_for(&self, side: PositionSide) -> f64 {
        match side {
            PositionSide::Long => self.risk_percent_long,
            PositionSide::Short => self.risk_percent_short,
        }
    }

    /// Stop-loss method, falling back to `daily_minmax` for unknown names
    pub fn stop_loss(&self) -> StopLossMethod {
        StopLossMethod::parse_or_default(&self.stop_loss_method)
    }

    /// Take-profit method, falling back to `ma_distance` for unknown names
    pub fn take_profit(&self) -> TakeProfitMethod {
        TakeProfitMethod::parse_or_default(&self.take_profit_method)
    }

    /// Reject parameter values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        let periods = [
            ("atr_period", self.atr_period),
            ("rsi_period", self.rsi_period),
            ("ma_fast", self.ma_fast),
            ("ma_medium", self.ma_medium),
            ("ma_slow", self.ma_slow),
        ];
        for (name, value) in periods {
            if value == 0 {
                bail!("{} must be positive", name);
            }
        }

        let fractions = [
            ("risk_percent", self.risk_percent),
            ("risk_percent_long", self.risk_percent_long),
            ("risk_percent_short", self.risk_percent_short),
            ("profit_to_risk", self.profit_to_risk),
            ("atr_multiplier", self.atr_multiplier),
            ("partial_exit_threshold", self.partial_exit_threshold),
            ("volatility_stop_multiplier", self.volatility_stop_multiplier),
            ("ma_stop_margin", self.ma_stop_margin),
        ];
        for (name, value) in fractions {
            if !value.is_finite() || value < 0.0 {
                bail!("{} must be a non-negative number, got {}", name, value);
            }
        }

        if !(self.ma_fast < self.ma_medium && self.ma_medium < self.ma_slow) {
            warn!(
                fast = self.ma_fast,
                medium = self.ma_medium,
                slow = self.ma_slow,
                "Moving average periods are not ordered fast < medium < slow"
            );
        }

        Ok(())
    }
}

/// Per-ticker data source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickerConfig {
    pub ticker: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_capital: Option<f64>,
}

impl TickerConfig {
    pub fn new(ticker: impl Into<String>) -> Self {
        TickerConfig {
            ticker: ticker.into(),
            data_file: None,
            start_date: None,
            end_date: None,
            initial_capital: None,
        }
    }

    pub fn symbol(&self) -> Symbol {
        Symbol::new(self.ticker.clone())
    }

    /// Explicit data file, or `{data_dir}/{ticker}.csv`
    pub fn data_path(&self, backtest: &BacktestConfig) -> PathBuf {
        match &self.data_file {
            Some(file) => PathBuf::from(file),
            None => Path::new(&backtest.data_dir).join(format!("{}.csv", self.ticker)),
        }
    }
}

/// Backtest I/O locations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_results_dir")]
    pub results_dir: String,
}

fn default_data_dir() -> String {
    "data".to_string()
}
fn default_results_dir() -> String {
    "results".to_string()
}

impl Default for BacktestConfig {
    fn default() -> Self {
        BacktestConfig {
            data_dir: default_data_dir(),
            results_dir: default_results_dir(),
        }
    }
}

/// Method lists for the stop x target grid sweep
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepConfig {
    #[serde(default = "default_sweep_stops")]
    pub stop_loss_methods: Vec<String>,
    #[serde(default = "default_sweep_targets")]
    pub take_profit_methods: Vec<String>,
}

fn default_sweep_stops() -> Vec<String> {
    StopLossMethod::SWEEP_DEFAULTS
        .iter()
        .map(|m| m.name().to_string())
        .collect()
}
fn default_sweep_targets() -> Vec<String> {
    TakeProfitMethod::SWEEP_DEFAULTS
        .iter()
        .map(|m| m.name().to_string())
        .collect()
}

impl Default for SweepConfig {
    fn default() -> Self {
        SweepConfig {
            stop_loss_methods: default_sweep_stops(),
            take_profit_methods: default_sweep_targets(),
        }
    }
}

impl SweepConfig {
    pub fn stop_methods(&self) -> Vec<StopLossMethod> {
        self.stop_loss_methods
            .iter()
            .map(|name| StopLossMethod::parse_or_default(name))
            .collect()
    }

    pub fn target_methods(&self) -> Vec<TakeProfitMethod> {
        self.take_profit_methods
            .iter()
            .map(|name| TakeProfitMethod::parse_or_default(name))
            .collect()
    }
}
