//! Multi-Method Stop / Take-Profit Strategy Backtester
//!
//! A bar-by-bar simulation engine for a risk-managed momentum strategy: for
//! each new bar it decides whether to open a position, sizes it under a risk
//! budget, prices stop-loss and take-profit levels from a selectable family
//! of methods, and manages trailing stops, partial exits and extended
//! targets until the position closes.
//!
//! # Components
//!
//! - [`indicators`]: incremental ATR / RSI / SMA / EMA feed with explicit readiness
//! - [`stops`] and [`targets`]: stop-loss and take-profit method libraries
//! - [`signals`]: entry triggers, trend filter and trade spacing
//! - [`risk`]: risk-budgeted position sizing
//! - [`strategy`]: per-instrument position lifecycle state machine
//! - [`backtest`]: simulation driver, trade ledger, equity curve and metrics
//! - [`optimizer`]: stop x target grid sweeps on the rayon pool
//!
//! ## Example
//! ```no_run
//! use multistop_strategies::{backtest::Backtester, data, Config, Symbol};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = Config::from_file("configs/default.json")?;
//!     let candles = data::load_csv("data/SBER.csv")?;
//!     let result = Backtester::new(config).run(&Symbol::new("SBER"), &candles)?;
//!     println!("Final balance: {:.2}", result.metrics.final_balance);
//!     Ok(())
//! }
//! ```

pub mod backtest;
pub mod config;
pub mod data;
pub mod error;
pub mod execution;
pub mod indicators;
pub mod optimizer;
pub mod report;
pub mod risk;
pub mod signals;
pub mod stops;
pub mod strategy;
pub mod targets;
pub mod types;

pub use config::Config;
pub use error::{SimulationError, SimulationResult};
pub use types::*;
