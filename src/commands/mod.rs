//! Subcommand implementations

pub mod backtest;
pub mod sweep;

use anyhow::{bail, Result};
use multistop_strategies::config::TickerConfig;
use multistop_strategies::optimizer::TickerData;
use multistop_strategies::{data, Config};
use tracing::warn;

/// Tickers selected by `--ticker`, or all configured tickers
pub fn selected_tickers(config: &Config, only: Option<&str>) -> Result<Vec<TickerConfig>> {
    match only {
        Some(name) => match config.ticker(name) {
            Some(ticker) => Ok(vec![ticker.clone()]),
            None => Ok(vec![TickerConfig::new(name)]),
        },
        None if config.tickers.is_empty() => bail!("No tickers configured"),
        None => Ok(config.tickers.clone()),
    }
}

/// Load bars for each ticker; tickers whose data cannot be loaded are skipped
pub fn load_all(config: &Config, tickers: &[TickerConfig]) -> Vec<TickerData> {
    tickers
        .iter()
        .filter_map(|ticker| match data::load_ticker(ticker, &config.backtest) {
            Ok(candles) => Some(
                TickerData::new(ticker.symbol(), candles).with_capital(ticker.initial_capital),
            ),
            Err(e) => {
                warn!("Skipping {}: {:#}", ticker.ticker, e);
                None
            }
        })
        .collect()
}
