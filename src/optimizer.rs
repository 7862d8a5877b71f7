//! Stop-loss x take-profit grid sweep
//!
//! Runs every configured stop method against every configured target method
//! (for one or many tickers) on the rayon pool. Each job owns its own
//! backtester; a failing job is reported without affecting the others.

use indicatif::ProgressBar;
use itertools::Itertools;
use rayon::prelude::*;
use serde::Serialize;
use std::cmp::Ordering;
use tracing::{error, info};

use crate::backtest::{BacktestResult, Backtester};
use crate::error::{SimulationError, SimulationResult};
use crate::stops::StopLossMethod;
use crate::targets::TakeProfitMethod;
use crate::{Candle, Config, Symbol};

/// One row of the sweep comparison table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SweepSummary {
    #[serde(rename = "Ticker")]
    pub ticker: Symbol,
    #[serde(rename = "Stop_Loss_Method")]
    pub stop_loss_method: StopLossMethod,
    #[serde(rename = "Take_Profit_Method")]
    pub take_profit_method: TakeProfitMethod,
    #[serde(rename = "Final_Balance")]
    pub final_balance: f64,
    #[serde(rename = "Trades")]
    pub trades: usize,
    #[serde(rename = "Win_Rate (%)")]
    pub win_rate: f64,
}

impl SweepSummary {
    pub fn from_result(result: &BacktestResult) -> Self {
        SweepSummary {
            ticker: result.symbol.clone(),
            stop_loss_method: result.stop_loss_method,
            take_profit_method: result.take_profit_method,
            final_balance: result.metrics.final_balance,
            trades: result.metrics.total_trades,
            win_rate: result.metrics.win_rate,
        }
    }
}

/// A sweep job that errored
#[derive(Debug, Clone)]
pub struct SweepFailure {
    pub ticker: Symbol,
    pub stop_loss_method: StopLossMethod,
    pub take_profit_method: TakeProfitMethod,
    pub error: SimulationError,
}

/// Sweep output: one summary per successful job, one failure per failed job
#[derive(Debug, Clone, Default)]
pub struct SweepReport {
    pub summaries: Vec<SweepSummary>,
    pub failures: Vec<SweepFailure>,
}

impl SweepReport {
    pub fn len(&self) -> usize {
        self.summaries.len() + self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Best row by final balance
    pub fn best(&self) -> Option<&SweepSummary> {
        self.summaries.iter().max_by(|a, b| {
            a.final_balance
                .partial_cmp(&b.final_balance)
                .unwrap_or(Ordering::Equal)
        })
    }
}

/// Bars of one instrument, with its own starting capital when the ticker
/// overrides the base config
#[derive(Debug, Clone)]
pub struct TickerData {
    pub symbol: Symbol,
    pub candles: Vec<Candle>,
    pub initial_capital: Option<f64>,
}

impl TickerData {
    pub fn new(symbol: Symbol, candles: Vec<Candle>) -> Self {
        TickerData {
            symbol,
            candles,
            initial_capital: None,
        }
    }

    pub fn with_capital(mut self, initial_capital: Option<f64>) -> Self {
        self.initial_capital = initial_capital;
        self
    }
}

type JobInput<'a> = (&'a Symbol, &'a [Candle], Option<f64>);

struct SweepJob<'a> {
    symbol: &'a Symbol,
    candles: &'a [Candle],
    initial_capital: Option<f64>,
    stop: StopLossMethod,
    target: TakeProfitMethod,
}

/// Grid sweep and multi-ticker runner
pub struct Optimizer {
    base_config: Config,
}

impl Optimizer {
    pub fn new(base_config: Config) -> Self {
        Optimizer { base_config }
    }

    /// Every configured (stop, target) pair, stops outermost
    pub fn combinations(&self) -> Vec<(StopLossMethod, TakeProfitMethod)> {
        let stops = self.base_config.sweep.stop_methods();
        let targets = self.base_config.sweep.target_methods();
        stops.into_iter().cartesian_product(targets).collect()
    }

    /// Sweep one ticker in parallel
    pub fn sweep(&self, symbol: &Symbol, candles: &[Candle]) -> SweepReport {
        self.sweep_with_progress(symbol, candles, &ProgressBar::hidden())
    }

    /// Sweep one ticker in parallel, ticking `progress_bar` once per job
    pub fn sweep_with_progress(
        &self,
        symbol: &Symbol,
        candles: &[Candle],
        progress_bar: &ProgressBar,
    ) -> SweepReport {
        let jobs = self.jobs(&[(symbol, candles, None)]);
        self.run_jobs(jobs, progress_bar, true)
    }

    /// Sweep one ticker on the calling thread.
    /// Useful for debugging or when parallel execution causes issues
    pub fn sweep_sequential(&self, symbol: &Symbol, candles: &[Candle]) -> SweepReport {
        let jobs = self.jobs(&[(symbol, candles, None)]);
        self.run_jobs(jobs, &ProgressBar::hidden(), false)
    }

    /// Sweep several tickers; jobs from all tickers share the pool and each
    /// ticker starts from its own capital
    pub fn sweep_all(&self, data: &[TickerData], progress_bar: &ProgressBar) -> SweepReport {
        self.run_jobs(self.jobs(&Self::inputs(data)), progress_bar, true)
    }

    /// `sweep_all` on the calling thread
    pub fn sweep_all_sequential(
        &self,
        data: &[TickerData],
        progress_bar: &ProgressBar,
    ) -> SweepReport {
        self.run_jobs(self.jobs(&Self::inputs(data)), progress_bar, false)
    }

    /// Run the base configuration on every ticker in parallel
    pub fn run_tickers(
        &self,
        data: &[TickerData],
    ) -> Vec<(Symbol, SimulationResult<BacktestResult>)> {
        info!("Running {} tickers", data.len());
        let backtester = Backtester::new(self.base_config.clone());

        data.par_iter()
            .map(|ticker| {
                let result = match ticker.initial_capital {
                    Some(capital) => {
                        let mut config = self.base_config.clone();
                        config.trading.initial_capital = capital;
                        Backtester::new(config).run(&ticker.symbol, &ticker.candles)
                    }
                    None => backtester.run(&ticker.symbol, &ticker.candles),
                };
                if let Err(e) = &result {
                    error!("Backtest failed: {}", e);
                }
                (ticker.symbol.clone(), result)
            })
            .collect()
    }

    fn inputs(data: &[TickerData]) -> Vec<JobInput<'_>> {
        data.iter()
            .map(|t| (&t.symbol, t.candles.as_slice(), t.initial_capital))
            .collect()
    }

    fn jobs<'a>(&self, data: &[JobInput<'a>]) -> Vec<SweepJob<'a>> {
        let combinations = self.combinations();
        data.iter()
            .flat_map(|&(symbol, candles, initial_capital)| {
                combinations.iter().map(move |&(stop, target)| SweepJob {
                    symbol,
                    candles,
                    initial_capital,
                    stop,
                    target,
                })
            })
            .collect()
    }

    fn job_config(&self, job: &SweepJob<'_>) -> Config {
        let mut config = self.base_config.with_methods(job.stop, job.target);
        if let Some(capital) = job.initial_capital {
            config.trading.initial_capital = capital;
        }
        config
    }

    fn run_jobs(
        &self,
        jobs: Vec<SweepJob<'_>>,
        progress_bar: &ProgressBar,
        parallel: bool,
    ) -> SweepReport {
        info!("Testing {} stop/target combinations", jobs.len());

        let run = |job: &SweepJob<'_>| {
            let outcome = Backtester::new(self.job_config(job)).run(job.symbol, job.candles);
            progress_bar.inc(1);
            (job.symbol.clone(), job.stop, job.target, outcome)
        };

        let outcomes: Vec<_> = if parallel {
            jobs.par_iter().map(run).collect()
        } else {
            jobs.iter().map(run).collect()
        };

        let mut report = SweepReport::default();
        for (symbol, stop, target, outcome) in outcomes {
            match outcome {
                Ok(result) => report.summaries.push(SweepSummary::from_result(&result)),
                Err(e) => {
                    error!("Sweep run {} / {} on {} failed: {}", stop, target, symbol, e);
                    report.failures.push(SweepFailure {
                        ticker: symbol,
                        stop_loss_method: stop,
                        take_profit_method: target,
                        error: e,
                    });
                }
            }
        }
        report
    }

    /// Sort summaries by "balance" (default), "trades" or "win_rate", best first
    pub fn sort_summaries(summaries: &mut [SweepSummary], sort_by: &str) {
        match sort_by {
            "trades" => summaries.sort_by(|a, b| b.trades.cmp(&a.trades)),
            "win_rate" => summaries.sort_by(|a, b| {
                b.win_rate
                    .partial_cmp(&a.win_rate)
                    .unwrap_or(Ordering::Equal)
            }),
            _ => summaries.sort_by(|a, b| {
                b.final_balance
                    .partial_cmp(&a.final_balance)
                    .unwrap_or(Ordering::Equal)
            }),
        }
    }
}
