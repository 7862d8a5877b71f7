//! Sweep command implementation
//!
//! Runs every configured stop-loss x take-profit combination for each ticker,
//! prints the best rows and writes one comparison table per ticker.

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use multistop_strategies::optimizer::{Optimizer, SweepSummary};
use multistop_strategies::{report, Config};
use tracing::{info, warn};

pub fn run(
    config_path: String,
    ticker: Option<String>,
    sort_by: String,
    top: usize,
    sequential: bool,
) -> Result<()> {
    info!("Starting stop/target sweep");

    let config = Config::from_file(&config_path)?;
    info!("Loaded configuration from: {}", config_path);

    let tickers = super::selected_tickers(&config, ticker.as_deref())?;
    let data = super::load_all(&config, &tickers);
    if data.is_empty() {
        anyhow::bail!("No ticker data could be loaded from {}", config.backtest.data_dir);
    }

    let optimizer = Optimizer::new(config.clone());
    let combinations = optimizer.combinations().len();
    let total_runs = combinations * data.len();

    println!("\n{}", "=".repeat(70));
    println!("SWEEP SUMMARY");
    println!("{}", "=".repeat(70));
    println!("  Tickers:       {}", data.len());
    println!("  Stop methods:  {:?}", config.sweep.stop_loss_methods);
    println!("  Target methods:{:?}", config.sweep.take_profit_methods);
    println!("  Combinations:  {}", combinations);
    println!("  Total runs:    {}", total_runs);
    println!(
        "  Mode:          {}",
        if sequential { "sequential" } else { "parallel" }
    );
    println!("{}\n", "=".repeat(70));

    let pb = ProgressBar::new(total_runs as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "⚡ {percent:>3}%|{bar:40}| {pos}/{len} [{elapsed}<{eta}, {per_sec}] ✓ {msg}",
            )
            .context("Invalid progress bar template")?
            .progress_chars("█░ "),
    );
    pb.set_message("starting...");
    pb.tick();

    pb.set_message(format!("{} tickers", data.len()));
    let sweep = if sequential {
        optimizer.sweep_all_sequential(&data, &pb)
    } else {
        optimizer.sweep_all(&data, &pb)
    };

    for failure in &sweep.failures {
        warn!(
            "{} / {} on {} failed: {}",
            failure.stop_loss_method, failure.take_profit_method, failure.ticker, failure.error
        );
    }
    let failures = sweep.failures.len();

    pb.finish_with_message(format!("{} done, {} failed", total_runs - failures, failures));
    println!();

    let best = match sweep.best() {
        Some(best) => best.clone(),
        None => {
            info!("No successful sweep runs.");
            return Ok(());
        }
    };

    let mut all_summaries = sweep.summaries;
    Optimizer::sort_summaries(&mut all_summaries, &sort_by);

    for ticker in &data {
        let rows: Vec<SweepSummary> = all_summaries
            .iter()
            .filter(|s| s.ticker == ticker.symbol)
            .cloned()
            .collect();
        let path =
            report::export_sweep(&config.backtest.results_dir, ticker.symbol.as_str(), &rows)?;
        info!("Saved sweep table for {} to {}", ticker.symbol, path.display());
    }

    if data.len() > 1 {
        let path =
            report::export_sweep(&config.backtest.results_dir, "all_tickers", &all_summaries)?;
        println!("Saved combined table: {}", path.display());
    }

    for ticker in &data {
        let symbol = &ticker.symbol;
        let mut rows: Vec<&SweepSummary> =
            all_summaries.iter().filter(|s| &s.ticker == symbol).collect();
        if rows.is_empty() {
            continue;
        }
        rows.truncate(top);

        println!("\n{}", "=".repeat(120));
        println!(
            "TOP {} STOP/TARGET COMBINATIONS FOR {} (sorted by {})",
            rows.len(),
            symbol,
            sort_by
        );
        println!("{}", "=".repeat(120));
        println!(
            "{:<4} {:<18} {:<20} {:>14} {:>8} {:>8}",
            "Rank", "Stop Loss", "Take Profit", "Final Balance", "Trades", "WinR%"
        );
        println!("{}", "-".repeat(120));
        for (i, row) in rows.iter().enumerate() {
            println!(
                "{:<4} {:<18} {:<20} {:>14.2} {:>8} {:>8.2}",
                i + 1,
                row.stop_loss_method.to_string(),
                row.take_profit_method.to_string(),
                row.final_balance,
                row.trades,
                row.win_rate
            );
        }
        println!("{}", "=".repeat(120));
    }

    println!(
        "\nBest by final balance: {} with {} / {} ({:.2})",
        best.ticker, best.stop_loss_method, best.take_profit_method, best.final_balance
    );

    if failures > 0 {
        println!("\n⚠ {} of {} runs failed, see the log for details", failures, total_runs);
    }

    info!("Sweep completed successfully");
    Ok(())
}
