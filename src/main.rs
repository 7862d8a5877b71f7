//! Multi-method stop / take-profit backtester - main entry point
//!
//! This binary provides two subcommands:
//! - backtest: Run one stop/target configuration per ticker
//! - sweep: Run every stop x target combination per ticker

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;

#[derive(Parser, Debug)]
#[command(name = "multistop-strategies")]
#[command(
    about = "Risk-managed strategy backtesting with stop-loss / take-profit method sweeps",
    long_about = None
)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run strategy backtest
    Backtest {
        /// Path to configuration file
        #[arg(short, long, default_value = "configs/default.json")]
        config: String,

        /// Only run this ticker
        #[arg(short, long)]
        ticker: Option<String>,

        /// Stop-loss method (overrides config file)
        #[arg(long)]
        stop: Option<String>,

        /// Take-profit method (overrides config file)
        #[arg(long)]
        target: Option<String>,

        /// Initial capital
        #[arg(long)]
        capital: Option<f64>,

        /// Start date (YYYY-MM-DD)
        #[arg(long)]
        start: Option<String>,

        /// End date (YYYY-MM-DD)
        #[arg(long)]
        end: Option<String>,

        /// Write trade ledger and equity curve CSVs to the results directory
        #[arg(long)]
        export: bool,
    },

    /// Sweep every stop-loss x take-profit method combination
    Sweep {
        /// Path to configuration file
        #[arg(short, long, default_value = "configs/default.json")]
        config: String,

        /// Only sweep this ticker
        #[arg(short, long)]
        ticker: Option<String>,

        /// Sort results by metric (balance, trades, win_rate)
        #[arg(long, default_value = "balance")]
        sort_by: String,

        /// Number of top results to show per ticker
        #[arg(long, default_value = "20")]
        top: usize,

        /// Run sequentially instead of parallel
        #[arg(long)]
        sequential: bool,
    },
}

fn setup_logging(verbose: bool, command_name: &str, file_only: bool) -> Result<()> {
    std::fs::create_dir_all("logs")?;

    // Log file naming pattern: {command}_{date}.log
    let log_filename = format!(
        "{}_{}.log",
        command_name,
        chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")
    );
    let log_path = PathBuf::from("logs").join(&log_filename);

    let level = if verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let file_appender = tracing_appender::rolling::never("logs", &log_filename);

    if file_only {
        // Sweeps log to file only so the progress bar stays readable
        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(file_appender)
            .with_target(true)
            .with_line_number(true)
            .with_file(true)
            .with_ansi(false);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(file_layer)
            .init();
    } else {
        let console_layer = tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_line_number(false)
            .with_ansi(true);

        // File layer keeps targets and line numbers, no ANSI colors
        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(file_appender)
            .with_target(true)
            .with_line_number(true)
            .with_file(true)
            .with_ansi(false);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .with(file_layer)
            .init();

        info!("Logging initialized");
        info!("Log file: {}", log_path.display());
    }

    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let (command_name, file_only) = match &cli.command {
        Commands::Backtest { .. } => ("backtest", false),
        Commands::Sweep { .. } => ("sweep", true),
    };

    setup_logging(cli.verbose, command_name, file_only)?;

    match cli.command {
        Commands::Backtest {
            config,
            ticker,
            stop,
            target,
            capital,
            start,
            end,
            export,
        } => commands::backtest::run(commands::backtest::BacktestArgs {
            config_path: config,
            ticker,
            stop,
            target,
            capital,
            start,
            end,
            export,
        }),

        Commands::Sweep {
            config,
            ticker,
            sort_by,
            top,
            sequential,
        } => commands::sweep::run(config, ticker, sort_by, top, sequential),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_sweep_arguments() {
        let cli = Cli::parse_from(["multistop-strategies", "sweep", "--sort-by", "trades", "-v"]);
        assert!(cli.verbose);
        match cli.command {
            Commands::Sweep {
                config,
                sort_by,
                top,
                sequential,
                ..
            } => {
                assert_eq!(config, "configs/default.json");
                assert_eq!(sort_by, "trades");
                assert_eq!(top, 20);
                assert!(!sequential);
            }
            other => panic!("expected sweep, got {:?}", other),
        }
    }

    #[test]
    fn test_backtest_overrides() {
        let cli = Cli::parse_from([
            "multistop-strategies",
            "backtest",
            "--ticker",
            "SBER",
            "--stop",
            "MA_50_18",
            "--capital",
            "50000",
            "--export",
        ]);
        match cli.command {
            Commands::Backtest {
                ticker,
                stop,
                capital,
                export,
                ..
            } => {
                assert_eq!(ticker.as_deref(), Some("SBER"));
                assert_eq!(stop.as_deref(), Some("MA_50_18"));
                assert_eq!(capital, Some(50_000.0));
                assert!(export);
            }
            other => panic!("expected backtest, got {:?}", other),
        }
    }
}
