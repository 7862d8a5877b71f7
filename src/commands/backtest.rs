//! Backtest command implementation

use anyhow::Result;
use multistop_strategies::backtest::{BacktestResult, Backtester};
use multistop_strategies::stops::StopLossMethod;
use multistop_strategies::targets::TakeProfitMethod;
use multistop_strategies::{data, report, Config, PositionSide};
use tracing::{error, info};

pub struct BacktestArgs {
    pub config_path: String,
    pub ticker: Option<String>,
    pub stop: Option<String>,
    pub target: Option<String>,
    pub capital: Option<f64>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub export: bool,
}

pub fn run(args: BacktestArgs) -> Result<()> {
    info!("Starting backtest");

    let mut config = Config::from_file(&args.config_path)?;
    info!("Loaded configuration from: {}", args.config_path);

    // Unknown names are rejected here rather than silently replaced by the default
    if let Some(stop) = args.stop {
        let method: StopLossMethod = stop.parse()?;
        info!("Overriding stop-loss method to: {}", method);
        config.strategy.stop_loss_method = method.name().to_string();
    }

    if let Some(target) = args.target {
        let method: TakeProfitMethod = target.parse()?;
        info!("Overriding take-profit method to: {}", method);
        config.strategy.take_profit_method = method.name().to_string();
    }

    if let Some(capital) = args.capital {
        info!("Overriding initial capital to: {:.2}", capital);
        config.trading.initial_capital = capital;
    }

    let mut tickers = super::selected_tickers(&config, args.ticker.as_deref())?;
    for ticker in &mut tickers {
        if let Some(start) = &args.start {
            ticker.start_date = Some(start.clone());
        }
        if let Some(end) = &args.end {
            ticker.end_date = Some(end.clone());
        }
    }

    let mut failed = 0;
    for ticker in &tickers {
        let candles = match data::load_ticker(ticker, &config.backtest) {
            Ok(candles) => candles,
            Err(e) => {
                error!("Cannot backtest {}: {:#}", ticker.ticker, e);
                failed += 1;
                continue;
            }
        };

        let mut ticker_config = config.clone();
        if let (Some(capital), None) = (ticker.initial_capital, args.capital) {
            ticker_config.trading.initial_capital = capital;
        }

        info!("Running backtest for {} ({} bars)...", ticker.ticker, candles.len());
        let backtester = Backtester::new(ticker_config);
        match backtester.run(&ticker.symbol(), &candles) {
            Ok(result) => {
                print_result(backtester.config(), &result);
                if args.export {
                    for path in report::export_result(&config.backtest.results_dir, &result)? {
                        println!("Saved: {}", path.display());
                    }
                }
            }
            Err(e) => {
                error!("Backtest for {} failed: {}", ticker.ticker, e);
                failed += 1;
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{} of {} backtests failed", failed, tickers.len());
    }
    Ok(())
}

fn print_result(config: &Config, result: &BacktestResult) {
    let m = &result.metrics;

    println!("\n{}", "=".repeat(60));
    println!("BACKTEST RESULTS: {}", result.symbol);
    println!("{}", "=".repeat(60));
    println!("Stop Loss Method:   {}", result.stop_loss_method);
    println!("Take Profit Method: {}", result.take_profit_method);
    println!("Initial Capital:    {:.2}", config.trading.initial_capital);
    println!("Final Balance:      {:.2}", m.final_balance);
    println!("Total Return:       {:.2}%", m.total_return);
    println!("Sharpe Ratio:       {:.2}", m.sharpe_ratio);
    println!("Max Drawdown:       {:.2}%", m.max_drawdown);
    println!("{}", "-".repeat(60));
    let longs = result
        .entries()
        .filter(|t| t.side == PositionSide::Long)
        .count();
    println!("Total Trades:       {}", m.total_trades);
    println!("Long / Short:       {} / {}", longs, m.total_trades - longs);
    println!("Win Rate:           {:.2}%", m.win_rate);
    println!("Profit Factor:      {:.2}", m.profit_factor);
    println!("Winning Trades:     {}", m.winning_trades);
    println!("Losing Trades:      {}", m.losing_trades);
    println!("Average Win:        {:.2}", m.avg_win);
    println!("Average Loss:       {:.2}", m.avg_loss);
    println!("Largest Win:        {:.2}", m.largest_win);
    println!("Largest Loss:       {:.2}", m.largest_loss);
    println!("Total Commission:   {:.2}", m.total_commission);
    println!("{}", "=".repeat(60));
}
