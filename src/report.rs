//! CSV export of run results

use anyhow::{Context, Result};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::backtest::BacktestResult;
use crate::optimizer::SweepSummary;
use crate::{EquityPoint, TradeEvent};

fn write_rows<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    for row in rows {
        writer
            .serialize(row)
            .with_context(|| format!("Failed to write row to {}", path.display()))?;
    }
    writer
        .flush()
        .with_context(|| format!("Failed to flush {}", path.display()))?;
    info!("Saved {} rows to {}", rows.len(), path.display());
    Ok(())
}

/// Write the trade ledger
pub fn write_trades(path: impl AsRef<Path>, trades: &[TradeEvent]) -> Result<()> {
    write_rows(path.as_ref(), trades)
}

/// Write the per-bar balance curve
pub fn write_equity_curve(path: impl AsRef<Path>, equity_curve: &[EquityPoint]) -> Result<()> {
    write_rows(path.as_ref(), equity_curve)
}

/// Write the sweep comparison table
pub fn write_sweep_summaries(path: impl AsRef<Path>, summaries: &[SweepSummary]) -> Result<()> {
    write_rows(path.as_ref(), summaries)
}

/// Write ledger and equity curve of one run into `results_dir`.
/// Files are named `{ticker}_{stop}_{target}_{trades|equity}.csv`.
pub fn export_result(
    results_dir: impl AsRef<Path>,
    result: &BacktestResult,
) -> Result<Vec<PathBuf>> {
    let dir = results_dir.as_ref();
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create results directory {}", dir.display()))?;

    let stem = format!(
        "{}_{}_{}",
        result.symbol, result.stop_loss_method, result.take_profit_method
    );
    let trades_path = dir.join(format!("{}_trades.csv", stem));
    let equity_path = dir.join(format!("{}_equity.csv", stem));

    write_trades(&trades_path, &result.trades)?;
    write_equity_curve(&equity_path, &result.equity_curve)?;
    Ok(vec![trades_path, equity_path])
}

/// Write a sweep table into `results_dir` as `{name}_compare.csv`
pub fn export_sweep(
    results_dir: impl AsRef<Path>,
    name: &str,
    summaries: &[SweepSummary],
) -> Result<PathBuf> {
    let dir = results_dir.as_ref();
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create results directory {}", dir.display()))?;
    let path = dir.join(format!("{}_compare.csv", name));
    write_sweep_summaries(&path, summaries)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stops::StopLossMethod;
    use crate::targets::TakeProfitMethod;
    use crate::Symbol;

    #[test]
    fn test_sweep_table_header() {
        let dir = std::env::temp_dir().join(format!("multistop_report_{}", std::process::id()));
        let rows = vec![SweepSummary {
            ticker: Symbol::new("SBER"),
            stop_loss_method: StopLossMethod::Ma50_18,
            take_profit_method: TakeProfitMethod::PrevBarPercent,
            final_balance: 101_234.5,
            trades: 7,
            win_rate: 57.14,
        }];

        let path = export_sweep(&dir, "SBER", &rows).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        let mut lines = contents.lines();
        assert_eq!(
            lines.next().unwrap(),
            "Ticker,Stop_Loss_Method,Take_Profit_Method,Final_Balance,Trades,Win_Rate (%)"
        );
        assert_eq!(
            lines.next().unwrap(),
            "SBER,MA_50_18,prev_bar_5_percent,101234.5,7,57.14"
        );

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
