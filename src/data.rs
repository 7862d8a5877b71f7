//! Data loading and validation
//!
//! Loads OHLCV bars from CSV files (`datetime,open,high,low,close,volume`)
//! and cleans bar sequences before they reach the simulation engine.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use std::path::Path;
use tracing::{info, warn};

use crate::config::{BacktestConfig, TickerConfig};
use crate::{Candle, CandleValidationError, Symbol};

// =============================================================================
// CSV Data Loading
// =============================================================================

/// Load OHLCV data from CSV file, skipping rows that fail validation
pub fn load_csv(path: impl AsRef<Path>) -> Result<Vec<Candle>> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open CSV file {}", path.display()))?;

    let mut candles = Vec::new();
    let mut invalid_count = 0;

    for (row_idx, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("Failed to read row {}", row_idx + 1))?;

        let dt_str = record.get(0).context("Missing datetime column")?;
        let datetime = parse_date(dt_str.trim())?;

        let field = |idx: usize, name: &str| -> Result<f64> {
            record
                .get(idx)
                .with_context(|| format!("Missing {} column", name))?
                .trim()
                .parse()
                .with_context(|| format!("Failed to parse {} at row {}", name, row_idx + 2))
        };

        let open = field(1, "open")?;
        let high = field(2, "high")?;
        let low = field(3, "low")?;
        let close = field(4, "close")?;
        let volume = field(5, "volume")?;

        match Candle::new(datetime, open, high, low, close, volume) {
            Ok(candle) => candles.push(candle),
            Err(e) => {
                invalid_count += 1;
                warn!(
                    "Skipping invalid candle at row {} in {:?}: {}",
                    row_idx + 2, // +2 for 1-indexed and header row
                    path.file_name().unwrap_or_default(),
                    e
                );
            }
        }
    }

    if invalid_count > 0 {
        warn!(
            "Skipped {} invalid candles out of {} in {:?}",
            invalid_count,
            invalid_count + candles.len(),
            path.file_name().unwrap_or_default()
        );
    }

    Ok(candles)
}

/// Filter candles by date range (inclusive)
pub fn filter_candles_by_date(
    candles: Vec<Candle>,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> Vec<Candle> {
    candles
        .into_iter()
        .filter(|c| {
            let after_start = start.is_none_or(|s| c.datetime >= s);
            let before_end = end.is_none_or(|e| c.datetime <= e);
            after_start && before_end
        })
        .collect()
}

/// Parse a date string (RFC3339, YYYY-MM-DD HH:MM:SS or YYYY-MM-DD) to DateTime<Utc>
pub fn parse_date(date_str: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = date_str.parse::<DateTime<Utc>>() {
        return Ok(dt);
    }

    if let Ok(ndt) = NaiveDateTime::parse_from_str(date_str, "%Y-%m-%d %H:%M:%S") {
        return Ok(DateTime::<Utc>::from_naive_utc_and_offset(ndt, Utc));
    }

    // Date only: start of day
    if let Some(ndt) = NaiveDate::parse_from_str(date_str, "%Y-%m-%d")
        .ok()
        .and_then(|nd| nd.and_hms_opt(0, 0, 0))
    {
        return Ok(DateTime::<Utc>::from_naive_utc_and_offset(ndt, Utc));
    }

    anyhow::bail!(
        "Failed to parse date: {}. Use YYYY-MM-DD or YYYY-MM-DD HH:MM:SS format",
        date_str
    )
}

/// Load, date-filter and clean the bars configured for one ticker
pub fn load_ticker(ticker: &TickerConfig, backtest: &BacktestConfig) -> Result<Vec<Candle>> {
    let path = ticker.data_path(backtest);
    let candles = load_csv(&path)
        .with_context(|| format!("Failed to load data for {}", ticker.ticker))?;

    let start = ticker.start_date.as_deref().map(parse_date).transpose()?;
    let end = ticker.end_date.as_deref().map(parse_date).transpose()?;
    let candles = filter_candles_by_date(candles, start, end);

    let candles = sanitize_candles(&ticker.symbol(), candles);
    info!("Loaded {} candles for {}", candles.len(), ticker.ticker);
    Ok(candles)
}

// =============================================================================
// Validation
// =============================================================================

/// Drop bars the engine must not see: invalid OHLCV values and timestamps
/// that do not strictly increase. Survivors keep their order.
pub fn sanitize_candles(symbol: &Symbol, candles: Vec<Candle>) -> Vec<Candle> {
    let total = candles.len();
    let mut clean: Vec<Candle> = Vec::with_capacity(total);

    for candle in candles {
        let check = candle.validate().and_then(|_| match clean.last() {
            Some(prev) if candle.datetime <= prev.datetime => {
                Err(CandleValidationError::OutOfOrder {
                    previous: prev.datetime,
                    current: candle.datetime,
                })
            }
            _ => Ok(()),
        });

        match check {
            Ok(()) => clean.push(candle),
            Err(e) => warn!(
                "Skipping invalid candle for {} at {}: {}",
                symbol, candle.datetime, e
            ),
        }
    }

    let dropped = total - clean.len();
    if dropped > 0 {
        warn!(
            "Dropped {} of {} candles for {}",
            dropped, total, symbol
        );
    }
    clean
}
