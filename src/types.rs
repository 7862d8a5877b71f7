//! Core data types used across the simulation engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::signals::EntryTrigger;
use crate::targets::TakeProfitMethod;

/// Validation errors for candle data
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CandleValidationError {
    #[error("close ({0}) must be positive")]
    NonPositiveClose(f64),

    #[error("volume ({0}) must be positive")]
    NonPositiveVolume(f64),

    #[error("high ({high}) must be >= low ({low})")]
    HighLessThanLow { high: f64, low: f64 },

    #[error("all OHLCV fields must be finite")]
    NonFinite,

    #[error("timestamp {current} does not follow {previous}")]
    OutOfOrder {
        previous: DateTime<Utc>,
        current: DateTime<Utc>,
    },
}

/// OHLCV candlestick data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub datetime: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    /// Create a new candle with validation
    pub fn new(
        datetime: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Result<Self, CandleValidationError> {
        let candle = Self::new_unchecked(datetime, open, high, low, close, volume);
        candle.validate()?;
        Ok(candle)
    }

    /// Create a candle without validation (ingestion validates the sequence later)
    pub fn new_unchecked(
        datetime: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Self {
        Self {
            datetime,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// Validate a single candle. Ordering is checked by `data::sanitize_candles`.
    pub fn validate(&self) -> Result<(), CandleValidationError> {
        let fields = [self.open, self.high, self.low, self.close, self.volume];
        if fields.iter().any(|v| !v.is_finite()) {
            return Err(CandleValidationError::NonFinite);
        }

        if self.close <= 0.0 {
            return Err(CandleValidationError::NonPositiveClose(self.close));
        }

        if self.volume <= 0.0 {
            return Err(CandleValidationError::NonPositiveVolume(self.volume));
        }

        if self.high < self.low {
            return Err(CandleValidationError::HighLessThanLow {
                high: self.high,
                low: self.low,
            });
        }

        Ok(())
    }
}

impl ta::Open for Candle {
    fn open(&self) -> f64 {
        self.open
    }
}

impl ta::High for Candle {
    fn high(&self) -> f64 {
        self.high
    }
}

impl ta::Low for Candle {
    fn low(&self) -> f64 {
        self.low
    }
}

impl ta::Close for Candle {
    fn close(&self) -> f64 {
        self.close
    }
}

impl ta::Volume for Candle {
    fn volume(&self) -> f64 {
        self.volume
    }
}

/// Instrument ticker
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Symbol(pub String);

impl Symbol {
    pub fn new(s: impl Into<String>) -> Self {
        Symbol(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Position direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    /// +1.0 for long, -1.0 for short
    pub fn sign(self) -> f64 {
        match self {
            PositionSide::Long => 1.0,
            PositionSide::Short => -1.0,
        }
    }

    /// Profit as a fraction of `entry` when price moves to `price`
    pub fn profit_fraction(self, entry: f64, price: f64) -> f64 {
        if entry <= 0.0 {
            return 0.0;
        }
        self.sign() * (price - entry) / entry
    }

    /// True if `a` is strictly more favorable than `b` for this side
    pub fn is_better(self, a: f64, b: f64) -> bool {
        match self {
            PositionSide::Long => a > b,
            PositionSide::Short => a < b,
        }
    }
}

impl std::fmt::Display for PositionSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PositionSide::Long => write!(f, "LONG"),
            PositionSide::Short => write!(f, "SHORT"),
        }
    }
}

/// Which sides a run may trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeDirection {
    #[default]
    Long,
    Short,
    Both,
}

impl TradeDirection {
    /// Sides in evaluation order
    pub fn sides(self) -> &'static [PositionSide] {
        match self {
            TradeDirection::Long => &[PositionSide::Long],
            TradeDirection::Short => &[PositionSide::Short],
            TradeDirection::Both => &[PositionSide::Long, PositionSide::Short],
        }
    }
}

/// Live position state. Exists only between the open and the final close.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenPosition {
    pub id: usize,
    pub side: PositionSide,
    pub entry_price: f64,
    pub entry_bar: usize,
    pub entry_time: DateTime<Utc>,
    pub initial_size: u64,
    pub size: u64,
    pub stop_price: f64,
    pub take_profit_price: f64,
    pub partial_exit_done: bool,
    pub take_profit_method: TakeProfitMethod,
    pub trigger: EntryTrigger,
}

impl OpenPosition {
    /// Unrealized profit fraction at `price`
    pub fn profit_fraction(&self, price: f64) -> f64 {
        self.side.profit_fraction(self.entry_price, price)
    }

    /// Has `price` reached the take-profit level?
    pub fn take_profit_hit(&self, price: f64) -> bool {
        match self.side {
            PositionSide::Long => price >= self.take_profit_price,
            PositionSide::Short => price <= self.take_profit_price,
        }
    }

    /// Has `price` reached the stop level?
    pub fn stop_hit(&self, price: f64) -> bool {
        match self.side {
            PositionSide::Long => price <= self.stop_price,
            PositionSide::Short => price >= self.stop_price,
        }
    }

    /// Move the stop to `candidate` if it tightens it. Returns true when adopted.
    pub fn tighten_stop(&mut self, candidate: f64) -> bool {
        if candidate.is_finite() && self.side.is_better(candidate, self.stop_price) {
            self.stop_price = candidate;
            true
        } else {
            false
        }
    }
}

/// Ledger event kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeEventKind {
    Open,
    PartialClose,
    Close,
}

/// Why shares were closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    TakeProfit,
    StopLoss,
    PartialProfit,
    ExtendedTarget,
    EndOfData,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExitReason::TakeProfit => "Take Profit",
            ExitReason::StopLoss => "Stop Loss",
            ExitReason::PartialProfit => "Partial Profit",
            ExitReason::ExtendedTarget => "Extended Target",
            ExitReason::EndOfData => "End of Data",
        };
        write!(f, "{}", s)
    }
}

/// Append-only trade ledger record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeEvent {
    pub position_id: usize,
    pub kind: TradeEventKind,
    pub reason: Option<ExitReason>,
    pub datetime: DateTime<Utc>,
    pub bar_index: usize,
    pub side: PositionSide,
    pub price: f64,
    pub size: u64,
    pub stop_price: f64,
    pub take_profit_price: f64,
    pub pnl: f64,
    pub commission: f64,
    pub net_pnl: f64,
}

impl TradeEvent {
    /// Partial and full closes realize P&L
    pub fn is_closing(&self) -> bool {
        matches!(self.kind, TradeEventKind::PartialClose | TradeEventKind::Close)
    }
}

/// Balance after each processed bar
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub datetime: DateTime<Utc>,
    pub balance: f64,
}

/// Run statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub final_balance: f64,
    pub total_return: f64,
    pub sharpe_ratio: f64,
    pub max_drawdown: f64,
    pub win_rate: f64,
    pub profit_factor: f64,
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
    pub total_commission: f64,
}
