//! Entry signal evaluation
//!
//! Four momentum triggers checked in a fixed order, gated by a trend filter
//! and by a minimum spacing between trade events.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use crate::indicators::{highest_high, lowest_low, ReadyIndicators, NEUTRAL_RSI};
use crate::{Candle, PositionSide, TradeDirection};

/// Volume must exceed the previous bar's by this factor for a fast MA break
const VOLUME_CONFIRMATION: f64 = 1.1;
/// Prior bars scanned for a breakout
const BREAKOUT_LOOKBACK: usize = 5;

/// Which condition opened a position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryTrigger {
    /// Close crossed the fast MA on rising volume
    FastMaBreak,
    /// RSI crossed the 50 midline
    RsiMidline,
    /// Fast MA crossed the medium MA
    MaCross,
    /// Close broke the prior range
    Breakout,
}

impl fmt::Display for EntryTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EntryTrigger::FastMaBreak => "fast MA break with volume",
            EntryTrigger::RsiMidline => "RSI midline cross",
            EntryTrigger::MaCross => "fast/medium MA cross",
            EntryTrigger::Breakout => "weekly range breakout",
        };
        write!(f, "{}", s)
    }
}

/// A side and the trigger that fired for it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntrySignal {
    pub side: PositionSide,
    pub trigger: EntryTrigger,
}

/// Long needs an aligned uptrend or close at/above the slow MA; short mirrors it
pub fn trend_permits(side: PositionSide, close: f64, indicators: &ReadyIndicators) -> bool {
    indicators.trend_aligned(side)
        || match side {
            PositionSide::Long => close >= indicators.ma_slow,
            PositionSide::Short => close <= indicators.ma_slow,
        }
}

/// First trigger that fires for `side` on the last bar of `candles`.
///
/// `previous_rsi` is the RSI of the bar before (neutral while warming up).
/// Needs at least two bars.
pub fn check_triggers(
    side: PositionSide,
    candles: &[Candle],
    indicators: &ReadyIndicators,
    previous_rsi: f64,
) -> Option<EntryTrigger> {
    let n = candles.len();
    if n < 2 {
        return None;
    }
    let current = &candles[n - 1];
    let previous = &candles[n - 2];
    let (close, prev_close) = (current.close, previous.close);
    let fast = indicators.ma_fast;
    let confirmed_vs_medium = side.is_better(close, indicators.ma_medium);

    // Close moves through the fast MA: was at or behind it, now beyond it
    let fast_break = side.is_better(close, fast) && !side.is_better(prev_close, fast);
    if fast_break && current.volume > previous.volume * VOLUME_CONFIRMATION {
        return Some(EntryTrigger::FastMaBreak);
    }

    let rsi_cross = match side {
        PositionSide::Long => indicators.rsi > NEUTRAL_RSI && previous_rsi <= NEUTRAL_RSI,
        PositionSide::Short => indicators.rsi < NEUTRAL_RSI && previous_rsi >= NEUTRAL_RSI,
    };
    if rsi_cross && confirmed_vs_medium {
        return Some(EntryTrigger::RsiMidline);
    }

    if indicators.cross_fast_medium.favors(side) && confirmed_vs_medium {
        return Some(EntryTrigger::MaCross);
    }

    let prior = &candles[n.saturating_sub(BREAKOUT_LOOKBACK + 1)..n - 1];
    let level = match side {
        PositionSide::Long => highest_high(prior),
        PositionSide::Short => lowest_low(prior),
    }?;
    if side.is_better(close, level) && !side.is_better(prev_close, level) {
        return Some(EntryTrigger::Breakout);
    }

    None
}

/// Stateful evaluator: trade spacing plus the allowed sides
#[derive(Debug, Clone)]
pub struct EntryEvaluator {
    direction: TradeDirection,
    min_trade_bars: usize,
    last_trade_bar: Option<usize>,
}

impl EntryEvaluator {
    pub fn new(direction: TradeDirection, min_trade_bars: usize) -> Self {
        Self {
            direction,
            min_trade_bars,
            last_trade_bar: None,
        }
    }

    /// Record an entry or full close at `bar_index`
    pub fn record_trade_event(&mut self, bar_index: usize) {
        self.last_trade_bar = Some(bar_index);
    }

    pub fn last_trade_bar(&self) -> Option<usize> {
        self.last_trade_bar
    }

    /// Enough bars have passed since the last trade event
    pub fn spacing_ok(&self, bar_index: usize) -> bool {
        match self.last_trade_bar {
            None => true,
            Some(last) => bar_index.saturating_sub(last) >= self.min_trade_bars,
        }
    }

    /// Evaluate entry on the last bar of `candles` (which sits at `bar_index`)
    pub fn evaluate(
        &self,
        bar_index: usize,
        candles: &[Candle],
        indicators: &ReadyIndicators,
        previous_rsi: f64,
    ) -> Option<EntrySignal> {
        if !self.spacing_ok(bar_index) {
            return None;
        }
        let close = candles.last()?.close;

        for &side in self.direction.sides() {
            if !trend_permits(side, close, indicators) {
                debug!(bar = bar_index, %side, "Entry suppressed by trend filter");
                continue;
            }
            if let Some(trigger) = check_triggers(side, candles, indicators, previous_rsi) {
                debug!(bar = bar_index, %side, %trigger, "Entry signal");
                return Some(EntrySignal { side, trigger });
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::Crossover;
    use chrono::{Duration, TimeZone, Utc};

    fn bar(i: i64, close: f64, high: f64, low: f64, volume: f64) -> Candle {
        Candle {
            datetime: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::days(i),
            open: close,
            high,
            low,
            close,
            volume,
        }
    }

    /// Six quiet bars around 100 followed by `last`
    fn history(last: Candle) -> Vec<Candle> {
        let mut candles: Vec<Candle> = (0..6)
            .map(|i| bar(i, 100.0, 101.0, 99.0, 1_000.0))
            .collect();
        candles.push(last);
        candles
    }

    fn ind(fast: f64, medium: f64, slow: f64, rsi: f64) -> ReadyIndicators {
        ReadyIndicators {
            atr: 1.0,
            rsi,
            ma_fast: fast,
            ma_medium: medium,
            ma_slow: slow,
            cross_fast_medium: Crossover::Neutral,
            cross_medium_slow: Crossover::Neutral,
        }
    }

    #[test]
    fn test_fast_ma_break_needs_volume() {
        let indicators = ind(100.5, 99.0, 98.0, 50.0);
        let loud = history(bar(6, 100.8, 100.9, 100.0, 1_200.0));
        assert_eq!(
            check_triggers(PositionSide::Long, &loud, &indicators, 50.0),
            Some(EntryTrigger::FastMaBreak)
        );

        let quiet = history(bar(6, 100.8, 100.9, 100.0, 1_050.0));
        assert_eq!(check_triggers(PositionSide::Long, &quiet, &indicators, 50.0), None);
    }

    #[test]
    fn test_rsi_midline_cross() {
        let candles = history(bar(6, 100.2, 100.5, 99.8, 1_000.0));
        let indicators = ind(100.5, 99.0, 98.0, 55.0);
        assert_eq!(
            check_triggers(PositionSide::Long, &candles, &indicators, 48.0),
            Some(EntryTrigger::RsiMidline)
        );
        // Already above the midline on the previous bar
        assert_eq!(check_triggers(PositionSide::Long, &candles, &indicators, 52.0), None);
    }

    #[test]
    fn test_ma_cross_requires_close_confirmation() {
        let candles = history(bar(6, 100.2, 100.5, 99.8, 1_000.0));
        let mut indicators = ind(100.5, 100.0, 98.0, 50.0);
        indicators.cross_fast_medium = Crossover::Above;
        assert_eq!(
            check_triggers(PositionSide::Long, &candles, &indicators, 50.0),
            Some(EntryTrigger::MaCross)
        );

        indicators.ma_medium = 100.3;
        assert_eq!(check_triggers(PositionSide::Long, &candles, &indicators, 50.0), None);
    }

    #[test]
    fn test_breakout_both_sides() {
        let indicators = ind(100.0, 100.0, 100.0, 50.0);
        let up = history(bar(6, 101.5, 102.0, 100.0, 1_000.0));
        assert_eq!(
            check_triggers(PositionSide::Long, &up, &indicators, 50.0),
            Some(EntryTrigger::Breakout)
        );

        let down = history(bar(6, 98.5, 100.0, 98.0, 1_000.0));
        assert_eq!(
            check_triggers(PositionSide::Short, &down, &indicators, 50.0),
            Some(EntryTrigger::Breakout)
        );
        assert_eq!(check_triggers(PositionSide::Long, &down, &indicators, 50.0), None);
    }

    #[test]
    fn test_trend_filter() {
        let indicators = ind(99.0, 100.0, 101.0, 50.0);
        assert!(!trend_permits(PositionSide::Long, 100.0, &indicators));
        assert!(trend_permits(PositionSide::Long, 101.0, &indicators));
        assert!(trend_permits(PositionSide::Short, 100.0, &indicators));
    }

    #[test]
    fn test_spacing_counts_from_last_event() {
        let mut evaluator = EntryEvaluator::new(TradeDirection::Long, 3);
        assert!(evaluator.spacing_ok(0));
        evaluator.record_trade_event(10);
        assert!(!evaluator.spacing_ok(12));
        assert!(evaluator.spacing_ok(13));
    }

    #[test]
    fn test_both_directions_prefers_long() {
        let candles = history(bar(6, 101.5, 102.0, 100.0, 1_000.0));
        let indicators = ind(100.0, 100.0, 100.0, 50.0);
        let evaluator = EntryEvaluator::new(TradeDirection::Both, 3);
        let signal = evaluator.evaluate(6, &candles, &indicators, 50.0).unwrap();
        assert_eq!(signal.side, PositionSide::Long);
        assert_eq!(signal.trigger, EntryTrigger::Breakout);

        let short_only = EntryEvaluator::new(TradeDirection::Short, 3);
        assert!(short_only.evaluate(6, &candles, &indicators, 50.0).is_none());
    }
}
