//! Stop-loss method library
//!
//! Pure functions of (bars, indicators, side). The returned level may sit on
//! the wrong side of price; the lifecycle manager replaces such levels with
//! an ATR-based stop before opening a position.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::warn;

use crate::config::StrategyConfig;
use crate::error::UnknownMethodError;
use crate::indicators::{highest_high, lookback_window, lowest_low, ReadyIndicators};
use crate::{Candle, PositionSide};

/// Stop-loss method identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StopLossMethod {
    #[serde(rename = "daily_minmax")]
    DailyMinMax,
    #[serde(rename = "volatility_stop")]
    VolatilityStop,
    #[serde(rename = "weekly_minmax")]
    WeeklyMinMax,
    #[serde(rename = "monthly_minmax")]
    MonthlyMinMax,
    #[serde(rename = "quarterly_minmax")]
    QuarterlyMinMax,
    #[serde(rename = "MA_50_18")]
    Ma50_18,
}

impl StopLossMethod {
    pub const ALL: [StopLossMethod; 6] = [
        StopLossMethod::DailyMinMax,
        StopLossMethod::VolatilityStop,
        StopLossMethod::WeeklyMinMax,
        StopLossMethod::MonthlyMinMax,
        StopLossMethod::QuarterlyMinMax,
        StopLossMethod::Ma50_18,
    ];

    /// Default grid sweep stop methods
    pub const SWEEP_DEFAULTS: [StopLossMethod; 5] = [
        StopLossMethod::DailyMinMax,
        StopLossMethod::VolatilityStop,
        StopLossMethod::WeeklyMinMax,
        StopLossMethod::MonthlyMinMax,
        StopLossMethod::Ma50_18,
    ];

    pub fn name(self) -> &'static str {
        match self {
            StopLossMethod::DailyMinMax => "daily_minmax",
            StopLossMethod::VolatilityStop => "volatility_stop",
            StopLossMethod::WeeklyMinMax => "weekly_minmax",
            StopLossMethod::MonthlyMinMax => "monthly_minmax",
            StopLossMethod::QuarterlyMinMax => "quarterly_minmax",
            StopLossMethod::Ma50_18 => "MA_50_18",
        }
    }

    /// Parse a method name, falling back to `daily_minmax`
    pub fn parse_or_default(name: &str) -> Self {
        name.parse().unwrap_or_else(|e: UnknownMethodError| {
            warn!("{}, falling back to daily_minmax", e);
            StopLossMethod::DailyMinMax
        })
    }

    /// Lookback for the period min/max methods
    pub fn period(self) -> Option<usize> {
        match self {
            StopLossMethod::WeeklyMinMax => Some(5),
            StopLossMethod::MonthlyMinMax => Some(20),
            StopLossMethod::QuarterlyMinMax => Some(60),
            _ => None,
        }
    }

    /// Raw stop level for the current (last) bar of `candles`.
    /// `None` only when `candles` is empty.
    pub fn stop_price(
        self,
        candles: &[Candle],
        indicators: &ReadyIndicators,
        side: PositionSide,
        params: &StopParams,
    ) -> Option<f64> {
        let close = candles.last()?.close;
        match self {
            StopLossMethod::DailyMinMax => daily_minmax(candles, side),
            StopLossMethod::VolatilityStop => Some(volatility_stop(
                close,
                indicators.atr,
                params.volatility_multiplier,
                side,
            )),
            StopLossMethod::WeeklyMinMax
            | StopLossMethod::MonthlyMinMax
            | StopLossMethod::QuarterlyMinMax => {
                period_minmax(candles, self.period().unwrap_or(5), side)
            }
            StopLossMethod::Ma50_18 => Some(ma_50_18(
                close,
                indicators.ma_fast,
                indicators.ma_medium,
                params.ma_margin,
                side,
            )),
        }
    }
}

impl FromStr for StopLossMethod {
    type Err = UnknownMethodError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|m| m.name() == s)
            .ok_or_else(|| UnknownMethodError {
                kind: "stop-loss",
                name: s.to_string(),
            })
    }
}

impl fmt::Display for StopLossMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Tunables for the stop methods
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StopParams {
    pub volatility_multiplier: f64,
    pub ma_margin: f64,
}

impl Default for StopParams {
    fn default() -> Self {
        Self::from(&StrategyConfig::default())
    }
}

impl From<&StrategyConfig> for StopParams {
    fn from(config: &StrategyConfig) -> Self {
        Self {
            volatility_multiplier: config.volatility_stop_multiplier,
            ma_margin: config.ma_stop_margin,
        }
    }
}

/// Previous bar's low (long) / high (short); the current bar with one bar of history
pub fn daily_minmax(candles: &[Candle], side: PositionSide) -> Option<f64> {
    let bar = match candles.len() {
        0 => return None,
        1 => &candles[0],
        n => &candles[n - 2],
    };
    Some(match side {
        PositionSide::Long => bar.low,
        PositionSide::Short => bar.high,
    })
}

/// close -/+ ATR * multiplier
pub fn volatility_stop(close: f64, atr: f64, multiplier: f64, side: PositionSide) -> f64 {
    close - side.sign() * atr * multiplier
}

/// Lowest low (long) / highest high (short) of the trailing window,
/// close * 0.95 / 1.05 when the window is empty
pub fn period_minmax(candles: &[Candle], period: usize, side: PositionSide) -> Option<f64> {
    let close = candles.last()?.close;
    let extreme = lookback_window(candles, period).and_then(|window| match side {
        PositionSide::Long => lowest_low(window),
        PositionSide::Short => highest_high(window),
    });

    Some(extreme.unwrap_or(match side {
        PositionSide::Long => close * 0.95,
        PositionSide::Short => close * 1.05,
    }))
}

/// Whichever of the fast / medium MA is nearer to close, pushed away from price by `margin`
pub fn ma_50_18(close: f64, ma_fast: f64, ma_medium: f64, margin: f64, side: PositionSide) -> f64 {
    let nearest = if (close - ma_fast).abs() < (close - ma_medium).abs() {
        ma_fast
    } else {
        ma_medium
    };
    nearest * (1.0 - side.sign() * margin)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::Crossover;
    use approx::assert_relative_eq;
    use chrono::{Duration, TimeZone, Utc};

    fn bars(lows_highs: &[(f64, f64)]) -> Vec<Candle> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        lows_highs
            .iter()
            .enumerate()
            .map(|(i, &(low, high))| Candle {
                datetime: start + Duration::days(i as i64),
                open: (low + high) / 2.0,
                high,
                low,
                close: (low + high) / 2.0,
                volume: 1_000.0,
            })
            .collect()
    }

    fn indicators() -> ReadyIndicators {
        ReadyIndicators {
            atr: 2.0,
            rsi: 55.0,
            ma_fast: 99.0,
            ma_medium: 95.0,
            ma_slow: 90.0,
            cross_fast_medium: Crossover::Neutral,
            cross_medium_slow: Crossover::Neutral,
        }
    }

    #[test]
    fn test_method_names_round_trip() {
        for method in StopLossMethod::ALL {
            assert_eq!(method.name().parse::<StopLossMethod>().unwrap(), method);
        }
        assert!("weekly".parse::<StopLossMethod>().is_err());
        assert_eq!(
            StopLossMethod::parse_or_default("bogus"),
            StopLossMethod::DailyMinMax
        );
    }

    #[test]
    fn test_daily_minmax_uses_previous_bar() {
        let candles = bars(&[(90.0, 100.0), (95.0, 105.0)]);
        assert_eq!(daily_minmax(&candles, PositionSide::Long), Some(90.0));
        assert_eq!(daily_minmax(&candles, PositionSide::Short), Some(100.0));
        assert_eq!(daily_minmax(&candles[..1], PositionSide::Long), Some(90.0));
        assert_eq!(daily_minmax(&[], PositionSide::Long), None);
    }

    #[test]
    fn test_volatility_stop() {
        assert_relative_eq!(volatility_stop(100.0, 2.0, 1.5, PositionSide::Long), 97.0);
        assert_relative_eq!(volatility_stop(100.0, 2.0, 1.5, PositionSide::Short), 103.0);
    }

    #[test]
    fn test_period_minmax_window_and_fallback() {
        let candles = bars(&[
            (80.0, 120.0),
            (90.0, 110.0),
            (91.0, 109.0),
            (92.0, 108.0),
            (93.0, 107.0),
            (94.0, 106.0),
        ]);
        // Window of 5 covers bars 1..=5, so bar 0's extremes are excluded
        assert_eq!(period_minmax(&candles, 5, PositionSide::Long), Some(90.0));
        assert_eq!(period_minmax(&candles, 5, PositionSide::Short), Some(110.0));
        // Short history caps the window at len - 1
        assert_eq!(period_minmax(&candles, 20, PositionSide::Long), Some(90.0));

        let single = &candles[..1];
        assert_relative_eq!(
            period_minmax(single, 5, PositionSide::Long).unwrap(),
            100.0 * 0.95
        );
        assert_relative_eq!(
            period_minmax(single, 5, PositionSide::Short).unwrap(),
            100.0 * 1.05
        );
    }

    #[test]
    fn test_ma_50_18_picks_nearest_ma() {
        // fast (99) is nearer to 100 than medium (95)
        assert_relative_eq!(ma_50_18(100.0, 99.0, 95.0, 0.005, PositionSide::Long), 99.0 * 0.995);
        assert_relative_eq!(ma_50_18(100.0, 99.0, 95.0, 0.005, PositionSide::Short), 99.0 * 1.005);
        // Tie goes to the medium MA
        assert_relative_eq!(ma_50_18(100.0, 98.0, 102.0, 0.0, PositionSide::Long), 102.0);
    }

    #[test]
    fn test_stop_price_dispatch() {
        let candles = bars(&[(90.0, 100.0), (95.0, 105.0)]);
        let ind = indicators();
        let params = StopParams::default();

        let vol = StopLossMethod::VolatilityStop
            .stop_price(&candles, &ind, PositionSide::Long, &params)
            .unwrap();
        assert_relative_eq!(vol, 100.0 - 2.0 * 1.5);

        let ma = StopLossMethod::Ma50_18
            .stop_price(&candles, &ind, PositionSide::Long, &params)
            .unwrap();
        assert_relative_eq!(ma, 99.0 * 0.995);

        assert!(StopLossMethod::DailyMinMax
            .stop_price(&[], &ind, PositionSide::Long, &params)
            .is_none());
    }
}
