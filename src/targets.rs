//! Take-profit method library and adaptive target adjustment

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

use crate::error::UnknownMethodError;
use crate::indicators::{highest_high, lookback_window, lowest_low, ReadyIndicators};
use crate::{Candle, PositionSide};

/// Multiplier applied to the MA distance by `ma_distance`
const MA_DISTANCE_FACTOR: f64 = 1.5;
/// Multiplier applied to the window range by the period min/max targets
const RANGE_FACTOR: f64 = 1.25;
/// Percent used by `prev_bar_5_percent`
const FIXED_PERCENT: f64 = 5.0;

/// Bounds of the combined adaptive factor
const MIN_COMBINED_FACTOR: f64 = 0.7;
const MAX_COMBINED_FACTOR: f64 = 1.3;

/// Take-profit method identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TakeProfitMethod {
    #[serde(rename = "ma_distance")]
    MaDistance,
    #[serde(rename = "weekly_minmax")]
    WeeklyMinMax,
    #[serde(rename = "monthly_minmax")]
    MonthlyMinMax,
    #[serde(rename = "quarterly_minmax")]
    QuarterlyMinMax,
    #[serde(rename = "prev_bar_5_percent")]
    PrevBarPercent,
}

impl TakeProfitMethod {
    pub const ALL: [TakeProfitMethod; 5] = [
        TakeProfitMethod::MaDistance,
        TakeProfitMethod::WeeklyMinMax,
        TakeProfitMethod::MonthlyMinMax,
        TakeProfitMethod::QuarterlyMinMax,
        TakeProfitMethod::PrevBarPercent,
    ];

    /// Default grid sweep target methods
    pub const SWEEP_DEFAULTS: [TakeProfitMethod; 4] = [
        TakeProfitMethod::MaDistance,
        TakeProfitMethod::WeeklyMinMax,
        TakeProfitMethod::MonthlyMinMax,
        TakeProfitMethod::PrevBarPercent,
    ];

    pub fn name(self) -> &'static str {
        match self {
            TakeProfitMethod::MaDistance => "ma_distance",
            TakeProfitMethod::WeeklyMinMax => "weekly_minmax",
            TakeProfitMethod::MonthlyMinMax => "monthly_minmax",
            TakeProfitMethod::QuarterlyMinMax => "quarterly_minmax",
            TakeProfitMethod::PrevBarPercent => "prev_bar_5_percent",
        }
    }

    /// Parse a method name, falling back to `ma_distance`
    pub fn parse_or_default(name: &str) -> Self {
        name.parse().unwrap_or_else(|e: UnknownMethodError| {
            warn!("{}, falling back to ma_distance", e);
            TakeProfitMethod::MaDistance
        })
    }

    pub fn period(self) -> Option<usize> {
        match self {
            TakeProfitMethod::WeeklyMinMax => Some(5),
            TakeProfitMethod::MonthlyMinMax => Some(20),
            TakeProfitMethod::QuarterlyMinMax => Some(60),
            _ => None,
        }
    }

    /// Unadjusted target for the current (last) bar. `None` only when `candles` is empty.
    pub fn base_target(
        self,
        candles: &[Candle],
        indicators: &ReadyIndicators,
        side: PositionSide,
    ) -> Option<f64> {
        let close = candles.last()?.close;
        match self {
            TakeProfitMethod::MaDistance => Some(ma_distance(
                close,
                indicators.ma_fast,
                indicators.ma_medium,
                side,
            )),
            TakeProfitMethod::WeeklyMinMax
            | TakeProfitMethod::MonthlyMinMax
            | TakeProfitMethod::QuarterlyMinMax => {
                period_minmax_target(candles, self.period().unwrap_or(5), side)
            }
            TakeProfitMethod::PrevBarPercent => Some(percentage_target(close, FIXED_PERCENT, side)),
        }
    }
}

impl FromStr for TakeProfitMethod {
    type Err = UnknownMethodError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|m| m.name() == s)
            .ok_or_else(|| UnknownMethodError {
                kind: "take-profit",
                name: s.to_string(),
            })
    }
}

impl fmt::Display for TakeProfitMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// close +/- 1.5 * max(|close - fast|, |close - medium|)
pub fn ma_distance(close: f64, ma_fast: f64, ma_medium: f64, side: PositionSide) -> f64 {
    let distance = (close - ma_fast).abs().max((close - ma_medium).abs());
    close + side.sign() * distance * MA_DISTANCE_FACTOR
}

/// close +/- 1.25 * distance to the window's highest high (long) / lowest low (short)
pub fn period_minmax_target(candles: &[Candle], period: usize, side: PositionSide) -> Option<f64> {
    let close = candles.last()?.close;
    let Some(window) = lookback_window(candles, period) else {
        return Some(match side {
            PositionSide::Long => close * 1.05,
            PositionSide::Short => close * 0.95,
        });
    };

    let range = match side {
        PositionSide::Long => highest_high(window).map(|h| h - close),
        PositionSide::Short => lowest_low(window).map(|l| close - l),
    };
    range.map(|r| close + side.sign() * r * RANGE_FACTOR)
}

/// close * (1 +/- percent / 100)
pub fn percentage_target(close: f64, percent: f64, side: PositionSide) -> f64 {
    close * (1.0 + side.sign() * percent / 100.0)
}

/// Result of the adaptive target step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TargetAdjustment {
    pub base_target: f64,
    pub volatility_factor: f64,
    pub trend_factor: f64,
    pub rsi_factor: f64,
    /// Product of the three factors after clamping
    pub combined_factor: f64,
    pub target: f64,
}

/// Scale the base target distance from `entry` by volatility, trend and momentum.
///
/// The combined factor is clamped to [0.7, 1.3]; with the factor values used
/// here that clamp never binds (the product stays within [0.81, 1.265]).
pub fn adaptive_target(
    base_target: f64,
    entry: f64,
    indicators: &ReadyIndicators,
    side: PositionSide,
) -> TargetAdjustment {
    let base_distance = side.sign() * (base_target - entry);

    let atr_fraction = if entry > 0.0 {
        indicators.atr / entry
    } else {
        0.0
    };
    let volatility_factor: f64 = if atr_fraction > 0.02 {
        1.1
    } else if atr_fraction < 0.01 {
        0.9
    } else {
        1.0
    };

    let trend_factor: f64 = if indicators.trend_aligned(side) {
        1.15
    } else {
        1.0
    };

    let overextended = match side {
        PositionSide::Long => indicators.rsi > 70.0,
        PositionSide::Short => indicators.rsi < 30.0,
    };
    let rsi_factor: f64 = if overextended { 0.9 } else { 1.0 };

    let combined_factor = (volatility_factor * trend_factor * rsi_factor)
        .clamp(MIN_COMBINED_FACTOR, MAX_COMBINED_FACTOR);
    let target = entry + side.sign() * base_distance * combined_factor;

    debug!(
        base = base_target,
        adjusted = target,
        vol = volatility_factor,
        trend = trend_factor,
        rsi = rsi_factor,
        "TP adjustment"
    );

    TargetAdjustment {
        base_target,
        volatility_factor,
        trend_factor,
        rsi_factor,
        combined_factor,
        target,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::Crossover;
    use approx::assert_relative_eq;
    use chrono::{Duration, TimeZone, Utc};

    fn candles(closes: &[f64]) -> Vec<Candle> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Candle {
                datetime: start + Duration::days(i as i64),
                open: c,
                high: c + 1.0,
                low: c - 1.0,
                close: c,
                volume: 1_000.0,
            })
            .collect()
    }

    fn indicators(atr: f64, rsi: f64, fast: f64, medium: f64, slow: f64) -> ReadyIndicators {
        ReadyIndicators {
            atr,
            rsi,
            ma_fast: fast,
            ma_medium: medium,
            ma_slow: slow,
            cross_fast_medium: Crossover::Neutral,
            cross_medium_slow: Crossover::Neutral,
        }
    }

    #[test]
    fn test_method_names_round_trip() {
        for method in TakeProfitMethod::ALL {
            assert_eq!(method.name().parse::<TakeProfitMethod>().unwrap(), method);
        }
        assert_eq!(
            TakeProfitMethod::parse_or_default("MA_50_18"),
            TakeProfitMethod::MaDistance
        );
    }

    #[test]
    fn test_ma_distance_uses_farther_ma() {
        assert_relative_eq!(ma_distance(100.0, 98.0, 94.0, PositionSide::Long), 109.0);
        assert_relative_eq!(ma_distance(100.0, 98.0, 94.0, PositionSide::Short), 91.0);
    }

    #[test]
    fn test_period_minmax_target() {
        let bars = candles(&[100.0, 110.0, 105.0, 104.0]);
        // Window of 3 ends at 104: highest high 111 -> 104 + 1.25 * 7
        assert_relative_eq!(
            period_minmax_target(&bars, 5, PositionSide::Long).unwrap(),
            104.0 + 1.25 * 7.0
        );
        // Lowest low 103 -> 104 - 1.25 * 1
        assert_relative_eq!(
            period_minmax_target(&bars, 5, PositionSide::Short).unwrap(),
            104.0 - 1.25
        );
        assert_relative_eq!(
            period_minmax_target(&bars[..1], 5, PositionSide::Long).unwrap(),
            105.0
        );
    }

    #[test]
    fn test_percentage_target() {
        assert_relative_eq!(percentage_target(200.0, 5.0, PositionSide::Long), 210.0);
        assert_relative_eq!(percentage_target(200.0, 5.0, PositionSide::Short), 190.0);
    }

    #[test]
    fn test_adaptive_factors() {
        // High volatility (3%) + strong uptrend, RSI neutral: 1.1 * 1.15
        let ind = indicators(3.0, 50.0, 103.0, 101.0, 99.0);
        let adj = adaptive_target(110.0, 100.0, &ind, PositionSide::Long);
        assert_relative_eq!(adj.volatility_factor, 1.1);
        assert_relative_eq!(adj.trend_factor, 1.15);
        assert_relative_eq!(adj.rsi_factor, 1.0);
        assert_relative_eq!(adj.combined_factor, 1.265, epsilon = 1e-12);
        assert_relative_eq!(adj.target, 100.0 + 10.0 * 1.265, epsilon = 1e-9);

        // Low volatility, no trend, overbought: 0.9 * 0.9
        let ind = indicators(0.5, 80.0, 99.0, 101.0, 100.0);
        let adj = adaptive_target(110.0, 100.0, &ind, PositionSide::Long);
        assert_relative_eq!(adj.combined_factor, 0.81, epsilon = 1e-12);
        assert_relative_eq!(adj.target, 108.1, epsilon = 1e-9);
    }

    #[test]
    fn test_adaptive_short_mirrors_long() {
        let ind = indicators(1.5, 20.0, 97.0, 99.0, 101.0);
        let adj = adaptive_target(90.0, 100.0, &ind, PositionSide::Short);
        // Normal vol, downtrend, oversold: 1.0 * 1.15 * 0.9
        assert_relative_eq!(adj.combined_factor, 1.035, epsilon = 1e-12);
        assert_relative_eq!(adj.target, 100.0 - 10.0 * 1.035, epsilon = 1e-9);
    }

    #[test]
    fn test_adaptive_keeps_wrong_side_base() {
        // A base target below entry for a long stays below entry; the lifecycle replaces it
        let ind = indicators(1.5, 50.0, 99.0, 100.0, 101.0);
        let adj = adaptive_target(95.0, 100.0, &ind, PositionSide::Long);
        assert!(adj.target < 100.0);
    }
}
