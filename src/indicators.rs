//! Technical indicators
//!
//! Incremental indicators fed one bar at a time plus slice helpers built on
//! the same state machines. Every indicator reports `None` until it has seen
//! enough history; callers must treat `None` as "not ready", never as zero.
//!
//! - SMA: driven by the `ta` crate's `SimpleMovingAverage`
//! - EMA: seeded with the SMA of the first window, multiplier 2/(N+1)
//! - ATR: Wilder's smoothing
//! - RSI: average gain / average loss with Wilder's smoothing
//! - Crossover: sign change of (A - B) between consecutive bars

use serde::{Deserialize, Serialize};
use ta::errors::{Result as TaResult, TaError};
use ta::indicators::SimpleMovingAverage;
use ta::{Close, High, Low, Next, Reset};

use crate::config::StrategyConfig;
use crate::{Candle, PositionSide};

/// RSI value used while the oscillator is still warming up
pub const NEUTRAL_RSI: f64 = 50.0;

// =============================================================================
// Incremental Indicators
// =============================================================================

/// Simple Moving Average with warm-up tracking
#[derive(Debug, Clone)]
pub struct Sma {
    inner: SimpleMovingAverage,
    period: usize,
    seen: usize,
}

impl Sma {
    pub fn new(period: usize) -> TaResult<Self> {
        Ok(Self {
            inner: SimpleMovingAverage::new(period)?,
            period,
            seen: 0,
        })
    }
}

impl Next<f64> for Sma {
    type Output = Option<f64>;

    fn next(&mut self, input: f64) -> Self::Output {
        let value = self.inner.next(input);
        self.seen += 1;
        (self.seen >= self.period).then_some(value)
    }
}

impl Reset for Sma {
    fn reset(&mut self) {
        self.inner.reset();
        self.seen = 0;
    }
}

/// Exponential Moving Average seeded with the SMA of the first window
#[derive(Debug, Clone)]
pub struct Ema {
    seed: Sma,
    multiplier: f64,
    value: Option<f64>,
}

impl Ema {
    pub fn new(period: usize) -> TaResult<Self> {
        Ok(Self {
            seed: Sma::new(period)?,
            multiplier: 2.0 / (period as f64 + 1.0),
            value: None,
        })
    }
}

impl Next<f64> for Ema {
    type Output = Option<f64>;

    fn next(&mut self, input: f64) -> Self::Output {
        self.value = match self.value {
            Some(prev) => Some(prev + self.multiplier * (input - prev)),
            None => self.seed.next(input),
        };
        self.value
    }
}

impl Reset for Ema {
    fn reset(&mut self) {
        self.seed.reset();
        self.value = None;
    }
}

/// Average True Range using Wilder's smoothing
///
/// ATR = (prev_ATR * (period - 1) + current_TR) / period, seeded with the
/// mean of the first `period` true ranges.
#[derive(Debug, Clone)]
pub struct Atr {
    period: usize,
    prev_close: Option<f64>,
    tr_sum: f64,
    seen: usize,
    value: Option<f64>,
}

impl Atr {
    pub fn new(period: usize) -> TaResult<Self> {
        if period == 0 {
            return Err(TaError::InvalidParameter);
        }
        Ok(Self {
            period,
            prev_close: None,
            tr_sum: 0.0,
            seen: 0,
            value: None,
        })
    }

    fn next_hlc(&mut self, high: f64, low: f64, close: f64) -> Option<f64> {
        let tr = match self.prev_close {
            None => high - low,
            Some(pc) => (high - low).max((high - pc).abs()).max((low - pc).abs()),
        };
        self.prev_close = Some(close);

        let n = self.period as f64;
        self.value = match self.value {
            Some(prev) => Some((prev * (n - 1.0) + tr) / n),
            None => {
                self.tr_sum += tr;
                self.seen += 1;
                (self.seen == self.period).then(|| self.tr_sum / n)
            }
        };
        self.value
    }
}

impl<T: High + Low + Close> Next<&T> for Atr {
    type Output = Option<f64>;

    fn next(&mut self, input: &T) -> Self::Output {
        self.next_hlc(input.high(), input.low(), input.close())
    }
}

impl Reset for Atr {
    fn reset(&mut self) {
        self.prev_close = None;
        self.tr_sum = 0.0;
        self.seen = 0;
        self.value = None;
    }
}

/// Relative Strength Index
#[derive(Debug, Clone)]
pub struct Rsi {
    period: usize,
    prev_close: Option<f64>,
    gain_sum: f64,
    loss_sum: f64,
    seen: usize,
    averages: Option<(f64, f64)>,
}

impl Rsi {
    pub fn new(period: usize) -> TaResult<Self> {
        if period == 0 {
            return Err(TaError::InvalidParameter);
        }
        Ok(Self {
            period,
            prev_close: None,
            gain_sum: 0.0,
            loss_sum: 0.0,
            seen: 0,
            averages: None,
        })
    }

    fn value_from(avg_gain: f64, avg_loss: f64) -> f64 {
        if avg_loss <= 0.0 {
            if avg_gain <= 0.0 {
                NEUTRAL_RSI
            } else {
                100.0
            }
        } else {
            100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
        }
    }
}

impl Next<f64> for Rsi {
    type Output = Option<f64>;

    fn next(&mut self, input: f64) -> Self::Output {
        let Some(prev) = self.prev_close.replace(input) else {
            return None;
        };

        let change = input - prev;
        let gain = change.max(0.0);
        let loss = (-change).max(0.0);
        let n = self.period as f64;

        self.averages = match self.averages {
            Some((avg_gain, avg_loss)) => Some((
                (avg_gain * (n - 1.0) + gain) / n,
                (avg_loss * (n - 1.0) + loss) / n,
            )),
            None => {
                self.gain_sum += gain;
                self.loss_sum += loss;
                self.seen += 1;
                (self.seen == self.period).then(|| (self.gain_sum / n, self.loss_sum / n))
            }
        };

        self.averages
            .map(|(avg_gain, avg_loss)| Self::value_from(avg_gain, avg_loss))
    }
}

impl Reset for Rsi {
    fn reset(&mut self) {
        self.prev_close = None;
        self.gain_sum = 0.0;
        self.loss_sum = 0.0;
        self.seen = 0;
        self.averages = None;
    }
}

// =============================================================================
// Crossovers
// =============================================================================

/// Direction of a line crossing on the current bar
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Crossover {
    /// A crossed above B
    Above,
    /// A crossed below B
    Below,
    #[default]
    Neutral,
}

impl Crossover {
    /// Compare (A - B) on the previous and current bar
    pub fn between(prev: Option<(f64, f64)>, curr: Option<(f64, f64)>) -> Self {
        match (prev, curr) {
            (Some((pa, pb)), Some((a, b))) => {
                let before = pa - pb;
                let now = a - b;
                if before <= 0.0 && now > 0.0 {
                    Crossover::Above
                } else if before >= 0.0 && now < 0.0 {
                    Crossover::Below
                } else {
                    Crossover::Neutral
                }
            }
            _ => Crossover::Neutral,
        }
    }

    /// +1 / -1 / 0
    pub fn sign(self) -> i8 {
        match self {
            Crossover::Above => 1,
            Crossover::Below => -1,
            Crossover::Neutral => 0,
        }
    }

    /// Did the cross go in the favorable direction for `side`?
    pub fn favors(self, side: PositionSide) -> bool {
        matches!(
            (self, side),
            (Crossover::Above, PositionSide::Long) | (Crossover::Below, PositionSide::Short)
        )
    }
}

// =============================================================================
// Indicator Snapshot
// =============================================================================

/// Which moving average family drives decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MovingAverageKind {
    #[default]
    Simple,
    Exponential,
}

/// Indicator values as of one bar. `None` means not enough history yet.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndicatorSnapshot {
    pub atr: Option<f64>,
    pub rsi: Option<f64>,
    pub sma_fast: Option<f64>,
    pub sma_medium: Option<f64>,
    pub sma_slow: Option<f64>,
    pub ema_fast: Option<f64>,
    pub ema_medium: Option<f64>,
    pub ema_slow: Option<f64>,
    pub ma_kind: MovingAverageKind,
    /// Fast vs medium crossover of the configured MA family
    pub cross_fast_medium: Crossover,
    /// Medium vs slow crossover of the configured MA family
    pub cross_medium_slow: Crossover,
}

impl IndicatorSnapshot {
    pub fn ma_fast(&self) -> Option<f64> {
        match self.ma_kind {
            MovingAverageKind::Simple => self.sma_fast,
            MovingAverageKind::Exponential => self.ema_fast,
        }
    }

    pub fn ma_medium(&self) -> Option<f64> {
        match self.ma_kind {
            MovingAverageKind::Simple => self.sma_medium,
            MovingAverageKind::Exponential => self.ema_medium,
        }
    }

    pub fn ma_slow(&self) -> Option<f64> {
        match self.ma_kind {
            MovingAverageKind::Simple => self.sma_slow,
            MovingAverageKind::Exponential => self.ema_slow,
        }
    }

    pub fn rsi_or_neutral(&self) -> f64 {
        self.rsi.unwrap_or(NEUTRAL_RSI)
    }

    /// All values needed for trading, or `None` while any is warming up
    pub fn ready(&self) -> Option<ReadyIndicators> {
        Some(ReadyIndicators {
            atr: self.atr?,
            rsi: self.rsi_or_neutral(),
            ma_fast: self.ma_fast()?,
            ma_medium: self.ma_medium()?,
            ma_slow: self.ma_slow()?,
            cross_fast_medium: self.cross_fast_medium,
            cross_medium_slow: self.cross_medium_slow,
        })
    }
}

/// Fully warmed-up indicator values. Only this type reaches pricing code.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReadyIndicators {
    pub atr: f64,
    pub rsi: f64,
    pub ma_fast: f64,
    pub ma_medium: f64,
    pub ma_slow: f64,
    pub cross_fast_medium: Crossover,
    pub cross_medium_slow: Crossover,
}

impl ReadyIndicators {
    /// fast > medium > slow for longs, fast < medium < slow for shorts
    pub fn trend_aligned(&self, side: PositionSide) -> bool {
        match side {
            PositionSide::Long => self.ma_fast > self.ma_medium && self.ma_medium > self.ma_slow,
            PositionSide::Short => self.ma_fast < self.ma_medium && self.ma_medium < self.ma_slow,
        }
    }

    /// Fast MA on the favorable side of the medium MA
    pub fn fast_favors(&self, side: PositionSide) -> bool {
        side.is_better(self.ma_fast, self.ma_medium)
    }
}

// =============================================================================
// Indicator Feed
// =============================================================================

/// Periods for the indicator feed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndicatorSettings {
    pub atr_period: usize,
    pub rsi_period: usize,
    pub ma_fast: usize,
    pub ma_medium: usize,
    pub ma_slow: usize,
    pub ma_kind: MovingAverageKind,
}

impl Default for IndicatorSettings {
    fn default() -> Self {
        Self::from(&StrategyConfig::default())
    }
}

impl From<&StrategyConfig> for IndicatorSettings {
    fn from(config: &StrategyConfig) -> Self {
        Self {
            atr_period: config.atr_period,
            rsi_period: config.rsi_period,
            ma_fast: config.ma_fast,
            ma_medium: config.ma_medium,
            ma_slow: config.ma_slow,
            ma_kind: config.ma_kind,
        }
    }
}

/// Rolling indicator state for one instrument
#[derive(Debug, Clone)]
pub struct IndicatorFeed {
    atr: Atr,
    rsi: Rsi,
    sma: [Sma; 3],
    ema: [Ema; 3],
    ma_kind: MovingAverageKind,
    last: Option<IndicatorSnapshot>,
}

impl IndicatorFeed {
    pub fn new(settings: IndicatorSettings) -> TaResult<Self> {
        Ok(Self {
            atr: Atr::new(settings.atr_period)?,
            rsi: Rsi::new(settings.rsi_period)?,
            sma: [
                Sma::new(settings.ma_fast)?,
                Sma::new(settings.ma_medium)?,
                Sma::new(settings.ma_slow)?,
            ],
            ema: [
                Ema::new(settings.ma_fast)?,
                Ema::new(settings.ma_medium)?,
                Ema::new(settings.ma_slow)?,
            ],
            ma_kind: settings.ma_kind,
            last: None,
        })
    }

    /// Advance by one bar and return the snapshot for that bar
    pub fn update(&mut self, candle: &Candle) -> IndicatorSnapshot {
        let close = candle.close;
        let [sf, sm, ss] = &mut self.sma;
        let [ef, em, es] = &mut self.ema;

        let mut snapshot = IndicatorSnapshot {
            atr: self.atr.next(candle),
            rsi: self.rsi.next(close),
            sma_fast: sf.next(close),
            sma_medium: sm.next(close),
            sma_slow: ss.next(close),
            ema_fast: ef.next(close),
            ema_medium: em.next(close),
            ema_slow: es.next(close),
            ma_kind: self.ma_kind,
            cross_fast_medium: Crossover::Neutral,
            cross_medium_slow: Crossover::Neutral,
        };

        if let Some(prev) = &self.last {
            snapshot.cross_fast_medium = Crossover::between(
                prev.ma_fast().zip(prev.ma_medium()),
                snapshot.ma_fast().zip(snapshot.ma_medium()),
            );
            snapshot.cross_medium_slow = Crossover::between(
                prev.ma_medium().zip(prev.ma_slow()),
                snapshot.ma_medium().zip(snapshot.ma_slow()),
            );
        }

        self.last = Some(snapshot.clone());
        snapshot
    }

    /// Snapshot of the most recent bar
    pub fn last(&self) -> Option<&IndicatorSnapshot> {
        self.last.as_ref()
    }
}

impl Reset for IndicatorFeed {
    fn reset(&mut self) {
        self.atr.reset();
        self.rsi.reset();
        self.sma.iter_mut().for_each(Reset::reset);
        self.ema.iter_mut().for_each(Reset::reset);
        self.last = None;
    }
}

// =============================================================================
// Slice Helpers
// =============================================================================

fn run_series<I>(values: &[f64], mut indicator: I) -> Vec<Option<f64>>
where
    I: Next<f64, Output = Option<f64>>,
{
    values.iter().map(|&v| indicator.next(v)).collect()
}

/// Calculate Simple Moving Average
pub fn sma(values: &[f64], period: usize) -> Vec<Option<f64>> {
    match Sma::new(period) {
        Ok(indicator) => run_series(values, indicator),
        Err(_) => vec![None; values.len()],
    }
}

/// Calculate Exponential Moving Average (SMA-seeded)
pub fn ema(values: &[f64], period: usize) -> Vec<Option<f64>> {
    match Ema::new(period) {
        Ok(indicator) => run_series(values, indicator),
        Err(_) => vec![None; values.len()],
    }
}

/// Calculate RSI
pub fn rsi(values: &[f64], period: usize) -> Vec<Option<f64>> {
    match Rsi::new(period) {
        Ok(indicator) => run_series(values, indicator),
        Err(_) => vec![None; values.len()],
    }
}

/// Calculate Average True Range (Wilder)
pub fn atr(high: &[f64], low: &[f64], close: &[f64], period: usize) -> Vec<Option<f64>> {
    if high.len() != low.len() || high.len() != close.len() {
        return vec![];
    }
    let Ok(mut indicator) = Atr::new(period) else {
        return vec![None; high.len()];
    };

    high.iter()
        .zip(low)
        .zip(close)
        .map(|((&h, &l), &c)| indicator.next_hlc(h, l, c))
        .collect()
}

/// Crossover of series `a` against series `b`, bar by bar
pub fn crossover(a: &[Option<f64>], b: &[Option<f64>]) -> Vec<Crossover> {
    let pairs: Vec<Option<(f64, f64)>> = a.iter().zip(b).map(|(x, y)| x.zip(*y)).collect();
    let mut result = Vec::with_capacity(pairs.len());
    for i in 0..pairs.len() {
        let prev = if i == 0 { None } else { pairs[i - 1] };
        result.push(Crossover::between(prev, pairs[i]));
    }
    result
}

/// The trailing lookback window used by the period min/max methods:
/// the last `min(period, len - 1)` bars, ending at the current bar.
/// `None` when that window would be empty.
pub fn lookback_window(candles: &[Candle], period: usize) -> Option<&[Candle]> {
    let effective = period.min(candles.len().saturating_sub(1));
    if effective == 0 {
        return None;
    }
    Some(&candles[candles.len() - effective..])
}

/// Lowest low over a window
pub fn lowest_low(candles: &[Candle]) -> Option<f64> {
    candles.iter().map(|c| c.low).reduce(f64::min)
}

/// Highest high over a window
pub fn highest_high(candles: &[Candle]) -> Option<f64> {
    candles.iter().map(|c| c.high).reduce(f64::max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::{Duration, TimeZone, Utc};

    fn candle(i: i64, open: f64, high: f64, low: f64, close: f64) -> Candle {
        Candle {
            datetime: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::days(i),
            open,
            high,
            low,
            close,
            volume: 1_000.0,
        }
    }

    #[test]
    fn test_sma_warmup_and_values() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0];
        let result = sma(&values, 3);
        assert_eq!(result[0], None);
        assert_eq!(result[1], None);
        assert_relative_eq!(result[2].unwrap(), 2.0);
        assert_relative_eq!(result[3].unwrap(), 3.0);
        assert_relative_eq!(result[4].unwrap(), 4.0);
    }

    #[test]
    fn test_ema_seeded_with_sma() {
        let values = [2.0, 4.0, 6.0, 8.0];
        let result = ema(&values, 3);
        assert_eq!(result[1], None);
        // Seed = SMA(2, 4, 6) = 4
        assert_relative_eq!(result[2].unwrap(), 4.0);
        // k = 0.5 -> 4 + 0.5 * (8 - 4) = 6
        assert_relative_eq!(result[3].unwrap(), 6.0);
    }

    #[test]
    fn test_zero_period_is_not_ready() {
        assert!(sma(&[1.0, 2.0], 0).iter().all(Option::is_none));
        assert!(Atr::new(0).is_err());
        assert!(Rsi::new(0).is_err());
    }

    #[test]
    fn test_atr_wilder_smoothing() {
        let high = [10.0, 11.0, 12.0, 13.0];
        let low = [9.0, 10.0, 11.0, 11.0];
        let close = [9.5, 10.5, 11.5, 12.0];
        let result = atr(&high, &low, &close, 2);

        assert_eq!(result[0], None);
        // TR0 = 1.0, TR1 = max(1.0, 1.5, 0.5) = 1.5 -> seed 1.25
        assert_relative_eq!(result[1].unwrap(), 1.25);
        // TR2 = max(1.0, 1.5, 0.5) = 1.5 -> (1.25 + 1.5) / 2
        assert_relative_eq!(result[2].unwrap(), 1.375);
        // TR3 = max(2.0, 1.5, 0.5) = 2.0
        assert_relative_eq!(result[3].unwrap(), (1.375 + 2.0) / 2.0);
    }

    #[test]
    fn test_rsi_bounds_and_extremes() {
        let rising: Vec<f64> = (0..20).map(|i| 100.0 + i as f64).collect();
        let values = rsi(&rising, 7);
        assert!(values[..7].iter().all(Option::is_none));
        assert_relative_eq!(values[7].unwrap(), 100.0);

        let falling: Vec<f64> = (0..20).map(|i| 100.0 - i as f64).collect();
        assert_relative_eq!(rsi(&falling, 7).last().unwrap().unwrap(), 0.0);

        let flat = vec![100.0; 20];
        assert_relative_eq!(rsi(&flat, 7).last().unwrap().unwrap(), NEUTRAL_RSI);

        let zigzag: Vec<f64> = (0..40)
            .map(|i| if i % 2 == 0 { 100.0 } else { 102.0 })
            .collect();
        let v = rsi(&zigzag, 7).last().unwrap().unwrap();
        assert!((0.0..=100.0).contains(&v));
    }

    #[test]
    fn test_crossover_detection() {
        let a = [Some(1.0), Some(2.0), Some(3.0), Some(1.0), None];
        let b = [Some(2.0), Some(2.0), Some(2.0), Some(2.0), Some(2.0)];
        let crosses = crossover(&a, &b);
        assert_eq!(crosses[0], Crossover::Neutral);
        assert_eq!(crosses[1], Crossover::Neutral);
        assert_eq!(crosses[2], Crossover::Above);
        assert_eq!(crosses[3], Crossover::Below);
        assert_eq!(crosses[4], Crossover::Neutral);
        assert_eq!(Crossover::Above.sign(), 1);
        assert_eq!(Crossover::Below.sign(), -1);
    }

    #[test]
    fn test_feed_not_ready_until_slow_ma() {
        let settings = IndicatorSettings {
            atr_period: 3,
            rsi_period: 3,
            ma_fast: 2,
            ma_medium: 3,
            ma_slow: 5,
            ma_kind: MovingAverageKind::Simple,
        };
        let mut feed = IndicatorFeed::new(settings).unwrap();

        for i in 0..4 {
            let c = 100.0 + i as f64;
            let snapshot = feed.update(&candle(i, c, c + 1.0, c - 1.0, c));
            assert!(snapshot.ready().is_none(), "bar {} should not be ready", i);
        }

        let snapshot = feed.update(&candle(4, 104.0, 105.0, 103.0, 104.0));
        let ready = snapshot.ready().expect("ready after slow window");
        assert!(ready.trend_aligned(PositionSide::Long));
        assert!(!ready.trend_aligned(PositionSide::Short));
        assert!(ready.atr > 0.0);
    }

    #[test]
    fn test_feed_crossover_matches_slice_helper() {
        let closes = [10.0, 10.0, 10.0, 9.0, 8.0, 9.0, 11.0, 13.0, 12.0, 10.0, 8.0];
        let settings = IndicatorSettings {
            atr_period: 2,
            rsi_period: 2,
            ma_fast: 2,
            ma_medium: 4,
            ma_slow: 5,
            ma_kind: MovingAverageKind::Simple,
        };
        let mut feed = IndicatorFeed::new(settings).unwrap();
        let fast = sma(&closes, 2);
        let medium = sma(&closes, 4);
        let expected = crossover(&fast, &medium);

        for (i, &c) in closes.iter().enumerate() {
            let snapshot = feed.update(&candle(i as i64, c, c + 0.5, c - 0.5, c));
            assert_eq!(snapshot.cross_fast_medium, expected[i], "bar {}", i);
        }
        assert!(expected.contains(&Crossover::Above));
        assert!(expected.contains(&Crossover::Below));
    }

    #[test]
    fn test_exponential_kind_drives_snapshot_mas() {
        let snapshot = IndicatorSnapshot {
            sma_fast: Some(1.0),
            ema_fast: Some(2.0),
            ma_kind: MovingAverageKind::Exponential,
            ..Default::default()
        };
        assert_eq!(snapshot.ma_fast(), Some(2.0));
        assert!(snapshot.ready().is_none());
        assert_relative_eq!(snapshot.rsi_or_neutral(), NEUTRAL_RSI);
    }

    #[test]
    fn test_lookback_window_excludes_nothing_but_caps_length() {
        let candles: Vec<Candle> = (0..10)
            .map(|i| {
                let c = 100.0 + i as f64;
                candle(i, c, c + 1.0, c - 1.0, c)
            })
            .collect();

        assert!(lookback_window(&candles[..1], 5).is_none());
        assert_eq!(lookback_window(&candles[..3], 5).unwrap().len(), 2);
        let window = lookback_window(&candles, 5).unwrap();
        assert_eq!(window.len(), 5);
        assert_eq!(window.last().unwrap().close, 109.0);
        assert_relative_eq!(lowest_low(window).unwrap(), 104.0);
        assert_relative_eq!(highest_high(window).unwrap(), 110.0);
    }
}
