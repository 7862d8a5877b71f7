//! Position lifecycle management
//!
//! Flat -> Open -> (partial exit, still open) -> Closed -> Flat.
//!
//! The manager owns the single open position of an instrument and decides,
//! bar by bar, what should happen to it. Decisions come back as
//! [`LifecycleAction`]s that the simulation driver fills and books.
//!
//! Per bar while open (decision price = close):
//! 1. take-profit hit -> full close
//! 2. partial exit -> close half, stop to entry +/- 0.2% if tighter
//! 3. trailing stop ratchet (never loosens)
//! 4. stop hit -> full close
//! 5. extended target after a partial exit -> full close

use tracing::{debug, info};

use crate::config::StrategyConfig;
use crate::indicators::{IndicatorSnapshot, ReadyIndicators};
use crate::risk::{PositionSizer, PositionSizerConfig};
use crate::signals::{EntryEvaluator, EntrySignal};
use crate::stops::{StopLossMethod, StopParams};
use crate::targets::{adaptive_target, TakeProfitMethod};
use crate::{Candle, ExitReason, OpenPosition, PositionSide};

/// Stop moves to entry +/- this fraction after the partial exit
const BREAKEVEN_BUFFER: f64 = 0.002;
/// Trailing distance multiplier once the partial exit is done
const TRAIL_TIGHTENING: f64 = 0.7;

/// Shares to take off an open position
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExitOrder {
    pub position_id: usize,
    pub side: PositionSide,
    pub size: u64,
    pub reason: ExitReason,
    /// Stop at decision time
    pub stop_price: f64,
    /// Take-profit at decision time
    pub take_profit_price: f64,
}

/// Decision for the driver to execute
#[derive(Debug, Clone)]
pub enum LifecycleAction {
    Open(OpenPosition),
    PartialClose(ExitOrder),
    Close(ExitOrder),
}

/// Per-instrument position state machine
#[derive(Debug, Clone)]
pub struct PositionManager {
    config: StrategyConfig,
    stop_method: StopLossMethod,
    target_method: TakeProfitMethod,
    stop_params: StopParams,
    sizer: PositionSizer,
    evaluator: EntryEvaluator,
    position: Option<OpenPosition>,
    next_position_id: usize,
}

impl PositionManager {
    pub fn new(config: &StrategyConfig) -> Self {
        Self {
            stop_method: config.stop_loss(),
            target_method: config.take_profit(),
            stop_params: StopParams::from(config),
            sizer: PositionSizer::from_config(PositionSizerConfig::from(config)),
            evaluator: EntryEvaluator::new(config.position_side, config.min_trade_bars),
            config: config.clone(),
            position: None,
            next_position_id: 1,
        }
    }

    pub fn position(&self) -> Option<&OpenPosition> {
        self.position.as_ref()
    }

    pub fn is_flat(&self) -> bool {
        self.position.is_none()
    }

    pub fn stop_method(&self) -> StopLossMethod {
        self.stop_method
    }

    pub fn target_method(&self) -> TakeProfitMethod {
        self.target_method
    }

    /// Process the last bar of `candles` (index `bar_index`).
    ///
    /// `previous` is the indicator snapshot of the bar before; entries need it.
    pub fn on_bar(
        &mut self,
        bar_index: usize,
        candles: &[Candle],
        snapshot: &IndicatorSnapshot,
        previous: Option<&IndicatorSnapshot>,
        equity: f64,
    ) -> Vec<LifecycleAction> {
        let Some(candle) = candles.last() else {
            return Vec::new();
        };

        if self.position.is_some() {
            return self.manage_open(bar_index, candle.close);
        }

        let (Some(indicators), Some(previous)) = (snapshot.ready(), previous) else {
            return Vec::new();
        };
        let Some(signal) =
            self.evaluator
                .evaluate(bar_index, candles, &indicators, previous.rsi_or_neutral())
        else {
            return Vec::new();
        };

        self.open(bar_index, candles, &indicators, signal, equity)
            .map(|position| vec![LifecycleAction::Open(position)])
            .unwrap_or_default()
    }

    /// Close whatever is still open, e.g. on the last bar of the data
    pub fn force_close(&mut self, bar_index: usize, reason: ExitReason) -> Option<LifecycleAction> {
        let order = self.close_order(reason)?;
        self.finish(bar_index);
        Some(LifecycleAction::Close(order))
    }

    fn open(
        &mut self,
        bar_index: usize,
        candles: &[Candle],
        indicators: &ReadyIndicators,
        signal: EntrySignal,
        equity: f64,
    ) -> Option<OpenPosition> {
        let candle = candles.last()?;
        let side = signal.side;
        let entry = candle.close;

        let size =
            self.sizer
                .calculate_position_size(equity, entry, candle.volume, side, indicators);
        if size == 0 {
            debug!("Bar {}: {} entry skipped, size 0", bar_index, side);
            return None;
        }

        let stop_price = self.entry_stop(candles, indicators, side, entry);
        let take_profit_price = self.entry_target(candles, indicators, side, entry);

        let position = OpenPosition {
            id: self.next_position_id,
            side,
            entry_price: entry,
            entry_bar: bar_index,
            entry_time: candle.datetime,
            initial_size: size,
            size,
            stop_price,
            take_profit_price,
            partial_exit_done: false,
            take_profit_method: self.target_method,
            trigger: signal.trigger,
        };
        self.next_position_id += 1;
        self.evaluator.record_trade_event(bar_index);

        info!(
            "{} ENTRY ({}) - E:{:.2}, SL:{:.2}, TP:{:.2} ({:.2}%), size {}",
            side,
            signal.trigger,
            entry,
            stop_price,
            take_profit_price,
            side.profit_fraction(entry, take_profit_price) * 100.0,
            size
        );

        self.position = Some(position.clone());
        Some(position)
    }

    /// Method stop, replaced by entry -/+ ATR * atr_multiplier when it is not
    /// strictly on the protective side of entry
    pub fn entry_stop(
        &self,
        candles: &[Candle],
        indicators: &ReadyIndicators,
        side: PositionSide,
        entry: f64,
    ) -> f64 {
        let fallback = entry - side.sign() * indicators.atr * self.config.atr_multiplier;
        match self
            .stop_method
            .stop_price(candles, indicators, side, &self.stop_params)
        {
            Some(stop) if stop.is_finite() && side.is_better(entry, stop) => stop,
            raw => {
                debug!(
                    "{} stop {:?} not protective for entry {:.2}, using ATR stop {:.2}",
                    self.stop_method, raw, entry, fallback
                );
                fallback
            }
        }
    }

    /// Adaptive method target, replaced by entry * (1 +/- profit_to_risk * risk)
    /// when it does not sit strictly beyond entry
    pub fn entry_target(
        &self,
        candles: &[Candle],
        indicators: &ReadyIndicators,
        side: PositionSide,
        entry: f64,
    ) -> f64 {
        let fallback =
            entry * (1.0 + side.sign() * self.config.profit_to_risk * self.config.risk_for(side));
        let adjusted = self
            .target_method
            .base_target(candles, indicators, side)
            .map(|base| adaptive_target(base, entry, indicators, side).target);

        match adjusted {
            Some(target) if target.is_finite() && side.is_better(target, entry) => target,
            _ => fallback,
        }
    }

    fn manage_open(&mut self, bar_index: usize, close: f64) -> Vec<LifecycleAction> {
        let mut actions = Vec::new();
        let Some(pos) = self.position.as_mut() else {
            return actions;
        };
        let risk = self.config.risk_for(pos.side);

        if pos.take_profit_hit(close) {
            info!(
                "{} Take Profit Hit at {:.2}. Profit: {:.2}% ({})",
                pos.side,
                close,
                pos.profit_fraction(close) * 100.0,
                pos.take_profit_method
            );
            actions.extend(self.force_close(bar_index, ExitReason::TakeProfit));
            return actions;
        }

        let profit = pos.profit_fraction(close);

        if self.config.partial_exit
            && !pos.partial_exit_done
            && profit >= self.config.partial_exit_threshold
        {
            let half = pos.size / 2;
            if half > 0 {
                info!(
                    "{} Partial Profit: {:.2}%. Closing {} shares at {:.2}",
                    pos.side,
                    profit * 100.0,
                    half,
                    close
                );
                pos.size -= half;
                pos.partial_exit_done = true;
                pos.tighten_stop(pos.entry_price * (1.0 + pos.side.sign() * BREAKEVEN_BUFFER));
                debug!("Stop after partial exit: {:.2}", pos.stop_price);

                actions.push(LifecycleAction::PartialClose(ExitOrder {
                    position_id: pos.id,
                    side: pos.side,
                    size: half,
                    reason: ExitReason::PartialProfit,
                    stop_price: pos.stop_price,
                    take_profit_price: pos.take_profit_price,
                }));
            }
        }

        let trail = if pos.partial_exit_done {
            risk * TRAIL_TIGHTENING
        } else {
            risk
        };
        let previous_stop = pos.stop_price;
        if pos.tighten_stop(close * (1.0 - pos.side.sign() * trail)) {
            debug!("Trailing stop: {:.2} -> {:.2}", previous_stop, pos.stop_price);
        }

        if pos.stop_hit(close) {
            info!(
                "{} Stop Hit at {:.2}. Profit: {:.2}%",
                pos.side,
                close,
                profit * 100.0
            );
            actions.extend(self.force_close(bar_index, ExitReason::StopLoss));
        } else if pos.partial_exit_done && profit >= self.config.profit_to_risk * risk {
            info!(
                "{} Extended Profit Target at {:.2}. Profit: {:.2}%",
                pos.side,
                close,
                profit * 100.0
            );
            actions.extend(self.force_close(bar_index, ExitReason::ExtendedTarget));
        }

        actions
    }

    fn close_order(&self, reason: ExitReason) -> Option<ExitOrder> {
        let pos = self.position.as_ref()?;
        Some(ExitOrder {
            position_id: pos.id,
            side: pos.side,
            size: pos.size,
            reason,
            stop_price: pos.stop_price,
            take_profit_price: pos.take_profit_price,
        })
    }

    fn finish(&mut self, bar_index: usize) {
        self.position = None;
        self.evaluator.record_trade_event(bar_index);
    }
}
