//! Backtesting engine
//!
//! Bar-by-bar simulation of one instrument. Orders fill on the bar that
//! produced them through the configured [`ExecutionPolicy`]; the default
//! fills at the close with proportional commission.
//!
//! The balance is realized cash: it moves only when shares are closed. The
//! entry commission is charged pro rata as the position's shares are closed.

use itertools::Itertools;
use statrs::statistics::Statistics;
use tracing::{debug, info};

use crate::data::sanitize_candles;
use crate::error::{SimulationError, SimulationResult};
use crate::execution::{CloseFillPolicy, ExecutionPolicy};
use crate::indicators::{IndicatorFeed, IndicatorSettings, IndicatorSnapshot};
use crate::stops::StopLossMethod;
use crate::strategy::{ExitOrder, LifecycleAction, PositionManager};
use crate::targets::TakeProfitMethod;
use crate::{
    Candle, Config, EquityPoint, ExitReason, PerformanceMetrics, PositionSide, Symbol,
    TradeEvent, TradeEventKind,
};

/// Periods per year used to annualize the Sharpe ratio
const PERIODS_PER_YEAR: f64 = 252.0;

/// Backtest engine
pub struct Backtester {
    config: Config,
    execution: Box<dyn ExecutionPolicy>,
}

impl Backtester {
    pub fn new(config: Config) -> Self {
        let execution = Box::new(CloseFillPolicy::from(&config.trading));
        Self::with_execution(config, execution)
    }

    pub fn with_execution(config: Config, execution: Box<dyn ExecutionPolicy>) -> Self {
        Backtester { config, execution }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run the simulation over `candles` for `symbol`.
    ///
    /// Invalid bars are dropped first. Any position still open on the last
    /// bar is closed there (`EndOfData`).
    pub fn run(&self, symbol: &Symbol, candles: &[Candle]) -> SimulationResult<BacktestResult> {
        let strategy = &self.config.strategy;
        self.config
            .trading
            .validate()
            .and_then(|_| strategy.validate())
            .map_err(|e| SimulationError::InvalidConfig {
                symbol: symbol.clone(),
                detail: format!("{:#}", e),
            })?;

        let bars = sanitize_candles(symbol, candles.to_vec());
        if bars.is_empty() {
            return Err(SimulationError::NoData {
                symbol: symbol.clone(),
            });
        }

        let mut feed = IndicatorFeed::new(IndicatorSettings::from(strategy)).map_err(|e| {
            SimulationError::InvalidConfig {
                symbol: symbol.clone(),
                detail: format!("indicator setup failed: {:?}", e),
            }
        })?;
        let mut manager = PositionManager::new(strategy);
        let mut ledger = Ledger::new(symbol, self.config.trading.initial_capital);
        let mut equity_curve = Vec::with_capacity(bars.len());
        let mut previous: Option<IndicatorSnapshot> = None;
        let last_index = bars.len() - 1;

        for (i, candle) in bars.iter().enumerate() {
            let snapshot = feed.update(candle);
            let mut actions =
                manager.on_bar(i, &bars[..=i], &snapshot, previous.as_ref(), ledger.balance);

            if i == last_index {
                actions.extend(manager.force_close(i, ExitReason::EndOfData));
            }

            for action in &actions {
                ledger.apply(action, i, candle, self.execution.as_ref())?;
            }

            equity_curve.push(EquityPoint {
                datetime: candle.datetime,
                balance: ledger.balance,
            });
            previous = Some(snapshot);
        }

        let metrics = calculate_metrics(
            &ledger.trades,
            &equity_curve,
            self.config.trading.initial_capital,
        );

        info!(
            "{} [{} / {}]: final balance {:.2}, {} trades, win rate {:.1}%",
            symbol,
            manager.stop_method(),
            manager.target_method(),
            metrics.final_balance,
            metrics.total_trades,
            metrics.win_rate
        );

        Ok(BacktestResult {
            symbol: symbol.clone(),
            stop_loss_method: manager.stop_method(),
            take_profit_method: manager.target_method(),
            trades: ledger.trades,
            equity_curve,
            metrics,
        })
    }
}

/// Filled position awaiting (partial) closes
#[derive(Debug, Clone)]
struct OpenLot {
    position_id: usize,
    side: PositionSide,
    fill_price: f64,
    size: u64,
    /// Entry commission not yet charged against the balance
    entry_commission: f64,
}

/// Cash balance, open lot and append-only trade ledger of one run
struct Ledger<'a> {
    symbol: &'a Symbol,
    balance: f64,
    lot: Option<OpenLot>,
    trades: Vec<TradeEvent>,
}

impl<'a> Ledger<'a> {
    fn new(symbol: &'a Symbol, initial_capital: f64) -> Self {
        Ledger {
            symbol,
            balance: initial_capital,
            lot: None,
            trades: Vec::new(),
        }
    }

    fn apply(
        &mut self,
        action: &LifecycleAction,
        bar_index: usize,
        candle: &Candle,
        execution: &dyn ExecutionPolicy,
    ) -> SimulationResult<()> {
        match action {
            LifecycleAction::Open(position) => {
                if let Some(lot) = &self.lot {
                    return Err(SimulationError::invariant(
                        self.symbol,
                        bar_index,
                        format!(
                            "open of position {} while position {} is open",
                            position.id, lot.position_id
                        ),
                    ));
                }
                if position.size == 0 {
                    return Err(SimulationError::invariant(
                        self.symbol,
                        bar_index,
                        "open with zero size",
                    ));
                }

                let fill = execution.fill(candle, position.side, true, position.size);
                self.lot = Some(OpenLot {
                    position_id: position.id,
                    side: position.side,
                    fill_price: fill.price,
                    size: fill.size,
                    entry_commission: fill.commission,
                });
                self.trades.push(TradeEvent {
                    position_id: position.id,
                    kind: TradeEventKind::Open,
                    reason: None,
                    datetime: candle.datetime,
                    bar_index,
                    side: position.side,
                    price: fill.price,
                    size: fill.size,
                    stop_price: position.stop_price,
                    take_profit_price: position.take_profit_price,
                    pnl: 0.0,
                    commission: 0.0,
                    net_pnl: 0.0,
                });
                Ok(())
            }
            LifecycleAction::PartialClose(order) => {
                self.close(order, TradeEventKind::PartialClose, bar_index, candle, execution)
            }
            LifecycleAction::Close(order) => {
                self.close(order, TradeEventKind::Close, bar_index, candle, execution)
            }
        }
    }

    fn close(
        &mut self,
        order: &ExitOrder,
        kind: TradeEventKind,
        bar_index: usize,
        candle: &Candle,
        execution: &dyn ExecutionPolicy,
    ) -> SimulationResult<()> {
        let Some(lot) = self.lot.as_mut() else {
            return Err(SimulationError::invariant(
                self.symbol,
                bar_index,
                format!("close of position {} while flat", order.position_id),
            ));
        };

        let size_ok = match kind {
            TradeEventKind::Close => order.size == lot.size,
            _ => order.size > 0 && order.size < lot.size,
        };
        if lot.position_id != order.position_id || lot.side != order.side || !size_ok {
            return Err(SimulationError::invariant(
                self.symbol,
                bar_index,
                format!(
                    "{:?} of {} shares of position {} does not match open lot {} ({} shares)",
                    kind, order.size, order.position_id, lot.position_id, lot.size
                ),
            ));
        }

        let fill = execution.fill(candle, lot.side, false, order.size);
        let fraction = order.size as f64 / lot.size as f64;
        let entry_share = lot.entry_commission * fraction;
        lot.entry_commission -= entry_share;
        lot.size -= order.size;

        let pnl = lot.side.sign() * (fill.price - lot.fill_price) * order.size as f64;
        let commission = entry_share + fill.commission;
        let net_pnl = pnl - commission;
        self.balance += net_pnl;

        debug!(
            "{} {:?} {} x{} at {:.2}: pnl {:.2}, net {:.2}, balance {:.2}",
            self.symbol, kind, order.reason, order.size, fill.price, pnl, net_pnl, self.balance
        );

        self.trades.push(TradeEvent {
            position_id: order.position_id,
            kind,
            reason: Some(order.reason),
            datetime: candle.datetime,
            bar_index,
            side: order.side,
            price: fill.price,
            size: order.size,
            stop_price: order.stop_price,
            take_profit_price: order.take_profit_price,
            pnl,
            commission,
            net_pnl,
        });

        if kind == TradeEventKind::Close {
            self.lot = None;
        }
        Ok(())
    }
}

/// Outcome of one simulation run
#[derive(Debug, Clone)]
pub struct BacktestResult {
    pub symbol: Symbol,
    pub stop_loss_method: StopLossMethod,
    pub take_profit_method: TakeProfitMethod,
    pub trades: Vec<TradeEvent>,
    pub equity_curve: Vec<EquityPoint>,
    pub metrics: PerformanceMetrics,
}

impl BacktestResult {
    /// Net P&L per round-trip position, in position order
    pub fn position_pnls(&self) -> Vec<f64> {
        position_pnls(&self.trades)
    }

    /// Ledger events that opened a position
    pub fn entries(&self) -> impl Iterator<Item = &TradeEvent> {
        self.trades.iter().filter(|t| t.kind == TradeEventKind::Open)
    }
}

/// Sum the closing events of each position
pub fn position_pnls(trades: &[TradeEvent]) -> Vec<f64> {
    trades
        .iter()
        .filter(|t| t.is_closing())
        .chunk_by(|t| t.position_id)
        .into_iter()
        .map(|(_, events)| events.map(|t| t.net_pnl).sum())
        .collect()
}

/// Performance statistics for a finished run.
///
/// Win rate counts round-trip positions with non-zero net P&L; breakeven
/// positions are excluded from the denominator.
pub fn calculate_metrics(
    trades: &[TradeEvent],
    equity_curve: &[EquityPoint],
    initial_capital: f64,
) -> PerformanceMetrics {
    let final_balance = equity_curve
        .last()
        .map(|p| p.balance)
        .unwrap_or(initial_capital);
    let total_return = if initial_capital > 0.0 {
        (final_balance - initial_capital) / initial_capital * 100.0
    } else {
        0.0
    };

    let total_trades = trades
        .iter()
        .filter(|t| t.kind == TradeEventKind::Open)
        .count();
    let total_commission: f64 = trades.iter().map(|t| t.commission).sum();

    let pnls = position_pnls(trades);
    let wins: Vec<f64> = pnls.iter().copied().filter(|&p| p > 0.0).collect();
    let losses: Vec<f64> = pnls.iter().copied().filter(|&p| p < 0.0).collect();

    let decided = wins.len() + losses.len();
    let win_rate = if decided > 0 {
        wins.len() as f64 / decided as f64 * 100.0
    } else {
        0.0
    };

    let gross_profits: f64 = wins.iter().sum();
    let gross_losses: f64 = losses.iter().map(|p| p.abs()).sum();

    let profit_factor = if gross_losses > 0.0 {
        gross_profits / gross_losses
    } else if gross_profits > 0.0 {
        f64::INFINITY
    } else {
        0.0
    };

    let avg_win = if !wins.is_empty() {
        gross_profits / wins.len() as f64
    } else {
        0.0
    };
    let avg_loss = if !losses.is_empty() {
        gross_losses / losses.len() as f64
    } else {
        0.0
    };
    let largest_win = wins.iter().copied().fold(0.0, f64::max);
    let largest_loss = losses.iter().copied().fold(0.0, f64::min);

    PerformanceMetrics {
        final_balance,
        total_return,
        sharpe_ratio: sharpe_ratio(equity_curve),
        max_drawdown: max_drawdown(equity_curve, initial_capital) * 100.0,
        win_rate,
        profit_factor,
        total_trades,
        winning_trades: wins.len(),
        losing_trades: losses.len(),
        avg_win,
        avg_loss,
        largest_win,
        largest_loss,
        total_commission,
    }
}

/// Largest peak-to-trough decline as a fraction
pub fn max_drawdown(equity_curve: &[EquityPoint], initial_capital: f64) -> f64 {
    let mut peak = initial_capital;
    let mut max_dd = 0.0;

    for point in equity_curve {
        if point.balance > peak {
            peak = point.balance;
        }
        if peak > 0.0 {
            let dd = (peak - point.balance) / peak;
            if dd > max_dd {
                max_dd = dd;
            }
        }
    }
    max_dd
}

/// Annualized Sharpe ratio of bar-to-bar balance changes.
///
/// The mean uses every bar; the volatility uses only bars where the balance
/// moved, since flat bars carry no market risk.
pub fn sharpe_ratio(equity_curve: &[EquityPoint]) -> f64 {
    let all_returns: Vec<f64> = equity_curve
        .windows(2)
        .filter(|w| w[0].balance != 0.0)
        .map(|w| (w[1].balance - w[0].balance) / w[0].balance)
        .collect();
    let active_returns: Vec<f64> = all_returns.iter().copied().filter(|&r| r != 0.0).collect();

    if all_returns.is_empty() || active_returns.len() < 2 {
        return 0.0;
    }

    let mean_return = all_returns.iter().mean();
    let std_dev = active_returns.iter().std_dev();

    if std_dev.is_finite() && std_dev > 0.0 {
        mean_return / std_dev * PERIODS_PER_YEAR.sqrt()
    } else {
        0.0
    }
}
