//! Order execution model
//!
//! Orders fill on the bar that produced them. The default policy fills at
//! the close, optionally shifted against the trader by a slippage fraction,
//! and charges a proportional commission on the filled notional.

use crate::config::TradingConfig;
use crate::{Candle, PositionSide};

/// Executed price and cost of one order
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fill {
    pub price: f64,
    pub size: u64,
    pub commission: f64,
}

/// Pluggable fill model
pub trait ExecutionPolicy: Send + Sync {
    /// Fill `size` shares on `candle`. `is_entry` is true when the order
    /// opens exposure for `side`, false when it reduces or closes it.
    fn fill(&self, candle: &Candle, side: PositionSide, is_entry: bool, size: u64) -> Fill;

    fn name(&self) -> &str;
}

/// Fill at bar close with commission and adverse slippage
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CloseFillPolicy {
    pub commission_rate: f64,
    pub slippage: f64,
}

impl CloseFillPolicy {
    pub fn new(commission_rate: f64, slippage: f64) -> Self {
        Self {
            commission_rate,
            slippage,
        }
    }
}

impl Default for CloseFillPolicy {
    fn default() -> Self {
        Self::from(&TradingConfig::default())
    }
}

impl From<&TradingConfig> for CloseFillPolicy {
    fn from(trading: &TradingConfig) -> Self {
        Self::new(trading.commission, trading.slippage)
    }
}

impl ExecutionPolicy for CloseFillPolicy {
    fn fill(&self, candle: &Candle, side: PositionSide, is_entry: bool, size: u64) -> Fill {
        // Buying pays up, selling gives up
        let buying = matches!(
            (side, is_entry),
            (PositionSide::Long, true) | (PositionSide::Short, false)
        );
        let price = if buying {
            candle.close * (1.0 + self.slippage)
        } else {
            candle.close * (1.0 - self.slippage)
        };

        Fill {
            price,
            size,
            commission: price * size as f64 * self.commission_rate,
        }
    }

    fn name(&self) -> &str {
        "close"
    }
}
