//! Position sizing
//!
//! Risk-budgeted integer share quantities with affordability and liquidity
//! caps.
//!
//! # Currency-Agnostic Design
//!
//! All sizing calculations treat monetary values as dimensionless numbers
//! and work as long as equity and price data share the same currency.
//!
//! Sizing formula:
//! ```text
//! usable        = equity * 0.70
//! stop_distance = ATR * atr_multiplier
//! size          = floor(usable * risk / stop_distance)
//! size          = clamp(size, 1, min(floor(usable / close), floor(volume * 0.05)))
//! ```

use tracing::debug;

use crate::config::StrategyConfig;
use crate::indicators::ReadyIndicators;
use crate::PositionSide;

/// Configuration for PositionSizer using builder pattern
#[derive(Debug, Clone)]
pub struct PositionSizerConfig {
    /// Base risk fraction of usable capital (0.02 = 2%)
    pub risk_percent: f64,
    pub atr_multiplier: f64,
    /// Fraction of equity that may be committed
    pub usable_capital_pct: f64,
    /// Risk multiplier when the fast MA favors the trade
    pub alignment_boost: f64,
    /// Fraction of bar volume a position may take
    pub max_volume_pct: f64,
}

impl Default for PositionSizerConfig {
    fn default() -> Self {
        Self {
            risk_percent: 0.02,
            atr_multiplier: 1.2,
            usable_capital_pct: 0.70,
            alignment_boost: 1.2,
            max_volume_pct: 0.05,
        }
    }
}

impl PositionSizerConfig {
    /// Set base risk as a fraction (e.g., 0.02 = 2%)
    pub fn with_risk_percent(mut self, risk: f64) -> Self {
        self.risk_percent = risk;
        self
    }

    pub fn with_atr_multiplier(mut self, multiplier: f64) -> Self {
        self.atr_multiplier = multiplier;
        self
    }

    /// Set the liquidity cap as a fraction of bar volume
    pub fn with_max_volume_pct(mut self, pct: f64) -> Self {
        self.max_volume_pct = pct;
        self
    }

    pub fn build(self) -> PositionSizer {
        PositionSizer { config: self }
    }
}

impl From<&StrategyConfig> for PositionSizerConfig {
    fn from(strategy: &StrategyConfig) -> Self {
        PositionSizerConfig::default()
            .with_risk_percent(strategy.risk_percent)
            .with_atr_multiplier(strategy.atr_multiplier)
    }
}

/// Stateless position sizer
#[derive(Debug, Clone)]
pub struct PositionSizer {
    config: PositionSizerConfig,
}

impl Default for PositionSizer {
    fn default() -> Self {
        PositionSizerConfig::default().build()
    }
}

impl PositionSizer {
    pub fn from_config(config: PositionSizerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PositionSizerConfig {
        &self.config
    }

    /// Effective risk fraction after the MA alignment boost
    pub fn effective_risk(&self, side: PositionSide, indicators: &ReadyIndicators) -> f64 {
        if indicators.fast_favors(side) {
            self.config.risk_percent * self.config.alignment_boost
        } else {
            self.config.risk_percent
        }
    }

    /// Share quantity for a new position. Returns 0 when the inputs cannot
    /// produce a valid size (non-positive stop distance or price, non-finite
    /// values, or caps that round down to zero).
    pub fn calculate_position_size(
        &self,
        equity: f64,
        close: f64,
        volume: f64,
        side: PositionSide,
        indicators: &ReadyIndicators,
    ) -> u64 {
        let stop_distance = indicators.atr * self.config.atr_multiplier;

        if ![equity, close, volume, stop_distance].iter().all(|v| v.is_finite()) {
            debug!("Non-finite sizing input, size 0");
            return 0;
        }
        if stop_distance <= 0.0 || close <= 0.0 || equity <= 0.0 {
            debug!(stop_distance, close, "Invalid stop distance or price, size 0");
            return 0;
        }

        let usable = equity * self.config.usable_capital_pct;
        let risk = self.effective_risk(side, indicators);
        let risk_amount = usable * risk;

        let mut size = floor_u64(risk_amount / stop_distance).max(1);
        size = size.min(floor_u64(usable / close));
        if volume > 0.0 {
            size = size.min(floor_u64(volume * self.config.max_volume_pct));
        }

        debug!(size, risk = %format!("{:.2}%", risk * 100.0), "Position size");
        size
    }
}

fn floor_u64(value: f64) -> u64 {
    if value.is_finite() && value > 0.0 {
        value.floor() as u64
    } else {
        0
    }
}
