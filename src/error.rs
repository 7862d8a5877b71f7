//! Simulation error types

use thiserror::Error;

use crate::Symbol;

/// Fatal errors for a single simulation run.
///
/// Recoverable conditions (short history, zero sizing, unknown method names)
/// never surface here; they resolve to documented fallbacks instead.
#[derive(Debug, Clone, Error)]
pub enum SimulationError {
    #[error("{symbol}: no valid bars to simulate")]
    NoData { symbol: Symbol },

    #[error("{symbol}: invalid configuration: {detail}")]
    InvalidConfig { symbol: Symbol, detail: String },

    #[error("{symbol}: invariant violated at bar {bar_index}: {detail}")]
    InvariantViolation {
        symbol: Symbol,
        bar_index: usize,
        detail: String,
    },
}

impl SimulationError {
    pub fn invariant(symbol: &Symbol, bar_index: usize, detail: impl Into<String>) -> Self {
        Self::InvariantViolation {
            symbol: symbol.clone(),
            bar_index,
            detail: detail.into(),
        }
    }

    pub fn symbol(&self) -> &Symbol {
        match self {
            Self::NoData { symbol }
            | Self::InvalidConfig { symbol, .. }
            | Self::InvariantViolation { symbol, .. } => symbol,
        }
    }
}

pub type SimulationResult<T> = Result<T, SimulationError>;

/// A stop-loss or take-profit method name that matches no known method
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} method: {name}")]
pub struct UnknownMethodError {
    pub kind: &'static str,
    pub name: String,
}
