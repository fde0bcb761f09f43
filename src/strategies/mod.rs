pub mod dca;
pub mod signals;

pub use dca::{DcaParams, DcaStrategy};
pub use signals::{Action, DynamicTp, HedgeParameters, TradeDecision};

use thiserror::Error;

use crate::models::Candle;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StrategyError {
    #[error("not enough history: have {have}, need {need}")]
    InsufficientData { have: usize, need: usize },
    #[error("dynamic take-profit not supported by this strategy")]
    DynamicTpUnsupported,
    #[error("invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: f64 },
    #[error("{0}")]
    Other(String),
}

/// Optional capability for strategies that run a hedge leg alongside the
/// DCA position. The engine only reads it; it never inspects concrete types.
pub trait HedgeParameterProvider {
    fn hedge_parameters(&self) -> HedgeParameters;
}

/// Decision source driven by the backtest runner one bar at a time.
///
/// `window` always ends at the bar being processed and is bounded by the
/// configured window size.
pub trait Strategy: Send {
    fn name(&self) -> &str;

    fn decide(&mut self, window: &[Candle]) -> Result<TradeDecision, StrategyError>;

    fn is_dynamic_tp_enabled(&self) -> bool {
        false
    }

    fn dynamic_tp(&self, _candle: &Candle, _window: &[Candle]) -> Result<DynamicTp, StrategyError> {
        Err(StrategyError::DynamicTpUnsupported)
    }

    /// Called after a Buy actually executed, with the filled price and
    /// quantity. Buys rejected for balance or lot size never get here.
    fn on_entry_filled(&mut self, _price: f64, _quantity: f64) {}

    /// Called when a cycle closes (completed or not).
    fn on_cycle_complete(&mut self) {}

    /// Used between walk-forward folds; the runner never calls it.
    fn reset_for_new_period(&mut self) {}

    fn hedge_provider(&self) -> Option<&dyn HedgeParameterProvider> {
        None
    }
}
