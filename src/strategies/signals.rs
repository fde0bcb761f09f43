use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::TpStrategyTag;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    Hold,
    Buy,
    Sell,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Hold => write!(f, "HOLD"),
            Action::Buy => write!(f, "BUY"),
            Action::Sell => write!(f, "SELL"),
        }
    }
}

/// What the strategy wants done on the current bar. Not retained by the
/// runner past the bar it was issued for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeDecision {
    pub action: Action,
    /// Requested notional in quote currency.
    pub amount: f64,
    pub confidence: f64,
    pub strength: f64,
    pub reason: String,
}

impl TradeDecision {
    pub fn hold(reason: impl Into<String>) -> Self {
        Self {
            action: Action::Hold,
            amount: 0.0,
            confidence: 0.0,
            strength: 0.0,
            reason: reason.into(),
        }
    }

    pub fn buy(amount: f64, reason: impl Into<String>) -> Self {
        Self {
            action: Action::Buy,
            amount,
            confidence: 1.0,
            strength: 1.0,
            reason: reason.into(),
        }
    }
}

/// Market-conditioned take-profit suggestion. A `percent` of zero means
/// "use the fixed TP".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DynamicTp {
    pub percent: f64,
    pub strategy: TpStrategyTag,
    pub market_volatility: f64,
    pub signal_strength: f64,
    /// The raw value fell outside the strategy's bounds and was clamped.
    pub clamped: bool,
}

/// Parameters a hedging strategy exposes to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HedgeParameters {
    pub hedge_ratio: f64,
    pub hedge_trigger_pct: f64,
    pub max_hedge_notional: f64,
}
