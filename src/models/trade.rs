use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeKind {
    /// A DCA buy. In single-TP mode its exit fields are filled when the
    /// cycle's target is reached.
    Entry,
    /// Synthetic row for one ladder level firing.
    LevelExit,
    /// Synthetic row closing what is left at the last close when data runs out.
    MarkToMarket,
}

/// Where a take-profit percentage came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TpStrategyTag {
    Fixed,
    VolatilityAdaptive,
    IndicatorBased,
}

impl fmt::Display for TpStrategyTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TpStrategyTag::Fixed => write!(f, "fixed"),
            TpStrategyTag::VolatilityAdaptive => write!(f, "volatility_adaptive"),
            TpStrategyTag::IndicatorBased => write!(f, "indicator_based"),
        }
    }
}

/// TP provenance stamped on entry trades while dynamic TP is active.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TpProvenance {
    pub tp_percent: f64,
    pub strategy: TpStrategyTag,
    pub market_volatility: f64,
    pub signal_strength: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: u64,
    pub cycle_id: u64,
    pub kind: TradeKind,
    /// Ladder level (1..=5) for `LevelExit` rows.
    #[serde(default)]
    pub level: Option<u8>,
    pub entry_time: DateTime<Utc>,
    pub entry_price: f64,
    #[serde(default)]
    pub exit_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub exit_price: Option<f64>,
    pub quantity: f64,
    pub commission: f64,
    #[serde(default)]
    pub pnl: f64,
    #[serde(default)]
    pub tp: Option<TpProvenance>,
}

impl Trade {
    pub fn is_open(&self) -> bool {
        self.exit_time.is_none()
    }
}
