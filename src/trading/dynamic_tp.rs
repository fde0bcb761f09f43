use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Candle, TpStrategyTag};
use crate::strategies::{Strategy, StrategyError};

/// Provenance of one successful dynamic TP calculation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DynamicTpRecord {
    pub timestamp: DateTime<Utc>,
    pub price: f64,
    pub base_percent: f64,
    pub calculated_percent: f64,
    pub strategy: TpStrategyTag,
    pub market_volatility: f64,
    pub signal_strength: f64,
    pub clamped: bool,
}

/// Always carries a usable target. `fallback` holds the strategy error when
/// the fixed percent had to be used instead of a dynamic one.
#[derive(Debug, Clone)]
pub struct TpResolution {
    pub target: f64,
    pub percent: f64,
    pub record: Option<DynamicTpRecord>,
    pub fallback: Option<StrategyError>,
}

impl TpResolution {
    fn fixed(avg_entry: f64, base_percent: f64, fallback: Option<StrategyError>) -> Self {
        Self {
            target: avg_entry * (1.0 + base_percent),
            percent: base_percent,
            record: None,
            fallback,
        }
    }
}

/// Chooses between the fixed TP and the strategy's market-conditioned one,
/// keeping a log of what it used.
#[derive(Debug, Default)]
pub struct DynamicTpResolver {
    records: Vec<DynamicTpRecord>,
    fallbacks: usize,
}

impl DynamicTpResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolve(
        &mut self,
        strategy: &dyn Strategy,
        candle: &Candle,
        window: &[Candle],
        avg_entry: f64,
        base_percent: f64,
        dynamic_enabled: bool,
    ) -> TpResolution {
        if !dynamic_enabled {
            return TpResolution::fixed(avg_entry, base_percent, None);
        }

        match strategy.dynamic_tp(candle, window) {
            Ok(tp) if tp.percent.is_finite() && tp.percent > 0.0 => {
                let record = DynamicTpRecord {
                    timestamp: candle.timestamp,
                    price: candle.close,
                    base_percent,
                    calculated_percent: tp.percent,
                    strategy: tp.strategy,
                    market_volatility: tp.market_volatility,
                    signal_strength: tp.signal_strength,
                    clamped: tp.clamped,
                };
                self.records.push(record.clone());
                TpResolution {
                    target: avg_entry * (1.0 + tp.percent),
                    percent: tp.percent,
                    record: Some(record),
                    fallback: None,
                }
            }
            Ok(tp) => {
                self.fallbacks += 1;
                let err = if tp.percent == 0.0 {
                    None
                } else {
                    Some(StrategyError::InvalidValue {
                        field: "dynamic_tp_percent",
                        value: tp.percent,
                    })
                };
                TpResolution::fixed(avg_entry, base_percent, err)
            }
            Err(e) => {
                self.fallbacks += 1;
                TpResolution::fixed(avg_entry, base_percent, Some(e))
            }
        }
    }

    pub fn records(&self) -> &[DynamicTpRecord] {
        &self.records
    }

    pub fn fallbacks(&self) -> usize {
        self.fallbacks
    }

    pub fn take_records(&mut self) -> Vec<DynamicTpRecord> {
        std::mem::take(&mut self.records)
    }
}
