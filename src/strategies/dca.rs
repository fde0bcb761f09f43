use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::Config;
use crate::models::{mean_true_range_pct, Candle, TpStrategyTag};

use super::signals::{Action, DynamicTp, TradeDecision};
use super::{Strategy, StrategyError};

/// Mean true range (fraction of price) at which the dynamic TP equals the
/// base TP.
const REFERENCE_VOLATILITY: f64 = 0.01;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DcaParams {
    pub base_amount: f64,
    /// Price drop below the last entry that triggers the next buy.
    pub drop_pct: f64,
    pub amount_multiplier: f64,
    pub max_entries: usize,
    pub dynamic_tp: bool,
    pub tp_base: f64,
    pub tp_min: f64,
    pub tp_max: f64,
}

impl From<&Config> for DcaParams {
    fn from(cfg: &Config) -> Self {
        Self {
            base_amount: cfg.dca.base_amount,
            drop_pct: cfg.dca.drop_pct,
            amount_multiplier: cfg.dca.amount_multiplier,
            max_entries: cfg.dca.max_entries,
            dynamic_tp: cfg.dca.dynamic_tp,
            tp_base: cfg.tp_percent,
            tp_min: cfg.dca.dynamic_tp_min,
            tp_max: cfg.dca.dynamic_tp_max,
        }
    }
}

/// Buy once when flat, then add progressively larger tranches each time
/// price falls `drop_pct` below the previous entry. The anchor only moves on
/// confirmed fills, so a rejected buy is retried on the next bar.
pub struct DcaStrategy {
    params: DcaParams,
    last_entry_price: Option<f64>,
    entries: usize,
}

impl DcaStrategy {
    pub fn new(params: DcaParams) -> Self {
        Self {
            params,
            last_entry_price: None,
            entries: 0,
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(DcaParams::from(cfg))
    }

    fn tranche_amount(&self) -> f64 {
        self.params.base_amount * self.params.amount_multiplier.powi(self.entries as i32)
    }

    fn reset_anchor(&mut self) {
        self.last_entry_price = None;
        self.entries = 0;
    }
}

impl Strategy for DcaStrategy {
    fn name(&self) -> &str {
        "dca"
    }

    fn decide(&mut self, window: &[Candle]) -> Result<TradeDecision, StrategyError> {
        let candle = window
            .last()
            .ok_or(StrategyError::InsufficientData { have: 0, need: 1 })?;
        let price = candle.close;
        if !price.is_finite() || price <= 0.0 {
            return Err(StrategyError::InvalidValue {
                field: "close",
                value: price,
            });
        }

        let Some(last) = self.last_entry_price else {
            let amount = self.tranche_amount();
            return Ok(TradeDecision::buy(amount, format!("initial entry @ {price:.2}")));
        };

        if self.entries >= self.params.max_entries {
            return Ok(TradeDecision::hold("max entries reached"));
        }

        let trigger = last * (1.0 - self.params.drop_pct);
        if price > trigger {
            return Ok(TradeDecision::hold("waiting for drop"));
        }

        let amount = self.tranche_amount();
        let drop = (last - price) / last;
        let strength = if self.params.drop_pct > 0.0 {
            (drop / (2.0 * self.params.drop_pct)).min(1.0)
        } else {
            1.0
        };
        debug!(
            "DCA #{} triggered: {:.2} <= {:.2} (drop {:.2}%)",
            self.entries + 1,
            price,
            trigger,
            drop * 100.0
        );

        Ok(TradeDecision {
            action: Action::Buy,
            amount,
            confidence: 0.5 + 0.5 * strength,
            strength,
            reason: format!(
                "DCA #{} @ {:.2} ({:.2}% below last)",
                self.entries + 1,
                price,
                drop * 100.0
            ),
        })
    }

    fn is_dynamic_tp_enabled(&self) -> bool {
        self.params.dynamic_tp
    }

    fn dynamic_tp(&self, candle: &Candle, window: &[Candle]) -> Result<DynamicTp, StrategyError> {
        if !self.params.dynamic_tp {
            return Err(StrategyError::DynamicTpUnsupported);
        }
        let volatility = mean_true_range_pct(window).ok_or(StrategyError::InsufficientData {
            have: window.len(),
            need: 2,
        })?;

        let raw = self.params.tp_base * (volatility / REFERENCE_VOLATILITY);
        let percent = raw.clamp(self.params.tp_min, self.params.tp_max);
        let momentum = match window.first() {
            Some(first) if first.close > 0.0 => (candle.close - first.close) / first.close,
            _ => 0.0,
        };

        Ok(DynamicTp {
            percent,
            strategy: TpStrategyTag::VolatilityAdaptive,
            market_volatility: volatility,
            signal_strength: momentum,
            clamped: percent != raw,
        })
    }

    fn on_entry_filled(&mut self, price: f64, _quantity: f64) {
        self.last_entry_price = Some(price);
        self.entries += 1;
    }

    fn on_cycle_complete(&mut self) {
        self.reset_anchor();
    }

    fn reset_for_new_period(&mut self) {
        self.reset_anchor();
    }
}
