use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::trading::TpMode;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("initial balance must be positive and finite, got {0}")]
    InvalidBalance(f64),
    #[error("commission rate must be in [0, 1), got {0}")]
    InvalidCommission(f64),
    #[error("take-profit percent must be non-negative and finite, got {0}")]
    InvalidTpPercent(f64),
    #[error("minimum order quantity must be non-negative and finite, got {0}")]
    InvalidMinOrderQty(f64),
    #[error("window size must be at least 1")]
    InvalidWindow,
    #[error("five-level take-profit needs a positive TP percent")]
    LadderWithoutTp,
}

/// DCA reference strategy knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DcaConfig {
    pub base_amount: f64,
    pub drop_pct: f64,
    pub amount_multiplier: f64,
    pub max_entries: usize,
    pub dynamic_tp: bool,
    pub dynamic_tp_min: f64,
    pub dynamic_tp_max: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub symbol: String,

    // Account
    pub initial_balance: f64,
    /// Fraction of notional, e.g. 0.001 = 0.1%.
    pub commission_rate: f64,

    // Take-profit
    /// Fraction above average entry; 0 disables the fixed TP.
    pub tp_percent: f64,
    pub use_tp_levels: bool,

    /// Lot size; 0 disables rounding.
    pub min_order_qty: f64,

    // Simulation
    pub window_size: usize,
    /// Above this many candles the equity curve is subsampled.
    pub equity_sample_threshold: usize,

    pub dca: DcaConfig,

    // Data & logging
    pub data_dir: String,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            symbol: "BTC-USD".to_string(),
            initial_balance: 1000.0,
            commission_rate: 0.001,
            tp_percent: 0.02,
            use_tp_levels: false,
            min_order_qty: 0.0,
            window_size: 100,
            equity_sample_threshold: 10_000,
            dca: DcaConfig {
                base_amount: 100.0,
                drop_pct: 0.03,
                amount_multiplier: 1.5,
                max_entries: 5,
                dynamic_tp: false,
                dynamic_tp_min: 0.005,
                dynamic_tp_max: 0.10,
            },
            data_dir: "data".to_string(),
            log_level: "INFO".to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let env = |key: &str, default: &str| -> String {
            std::env::var(key).unwrap_or_else(|_| default.to_string())
        };
        let d = Config::default();

        Config {
            symbol: env("SYMBOL", &d.symbol),
            initial_balance: env("INITIAL_BALANCE", "1000")
                .parse()
                .unwrap_or(d.initial_balance),
            commission_rate: env("COMMISSION_RATE", "0.001")
                .parse()
                .unwrap_or(d.commission_rate),
            tp_percent: env("TP_PERCENT", "0.02").parse().unwrap_or(d.tp_percent),
            use_tp_levels: env("USE_TP_LEVELS", "false").to_lowercase() == "true",
            min_order_qty: env("MIN_ORDER_QTY", "0").parse().unwrap_or(0.0),
            window_size: env("WINDOW_SIZE", "100").parse().unwrap_or(d.window_size),
            equity_sample_threshold: env("EQUITY_SAMPLE_THRESHOLD", "10000")
                .parse()
                .unwrap_or(d.equity_sample_threshold),
            dca: DcaConfig {
                base_amount: env("DCA_BASE_AMOUNT", "100")
                    .parse()
                    .unwrap_or(d.dca.base_amount),
                drop_pct: env("DCA_DROP_PCT", "0.03").parse().unwrap_or(d.dca.drop_pct),
                amount_multiplier: env("DCA_AMOUNT_MULTIPLIER", "1.5")
                    .parse()
                    .unwrap_or(d.dca.amount_multiplier),
                max_entries: env("DCA_MAX_ENTRIES", "5")
                    .parse()
                    .unwrap_or(d.dca.max_entries),
                dynamic_tp: env("DYNAMIC_TP", "false").to_lowercase() == "true",
                dynamic_tp_min: env("DYNAMIC_TP_MIN", "0.005")
                    .parse()
                    .unwrap_or(d.dca.dynamic_tp_min),
                dynamic_tp_max: env("DYNAMIC_TP_MAX", "0.10")
                    .parse()
                    .unwrap_or(d.dca.dynamic_tp_max),
            },
            data_dir: env("DATA_DIR", &d.data_dir),
            log_level: env("LOG_LEVEL", &d.log_level),
        }
    }

    /// Reject settings that would only surface as nonsense mid-run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.initial_balance.is_finite() || self.initial_balance <= 0.0 {
            return Err(ConfigError::InvalidBalance(self.initial_balance));
        }
        if !(0.0..1.0).contains(&self.commission_rate) {
            return Err(ConfigError::InvalidCommission(self.commission_rate));
        }
        if !self.tp_percent.is_finite() || self.tp_percent < 0.0 {
            return Err(ConfigError::InvalidTpPercent(self.tp_percent));
        }
        if !self.min_order_qty.is_finite() || self.min_order_qty < 0.0 {
            return Err(ConfigError::InvalidMinOrderQty(self.min_order_qty));
        }
        if self.window_size == 0 {
            return Err(ConfigError::InvalidWindow);
        }
        if self.use_tp_levels && self.tp_percent <= 0.0 {
            return Err(ConfigError::LadderWithoutTp);
        }
        Ok(())
    }

    /// Pick the exit mode once; `dynamic_enabled` comes from the strategy.
    pub fn tp_mode(&self, dynamic_enabled: bool) -> TpMode {
        if self.use_tp_levels {
            TpMode::FiveLevelLadder {
                base_percent: self.tp_percent,
            }
        } else if dynamic_enabled {
            TpMode::Dynamic {
                base_percent: self.tp_percent,
            }
        } else {
            TpMode::Fixed {
                percent: self.tp_percent,
            }
        }
    }
}
