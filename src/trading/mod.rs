pub mod cycle_ledger;
pub mod dynamic_tp;
pub mod tp_ladder;

pub use cycle_ledger::CycleLedger;
pub use dynamic_tp::{DynamicTpRecord, DynamicTpResolver, TpResolution};
pub use tp_ladder::{TpLadder, TpLevel, TP_LEVEL_COUNT};

use serde::{Deserialize, Serialize};

/// Quantity tolerance for "nothing left" checks.
pub const QTY_EPSILON: f64 = 1e-8;

/// Exit style, chosen once when the runner is built.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum TpMode {
    /// Whole position at `avg * (1 + percent)`; percent 0 disables it.
    Fixed { percent: f64 },
    /// Whole position, percent asked from the strategy each bar.
    Dynamic { base_percent: f64 },
    /// Five 20% tranches at progressively higher targets.
    FiveLevelLadder { base_percent: f64 },
}

impl TpMode {
    pub fn base_percent(&self) -> f64 {
        match *self {
            TpMode::Fixed { percent } => percent,
            TpMode::Dynamic { base_percent } | TpMode::FiveLevelLadder { base_percent } => {
                base_percent
            }
        }
    }

    pub fn is_ladder(&self) -> bool {
        matches!(self, TpMode::FiveLevelLadder { .. })
    }
}
