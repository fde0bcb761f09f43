use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One ladder level fill, kept on the cycle even after the ladder is
/// reset by a later entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialExit {
    pub level: u8,
    pub quantity: f64,
    pub price: f64,
    pub timestamp: DateTime<Utc>,
    pub pnl: f64,
    pub commission: f64,
}

/// Immutable snapshot of a cycle, written when it closes or when the data
/// stream ends with quantity still held.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleSummary {
    pub cycle_id: u64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub entries: usize,
    pub avg_entry_net: f64,
    pub avg_entry_gross: f64,
    pub total_cost_net: f64,
    pub total_cost_gross: f64,
    pub total_quantity: f64,
    pub total_commission: f64,
    /// Last single-TP target tested; `None` in ladder mode.
    #[serde(default)]
    pub target_price: Option<f64>,
    pub realized_pnl: f64,
    pub completed: bool,
    #[serde(default)]
    pub partial_exits: Vec<PartialExit>,
}

impl CycleSummary {
    pub fn sold_quantity(&self) -> f64 {
        self.partial_exits.iter().map(|p| p.quantity).sum()
    }
}
