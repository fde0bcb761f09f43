use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub timestamp: DateTime<Utc>,
    pub balance: f64,
    pub position: f64,
    pub price: f64,
    pub equity: f64,
    /// Position value / equity.
    pub exposure: f64,
    /// Equity minus starting balance.
    pub pnl: f64,
}
