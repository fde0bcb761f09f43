pub mod candle;
pub mod cycle;
pub mod equity;
pub mod trade;

pub use candle::{mean_true_range_pct, Candle, CandleSeries};
pub use cycle::{CycleSummary, PartialExit};
pub use equity::EquityPoint;
pub use trade::{TpProvenance, TpStrategyTag, Trade, TradeKind};
