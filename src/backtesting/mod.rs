pub mod aggregator;
pub mod batch;
pub mod data_fetcher;
pub mod equity;
pub mod report;
pub mod runner;

pub use batch::{run_batch, BacktestJob, BatchError, JobOutcome};
pub use data_fetcher::{CandleSource, JsonFileSource, SyntheticCandles};
pub use report::BacktestResults;
pub use runner::BacktestRunner;
