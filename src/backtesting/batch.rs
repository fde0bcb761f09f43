use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tracing::{info, warn};

use crate::config::{Config, ConfigError};
use crate::models::Candle;
use crate::strategies::Strategy;

use super::report::BacktestResults;
use super::runner::BacktestRunner;

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("invalid config: {0}")]
    Config(#[from] ConfigError),
    #[error("backtest worker failed: {0}")]
    Join(String),
}

/// One independent backtest. Jobs share candles read-only and nothing else.
pub struct BacktestJob {
    pub name: String,
    pub config: Config,
    pub strategy: Box<dyn Strategy>,
    pub candles: Arc<Vec<Candle>>,
}

#[derive(Debug)]
pub struct JobOutcome {
    pub name: String,
    pub result: Result<BacktestResults, BatchError>,
}

/// Run `jobs` on at most `max_workers` blocking threads. Outcomes come back
/// in submission order.
pub async fn run_batch(jobs: Vec<BacktestJob>, max_workers: usize) -> Vec<JobOutcome> {
    let total = jobs.len();
    let semaphore = Arc::new(Semaphore::new(max_workers.max(1)));
    let (tx, mut rx) = mpsc::channel::<(usize, JobOutcome)>(total.max(1));

    info!("Running {} backtests on {} workers", total, max_workers.max(1));

    for (index, job) in jobs.into_iter().enumerate() {
        let semaphore = Arc::clone(&semaphore);
        let tx = tx.clone();
        tokio::spawn(async move {
            let name = job.name.clone();
            let result = match semaphore.acquire_owned().await {
                Ok(_permit) => tokio::task::spawn_blocking(move || run_job(job))
                    .await
                    .unwrap_or_else(|e| Err(BatchError::Join(e.to_string()))),
                Err(e) => Err(BatchError::Join(e.to_string())),
            };
            if let Err(e) = &result {
                warn!("Backtest {} failed: {}", name, e);
            }
            // Receiver only goes away if the caller was dropped
            let _ = tx.send((index, JobOutcome { name, result })).await;
        });
    }
    drop(tx);

    let mut outcomes = Vec::with_capacity(total);
    while let Some(item) = rx.recv().await {
        outcomes.push(item);
    }
    outcomes.sort_by_key(|(i, _)| *i);
    outcomes.into_iter().map(|(_, o)| o).collect()
}

fn run_job(job: BacktestJob) -> Result<BacktestResults, BatchError> {
    let runner = BacktestRunner::new(job.config, job.strategy)?;
    Ok(runner.run(&job.candles))
}
