use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};

use dca_cycle_backtester::backtesting::data_fetcher::{
    cache_path, save_candles, CandleSource, JsonFileSource, SyntheticCandles,
};
use dca_cycle_backtester::backtesting::{run_batch, BacktestJob, BacktestRunner};
use dca_cycle_backtester::config::Config;
use dca_cycle_backtester::models::Candle;
use dca_cycle_backtester::strategies::DcaStrategy;

const SWEEP_TP_PERCENTS: [f64; 6] = [0.005, 0.01, 0.015, 0.02, 0.03, 0.05];

struct Args {
    file: Option<PathBuf>,
    seed: u64,
    bars: usize,
    sweep: bool,
}

fn parse_args() -> Result<Args> {
    let mut args = Args {
        file: None,
        seed: 42,
        bars: 20_000,
        sweep: false,
    };
    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--seed" => {
                let v = it.next().context("--seed needs a value")?;
                args.seed = v.parse().with_context(|| format!("bad seed {v}"))?;
            }
            "--bars" => {
                let v = it.next().context("--bars needs a value")?;
                args.bars = v.parse().with_context(|| format!("bad bar count {v}"))?;
            }
            "--sweep" => args.sweep = true,
            other => args.file = Some(PathBuf::from(other)),
        }
    }
    Ok(args)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::from_env();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cfg.log_level.to_lowercase()));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .init();

    let args = parse_args()?;

    let mut source: Box<dyn CandleSource> = match &args.file {
        Some(path) => Box::new(JsonFileSource::new(path.clone())),
        None => Box::new(SyntheticCandles::new(args.seed, args.bars)),
    };

    println!("╔══════════════════════════════════════════════════════════╗");
    println!("║          DCA CYCLE BACKTESTER                            ║");
    println!("╚══════════════════════════════════════════════════════════╝");
    println!("  Symbol:     {}", cfg.symbol);
    println!("  Data:       {}", source.describe());
    println!("  Balance:    ${:.2}", cfg.initial_balance);
    println!("  Commission: {:.3}%", cfg.commission_rate * 100.0);
    println!(
        "  TP:         {:.2}%{}",
        cfg.tp_percent * 100.0,
        if cfg.use_tp_levels { " (5 levels)" } else { "" }
    );
    println!();

    let candles = source.load().await?.into_vec();
    let (Some(first), Some(last)) = (candles.first(), candles.last()) else {
        println!("ERROR: no candles to backtest");
        return Ok(());
    };

    // Keep generated data so a run can be replayed from the file
    if args.file.is_none() {
        let path = cache_path(
            &cfg.data_dir,
            &format!("{}_synthetic{}", cfg.symbol, args.seed),
            first.timestamp,
            last.timestamp,
        );
        save_candles(&path, &candles).await?;
        println!("Synthetic candles cached to: {}", path.display());
    }

    if args.sweep {
        return sweep(cfg, candles).await;
    }

    let runner = BacktestRunner::new(cfg.clone(), Box::new(DcaStrategy::from_config(&cfg)))?;
    let results = runner.run(&candles);
    results.print_summary();

    let report_file = PathBuf::from(&cfg.data_dir).join(format!(
        "backtest_{}_{}.json",
        cfg.symbol,
        results
            .start_time
            .map(|t| t.format("%Y%m%d").to_string())
            .unwrap_or_default()
    ));
    results.save_json(&report_file)?;
    println!("\nResults saved to: {}", report_file.display());

    Ok(())
}

async fn sweep(cfg: Config, candles: Vec<Candle>) -> Result<()> {
    let candles = Arc::new(candles);
    let jobs = SWEEP_TP_PERCENTS
        .iter()
        .map(|&tp| {
            let mut job_cfg = cfg.clone();
            job_cfg.tp_percent = tp;
            BacktestJob {
                name: format!("tp {:.2}%", tp * 100.0),
                strategy: Box::new(DcaStrategy::from_config(&job_cfg)),
                config: job_cfg,
                candles: Arc::clone(&candles),
            }
        })
        .collect();

    let workers = std::thread::available_parallelism().map_or(2, |n| n.get());
    let outcomes = run_batch(jobs, workers).await;

    println!("\n{}", "=".repeat(70));
    println!(
        "  {:<10} {:>10} {:>9} {:>8} {:>8} {:>7}",
        "JOB", "FINAL $", "RETURN", "MAX DD", "CYCLES", "SHARPE"
    );
    println!("{}", "=".repeat(70));
    for outcome in outcomes {
        match outcome.result {
            Ok(r) => println!(
                "  {:<10} {:>10.2} {:>8.2}% {:>7.2}% {:>8} {:>7.2}",
                outcome.name,
                r.end_balance,
                r.total_return * 100.0,
                r.max_drawdown * 100.0,
                r.completed_cycles,
                r.sharpe_ratio
            ),
            Err(e) => println!("  {:<10} FAILED: {}", outcome.name, e),
        }
    }
    println!("{}", "=".repeat(70));
    Ok(())
}
