mod common;

use std::sync::Arc;

use dca_cycle_backtester::backtesting::{
    run_batch, BacktestJob, BacktestRunner, CandleSource, SyntheticCandles,
};
use dca_cycle_backtester::models::TradeKind;
use dca_cycle_backtester::strategies::DcaStrategy;

use common::{make_v_shape, test_config};

#[test]
fn dca_averages_down_and_exits_on_recovery() {
    let cfg = test_config();
    let candles = make_v_shape(100.0, 80.0, 110.0);
    let runner = BacktestRunner::new(cfg.clone(), Box::new(DcaStrategy::from_config(&cfg))).unwrap();
    let results = runner.run(&candles);

    assert!(results.completed_cycles >= 1);
    let first = &results.cycles[0];
    assert!(first.completed);
    // 100 + 150 + 225 + 337.5 fit the balance, the 506.25 tranche does not
    assert_eq!(first.entries, 4);
    assert!(first.target_price.unwrap() < 95.0);
    assert!(first.realized_pnl > 0.0);

    assert!(results.end_balance > cfg.initial_balance);
    assert!(results.total_commission > 0.0);
    assert!(results.max_drawdown > 0.0 && results.max_drawdown < 1.0);
    assert_eq!(results.total_trades, results.trades.len());
    assert_eq!(results.equity_curve.len(), candles.len());
}

#[test]
fn ladder_cycles_conserve_quantity() {
    let mut cfg = test_config();
    cfg.use_tp_levels = true;
    cfg.tp_percent = 0.05;
    let candles = make_v_shape(100.0, 80.0, 120.0);
    let runner = BacktestRunner::new(cfg.clone(), Box::new(DcaStrategy::from_config(&cfg))).unwrap();
    let results = runner.run(&candles);

    assert!(results.completed_cycles >= 1);
    for cycle in results.cycles.iter().filter(|c| c.completed) {
        assert!((cycle.sold_quantity() - cycle.total_quantity).abs() < 1e-9);
        assert!(cycle.partial_exits.len() <= 5);
    }
    for t in &results.trades {
        match t.kind {
            TradeKind::LevelExit => assert!(matches!(t.level, Some(1..=5))),
            TradeKind::Entry => assert!(t.exit_time.is_none()),
            TradeKind::MarkToMarket => assert!(t.level.is_none()),
        }
    }
}

#[tokio::test]
async fn synthetic_runs_are_reproducible() {
    let cfg = test_config();
    let mut source = SyntheticCandles::new(7, 3_000);
    let candles = source.load().await.unwrap().into_vec();

    let run = || {
        BacktestRunner::new(cfg.clone(), Box::new(DcaStrategy::from_config(&cfg)))
            .unwrap()
            .run(&candles)
    };
    let a = run();
    let b = run();
    assert_eq!(a.end_balance, b.end_balance);
    assert_eq!(a.total_trades, b.total_trades);
    assert_eq!(a.cycles.len(), b.cycles.len());
    assert!(a.max_drawdown >= 0.0 && a.max_drawdown <= 1.0);
}

#[tokio::test]
async fn batch_sweep_matches_single_runs() {
    let candles = Arc::new(SyntheticCandles::new(11, 2_000).generate());
    let tps = [0.01, 0.02, 0.04];

    let jobs = tps
        .iter()
        .map(|&tp| {
            let mut cfg = test_config();
            cfg.tp_percent = tp;
            BacktestJob {
                name: format!("tp{tp}"),
                strategy: Box::new(DcaStrategy::from_config(&cfg)),
                config: cfg,
                candles: Arc::clone(&candles),
            }
        })
        .collect();
    let outcomes = run_batch(jobs, 2).await;
    assert_eq!(outcomes.len(), 3);

    for (outcome, &tp) in outcomes.iter().zip(tps.iter()) {
        assert_eq!(outcome.name, format!("tp{tp}"));
        let mut cfg = test_config();
        cfg.tp_percent = tp;
        let single = BacktestRunner::new(cfg.clone(), Box::new(DcaStrategy::from_config(&cfg)))
            .unwrap()
            .run(&candles);
        let batched = outcome.result.as_ref().unwrap();
        assert_eq!(batched.end_balance, single.end_balance);
        assert_eq!(batched.total_trades, single.total_trades);
    }
}

#[test]
fn results_serialize_to_json() {
    let cfg = test_config();
    let candles = make_v_shape(100.0, 90.0, 100.0);
    let results = BacktestRunner::new(cfg.clone(), Box::new(DcaStrategy::from_config(&cfg)))
        .unwrap()
        .run(&candles);

    let json = serde_json::to_value(&results).unwrap();
    for key in [
        "start_balance",
        "end_balance",
        "total_return",
        "max_drawdown",
        "total_trades",
        "trades",
        "cycles",
        "equity_curve",
    ] {
        assert!(json.get(key).is_some(), "missing {key}");
    }
}
