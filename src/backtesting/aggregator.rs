use chrono::{DateTime, Utc};

use crate::models::{CycleSummary, Trade};
use crate::strategies::HedgeParameters;
use crate::trading::{DynamicTpRecord, TpMode};

use super::equity::EquityStats;
use super::report::{BacktestResults, DynamicTpSummary};

/// Crypto trades every day.
const PERIODS_PER_YEAR: f64 = 365.0;

/// Everything the runner emitted, handed over once at the end of a run.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub strategy_name: String,
    pub symbol: String,
    pub mode: TpMode,
    pub start_balance: f64,
    pub end_balance: f64,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub trades: Vec<Trade>,
    pub cycles: Vec<CycleSummary>,
    pub equity: EquityStats,
    pub dynamic_tp_records: Vec<DynamicTpRecord>,
    pub tp_fallbacks: usize,
    pub buy_volume: f64,
    pub sell_volume: f64,
    pub commission_paid: f64,
    pub decision_errors: usize,
    pub rejected_entries: usize,
    pub hedge: Option<HedgeParameters>,
}

pub fn aggregate(run: RunOutput) -> BacktestResults {
    let start = run.start_balance;
    let total_pnl = run.end_balance - start;
    let total_return = if start > 0.0 { total_pnl / start } else { 0.0 };

    let days = match (run.start_time, run.end_time) {
        (Some(s), Some(e)) => (e - s).num_seconds() as f64 / 86_400.0,
        _ => 0.0,
    };
    let annualized_return = annualize(total_return, days);

    // Only rows with an exit carry realized PnL
    let realized: Vec<f64> = run
        .trades
        .iter()
        .filter(|t| !t.is_open())
        .map(|t| t.pnl)
        .collect();
    let wins: Vec<f64> = realized.iter().copied().filter(|p| *p > 0.0).collect();
    let losses: Vec<f64> = realized.iter().copied().filter(|p| *p < 0.0).collect();
    let gross_profit: f64 = wins.iter().sum();
    let gross_loss: f64 = losses.iter().map(|l| l.abs()).sum();

    let win_rate = if realized.is_empty() {
        0.0
    } else {
        wins.len() as f64 / realized.len() as f64
    };
    let avg_win = if wins.is_empty() {
        0.0
    } else {
        gross_profit / wins.len() as f64
    };
    let avg_loss = if losses.is_empty() {
        0.0
    } else {
        -gross_loss / losses.len() as f64
    };

    let max_drawdown = run.equity.max_drawdown;
    let calmar_ratio = if max_drawdown > 0.0 {
        annualized_return / max_drawdown
    } else {
        0.0
    };

    let completed_cycles = run.cycles.iter().filter(|c| c.completed).count();
    let incomplete_cycles = run.cycles.len() - completed_cycles;
    let avg_entries_per_cycle = if run.cycles.is_empty() {
        0.0
    } else {
        run.cycles.iter().map(|c| c.entries).sum::<usize>() as f64 / run.cycles.len() as f64
    };

    let turnover = if start > 0.0 {
        (run.buy_volume + run.sell_volume) / start
    } else {
        0.0
    };

    BacktestResults {
        strategy_name: run.strategy_name,
        symbol: run.symbol,
        mode: run.mode,
        start_time: run.start_time,
        end_time: run.end_time,
        days,
        bars: run.equity.bars,
        start_balance: start,
        end_balance: run.end_balance,
        total_pnl,
        total_return,
        annualized_return,
        max_drawdown,
        max_intra_cycle_drawdown: run.equity.max_intra_cycle_drawdown,
        sharpe_ratio: sharpe(&run.equity.daily_returns),
        sortino_ratio: sortino(&run.equity.daily_returns),
        calmar_ratio,
        total_trades: run.trades.len(),
        realized_trades: realized.len(),
        winning_trades: wins.len(),
        losing_trades: losses.len(),
        win_rate,
        avg_win,
        avg_loss,
        profit_factor: profit_factor(gross_profit, gross_loss),
        total_commission: run.commission_paid,
        turnover,
        avg_exposure: run.equity.avg_exposure,
        max_exposure: run.equity.max_exposure,
        completed_cycles,
        incomplete_cycles,
        avg_entries_per_cycle,
        decision_errors: run.decision_errors,
        rejected_entries: run.rejected_entries,
        dynamic_tp: summarize_dynamic_tp(&run.dynamic_tp_records, run.tp_fallbacks),
        hedge: run.hedge,
        trades: run.trades,
        cycles: run.cycles,
        equity_curve: run.equity.points,
        dynamic_tp_records: run.dynamic_tp_records,
    }
}

/// Wins over absolute losses: 0 with no wins, infinite with wins and no
/// losses.
pub fn profit_factor(gross_profit: f64, gross_loss: f64) -> f64 {
    if gross_profit <= 0.0 {
        0.0
    } else if gross_loss <= 0.0 {
        f64::INFINITY
    } else {
        gross_profit / gross_loss
    }
}

fn annualize(total_return: f64, days: f64) -> f64 {
    if days < 1.0 || total_return <= -1.0 {
        return total_return;
    }
    (1.0 + total_return).powf(PERIODS_PER_YEAR / days) - 1.0
}

fn mean(xs: &[f64]) -> f64 {
    xs.iter().sum::<f64>() / xs.len() as f64
}

/// Annualized Sharpe from daily returns (risk-free rate 0).
pub fn sharpe(returns: &[f64]) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let m = mean(returns);
    let variance = returns.iter().map(|r| (r - m).powi(2)).sum::<f64>() / returns.len() as f64;
    let std_dev = variance.sqrt();
    if std_dev == 0.0 {
        return 0.0;
    }
    m / std_dev * PERIODS_PER_YEAR.sqrt()
}

/// Like Sharpe but only penalising downside deviation.
pub fn sortino(returns: &[f64]) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let m = mean(returns);
    let downside =
        returns.iter().map(|r| r.min(0.0).powi(2)).sum::<f64>() / returns.len() as f64;
    let dd = downside.sqrt();
    if dd == 0.0 {
        return 0.0;
    }
    m / dd * PERIODS_PER_YEAR.sqrt()
}

fn summarize_dynamic_tp(records: &[DynamicTpRecord], fallbacks: usize) -> DynamicTpSummary {
    if records.is_empty() {
        return DynamicTpSummary {
            fallbacks,
            ..DynamicTpSummary::default()
        };
    }
    let pcts: Vec<f64> = records.iter().map(|r| r.calculated_percent).collect();
    DynamicTpSummary {
        calculations: records.len(),
        avg_percent: mean(&pcts),
        min_percent: pcts.iter().copied().fold(f64::INFINITY, f64::min),
        max_percent: pcts.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        clamped: records.iter().filter(|r| r.clamped).count(),
        fallbacks,
    }
}
