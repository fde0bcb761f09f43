use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;

use crate::models::{CycleSummary, EquityPoint, Trade};
use crate::strategies::HedgeParameters;
use crate::trading::{DynamicTpRecord, TpMode};

#[derive(Debug, Clone, Default, Serialize)]
pub struct DynamicTpSummary {
    pub calculations: usize,
    pub avg_percent: f64,
    pub min_percent: f64,
    pub max_percent: f64,
    pub clamped: usize,
    pub fallbacks: usize,
}

/// Final output of one backtest. Ratios (returns, drawdowns, exposure,
/// win rate) are fractions, not percentages.
#[derive(Debug, Clone, Serialize)]
pub struct BacktestResults {
    pub strategy_name: String,
    pub symbol: String,
    pub mode: TpMode,

    // Period
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub days: f64,
    pub bars: usize,

    // Performance
    pub start_balance: f64,
    pub end_balance: f64,
    pub total_pnl: f64,
    pub total_return: f64,
    pub annualized_return: f64,

    // Risk
    pub max_drawdown: f64,
    pub max_intra_cycle_drawdown: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub calmar_ratio: f64,

    // Trades
    pub total_trades: usize,
    pub realized_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub profit_factor: f64,
    pub total_commission: f64,
    pub turnover: f64,
    pub avg_exposure: f64,
    pub max_exposure: f64,

    // Cycles
    pub completed_cycles: usize,
    pub incomplete_cycles: usize,
    pub avg_entries_per_cycle: f64,

    pub decision_errors: usize,
    pub rejected_entries: usize,
    pub dynamic_tp: DynamicTpSummary,
    pub hedge: Option<HedgeParameters>,

    pub trades: Vec<Trade>,
    pub cycles: Vec<CycleSummary>,
    pub equity_curve: Vec<EquityPoint>,
    pub dynamic_tp_records: Vec<DynamicTpRecord>,
}

impl BacktestResults {
    pub fn print_summary(&self) {
        println!("\n{}", "=".repeat(70));
        println!("  BACKTEST REPORT: {} on {}", self.strategy_name, self.symbol);
        println!("{}", "=".repeat(70));
        if let (Some(start), Some(end)) = (self.start_time, self.end_time) {
            println!(
                "  Period:      {} to {} ({:.1} days, {} bars)",
                start.format("%Y-%m-%d %H:%M"),
                end.format("%Y-%m-%d %H:%M"),
                self.days,
                self.bars
            );
        }
        println!("  TP mode:     {}", describe_mode(&self.mode));
        println!();
        println!("  PERFORMANCE");
        println!("  ───────────────────────────────────");
        println!("  Initial:     ${:.2}", self.start_balance);
        println!("  Final:       ${:.2}", self.end_balance);
        println!("  PnL:         ${:+.2}", self.total_pnl);
        println!("  Return:      {:+.2}%", self.total_return * 100.0);
        println!("  Annualized:  {:+.2}%", self.annualized_return * 100.0);
        println!();
        println!("  TRADES");
        println!("  ───────────────────────────────────");
        println!(
            "  Total:       {} ({} realized)",
            self.total_trades, self.realized_trades
        );
        println!(
            "  Win/Loss:    {} / {}",
            self.winning_trades, self.losing_trades
        );
        println!("  Win Rate:    {:.1}%", self.win_rate * 100.0);
        println!("  Avg Win:     ${:+.2}", self.avg_win);
        println!("  Avg Loss:    ${:+.2}", self.avg_loss);
        println!("  Profit Factor: {:.2}", self.profit_factor);
        println!("  Commission:  ${:.2}", self.total_commission);
        println!("  Turnover:    {:.2}x", self.turnover);
        println!();
        println!("  CYCLES");
        println!("  ───────────────────────────────────");
        println!(
            "  Completed:   {} | Incomplete: {}",
            self.completed_cycles, self.incomplete_cycles
        );
        println!("  Avg entries: {:.2}", self.avg_entries_per_cycle);
        println!();
        println!("  RISK");
        println!("  ───────────────────────────────────");
        println!("  Max DD:      {:.2}%", self.max_drawdown * 100.0);
        println!("  Cycle DD:    {:.2}%", self.max_intra_cycle_drawdown * 100.0);
        println!("  Sharpe:      {:.2}", self.sharpe_ratio);
        println!("  Sortino:     {:.2}", self.sortino_ratio);
        println!("  Calmar:      {:.2}", self.calmar_ratio);
        println!(
            "  Exposure:    avg {:.1}% | max {:.1}%",
            self.avg_exposure * 100.0,
            self.max_exposure * 100.0
        );

        if self.dynamic_tp.calculations > 0 || self.dynamic_tp.fallbacks > 0 {
            println!();
            println!("  DYNAMIC TP");
            println!("  ───────────────────────────────────");
            println!(
                "  Calcs:       {} | clamped {} | fallbacks {}",
                self.dynamic_tp.calculations, self.dynamic_tp.clamped, self.dynamic_tp.fallbacks
            );
            if self.dynamic_tp.calculations > 0 {
                println!(
                    "  TP %:        avg {:.2} | min {:.2} | max {:.2}",
                    self.dynamic_tp.avg_percent * 100.0,
                    self.dynamic_tp.min_percent * 100.0,
                    self.dynamic_tp.max_percent * 100.0
                );
            }
        }

        if self.decision_errors > 0 || self.rejected_entries > 0 {
            println!();
            println!(
                "  Strategy errors: {} | Rejected entries: {}",
                self.decision_errors, self.rejected_entries
            );
        }

        println!("{}", "=".repeat(70));
    }

    /// Write the full results as pretty JSON.
    pub fn save_json(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self).context("serializing results")?;
        std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }
}

fn describe_mode(mode: &TpMode) -> String {
    match mode {
        TpMode::Fixed { percent } => format!("fixed {:.2}%", percent * 100.0),
        TpMode::Dynamic { base_percent } => {
            format!("dynamic (fallback {:.2}%)", base_percent * 100.0)
        }
        TpMode::FiveLevelLadder { base_percent } => {
            format!("5-level ladder (base {:.2}%)", base_percent * 100.0)
        }
    }
}
