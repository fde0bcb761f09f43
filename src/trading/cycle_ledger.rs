use chrono::{DateTime, Utc};
use tracing::debug;

use crate::models::{CycleSummary, PartialExit};
use crate::strategies::Strategy;

use super::tp_ladder::TpLadder;
use super::QTY_EPSILON;

/// Financial state of the open accumulation cycle. Averages are always
/// derived from the running sums at query time.
#[derive(Debug, Clone)]
pub struct CycleLedger {
    open: bool,
    cycle_id: u64,
    start_time: Option<DateTime<Utc>>,
    entries: usize,
    net_cost_sum: f64,
    gross_cost_sum: f64,
    net_qty_sum: f64,
    gross_qty_sum: f64,
    commission_sum: f64,
    exit_commission_sum: f64,
    remaining_qty: f64,
    sold_qty: f64,
    /// PnL banked by fills while the cycle is still open.
    accumulated_pnl: f64,
    fills: Vec<PartialExit>,
    ladder: Option<TpLadder>,
}

impl CycleLedger {
    /// `ladder_base` is the base TP percent when running the five-level
    /// ladder, `None` for single-target exits.
    pub fn new(ladder_base: Option<f64>) -> Self {
        Self {
            open: false,
            cycle_id: 0,
            start_time: None,
            entries: 0,
            net_cost_sum: 0.0,
            gross_cost_sum: 0.0,
            net_qty_sum: 0.0,
            gross_qty_sum: 0.0,
            commission_sum: 0.0,
            exit_commission_sum: 0.0,
            remaining_qty: 0.0,
            sold_qty: 0.0,
            accumulated_pnl: 0.0,
            fills: Vec::new(),
            ladder: ladder_base.map(TpLadder::new),
        }
    }

    /// Start a cycle unless one is already open. Returns true if a new one
    /// was opened.
    pub fn open_if_needed(&mut self, timestamp: DateTime<Utc>) -> bool {
        if self.open {
            return false;
        }
        self.reset_sums();
        self.open = true;
        self.cycle_id += 1;
        self.start_time = Some(timestamp);
        if let Some(ladder) = self.ladder.as_mut() {
            let base = ladder.base_percent();
            ladder.initialize_levels(base);
        }
        debug!("Cycle #{} opened at {}", self.cycle_id, timestamp);
        true
    }

    pub fn record_entry(&mut self, price: f64, net_qty: f64, gross_qty: f64, commission: f64) {
        let gross_cost = price * gross_qty;
        self.entries += 1;
        self.gross_cost_sum += gross_cost;
        self.net_cost_sum += gross_cost + commission;
        self.gross_qty_sum += gross_qty;
        self.net_qty_sum += net_qty;
        self.commission_sum += commission;
        self.remaining_qty += net_qty;

        let remaining = self.remaining_qty;
        let first = self.entries == 1;
        if let Some(ladder) = self.ladder.as_mut() {
            if first {
                ladder.allocate_quantities(remaining);
            } else {
                ladder.on_new_entry(remaining);
            }
        }
    }

    /// Book one ladder level fill. `fill.commission` carries the entry fee
    /// share as well; `exit_commission` is only the sell side.
    pub fn record_level_fill(&mut self, level_index: usize, fill: PartialExit, exit_commission: f64) {
        self.remaining_qty -= fill.quantity;
        self.exit_commission_sum += exit_commission;
        self.sold_qty += fill.quantity;
        self.accumulated_pnl += fill.pnl;
        if let Some(ladder) = self.ladder.as_mut() {
            ladder.mark_hit(
                level_index,
                fill.timestamp,
                fill.price,
                fill.quantity,
                fill.pnl,
                fill.commission,
            );
        }
        self.fills.push(fill);
        self.check_conservation();
    }

    /// Book a sale of `qty` outside the ladder: the single TP exit or the
    /// end-of-data mark-to-market.
    pub fn record_exit(&mut self, qty: f64, pnl: f64, exit_commission: f64) {
        self.remaining_qty -= qty;
        self.sold_qty += qty;
        self.accumulated_pnl += pnl;
        self.exit_commission_sum += exit_commission;
        self.check_conservation();
    }

    /// Snapshot the cycle, let the strategy reset its anchors, then clear
    /// everything.
    pub fn close_and_summarize(
        &mut self,
        timestamp: DateTime<Utc>,
        completed: bool,
        target_price: Option<f64>,
        strategy: &mut dyn Strategy,
    ) -> CycleSummary {
        let summary = CycleSummary {
            cycle_id: self.cycle_id,
            start_time: self.start_time.unwrap_or(timestamp),
            end_time: timestamp,
            entries: self.entries,
            avg_entry_net: self.avg_entry_net(),
            avg_entry_gross: self.avg_entry_gross(),
            total_cost_net: self.net_cost_sum,
            total_cost_gross: self.gross_cost_sum,
            total_quantity: self.gross_qty_sum,
            total_commission: self.commission_sum + self.exit_commission_sum,
            target_price,
            realized_pnl: self.accumulated_pnl,
            completed,
            partial_exits: std::mem::take(&mut self.fills),
        };

        strategy.on_cycle_complete();

        debug!(
            "Cycle #{} closed ({}) entries={} pnl={:+.4}",
            summary.cycle_id,
            if completed { "completed" } else { "incomplete" },
            summary.entries,
            summary.realized_pnl
        );

        self.reset_sums();
        self.open = false;
        self.start_time = None;
        summary
    }

    fn reset_sums(&mut self) {
        self.entries = 0;
        self.net_cost_sum = 0.0;
        self.gross_cost_sum = 0.0;
        self.net_qty_sum = 0.0;
        self.gross_qty_sum = 0.0;
        self.commission_sum = 0.0;
        self.exit_commission_sum = 0.0;
        self.remaining_qty = 0.0;
        self.sold_qty = 0.0;
        self.accumulated_pnl = 0.0;
        self.fills.clear();
    }

    fn check_conservation(&self) {
        debug_assert!(
            self.remaining_qty >= -QTY_EPSILON,
            "remaining quantity went negative: {}",
            self.remaining_qty
        );
        debug_assert!(
            (self.sold_qty + self.remaining_qty - self.gross_qty_sum).abs() <= QTY_EPSILON,
            "sold {} + remaining {} != bought {}",
            self.sold_qty,
            self.remaining_qty,
            self.gross_qty_sum
        );
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn cycle_id(&self) -> u64 {
        self.cycle_id
    }

    pub fn entries(&self) -> usize {
        self.entries
    }

    /// Break-even average: cost including entry commission per unit held.
    pub fn avg_entry_net(&self) -> f64 {
        if self.net_qty_sum > 0.0 {
            self.net_cost_sum / self.net_qty_sum
        } else {
            0.0
        }
    }

    pub fn avg_entry_gross(&self) -> f64 {
        if self.gross_qty_sum > 0.0 {
            self.gross_cost_sum / self.gross_qty_sum
        } else {
            0.0
        }
    }

    /// Entry commission carried per unit bought.
    pub fn avg_entry_commission(&self) -> f64 {
        if self.gross_qty_sum > 0.0 {
            self.commission_sum / self.gross_qty_sum
        } else {
            0.0
        }
    }

    pub fn remaining_qty(&self) -> f64 {
        self.remaining_qty
    }

    pub fn sold_qty(&self) -> f64 {
        self.sold_qty
    }

    pub fn gross_qty_sum(&self) -> f64 {
        self.gross_qty_sum
    }

    pub fn accumulated_pnl(&self) -> f64 {
        self.accumulated_pnl
    }

    pub fn is_cycle_complete(&self) -> bool {
        TpLadder::is_cycle_complete(self.remaining_qty)
    }

    pub fn ladder(&self) -> Option<&TpLadder> {
        self.ladder.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{ts, ScriptedStrategy};

    fn fill(level: u8, qty: f64, price: f64, pnl: f64) -> PartialExit {
        PartialExit {
            level,
            quantity: qty,
            price,
            timestamp: ts(5),
            pnl,
            commission: 0.0,
        }
    }

    #[test]
    fn opens_once_and_numbers_cycles() {
        let mut ledger = CycleLedger::new(None);
        assert!(ledger.open_if_needed(ts(0)));
        assert!(!ledger.open_if_needed(ts(1)));
        assert_eq!(ledger.cycle_id(), 1);

        let mut strategy = ScriptedStrategy::new(vec![]);
        ledger.record_entry(100.0, 1.0, 1.0, 0.0);
        ledger.record_exit(1.0, 2.0, 0.0);
        ledger.close_and_summarize(ts(2), true, Some(102.0), &mut strategy);
        assert!(!ledger.is_open());

        assert!(ledger.open_if_needed(ts(3)));
        assert_eq!(ledger.cycle_id(), 2);
        assert_eq!(ledger.entries(), 0);
    }

    #[test]
    fn averages_come_from_sums() {
        let mut ledger = CycleLedger::new(None);
        ledger.open_if_needed(ts(0));
        ledger.record_entry(100.0, 1.0, 1.0, 0.1);
        ledger.record_entry(80.0, 2.0, 2.0, 0.16);
        // gross = (100 + 160) / 3, net adds 0.26 commission
        assert!((ledger.avg_entry_gross() - 260.0 / 3.0).abs() < 1e-12);
        assert!((ledger.avg_entry_net() - 260.26 / 3.0).abs() < 1e-12);
        assert!((ledger.avg_entry_commission() - 0.26 / 3.0).abs() < 1e-12);
        assert!((ledger.remaining_qty() - 3.0).abs() < 1e-12);
    }

    #[test]
    fn second_entry_resets_ladder_but_keeps_banked_pnl() {
        let mut ledger = CycleLedger::new(Some(0.02));
        ledger.open_if_needed(ts(0));
        ledger.record_entry(100.0, 1.0, 1.0, 0.0);
        let q = ledger.ladder().unwrap().levels()[0].quantity;
        assert!((q - 0.2).abs() < 1e-12);

        ledger.record_level_fill(0, fill(1, 0.2, 100.4, 0.08), 0.0);
        assert!(ledger.ladder().unwrap().levels()[0].hit);
        assert!((ledger.accumulated_pnl() - 0.08).abs() < 1e-12);

        ledger.record_entry(90.0, 1.2, 1.2, 0.0);
        let ladder = ledger.ladder().unwrap();
        assert!(ladder.levels().iter().all(|l| !l.hit));
        // remaining 0.8 + 1.2 = 2.0 -> 0.4 per level
        assert!((ladder.levels()[0].quantity - 0.4).abs() < 1e-12);
        assert!((ledger.accumulated_pnl() - 0.08).abs() < 1e-12);
        assert!(
            (ledger.sold_qty() + ledger.remaining_qty() - ledger.gross_qty_sum()).abs() < 1e-8
        );
    }

    #[test]
    fn summary_keeps_all_fills_and_notifies_strategy() {
        let mut ledger = CycleLedger::new(Some(0.02));
        let mut strategy = ScriptedStrategy::new(vec![]);
        let completions = strategy.cycle_completions();

        ledger.open_if_needed(ts(0));
        ledger.record_entry(100.0, 1.0, 1.0, 0.0);
        ledger.record_level_fill(0, fill(1, 0.2, 100.4, 0.08), 0.0);
        ledger.record_entry(90.0, 1.0, 1.0, 0.0);
        ledger.record_level_fill(0, fill(1, 0.36, 95.38, 0.5), 0.0);

        let summary = ledger.close_and_summarize(ts(9), false, None, &mut strategy);
        assert_eq!(summary.partial_exits.len(), 2);
        assert_eq!(summary.entries, 2);
        assert!(!summary.completed);
        assert!((summary.realized_pnl - 0.58).abs() < 1e-12);
        assert!((summary.sold_quantity() - 0.56).abs() < 1e-12);
        assert_eq!(completions.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(ledger.remaining_qty(), 0.0);
    }
}
