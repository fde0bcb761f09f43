use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::QTY_EPSILON;

pub const TP_LEVEL_COUNT: usize = 5;

/// Share of the remaining quantity each level sells.
const LEVEL_SHARE: f64 = 0.20;

/// Fraction of the base TP percent each level targets (20/40/60/80/100%).
/// Used both for the stored level percent and for fire-time targets.
const LEVEL_MULTIPLIERS: [f64; TP_LEVEL_COUNT] = [0.2, 0.4, 0.6, 0.8, 1.0];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TpLevel {
    /// 1-based.
    pub level: u8,
    /// Fraction above average entry.
    pub percent: f64,
    /// Absolute quantity this level sells when it fires.
    pub quantity: f64,
    pub hit: bool,
    pub hit_time: Option<DateTime<Utc>>,
    pub hit_price: Option<f64>,
    pub sold_qty: f64,
    pub pnl: f64,
    pub commission: f64,
}

impl TpLevel {
    fn clear_hit(&mut self) {
        self.hit = false;
        self.hit_time = None;
        self.hit_price = None;
        self.sold_qty = 0.0;
        self.pnl = 0.0;
        self.commission = 0.0;
    }
}

/// Five-level progressive take-profit schedule for the open cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TpLadder {
    base_percent: f64,
    levels: Vec<TpLevel>,
}

impl TpLadder {
    pub fn new(base_percent: f64) -> Self {
        let mut ladder = Self {
            base_percent,
            levels: Vec::with_capacity(TP_LEVEL_COUNT),
        };
        ladder.initialize_levels(base_percent);
        ladder
    }

    /// Fresh schedule for a new cycle. Quantities stay zero until the first
    /// allocation.
    pub fn initialize_levels(&mut self, base_percent: f64) {
        self.base_percent = base_percent;
        self.levels = LEVEL_MULTIPLIERS
            .iter()
            .enumerate()
            .map(|(i, m)| TpLevel {
                level: (i + 1) as u8,
                percent: base_percent * m,
                ..TpLevel::default()
            })
            .collect();
    }

    /// Give every level 20% of `remaining_qty`, scaled down if rounding
    /// would push the total past `remaining_qty`.
    pub fn allocate_quantities(&mut self, remaining_qty: f64) {
        let remaining = remaining_qty.max(0.0);
        let per_level = remaining * LEVEL_SHARE;
        for level in &mut self.levels {
            level.quantity = per_level;
        }

        let total: f64 = self.levels.iter().map(|l| l.quantity).sum();
        if total > remaining && total > 0.0 {
            let scale = remaining / total;
            for level in &mut self.levels {
                level.quantity *= scale;
            }
        }
    }

    /// A DCA entry enlarged the open cycle: restart from level 1 against the
    /// new remaining quantity. Fills already booked are not reversed.
    pub fn on_new_entry(&mut self, remaining_qty: f64) {
        for level in &mut self.levels {
            level.clear_hit();
        }
        self.allocate_quantities(remaining_qty);
    }

    /// Target price for level `index` (0-based).
    pub fn level_target(index: usize, avg_entry: f64, base_percent: f64) -> f64 {
        let multiplier = LEVEL_MULTIPLIERS
            .get(index)
            .copied()
            .unwrap_or(LEVEL_MULTIPLIERS[TP_LEVEL_COUNT - 1]);
        avg_entry * (1.0 + multiplier * base_percent)
    }

    pub fn target_for(&self, index: usize, avg_entry: f64) -> f64 {
        Self::level_target(index, avg_entry, self.base_percent)
    }

    /// Done when nothing is left to sell, regardless of how many levels
    /// show as hit.
    pub fn is_cycle_complete(remaining_qty: f64) -> bool {
        remaining_qty <= QTY_EPSILON
    }

    /// Indices of levels that have not fired, lowest first.
    pub fn unhit_levels(&self) -> Vec<usize> {
        self.levels
            .iter()
            .enumerate()
            .filter(|(_, l)| !l.hit)
            .map(|(i, _)| i)
            .collect()
    }

    pub fn mark_hit(
        &mut self,
        index: usize,
        time: DateTime<Utc>,
        price: f64,
        sold_qty: f64,
        pnl: f64,
        commission: f64,
    ) {
        if let Some(level) = self.levels.get_mut(index) {
            level.hit = true;
            level.hit_time = Some(time);
            level.hit_price = Some(price);
            level.sold_qty = sold_qty;
            level.pnl = pnl;
            level.commission = commission;
        }
    }

    pub fn levels(&self) -> &[TpLevel] {
        &self.levels
    }

    pub fn base_percent(&self) -> f64 {
        self.base_percent
    }

    pub fn allocated_total(&self) -> f64 {
        self.levels.iter().map(|l| l.quantity).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn initialize_sets_progressive_percents() {
        let ladder = TpLadder::new(0.05);
        let pcts: Vec<f64> = ladder.levels().iter().map(|l| l.percent).collect();
        let expected = [0.01, 0.02, 0.03, 0.04, 0.05];
        for (p, e) in pcts.iter().zip(expected) {
            assert!((p - e).abs() < 1e-12);
        }
        assert!(ladder.levels().iter().all(|l| l.quantity == 0.0 && !l.hit));
        assert_eq!(ladder.levels()[0].level, 1);
        assert_eq!(ladder.levels()[4].level, 5);
    }

    #[test]
    fn allocation_never_exceeds_remaining() {
        let mut ladder = TpLadder::new(0.02);
        for q in [1.0, 0.3, 1e-7, 123.456789, 0.1 + 0.2, 7.0 / 3.0] {
            ladder.allocate_quantities(q);
            assert!(ladder.allocated_total() <= q + 1e-8, "q={q}");
            assert!((ladder.levels()[0].quantity - q * 0.2).abs() < 1e-12);
        }
    }

    #[test]
    fn allocation_of_negative_remaining_is_zero() {
        let mut ladder = TpLadder::new(0.02);
        ladder.allocate_quantities(-1.0);
        assert_eq!(ladder.allocated_total(), 0.0);
    }

    #[test]
    fn level_targets_match_stored_percents() {
        let ladder = TpLadder::new(0.05);
        for (i, level) in ladder.levels().iter().enumerate() {
            let target = ladder.target_for(i, 100.0);
            assert!((target - 100.0 * (1.0 + level.percent)).abs() < 1e-9);
        }
        assert!((TpLadder::level_target(4, 200.0, 0.05) - 210.0).abs() < 1e-9);
    }

    #[test]
    fn new_entry_clears_hits_and_reallocates() {
        let mut ladder = TpLadder::new(0.02);
        ladder.allocate_quantities(1.0);
        ladder.mark_hit(0, Utc::now(), 100.4, 0.2, 0.08, 0.0);
        ladder.mark_hit(1, Utc::now(), 100.8, 0.2, 0.16, 0.0);
        assert_eq!(ladder.unhit_levels(), vec![2, 3, 4]);

        ladder.on_new_entry(2.6);
        assert_eq!(ladder.unhit_levels(), vec![0, 1, 2, 3, 4]);
        let first = &ladder.levels()[0];
        assert!(first.hit_time.is_none() && first.hit_price.is_none());
        assert_eq!(first.pnl, 0.0);
        assert!((first.quantity - 0.52).abs() < 1e-12);
    }

    #[test]
    fn completion_follows_remaining_not_hits() {
        let ladder = TpLadder::new(0.02);
        assert!(ladder.unhit_levels().len() == 5);
        assert!(TpLadder::is_cycle_complete(0.0));
        assert!(TpLadder::is_cycle_complete(5e-9));
        assert!(!TpLadder::is_cycle_complete(1e-6));
    }
}
