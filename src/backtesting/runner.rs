use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::config::{Config, ConfigError};
use crate::models::{Candle, CycleSummary, PartialExit, TpProvenance, TpStrategyTag, Trade, TradeKind};
use crate::strategies::{Action, HedgeParameters, Strategy, TradeDecision};
use crate::trading::{CycleLedger, DynamicTpResolver, TpLadder, TpMode, TpResolution, QTY_EPSILON};

use super::aggregator::{aggregate, RunOutput};
use super::equity::EquityTracker;
use super::report::BacktestResults;

/// Replays candles bar by bar through one strategy, building and exiting
/// DCA cycles.
///
/// Each runner owns all of its state; build one per backtest.
pub struct BacktestRunner {
    config: Config,
    strategy: Box<dyn Strategy>,
    mode: TpMode,
    dynamic_enabled: bool,
    ledger: CycleLedger,
    resolver: DynamicTpResolver,
    equity: EquityTracker,
    hedge: Option<HedgeParameters>,

    balance: f64,
    position: f64,
    trades: Vec<Trade>,
    cycles: Vec<CycleSummary>,
    /// Entry rows still waiting for the single TP exit.
    open_entries: Vec<usize>,
    next_trade_id: u64,
    last_target: Option<f64>,
    last_candle: Option<Candle>,
    first_time: Option<DateTime<Utc>>,
    total_bars: usize,

    // Counters
    buy_volume: f64,
    sell_volume: f64,
    commission_paid: f64,
    decision_errors: usize,
    rejected_entries: usize,
}

impl BacktestRunner {
    pub fn new(config: Config, strategy: Box<dyn Strategy>) -> Result<Self, ConfigError> {
        config.validate()?;

        let dynamic_enabled = strategy.is_dynamic_tp_enabled();
        let mode = config.tp_mode(dynamic_enabled);
        let ladder_base = match mode {
            TpMode::FiveLevelLadder { base_percent } => Some(base_percent),
            _ => None,
        };
        let hedge = strategy.hedge_provider().map(|p| p.hedge_parameters());

        Ok(Self {
            ledger: CycleLedger::new(ladder_base),
            resolver: DynamicTpResolver::new(),
            equity: EquityTracker::new(config.initial_balance, config.equity_sample_threshold),
            balance: config.initial_balance,
            config,
            strategy,
            mode,
            dynamic_enabled,
            hedge,
            position: 0.0,
            trades: Vec::new(),
            cycles: Vec::new(),
            open_entries: Vec::new(),
            next_trade_id: 1,
            last_target: None,
            last_candle: None,
            first_time: None,
            total_bars: 0,
            buy_volume: 0.0,
            sell_volume: 0.0,
            commission_paid: 0.0,
            decision_errors: 0,
            rejected_entries: 0,
        })
    }

    /// Run the whole series and return the aggregated results.
    pub fn run(mut self, candles: &[Candle]) -> BacktestResults {
        let total = candles.len();
        let log_interval = total / 20; // ~20 progress updates

        info!("=== BACKTEST START ===");
        info!(
            "Strategy: {} | Mode: {:?} | Bars: {}",
            self.strategy.name(),
            self.mode,
            total
        );
        if let (Some(first), Some(last)) = (candles.first(), candles.last()) {
            info!(
                "Period: {} to {}",
                first.timestamp.format("%Y-%m-%d %H:%M"),
                last.timestamp.format("%Y-%m-%d %H:%M")
            );
        }
        info!("Initial balance: ${:.2}", self.config.initial_balance);
        if let Some(h) = &self.hedge {
            info!(
                "Hedge capability: ratio={:.2} trigger={:.2}% max=${:.2}",
                h.hedge_ratio,
                h.hedge_trigger_pct * 100.0,
                h.max_hedge_notional
            );
        }

        self.equity.prepare(total);
        for i in 0..total {
            self.process_bar(candles, i);

            if log_interval > 0 && (i + 1) % log_interval == 0 {
                let pct = (i + 1) as f64 / total as f64 * 100.0;
                info!(
                    "  Progress: {:.0}% | {} | Balance: ${:.2} | Position: {:.6} | Trades: {} | Cycles: {}",
                    pct,
                    candles[i].timestamp.format("%Y-%m-%d %H:%M"),
                    self.balance,
                    self.position,
                    self.trades.len(),
                    self.cycles.len(),
                );
            }
        }

        self.finalize();
        info!("=== BACKTEST COMPLETE ===");

        self.into_results()
    }

    /// Process bar `index` of `candles`: decision, entry, TP checks, then
    /// equity bookkeeping.
    pub fn process_bar(&mut self, candles: &[Candle], index: usize) {
        let Some(candle) = candles.get(index) else {
            return;
        };
        let start = (index + 1).saturating_sub(self.config.window_size);
        let window = &candles[start..=index];

        if self.first_time.is_none() {
            self.first_time = Some(candle.timestamp);
        }
        self.total_bars = self.total_bars.max(candles.len());

        let decision = match self.strategy.decide(window) {
            Ok(d) => d,
            Err(e) => {
                self.decision_errors += 1;
                warn!(
                    "[BT {}] strategy error treated as hold: {}",
                    candle.timestamp.format("%m-%d %H:%M"),
                    e
                );
                TradeDecision::hold("strategy error")
            }
        };

        // One TP resolution per bar, shared by entry provenance and exits
        let mut resolution = None;
        match decision.action {
            Action::Buy => resolution = self.try_enter(candle, window, &decision),
            Action::Sell => debug!(
                "[BT {}] sell decision ignored: exits are TP-driven",
                candle.timestamp.format("%m-%d %H:%M")
            ),
            Action::Hold => {}
        }

        if self.ledger.is_open() && self.position > QTY_EPSILON {
            let resolution = match resolution {
                Some(r) => r,
                None => self.resolve_tp(candle, window, self.dynamic_enabled),
            };
            if self.mode.is_ladder() {
                self.check_ladder(candle, resolution.percent);
            } else {
                self.check_single_tp(candle, &resolution);
            }
        }

        self.equity.record(
            index,
            self.total_bars,
            candle,
            self.balance,
            self.position,
            self.ledger.is_open(),
        );
        self.last_candle = Some(candle.clone());
    }

    /// Returns the bar's TP resolution when the entry went through.
    fn try_enter(
        &mut self,
        candle: &Candle,
        window: &[Candle],
        decision: &TradeDecision,
    ) -> Option<TpResolution> {
        let price = candle.close;
        if !(price.is_finite() && price > 0.0 && decision.amount.is_finite() && decision.amount > 0.0)
        {
            return None;
        }

        let mut quantity = decision.amount / price;
        let mut notional = decision.amount;
        let lot = self.config.min_order_qty;
        if lot > 0.0 {
            let steps = (quantity / lot).round().max(1.0);
            quantity = steps * lot;
            notional = quantity * price;
        }
        let commission = notional * self.config.commission_rate;

        if self.balance < notional + commission {
            self.rejected_entries += 1;
            debug!(
                "[BT {}] entry skipped: need ${:.2}, have ${:.2}",
                candle.timestamp.format("%m-%d %H:%M"),
                notional + commission,
                self.balance
            );
            return None;
        }

        self.balance -= notional + commission;
        self.position += quantity;
        self.buy_volume += notional;
        self.commission_paid += commission;

        self.ledger.open_if_needed(candle.timestamp);
        self.ledger.record_entry(price, quantity, quantity, commission);

        let resolution = self.resolve_tp(candle, window, self.dynamic_enabled);
        let tp = self.dynamic_enabled.then(|| provenance(&resolution));

        let id = self.next_id();
        self.trades.push(Trade {
            id,
            cycle_id: self.ledger.cycle_id(),
            kind: TradeKind::Entry,
            level: None,
            entry_time: candle.timestamp,
            entry_price: price,
            exit_time: None,
            exit_price: None,
            quantity,
            commission,
            pnl: 0.0,
            tp,
        });
        if !self.mode.is_ladder() {
            self.open_entries.push(self.trades.len() - 1);
        }

        debug!(
            "[BT {}] BUY #{} cycle {} entry {} qty {:.6} @ {:.4} ({}) avg {:.4}",
            candle.timestamp.format("%m-%d %H:%M"),
            id,
            self.ledger.cycle_id(),
            self.ledger.entries(),
            quantity,
            price,
            decision.reason,
            self.ledger.avg_entry_net(),
        );
        self.strategy.on_entry_filled(price, quantity);
        Some(resolution)
    }

    fn resolve_tp(&mut self, candle: &Candle, window: &[Candle], dynamic: bool) -> TpResolution {
        let resolution = self.resolver.resolve(
            self.strategy.as_ref(),
            candle,
            window,
            self.ledger.avg_entry_net(),
            self.mode.base_percent(),
            dynamic,
        );
        if let Some(e) = &resolution.fallback {
            warn!(
                "[BT {}] dynamic TP failed, using fixed {:.2}%: {}",
                candle.timestamp.format("%m-%d %H:%M"),
                resolution.percent * 100.0,
                e
            );
        }
        resolution
    }

    fn check_single_tp(&mut self, candle: &Candle, resolution: &TpResolution) {
        // Fixed TP of 0 means no target at all
        if resolution.percent <= 0.0 {
            return;
        }

        let target = resolution.target;
        self.last_target = Some(target);
        if candle.high < target {
            return;
        }

        let (qty, pnl) = self.close_open_entries(candle.timestamp, target, self.config.commission_rate);
        debug!(
            "[BT {}] TP hit: sold {:.6} @ {:.4} PnL ${:+.4}",
            candle.timestamp.format("%m-%d %H:%M"),
            qty,
            target,
            pnl
        );
        self.close_cycle(candle.timestamp, true, Some(target));
    }

    /// Sell the whole position at `price`, splitting the exit commission
    /// across the open entry rows by quantity.
    fn close_open_entries(&mut self, time: DateTime<Utc>, price: f64, commission_rate: f64) -> (f64, f64) {
        let qty = self.position;
        let proceeds = qty * price;
        let exit_commission = proceeds * commission_rate;
        let open_qty: f64 = self.open_entries.iter().map(|&i| self.trades[i].quantity).sum();

        let mut pnl_sum = 0.0;
        for idx in self.open_entries.drain(..) {
            let trade = &mut self.trades[idx];
            let share = if open_qty > 0.0 {
                trade.quantity / open_qty
            } else {
                0.0
            };
            trade.commission += exit_commission * share;
            trade.exit_time = Some(time);
            trade.exit_price = Some(price);
            trade.pnl = (price - trade.entry_price) * trade.quantity - trade.commission;
            pnl_sum += trade.pnl;
        }

        self.balance += proceeds - exit_commission;
        self.position = 0.0;
        self.sell_volume += proceeds;
        self.commission_paid += exit_commission;
        self.ledger.record_exit(qty, pnl_sum, exit_commission);
        (qty, pnl_sum)
    }

    /// `base_percent` is the bar's resolved TP percent: the fixed one, or
    /// the strategy's when dynamic TP is on.
    fn check_ladder(&mut self, candle: &Candle, base_percent: f64) {
        let avg_net = self.ledger.avg_entry_net();
        let Some(ladder) = self.ledger.ladder() else {
            return;
        };
        let pending: Vec<(usize, f64, f64)> = ladder
            .unhit_levels()
            .into_iter()
            .map(|i| {
                let target = TpLadder::level_target(i, avg_net, base_percent);
                (i, target, ladder.levels()[i].quantity)
            })
            .collect();

        let last_pending = pending.len().saturating_sub(1);
        for (n, (index, target, allocated)) in pending.into_iter().enumerate() {
            // Targets rise with the level
            if candle.high < target {
                break;
            }
            let remaining = self.ledger.remaining_qty();
            let qty = if n == last_pending {
                remaining
            } else {
                allocated.min(remaining)
            };
            if qty <= QTY_EPSILON {
                continue;
            }
            self.fire_level(candle.timestamp, index, target, qty);
        }

        if self.ledger.is_cycle_complete() {
            self.position = 0.0;
            self.close_cycle(candle.timestamp, true, None);
        }
    }

    fn fire_level(&mut self, time: DateTime<Utc>, index: usize, target: f64, qty: f64) {
        let proceeds = qty * target;
        let exit_commission = proceeds * self.config.commission_rate;
        let cost_per_unit = self.ledger.avg_entry_gross();
        let entry_commission = qty * self.ledger.avg_entry_commission();
        let commission = exit_commission + entry_commission;
        let pnl = proceeds - qty * cost_per_unit - commission;
        let level = (index + 1) as u8;

        self.balance += proceeds - exit_commission;
        self.position -= qty;
        self.sell_volume += proceeds;
        self.commission_paid += exit_commission;

        let id = self.next_id();
        self.trades.push(Trade {
            id,
            cycle_id: self.ledger.cycle_id(),
            kind: TradeKind::LevelExit,
            level: Some(level),
            entry_time: time,
            entry_price: cost_per_unit,
            exit_time: Some(time),
            exit_price: Some(target),
            quantity: qty,
            commission,
            pnl,
            tp: None,
        });
        self.ledger.record_level_fill(
            index,
            PartialExit {
                level,
                quantity: qty,
                price: target,
                timestamp: time,
                pnl,
                commission,
            },
            exit_commission,
        );

        debug!(
            "[BT {}] TP{} hit: sold {:.6} @ {:.4} PnL ${:+.4} remaining {:.6}",
            time.format("%m-%d %H:%M"),
            level,
            qty,
            target,
            pnl,
            self.ledger.remaining_qty()
        );
    }

    fn close_cycle(&mut self, time: DateTime<Utc>, completed: bool, target: Option<f64>) {
        let summary =
            self.ledger
                .close_and_summarize(time, completed, target, self.strategy.as_mut());
        self.cycles.push(summary);
        self.equity.on_cycle_close();
        self.last_target = None;
    }

    /// Close out whatever is still held at the last seen close. Safe to call
    /// more than once; later calls find nothing open.
    pub fn finalize(&mut self) {
        let Some(last) = self.last_candle.clone() else {
            return;
        };
        if !self.ledger.is_open() {
            return;
        }

        let time = last.timestamp;
        let price = last.close;
        if self.position > QTY_EPSILON {
            if self.mode.is_ladder() {
                self.mark_to_market(time, price);
            } else {
                let (qty, pnl) = self.close_open_entries(time, price, 0.0);
                debug!(
                    "[BT {}] end of data: force-closed {:.6} @ {:.4} PnL ${:+.4}",
                    time.format("%m-%d %H:%M"),
                    qty,
                    price,
                    pnl
                );
            }
        }

        let target = if self.mode.is_ladder() {
            None
        } else {
            self.last_target
        };
        self.close_cycle(time, false, target);
    }

    fn mark_to_market(&mut self, time: DateTime<Utc>, price: f64) {
        let qty = self.ledger.remaining_qty().max(0.0);
        let cost_per_unit = self.ledger.avg_entry_gross();
        let entry_commission = qty * self.ledger.avg_entry_commission();
        let proceeds = qty * price;
        let pnl = proceeds - qty * cost_per_unit - entry_commission;

        self.balance += proceeds;
        self.position = 0.0;
        self.sell_volume += proceeds;

        let id = self.next_id();
        self.trades.push(Trade {
            id,
            cycle_id: self.ledger.cycle_id(),
            kind: TradeKind::MarkToMarket,
            level: None,
            entry_time: time,
            entry_price: cost_per_unit,
            exit_time: Some(time),
            exit_price: Some(price),
            quantity: qty,
            commission: entry_commission,
            pnl,
            tp: None,
        });
        self.ledger.record_exit(qty, pnl, 0.0);

        debug!(
            "[BT {}] end of data: marked {:.6} @ {:.4} PnL ${:+.4}",
            time.format("%m-%d %H:%M"),
            qty,
            price,
            pnl
        );
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_trade_id;
        self.next_trade_id += 1;
        id
    }

    pub fn into_results(mut self) -> BacktestResults {
        let end_time = self.last_candle.as_ref().map(|c| c.timestamp);
        aggregate(RunOutput {
            strategy_name: self.strategy.name().to_string(),
            symbol: self.config.symbol.clone(),
            mode: self.mode,
            start_balance: self.config.initial_balance,
            end_balance: self.balance,
            start_time: self.first_time,
            end_time,
            trades: self.trades,
            cycles: self.cycles,
            equity: self.equity.into_stats(),
            dynamic_tp_records: self.resolver.take_records(),
            tp_fallbacks: self.resolver.fallbacks(),
            buy_volume: self.buy_volume,
            sell_volume: self.sell_volume,
            commission_paid: self.commission_paid,
            decision_errors: self.decision_errors,
            rejected_entries: self.rejected_entries,
            hedge: self.hedge,
        })
    }

    pub fn balance(&self) -> f64 {
        self.balance
    }

    pub fn position(&self) -> f64 {
        self.position
    }

    pub fn max_drawdown(&self) -> f64 {
        self.equity.max_drawdown()
    }

    pub fn trades(&self) -> &[Trade] {
        &self.trades
    }

    pub fn cycles(&self) -> &[CycleSummary] {
        &self.cycles
    }

    pub fn ledger(&self) -> &CycleLedger {
        &self.ledger
    }

    pub fn mode(&self) -> TpMode {
        self.mode
    }
}

fn provenance(resolution: &TpResolution) -> TpProvenance {
    match &resolution.record {
        Some(r) => TpProvenance {
            tp_percent: r.calculated_percent,
            strategy: r.strategy,
            market_volatility: r.market_volatility,
            signal_strength: r.signal_strength,
        },
        None => TpProvenance {
            tp_percent: resolution.percent,
            strategy: TpStrategyTag::Fixed,
            market_volatility: 0.0,
            signal_strength: 0.0,
        },
    }
}
