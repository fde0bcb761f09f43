use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::config::Config;
use crate::models::{Candle, CandleSeries, TpStrategyTag};
use crate::strategies::{
    DynamicTp, HedgeParameterProvider, HedgeParameters, Strategy, StrategyError, TradeDecision,
};

fn base_time() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2024-01-15T12:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

/// Timestamp of bar `i` in helper-built series (1m spacing).
pub fn ts(i: usize) -> DateTime<Utc> {
    base_time() + Duration::minutes(i as i64)
}

/// Create candles from (open, high, low, close) tuples with auto-incrementing 1m timestamps.
pub fn make_candles(data: &[(f64, f64, f64, f64)]) -> CandleSeries {
    let candles: Vec<Candle> = data
        .iter()
        .enumerate()
        .map(|(i, &(o, h, l, c))| Candle {
            timestamp: ts(i),
            open: o,
            high: h,
            low: l,
            close: c,
            volume: 100.0,
        })
        .collect();

    CandleSeries::new(candles)
}

/// Flat candles at `price` with a +/- `wiggle` range.
pub fn make_flat(n: usize, price: f64, wiggle: f64) -> Vec<Candle> {
    (0..n)
        .map(|i| Candle {
            timestamp: ts(i),
            open: price,
            high: price + wiggle,
            low: price - wiggle,
            close: price,
            volume: 100.0,
        })
        .collect()
}

/// Zero fees, no lot size, 1000 balance, single 2% TP.
pub fn default_test_config() -> Config {
    let mut cfg = Config::default();
    cfg.initial_balance = 1000.0;
    cfg.commission_rate = 0.0;
    cfg.tp_percent = 0.02;
    cfg.min_order_qty = 0.0;
    cfg.use_tp_levels = false;
    cfg.window_size = 20;
    cfg.log_level = "ERROR".to_string();
    cfg
}

/// Strategy that buys fixed amounts on scripted bar indices (counted by
/// `decide` calls) and can be told to fail on others.
pub struct ScriptedStrategy {
    buys: HashMap<usize, f64>,
    errors: HashSet<usize>,
    calls: usize,
    dynamic: Option<Result<DynamicTp, StrategyError>>,
    hedge: Option<HedgeParameters>,
    completions: Arc<AtomicUsize>,
}

impl ScriptedStrategy {
    pub fn new(buys: Vec<(usize, f64)>) -> Self {
        Self {
            buys: buys.into_iter().collect(),
            errors: HashSet::new(),
            calls: 0,
            dynamic: None,
            hedge: None,
            completions: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_errors(mut self, bars: &[usize]) -> Self {
        self.errors.extend(bars.iter().copied());
        self
    }

    pub fn with_dynamic_tp(mut self, percent: Result<f64, StrategyError>) -> Self {
        self.dynamic = Some(percent.map(|p| DynamicTp {
            percent: p,
            strategy: TpStrategyTag::IndicatorBased,
            market_volatility: 0.01,
            signal_strength: 0.5,
            clamped: false,
        }));
        self
    }

    pub fn with_dynamic(mut self, tp: DynamicTp) -> Self {
        self.dynamic = Some(Ok(tp));
        self
    }

    pub fn with_hedge(mut self, params: HedgeParameters) -> Self {
        self.hedge = Some(params);
        self
    }

    /// Shared counter of `on_cycle_complete` calls, readable after the
    /// strategy has been boxed into a runner.
    pub fn cycle_completions(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.completions)
    }
}

impl Strategy for ScriptedStrategy {
    fn name(&self) -> &str {
        "scripted"
    }

    fn decide(&mut self, _window: &[Candle]) -> Result<TradeDecision, StrategyError> {
        let bar = self.calls;
        self.calls += 1;
        if self.errors.contains(&bar) {
            return Err(StrategyError::Other(format!("scripted failure at bar {bar}")));
        }
        Ok(match self.buys.get(&bar) {
            Some(&amount) => TradeDecision::buy(amount, format!("scripted buy at bar {bar}")),
            None => TradeDecision::hold("scripted hold"),
        })
    }

    fn is_dynamic_tp_enabled(&self) -> bool {
        self.dynamic.is_some()
    }

    fn dynamic_tp(&self, _candle: &Candle, _window: &[Candle]) -> Result<DynamicTp, StrategyError> {
        match &self.dynamic {
            Some(r) => r.clone(),
            None => Err(StrategyError::DynamicTpUnsupported),
        }
    }

    fn on_cycle_complete(&mut self) {
        self.completions.fetch_add(1, Ordering::SeqCst);
    }

    fn hedge_provider(&self) -> Option<&dyn HedgeParameterProvider> {
        if self.hedge.is_some() {
            Some(self)
        } else {
            None
        }
    }
}

impl HedgeParameterProvider for ScriptedStrategy {
    fn hedge_parameters(&self) -> HedgeParameters {
        self.hedge.clone().unwrap_or(HedgeParameters {
            hedge_ratio: 0.0,
            hedge_trigger_pct: 0.0,
            max_hedge_notional: 0.0,
        })
    }
}
