use chrono::{DateTime, Duration, Utc};
use dca_cycle_backtester::config::Config;
use dca_cycle_backtester::models::Candle;

fn base_time() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2024-01-15T12:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

/// Candle closing at `close`, opened at `open`, with half a point of wick.
fn bar(i: usize, open: f64, close: f64) -> Candle {
    Candle {
        timestamp: base_time() + Duration::minutes(i as i64),
        open,
        high: open.max(close) + 0.5,
        low: open.min(close) - 0.5,
        close,
        volume: 100.0,
    }
}

/// Closes step down one point per bar from `start` to `bottom`, then up to
/// `end`.
pub fn make_v_shape(start: f64, bottom: f64, end: f64) -> Vec<Candle> {
    let mut closes = Vec::new();
    let mut p = start;
    while p > bottom {
        closes.push(p);
        p -= 1.0;
    }
    while p <= end {
        closes.push(p);
        p += 1.0;
    }

    let mut prev = start;
    closes
        .into_iter()
        .enumerate()
        .map(|(i, c)| {
            let candle = bar(i, prev, c);
            prev = c;
            candle
        })
        .collect()
}

/// 1000 balance, 0.1% fees, 2% TP, DCA 100 base / 5% drop / 1.5x.
pub fn test_config() -> Config {
    let mut cfg = Config::default();
    cfg.initial_balance = 1000.0;
    cfg.commission_rate = 0.001;
    cfg.tp_percent = 0.02;
    cfg.use_tp_levels = false;
    cfg.min_order_qty = 0.0;
    cfg.window_size = 20;
    cfg.dca.base_amount = 100.0;
    cfg.dca.drop_pct = 0.05;
    cfg.dca.amount_multiplier = 1.5;
    cfg.dca.max_entries = 5;
    cfg.dca.dynamic_tp = false;
    cfg
}
