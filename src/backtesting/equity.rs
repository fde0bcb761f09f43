use chrono::NaiveDate;

use crate::models::{Candle, EquityPoint};

/// Per-bar equity, drawdown and exposure bookkeeping.
#[derive(Debug, Clone)]
pub struct EquityTracker {
    start_balance: f64,
    sample_threshold: usize,
    sample_every: usize,
    points: Vec<EquityPoint>,
    peak_equity: f64,
    max_drawdown: f64,
    cycle_peak: Option<f64>,
    max_intra_cycle_drawdown: f64,
    exposure_sum: f64,
    max_exposure: f64,
    bars: usize,
    // Last equity seen on each calendar day
    daily: Vec<(NaiveDate, f64)>,
}

/// What the tracker hands to the aggregator once the run is over.
#[derive(Debug, Clone)]
pub struct EquityStats {
    pub points: Vec<EquityPoint>,
    pub max_drawdown: f64,
    pub max_intra_cycle_drawdown: f64,
    pub avg_exposure: f64,
    pub max_exposure: f64,
    pub bars: usize,
    pub daily_returns: Vec<f64>,
}

impl EquityTracker {
    /// `sample_threshold` of 0 disables subsampling.
    pub fn new(start_balance: f64, sample_threshold: usize) -> Self {
        Self {
            start_balance,
            sample_threshold,
            sample_every: 1,
            points: Vec::new(),
            peak_equity: start_balance,
            max_drawdown: 0.0,
            cycle_peak: None,
            max_intra_cycle_drawdown: 0.0,
            exposure_sum: 0.0,
            max_exposure: 0.0,
            bars: 0,
            daily: Vec::new(),
        }
    }

    /// Size the curve for `total_bars`: above the threshold keep roughly one
    /// point per `ceil(total / threshold)` bars.
    pub fn prepare(&mut self, total_bars: usize) {
        self.sample_every = if self.sample_threshold > 0 && total_bars > self.sample_threshold {
            total_bars.div_ceil(self.sample_threshold)
        } else {
            1
        };
        self.points
            .reserve(total_bars.div_ceil(self.sample_every).saturating_add(1));
    }

    pub fn record(
        &mut self,
        index: usize,
        total_bars: usize,
        candle: &Candle,
        balance: f64,
        position: f64,
        cycle_open: bool,
    ) {
        let position_value = position * candle.close;
        let equity = balance + position_value;

        if equity > self.peak_equity {
            self.peak_equity = equity;
        }
        if self.peak_equity > 0.0 {
            let dd = (self.peak_equity - equity) / self.peak_equity;
            self.max_drawdown = self.max_drawdown.max(dd);
        }

        if cycle_open {
            let peak = self.cycle_peak.map_or(equity, |p| p.max(equity));
            self.cycle_peak = Some(peak);
            if peak > 0.0 {
                let dd = (peak - equity) / peak;
                self.max_intra_cycle_drawdown = self.max_intra_cycle_drawdown.max(dd);
            }
        }

        let exposure = if equity > 0.0 {
            position_value / equity
        } else {
            0.0
        };
        self.exposure_sum += exposure;
        self.max_exposure = self.max_exposure.max(exposure);
        self.bars += 1;

        let day = candle.timestamp.date_naive();
        match self.daily.last_mut() {
            Some((d, v)) if *d == day => *v = equity,
            _ => self.daily.push((day, equity)),
        }

        let is_last = index + 1 == total_bars;
        if index % self.sample_every == 0 || is_last {
            self.points.push(EquityPoint {
                timestamp: candle.timestamp,
                balance,
                position,
                price: candle.close,
                equity,
                exposure,
                pnl: equity - self.start_balance,
            });
        }
    }

    /// Intra-cycle peak only lives as long as the cycle.
    pub fn on_cycle_close(&mut self) {
        self.cycle_peak = None;
    }

    pub fn max_drawdown(&self) -> f64 {
        self.max_drawdown
    }

    pub fn max_intra_cycle_drawdown(&self) -> f64 {
        self.max_intra_cycle_drawdown
    }

    pub fn peak_equity(&self) -> f64 {
        self.peak_equity
    }

    pub fn points(&self) -> &[EquityPoint] {
        &self.points
    }

    pub fn into_stats(self) -> EquityStats {
        let mut daily_values = Vec::with_capacity(self.daily.len() + 1);
        daily_values.push(self.start_balance);
        daily_values.extend(self.daily.iter().map(|(_, v)| *v));

        let daily_returns = daily_values
            .windows(2)
            .filter(|w| w[0] > 0.0)
            .map(|w| (w[1] - w[0]) / w[0])
            .collect();

        EquityStats {
            avg_exposure: if self.bars > 0 {
                self.exposure_sum / self.bars as f64
            } else {
                0.0
            },
            points: self.points,
            max_drawdown: self.max_drawdown,
            max_intra_cycle_drawdown: self.max_intra_cycle_drawdown,
            max_exposure: self.max_exposure,
            bars: self.bars,
            daily_returns,
        }
    }
}
