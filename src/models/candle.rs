use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    pub fn total_range(&self) -> f64 {
        self.high - self.low
    }

    /// True range against the previous close (Wilder).
    pub fn true_range(&self, prev_close: Option<f64>) -> f64 {
        match prev_close {
            Some(pc) => self
                .total_range()
                .max((self.high - pc).abs())
                .max((self.low - pc).abs()),
            None => self.total_range(),
        }
    }

    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }
}

/// Owned, oldest-first candle history. The simulation itself works on
/// borrowed slices; this wrapper is what loaders hand back.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CandleSeries {
    candles: Vec<Candle>,
}

impl CandleSeries {
    pub fn new(candles: Vec<Candle>) -> Self {
        Self { candles }
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn first(&self) -> Option<&Candle> {
        self.candles.first()
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.last()
    }

    pub fn as_slice(&self) -> &[Candle] {
        &self.candles
    }

    pub fn into_vec(self) -> Vec<Candle> {
        self.candles
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Candle> {
        self.candles.iter()
    }

    /// Sort oldest-first and drop exact duplicate timestamps.
    pub fn normalize(&mut self) {
        self.candles.sort_by_key(|c| c.timestamp);
        self.candles.dedup_by_key(|c| c.timestamp);
    }
}

impl std::ops::Index<usize> for CandleSeries {
    type Output = Candle;
    fn index(&self, index: usize) -> &Self::Output {
        &self.candles[index]
    }
}

impl IntoIterator for CandleSeries {
    type Item = Candle;
    type IntoIter = std::vec::IntoIter<Candle>;
    fn into_iter(self) -> Self::IntoIter {
        self.candles.into_iter()
    }
}

impl<'a> IntoIterator for &'a CandleSeries {
    type Item = &'a Candle;
    type IntoIter = std::slice::Iter<'a, Candle>;
    fn into_iter(self) -> Self::IntoIter {
        self.candles.iter()
    }
}

/// Mean true range over `window`, expressed as a fraction of the last close.
/// Returns `None` when there are fewer than two candles or the last close is
/// not positive.
pub fn mean_true_range_pct(window: &[Candle]) -> Option<f64> {
    if window.len() < 2 {
        return None;
    }
    let last_close = window.last()?.close;
    if last_close <= 0.0 {
        return None;
    }

    let sum: f64 = window
        .windows(2)
        .map(|pair| pair[1].true_range(Some(pair[0].close)))
        .sum();
    let mean = sum / (window.len() - 1) as f64;
    Some(mean / last_close)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::make_candles;

    fn bullish_candle() -> Candle {
        Candle {
            timestamp: Utc::now(),
            open: 100.0,
            high: 115.0,
            low: 95.0,
            close: 110.0,
            volume: 50.0,
        }
    }

    #[test]
    fn candle_range_and_direction() {
        let c = bullish_candle();
        assert!((c.total_range() - 20.0).abs() < 1e-9);
        assert!(c.is_bullish());
    }

    #[test]
    fn true_range_uses_previous_close_gap() {
        let c = bullish_candle(); // H=115, L=95
        assert!((c.true_range(None) - 20.0).abs() < 1e-9);
        // Gap up from 80: |95 - 80| = 15 < |115 - 80| = 35
        assert!((c.true_range(Some(80.0)) - 35.0).abs() < 1e-9);
        // Previous close inside the bar range leaves the range unchanged
        assert!((c.true_range(Some(100.0)) - 20.0).abs() < 1e-9);
    }

    #[test]
    fn normalize_sorts_and_dedups() {
        let s = make_candles(&[
            (100.0, 105.0, 95.0, 102.0),
            (102.0, 108.0, 100.0, 106.0),
            (106.0, 112.0, 104.0, 110.0),
        ]);
        let mut reversed: Vec<Candle> = s.as_slice().iter().rev().cloned().collect();
        reversed.push(reversed[0].clone());
        let mut series = CandleSeries::new(reversed);
        series.normalize();
        assert_eq!(series.len(), 3);
        assert!((series[0].open - 100.0).abs() < 1e-9);
        assert!((series[2].open - 106.0).abs() < 1e-9);
    }

    #[test]
    fn mean_true_range_pct_needs_two_candles() {
        let s = make_candles(&[(100.0, 101.0, 99.0, 100.0)]);
        assert!(mean_true_range_pct(s.as_slice()).is_none());

        let s = make_candles(&[
            (100.0, 101.0, 99.0, 100.0),
            (100.0, 102.0, 98.0, 100.0),
            (100.0, 102.0, 98.0, 100.0),
        ]);
        // Each later bar has TR = 4 against close 100 -> 4%
        let pct = mean_true_range_pct(s.as_slice()).unwrap();
        assert!((pct - 0.04).abs() < 1e-12);
    }
}
