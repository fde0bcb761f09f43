use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::models::{Candle, CandleSeries};

/// Anything that can hand the runner an oldest-first candle history.
#[async_trait]
pub trait CandleSource: Send + Sync {
    async fn load(&mut self) -> Result<CandleSeries>;
    fn describe(&self) -> String;
}

/// Cached candles on disk: a JSON array with RFC 3339 timestamps.
pub struct JsonFileSource {
    path: PathBuf,
}

impl JsonFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl CandleSource for JsonFileSource {
    async fn load(&mut self) -> Result<CandleSeries> {
        info!("Loading candles from {}", self.path.display());
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("reading {}", self.path.display()))?;
        let candles: Vec<Candle> = serde_json::from_str(&content)
            .with_context(|| format!("parsing candles in {}", self.path.display()))?;

        let raw = candles.len();
        let mut series = CandleSeries::new(candles);
        series.normalize();
        if series.len() != raw {
            warn!("  Dropped {} duplicate candles", raw - series.len());
        }
        if series.is_empty() {
            bail!("{} holds no candles", self.path.display());
        }
        info!("  Loaded {} candles", series.len());
        Ok(series)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Seeded random walk. Same seed, same candles.
#[derive(Debug, Clone)]
pub struct SyntheticCandles {
    pub seed: u64,
    pub bars: usize,
    pub start_price: f64,
    pub start_time: DateTime<Utc>,
    pub interval: Duration,
    /// Per-bar standard move as a fraction of price.
    pub volatility: f64,
    /// Per-bar mean move as a fraction of price.
    pub drift: f64,
}

impl SyntheticCandles {
    pub fn new(seed: u64, bars: usize) -> Self {
        Self {
            seed,
            bars,
            start_price: 100.0,
            start_time: DateTime::<Utc>::UNIX_EPOCH + Duration::days(19_723),
            interval: Duration::minutes(5),
            volatility: 0.004,
            drift: 0.0,
        }
    }

    pub fn generate(&self) -> Vec<Candle> {
        let mut rng = XorShift64::new(self.seed);
        let mut candles = Vec::with_capacity(self.bars);
        let mut price = self.start_price;

        for i in 0..self.bars {
            let open = price;
            let step = self.drift + self.volatility * rng.next_signed();
            let close = (open * (1.0 + step)).max(open * 0.5);
            let wick_up = self.volatility * rng.next_unit() * 0.5;
            let wick_down = self.volatility * rng.next_unit() * 0.5;
            candles.push(Candle {
                timestamp: self.start_time + self.interval * i as i32,
                open,
                high: open.max(close) * (1.0 + wick_up),
                low: open.min(close) * (1.0 - wick_down),
                close,
                volume: 10.0 + 90.0 * rng.next_unit(),
            });
            price = close;
        }
        candles
    }
}

#[async_trait]
impl CandleSource for SyntheticCandles {
    async fn load(&mut self) -> Result<CandleSeries> {
        info!(
            "Generating {} synthetic candles (seed {})",
            self.bars, self.seed
        );
        Ok(CandleSeries::new(self.generate()))
    }

    fn describe(&self) -> String {
        format!("synthetic(seed={}, bars={})", self.seed, self.bars)
    }
}

/// xorshift64*: small, deterministic, no global state.
struct XorShift64(u64);

impl XorShift64 {
    fn new(seed: u64) -> Self {
        // Zero is a fixed point
        Self(if seed == 0 { 0x9E37_79B9_7F4A_7C15 } else { seed })
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.0 = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    /// Uniform in [0, 1).
    fn next_unit(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Uniform in [-1, 1).
    fn next_signed(&mut self) -> f64 {
        self.next_unit() * 2.0 - 1.0
    }
}

/// `<data_dir>/<SYMBOL>_<start>_to_<end>.json`, day-rounded so reruns hit
/// the same file.
pub fn cache_path(data_dir: &str, symbol: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> PathBuf {
    Path::new(data_dir).join(format!(
        "{}_{}_to_{}.json",
        symbol,
        start.format("%Y%m%d"),
        end.format("%Y%m%d")
    ))
}

pub async fn save_candles(path: &Path, candles: &[Candle]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let json = serde_json::to_string(candles)?;
    tokio::fs::write(path, json)
        .await
        .with_context(|| format!("writing {}", path.display()))?;
    info!("  Cached {} candles to {}", candles.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_is_deterministic_per_seed() {
        let a = SyntheticCandles::new(42, 200).generate();
        let b = SyntheticCandles::new(42, 200).generate();
        let c = SyntheticCandles::new(43, 200).generate();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn synthetic_candles_are_well_formed() {
        let candles = SyntheticCandles::new(7, 500).generate();
        assert_eq!(candles.len(), 500);
        for w in candles.windows(2) {
            assert!(w[0].timestamp < w[1].timestamp);
            assert!((w[1].open - w[0].close).abs() < 1e-12);
        }
        for c in &candles {
            assert!(c.high >= c.open.max(c.close));
            assert!(c.low <= c.open.min(c.close));
            assert!(c.low > 0.0);
        }
    }

    #[test]
    fn cache_path_layout() {
        let start = DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let end = start + Duration::days(30);
        let p = cache_path("data", "BTC-USD", start, end);
        assert_eq!(p, Path::new("data").join("BTC-USD_20240101_to_20240131.json"));
    }

    #[tokio::test]
    async fn json_file_round_trip_sorts_and_dedups() {
        let mut candles = SyntheticCandles::new(1, 5).generate();
        candles.reverse();
        candles.push(candles[0].clone());

        let dir = std::env::temp_dir().join(format!("dca_bt_{}", std::process::id()));
        let path = dir.join("candles.json");
        save_candles(&path, &candles).await.unwrap();

        let mut source = JsonFileSource::new(&path);
        let series = source.load().await.unwrap();
        assert_eq!(series.len(), 5);
        let v = series.as_slice();
        assert!(v.windows(2).all(|w| w[0].timestamp < w[1].timestamp));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let mut source = JsonFileSource::new("/nonexistent/candles.json");
        assert!(source.load().await.is_err());
    }
}
