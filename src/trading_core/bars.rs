//! Bar types and the newest-first series view used by the engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::timeframe::Timeframe;

/// A closed OHLCV bar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    /// Bar open time
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    pub fn new(timestamp: DateTime<Utc>, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }

    /// High-low range
    pub fn range(&self) -> f64 {
        self.high - self.low
    }

    /// Absolute body size
    pub fn body(&self) -> f64 {
        (self.close - self.open).abs()
    }
}

/// Immutable newest-first view of closed bars for one symbol/timeframe.
///
/// Index 0 is the most recently closed bar, index 1 the bar before it, and so on.
#[derive(Debug, Clone, Default)]
pub struct BarSeries {
    bars: Vec<Bar>,
}

impl BarSeries {
    /// Build from bars already ordered newest-first
    pub fn from_newest_first(bars: Vec<Bar>) -> Self {
        Self { bars }
    }

    /// Build from bars ordered oldest-first (file/feed order)
    pub fn from_oldest_first(mut bars: Vec<Bar>) -> Self {
        bars.reverse();
        Self { bars }
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    /// Bar `i` bars ago
    pub fn get(&self, i: usize) -> Option<&Bar> {
        self.bars.get(i)
    }

    /// Most recent closed bar
    pub fn latest(&self) -> Option<&Bar> {
        self.bars.first()
    }

    pub fn as_slice(&self) -> &[Bar] {
        &self.bars
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Bar> {
        self.bars.iter()
    }

    /// Volumes in newest-first order
    pub fn volumes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.volume).collect()
    }

    /// The newest `n` bars as a new series
    pub fn window(&self, n: usize) -> BarSeries {
        let n = n.min(self.bars.len());
        BarSeries {
            bars: self.bars[..n].to_vec(),
        }
    }
}

/// Accumulates lower-timeframe bars into one higher-timeframe bar
struct BarBuilder {
    timestamp: DateTime<Utc>,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
    count: usize,
}

impl BarBuilder {
    fn new(bucket_start: DateTime<Utc>, bar: &Bar) -> Self {
        Self {
            timestamp: bucket_start,
            open: bar.open,
            high: bar.high,
            low: bar.low,
            close: bar.close,
            volume: bar.volume,
            count: 1,
        }
    }

    fn add_bar(&mut self, bar: &Bar) {
        self.high = self.high.max(bar.high);
        self.low = self.low.min(bar.low);
        self.close = bar.close;
        self.volume += bar.volume;
        self.count += 1;
    }

    fn to_bar(&self) -> Bar {
        Bar {
            timestamp: self.timestamp,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
        }
    }
}

/// Aggregate oldest-first `from` bars into `to` bars (oldest-first).
///
/// Buckets are aligned on `to` boundaries since the unix epoch, shifted by
/// [`Timeframe::bucket_offset`] so weekly bars open on Sunday. Only complete
/// buckets are emitted: the trailing bucket is dropped unless it holds all of
/// its constituent bars. Returns an empty vec if `to` is finer than `from`.
pub fn aggregate_bars(bars: &[Bar], from: Timeframe, to: Timeframe) -> Vec<Bar> {
    if to.minutes() < from.minutes() {
        return Vec::new();
    }
    if to == from {
        return bars.to_vec();
    }

    let bucket_secs = to.duration().num_seconds();
    let offset_secs = to.bucket_offset().num_seconds();
    let per_bucket = (to.minutes() / from.minutes()) as usize;

    let mut out = Vec::with_capacity(bars.len() / per_bucket.max(1) + 1);
    let mut current: Option<(i64, BarBuilder)> = None;

    for bar in bars {
        let bucket = (bar.timestamp.timestamp() - offset_secs).div_euclid(bucket_secs);
        match &mut current {
            Some((key, builder)) if *key == bucket => builder.add_bar(bar),
            _ => {
                if let Some((_, builder)) = current.take() {
                    out.push(builder.to_bar());
                }
                let start = DateTime::from_timestamp(bucket * bucket_secs + offset_secs, 0)
                    .unwrap_or(bar.timestamp);
                current = Some((bucket, BarBuilder::new(start, bar)));
            }
        }
    }

    if let Some((_, builder)) = current {
        if builder.count >= per_bucket {
            out.push(builder.to_bar());
        }
    }

    out
}
