//! Market data provider seam
//!
//! The engine pulls bars, volumes, ATR and position state through
//! [`MarketData`]. [`BarFeed`] is the in-memory provider used by replays and
//! the event loop: it is fed one closed bar at a time and serves coarser
//! timeframes by aggregation.

use std::collections::VecDeque;

use super::bars::{aggregate_bars, Bar, BarSeries};
use super::error::DataError;
use super::indicators;
use super::timeframe::Timeframe;

/// Provider of bars and account state for one or more symbols
pub trait MarketData {
    /// Up to `count` closed bars, newest first
    fn bars(&self, symbol: &str, timeframe: Timeframe, count: usize) -> Result<BarSeries, DataError>;

    /// Volumes of the same bars, newest first
    fn volumes(&self, symbol: &str, timeframe: Timeframe, count: usize) -> Result<Vec<f64>, DataError> {
        Ok(self.bars(symbol, timeframe, count)?.volumes())
    }

    /// ATR in price units
    fn atr(&self, symbol: &str, timeframe: Timeframe, period: usize) -> Result<f64, DataError>;

    fn has_open_position(&self, symbol: &str) -> bool;
}

/// Rolling window of closed bars for one symbol
#[derive(Debug, Clone)]
pub struct BarFeed {
    symbol: String,
    timeframe: Timeframe,
    capacity: usize,
    /// Newest at the front
    bars: VecDeque<Bar>,
    bar_index: u64,
    open_position: bool,
}

impl BarFeed {
    pub fn new(symbol: &str, timeframe: Timeframe, capacity: usize) -> Self {
        Self {
            symbol: symbol.to_string(),
            timeframe,
            capacity: capacity.max(1),
            bars: VecDeque::with_capacity(capacity.max(1)),
            bar_index: 0,
            open_position: false,
        }
    }

    /// Append a closed bar and return its bar index (first bar is 1)
    pub fn push_bar(&mut self, bar: Bar) -> u64 {
        self.bars.push_front(bar);
        self.bars.truncate(self.capacity);
        self.bar_index += 1;
        self.bar_index
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    pub fn bar_index(&self) -> u64 {
        self.bar_index
    }

    pub fn latest(&self) -> Option<&Bar> {
        self.bars.front()
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    /// Paper position flag, set by whoever simulates execution
    pub fn set_open_position(&mut self, open: bool) {
        self.open_position = open;
    }

    fn check_symbol(&self, symbol: &str) -> Result<(), DataError> {
        if symbol != self.symbol {
            return Err(DataError::Unavailable(format!(
                "feed carries {}, not {}",
                self.symbol, symbol
            )));
        }
        Ok(())
    }
}

impl MarketData for BarFeed {
    fn bars(&self, symbol: &str, timeframe: Timeframe, count: usize) -> Result<BarSeries, DataError> {
        self.check_symbol(symbol)?;
        if timeframe.minutes() < self.timeframe.minutes() {
            return Err(DataError::UnsupportedTimeframe {
                base: self.timeframe,
                requested: timeframe,
            });
        }

        let bars: Vec<Bar> = if timeframe == self.timeframe {
            self.bars.iter().take(count).cloned().collect()
        } else {
            let oldest_first: Vec<Bar> = self.bars.iter().rev().cloned().collect();
            let mut agg = aggregate_bars(&oldest_first, self.timeframe, timeframe);
            agg.reverse();
            agg.truncate(count);
            agg
        };

        if bars.is_empty() {
            return Err(DataError::InsufficientBars {
                needed: count,
                available: 0,
            });
        }
        Ok(BarSeries::from_newest_first(bars))
    }

    fn atr(&self, symbol: &str, timeframe: Timeframe, period: usize) -> Result<f64, DataError> {
        let series = self.bars(symbol, timeframe, self.capacity)?;
        indicators::atr(&series, period).ok_or(DataError::InsufficientBars {
            needed: period + 1,
            available: series.len(),
        })
    }

    fn has_open_position(&self, symbol: &str) -> bool {
        self.open_position && symbol == self.symbol
    }
}
