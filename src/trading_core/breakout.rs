//! Breakout validation
//!
//! A breakout is a fresh close beyond a level: the newest `confirmation_bars`
//! closes sit beyond `level ± epsilon` and the bar before them does not.
//! Filters are composable predicates; each one that is enabled must pass.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::bars::BarSeries;
use super::config::EngineConfig;
use super::indicators::mean_volume;
use super::levels::PriceLevel;

/// Everything a filter may look at for one candidate breakout
#[derive(Debug, Clone, Copy)]
pub struct BreakoutContext<'a> {
    pub level_price: f64,
    pub is_bullish: bool,
    /// Close of the newest bar
    pub close: f64,
    /// |close - level|
    pub distance: f64,
    /// Newest first
    pub series: &'a BarSeries,
    /// Volumes of the same bars from the data provider, newest first
    pub volumes: &'a [f64],
    pub atr: Option<f64>,
    pub confirmation_bars: usize,
}

/// A gate on breakout acceptance
pub trait BreakoutFilter: Send + Sync {
    fn name(&self) -> &'static str;
    fn check(&self, ctx: &BreakoutContext) -> bool;
}

/// Newest bar volume must beat the trailing average by `factor`.
///
/// The average skips the current and preceding bar. No history passes.
#[derive(Debug, Clone)]
pub struct VolumeFilter {
    pub lookback: usize,
    pub factor: f64,
}

impl BreakoutFilter for VolumeFilter {
    fn name(&self) -> &'static str {
        "volume"
    }

    fn check(&self, ctx: &BreakoutContext) -> bool {
        let Some(&current) = ctx.volumes.first() else {
            return true;
        };
        match mean_volume(ctx.volumes, 2, self.lookback) {
            Some(avg) if avg > 0.0 => current > avg * self.factor,
            _ => true,
        }
    }
}

/// Breakout distance must exceed `ATR * multiplier`. Missing ATR passes.
#[derive(Debug, Clone)]
pub struct AtrDistanceFilter {
    pub multiplier: f64,
}

impl BreakoutFilter for AtrDistanceFilter {
    fn name(&self) -> &'static str {
        "atr_distance"
    }

    fn check(&self, ctx: &BreakoutContext) -> bool {
        match ctx.atr {
            Some(atr) if atr > 0.0 => ctx.distance > atr * self.multiplier,
            _ => true,
        }
    }
}

/// Volume-weighted body over the confirmation bars, in the breakout direction
#[derive(Debug, Clone)]
pub struct MomentumFilter {
    /// Price units
    pub min_momentum: f64,
}

impl MomentumFilter {
    pub fn momentum(ctx: &BreakoutContext) -> f64 {
        let bars = ctx.series.iter().take(ctx.confirmation_bars.max(1));
        let (weighted, volume) = bars.fold((0.0, 0.0), |(w, v), b| {
            (w + (b.close - b.open) * b.volume, v + b.volume)
        });
        if volume <= 0.0 {
            return 0.0;
        }
        let m = weighted / volume;
        if ctx.is_bullish {
            m
        } else {
            -m
        }
    }
}

impl BreakoutFilter for MomentumFilter {
    fn name(&self) -> &'static str {
        "momentum"
    }

    fn check(&self, ctx: &BreakoutContext) -> bool {
        Self::momentum(ctx) >= self.min_momentum
    }
}

/// Accepted breakout
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BreakoutSignal {
    pub is_bullish: bool,
    pub close: f64,
    pub distance: f64,
    pub volume: f64,
    /// Breakout volume / trailing average (1.0 without history)
    pub volume_ratio: f64,
}

pub struct BreakoutValidator {
    epsilon: f64,
    confirmation_bars: usize,
    volume_lookback: usize,
    filters: Vec<Box<dyn BreakoutFilter>>,
}

impl std::fmt::Debug for BreakoutValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.filters.iter().map(|x| x.name()).collect();
        f.debug_struct("BreakoutValidator")
            .field("epsilon", &self.epsilon)
            .field("confirmation_bars", &self.confirmation_bars)
            .field("filters", &names)
            .finish()
    }
}

impl BreakoutValidator {
    /// Validator with no filters
    pub fn new(epsilon: f64, confirmation_bars: usize) -> Self {
        Self {
            epsilon,
            confirmation_bars: confirmation_bars.max(1),
            volume_lookback: 20,
            filters: Vec::new(),
        }
    }

    /// Validator with the filters enabled in `config`
    pub fn from_config(config: &EngineConfig) -> Self {
        let b = &config.breakout;
        let mut validator = Self::new(config.breakout_epsilon(), b.confirmation_bars);
        validator.volume_lookback = b.volume_lookback;
        if b.use_volume_filter {
            validator = validator.with_filter(Box::new(VolumeFilter {
                lookback: b.volume_lookback,
                factor: b.volume_factor,
            }));
        }
        if b.use_atr_filter {
            validator = validator.with_filter(Box::new(AtrDistanceFilter {
                multiplier: b.atr_multiplier,
            }));
        }
        if b.min_momentum_pips > 0.0 {
            validator = validator.with_filter(Box::new(MomentumFilter {
                min_momentum: b.min_momentum_pips * config.pip_size,
            }));
        }
        validator
    }

    pub fn with_filter(mut self, filter: Box<dyn BreakoutFilter>) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn filter_names(&self) -> Vec<&'static str> {
        self.filters.iter().map(|f| f.name()).collect()
    }

    /// Direction of a fresh cross of `level_price`, if any
    pub fn crossing(&self, level_price: f64, series: &BarSeries) -> Option<bool> {
        let n = self.confirmation_bars;
        if series.len() < n + 1 {
            return None;
        }
        let bars = series.as_slice();
        let up = level_price + self.epsilon;
        let down = level_price - self.epsilon;

        if bars[..n].iter().all(|b| b.close > up) && bars[n].close <= up {
            return Some(true);
        }
        if bars[..n].iter().all(|b| b.close < down) && bars[n].close >= down {
            return Some(false);
        }
        None
    }

    /// Check the newest bar of `series` for a breakout of `level`.
    ///
    /// `volumes` are the provider's recent volumes, newest first; an empty
    /// slice lets the volume filter pass.
    pub fn validate(
        &self,
        level: &PriceLevel,
        series: &BarSeries,
        volumes: &[f64],
        atr: Option<f64>,
    ) -> Option<BreakoutSignal> {
        let is_bullish = self.crossing(level.price, series)?;
        let bar = series.latest()?;
        let ctx = BreakoutContext {
            level_price: level.price,
            is_bullish,
            close: bar.close,
            distance: (bar.close - level.price).abs(),
            series,
            volumes,
            atr,
            confirmation_bars: self.confirmation_bars,
        };

        for filter in &self.filters {
            if !filter.check(&ctx) {
                debug!(
                    "BREAKOUT: {} through {:.5} failed {} filter",
                    if is_bullish { "bullish" } else { "bearish" },
                    level.price,
                    filter.name()
                );
                return None;
            }
        }

        let volume = volumes.first().copied().unwrap_or(bar.volume);
        let volume_ratio = match mean_volume(volumes, 2, self.volume_lookback) {
            Some(avg) if avg > 0.0 => volume / avg,
            _ => 1.0,
        };
        Some(BreakoutSignal {
            is_bullish,
            close: bar.close,
            distance: ctx.distance,
            volume,
            volume_ratio,
        })
    }
}
