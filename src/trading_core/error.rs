//! Error types for the level engine
//!
//! Data problems degrade to "no signal"; configuration problems stop the
//! engine from being built at all.

use super::timeframe::Timeframe;

/// Engine configuration rejected at startup
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("scoring weights must sum to 1.0 (got {sum:.6})")]
    WeightsNotNormalized { sum: f64 },

    #[error("scoring weight '{name}' must be non-negative (got {value})")]
    NegativeWeight { name: &'static str, value: f64 },

    #[error("lookback of {lookback} bars is below the minimum viable window of {minimum}")]
    LookbackTooShort { lookback: usize, minimum: usize },

    #[error("history of {history} bars cannot cover lookback of {lookback} bars")]
    HistoryTooShort { history: usize, lookback: usize },

    #[error("pip size must be positive (got {0})")]
    InvalidPipSize(f64),

    #[error("min_touches must be at least 1")]
    ZeroMinTouches,

    #[error("{name} must be within [0, 1] (got {value})")]
    OutOfUnitRange { name: &'static str, value: f64 },

    #[error("{name} must be positive (got {value})")]
    NotPositive { name: &'static str, value: f64 },

    #[error("ATR period must be at least 1")]
    ZeroAtrPeriod,

    #[error("retest enabled but both max_retest_bars and max_retest_minutes are zero")]
    RetestWithoutTimeout,

    #[error("confirmation timeframe {confirmation} is finer than detection timeframe {detection}")]
    ConfirmationTimeframeTooFine { detection: Timeframe, confirmation: Timeframe },
}

/// Unrecognised timeframe name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown timeframe '{0}' (expected M1, M5, M15, M30, H1, H4, D1 or W1)")]
pub struct ParseTimeframeError(pub String);

/// Market data could not be supplied
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DataError {
    #[error("insufficient bars: need {needed}, got {available}")]
    InsufficientBars { needed: usize, available: usize },

    #[error("data unavailable: {0}")]
    Unavailable(String),

    #[error("cannot serve {requested} bars from a {base} feed")]
    UnsupportedTimeframe { base: Timeframe, requested: Timeframe },
}
