//! Trading Core - key level breakout strategy
//!
//! This module contains the strategy components:
//! - Bars, timeframes and aggregation
//! - Key level detection and strength scoring
//! - Breakout validation with composable filters
//! - Breakout / retest state machine and zone lockout
//! - The per-instrument engine and its market data seam
//! - CSV history loading and replay orchestration

pub mod bars;
pub mod timeframe;
pub mod config;
pub mod error;
pub mod indicators;
pub mod scoring;
pub mod levels;
pub mod breakout;
pub mod patterns;
pub mod state_machine;
pub mod lockout;
pub mod engine;
pub mod market_data;
pub mod history;
pub mod trader;

// Re-export commonly used types
pub use bars::{aggregate_bars, Bar, BarSeries};
pub use timeframe::{Timeframe, TimeframeProfile};
pub use config::{
    BreakoutConfig, DetectorConfig, EngineConfig, LockoutConfig, RetestConfig, ScoringConfig,
    ScoringPolicy, ScoringWeights, TouchScoring,
};
pub use error::{ConfigError, DataError, ParseTimeframeError};
pub use levels::{detect_levels, DetectionResult, DetectionStatus, LevelDetector, PriceLevel, RejectedLevel, Touch};
pub use breakout::{BreakoutFilter, BreakoutSignal, BreakoutValidator};
pub use state_machine::{BreakoutState, RetestStateMachine, StateTransition};
pub use lockout::LockoutZone;
pub use engine::{EngineStats, EntryKind, KeyLevelEngine, MarketEvent, TradeSignal};
pub use market_data::{BarFeed, MarketData};
pub use history::{list_bar_files, load_bars_csv};
pub use trader::{write_signals_csv, ReplaySummary, ReplayTrader, SignalRecord};
