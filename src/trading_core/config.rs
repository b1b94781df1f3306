//! Configuration for the level engine
//!
//! Everything the detector, validator, state machine and lockout need lives in
//! one `EngineConfig`. It is validated once when the engine is built and is
//! read-only afterwards.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::error::ConfigError;
use super::timeframe::Timeframe;

/// Tolerance for the scoring weights sum
const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

/// Smallest lookback (bars) the detector will run with
const MIN_VIABLE_LOOKBACK: usize = 10;

/// How the recency sub-score decays with time since the last touch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScoringPolicy {
    /// Stepped modifier keyed to fractions of the lookback window
    /// (+30% / +20% / +10% / 0 / -60%), normalized to [0, 1]
    BandedRecency,
    /// `exp(-hours_since_last_touch / (lookback_hours * k))`
    ExponentialRecency,
}

impl Default for ScoringPolicy {
    fn default() -> Self {
        Self::ExponentialRecency
    }
}

/// How the touch sub-score is derived
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TouchScoring {
    /// Step function of the touch count
    Count,
    /// Step function scaled by the mean touch quality
    Quality,
}

impl Default for TouchScoring {
    fn default() -> Self {
        Self::Count
    }
}

/// Weights of the normalized sub-scores; must sum to 1.0
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    pub touch: f64,
    pub recency: f64,
    pub duration: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            touch: 0.5,
            recency: 0.3,
            duration: 0.2,
        }
    }
}

impl ScoringWeights {
    pub fn sum(&self) -> f64 {
        self.touch + self.recency + self.duration
    }
}

/// Strength scoring parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub policy: ScoringPolicy,
    pub touch_scoring: TouchScoring,
    pub weights: ScoringWeights,
    /// Decay constant `k` for exponential recency
    pub recency_decay_k: f64,
    /// Origin bar volume / trailing average needed for the volume bonus
    pub volume_multiplier: f64,
    /// Bonus per unit of volume ratio above 1.0
    pub volume_bonus_factor: f64,
    /// Cap on the additive volume bonus
    pub max_volume_bonus: f64,
    /// Bars averaged for the origin bar's volume comparison
    pub volume_lookback: usize,
    /// Add the per-timeframe strength bonus
    pub timeframe_bonus: bool,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            policy: ScoringPolicy::ExponentialRecency,
            touch_scoring: TouchScoring::Count,
            weights: ScoringWeights::default(),
            recency_decay_k: 0.5,
            volume_multiplier: 1.5,
            volume_bonus_factor: 0.1,
            max_volume_bonus: 0.15,
            volume_lookback: 20,
            timeframe_bonus: true,
        }
    }
}

/// Level detection parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Bars scanned for swings and touches
    pub lookback_bars: usize,
    pub min_touches: usize,
    /// Minimum time between first and last touch
    pub min_level_duration_hours: f64,
    /// Levels scoring below this are rejected
    pub min_strength: f64,
    /// Touch tolerance override (pips); timeframe default when unset
    pub touch_zone_pips: Option<f64>,
    /// Candidates closer than this to an accepted level are dropped (pips)
    pub key_level_min_distance_pips: f64,
    /// Swing neighbour count override; timeframe default when unset
    pub swing_window: Option<usize>,
    /// Extremum neighbourhood override; timeframe default when unset
    pub window_size: Option<usize>,
    /// Minimum swing height override (pips); timeframe default when unset
    pub min_swing_height_pips: Option<f64>,
    /// Require strictly rising/falling highs (lows) into the swing
    pub require_monotonic_slope: bool,
    /// Qualifying bars closer than this merge into one touch
    pub touch_spacing_bars: usize,
    /// Neighbour mean range above `this * touch_zone` marks a touch as a spike
    pub max_touch_volatility: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            lookback_bars: 200,
            min_touches: 2,
            min_level_duration_hours: 4.0,
            min_strength: 0.55,
            touch_zone_pips: None,
            key_level_min_distance_pips: 10.0,
            swing_window: None,
            window_size: None,
            min_swing_height_pips: None,
            require_monotonic_slope: false,
            touch_spacing_bars: 1,
            max_touch_volatility: 3.0,
        }
    }
}

/// Breakout validation parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakoutConfig {
    /// Guard beyond the level price against equality noise (pips)
    pub epsilon_pips: f64,
    /// Consecutive closes beyond the level needed to confirm
    pub confirmation_bars: usize,
    pub use_volume_filter: bool,
    /// Bars in the trailing volume average
    pub volume_lookback: usize,
    /// Breakout volume must exceed average * this
    pub volume_factor: f64,
    pub use_atr_filter: bool,
    pub atr_period: usize,
    /// Breakout distance must exceed ATR * this
    pub atr_multiplier: f64,
    /// Minimum volume-weighted directional momentum (pips); 0 disables
    pub min_momentum_pips: f64,
}

impl Default for BreakoutConfig {
    fn default() -> Self {
        Self {
            epsilon_pips: 0.1,
            confirmation_bars: 1,
            use_volume_filter: true,
            volume_lookback: 20,
            volume_factor: 1.5,
            use_atr_filter: true,
            atr_period: 14,
            atr_multiplier: 0.2,
            min_momentum_pips: 0.0,
        }
    }
}

/// Retest protocol parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetestConfig {
    /// Wait for a retest before signalling
    pub enabled: bool,
    /// Retest zone half-width = ATR * this
    pub atr_multiplier: f64,
    /// Zone half-width when ATR is unavailable (pips)
    pub fallback_pips: f64,
    /// Abandon after this many bars; 0 disables
    pub max_retest_bars: usize,
    /// Abandon after this many wall-clock minutes; 0 disables
    pub max_retest_minutes: i64,
    /// Retest bar must close in the breakout direction
    pub require_momentum: bool,
    /// Require an engulfing pattern on the confirmation timeframe
    pub require_engulfing: bool,
    /// Timeframe for the engulfing check; detection timeframe when unset
    pub confirmation_timeframe: Option<Timeframe>,
    /// Retest volume must be at least breakout volume * this; 0 disables
    pub min_volume_ratio: f64,
}

impl Default for RetestConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            atr_multiplier: 0.5,
            fallback_pips: 10.0,
            max_retest_bars: 10,
            max_retest_minutes: 0,
            require_momentum: true,
            require_engulfing: false,
            confirmation_timeframe: None,
            min_volume_ratio: 0.0,
        }
    }
}

/// Post-trade zone lockout parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockoutConfig {
    pub enabled: bool,
    /// Release distance = max(ATR * this, floor)
    pub atr_multiplier: f64,
    /// Release distance floor (pips)
    pub min_distance_pips: f64,
}

impl Default for LockoutConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            atr_multiplier: 2.0,
            min_distance_pips: 20.0,
        }
    }
}

/// Complete configuration of one strategy instance (symbol x timeframe x parameters)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub symbol: String,
    pub timeframe: Timeframe,
    /// Price units per pip
    pub pip_size: f64,
    /// Bars requested from the data provider per evaluation
    pub history_bars: usize,
    pub detector: DetectorConfig,
    pub scoring: ScoringConfig,
    pub breakout: BreakoutConfig,
    pub retest: RetestConfig,
    pub lockout: LockoutConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            symbol: "EURUSD".to_string(),
            timeframe: Timeframe::H1,
            pip_size: 0.0001,
            history_bars: 300,
            detector: DetectorConfig::default(),
            scoring: ScoringConfig::default(),
            breakout: BreakoutConfig::default(),
            retest: RetestConfig::default(),
            lockout: LockoutConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load and validate a JSON config file. Missing fields take defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {:?}", path))?;
        let config: EngineConfig = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse config {:?}", path))?;
        config.validate()?;
        Ok(config)
    }

    /// Touch tolerance in price units
    pub fn touch_zone(&self) -> f64 {
        let pips = self
            .detector
            .touch_zone_pips
            .unwrap_or(self.timeframe.profile().touch_zone_pips);
        pips * self.pip_size
    }

    /// Minimum separation between accepted levels in price units
    pub fn key_level_min_distance(&self) -> f64 {
        (self.detector.key_level_min_distance_pips * self.pip_size).max(self.touch_zone())
    }

    pub fn swing_window(&self) -> usize {
        self.detector
            .swing_window
            .unwrap_or(self.timeframe.profile().swing_window)
    }

    pub fn window_size(&self) -> usize {
        self.detector
            .window_size
            .unwrap_or(self.timeframe.profile().window_size)
            .max(self.swing_window())
    }

    /// Minimum swing height in price units
    pub fn min_swing_height(&self) -> f64 {
        self.detector
            .min_swing_height_pips
            .unwrap_or(self.timeframe.profile().min_swing_height_pips)
            * self.pip_size
    }

    /// Hours spanned by the detection lookback
    pub fn lookback_hours(&self) -> f64 {
        self.timeframe.hours_for_bars(self.detector.lookback_bars)
    }

    /// Breakout equality guard in price units
    pub fn breakout_epsilon(&self) -> f64 {
        self.breakout.epsilon_pips * self.pip_size
    }

    /// Retest zone half-width used when ATR is unavailable
    pub fn retest_fallback_distance(&self) -> f64 {
        self.retest.fallback_pips * self.pip_size
    }

    /// Lockout release floor in price units
    pub fn lockout_floor(&self) -> f64 {
        self.lockout.min_distance_pips * self.pip_size
    }

    /// Timeframe used for candlestick confirmation
    pub fn confirmation_timeframe(&self) -> Timeframe {
        self.retest.confirmation_timeframe.unwrap_or(self.timeframe)
    }

    /// Smallest lookback that can hold one full swing pattern
    pub fn minimum_viable_lookback(&self) -> usize {
        (2 * self.swing_window() + 1).max(MIN_VIABLE_LOOKBACK)
    }

    /// Check the configuration for values the engine cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.pip_size > 0.0) {
            return Err(ConfigError::InvalidPipSize(self.pip_size));
        }

        let weights = &self.scoring.weights;
        for (name, value) in [
            ("touch", weights.touch),
            ("recency", weights.recency),
            ("duration", weights.duration),
        ] {
            if value < 0.0 {
                return Err(ConfigError::NegativeWeight { name, value });
            }
        }
        let sum = weights.sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(ConfigError::WeightsNotNormalized { sum });
        }

        let minimum = self.minimum_viable_lookback();
        if self.detector.lookback_bars < minimum {
            return Err(ConfigError::LookbackTooShort {
                lookback: self.detector.lookback_bars,
                minimum,
            });
        }
        if self.history_bars < self.detector.lookback_bars {
            return Err(ConfigError::HistoryTooShort {
                history: self.history_bars,
                lookback: self.detector.lookback_bars,
            });
        }

        if self.detector.min_touches == 0 {
            return Err(ConfigError::ZeroMinTouches);
        }
        if !(0.0..=1.0).contains(&self.detector.min_strength) {
            return Err(ConfigError::OutOfUnitRange {
                name: "min_strength",
                value: self.detector.min_strength,
            });
        }
        if !(0.0..=1.0).contains(&self.scoring.max_volume_bonus) {
            return Err(ConfigError::OutOfUnitRange {
                name: "max_volume_bonus",
                value: self.scoring.max_volume_bonus,
            });
        }

        for (name, value) in [
            ("recency_decay_k", self.scoring.recency_decay_k),
            ("volume_factor", self.breakout.volume_factor),
            ("max_touch_volatility", self.detector.max_touch_volatility),
        ] {
            if !(value > 0.0) {
                return Err(ConfigError::NotPositive { name, value });
            }
        }
        if self.touch_zone() <= 0.0 {
            return Err(ConfigError::NotPositive {
                name: "touch_zone",
                value: self.touch_zone(),
            });
        }

        if self.breakout.atr_period == 0 {
            return Err(ConfigError::ZeroAtrPeriod);
        }

        if self.retest.enabled
            && self.retest.max_retest_bars == 0
            && self.retest.max_retest_minutes <= 0
        {
            return Err(ConfigError::RetestWithoutTimeout);
        }

        let confirmation = self.confirmation_timeframe();
        if confirmation.minutes() < self.timeframe.minutes() {
            return Err(ConfigError::ConfirmationTimeframeTooFine {
                detection: self.timeframe,
                confirmation,
            });
        }

        Ok(())
    }
}
