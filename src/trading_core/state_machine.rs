//! Breakout / retest state machine
//!
//! 1. NO_BREAKOUT - waiting for the validator to confirm a breakout
//! 2. BREAKOUT - breakout confirmed on the current bar
//! 3. AWAITING_RETEST - waiting for price to come back to the broken level
//! 4. RETEST_CONFIRMED - retest accepted, signal emitted, back to NO_BREAKOUT
//!
//! With retest disabled a breakout signals immediately. Waiting is bounded by
//! bar count and wall-clock minutes, whichever fires first.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::bars::BarSeries;
use super::breakout::BreakoutSignal;
use super::config::{EngineConfig, RetestConfig};
use super::patterns::engulfing_confirms;

/// Protocol state of one strategy instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BreakoutState {
    NoBreakout,
    Breakout {
        level: f64,
        is_bullish: bool,
        detected_at: DateTime<Utc>,
        breakout_volume: f64,
        /// Strength of the broken level
        strength: f64,
    },
    AwaitingRetest {
        level: f64,
        is_bullish: bool,
        retest_start_time: DateTime<Utc>,
        retest_start_bar: u64,
        bars_waiting: u64,
        breakout_volume: f64,
        strength: f64,
    },
    RetestConfirmed {
        level: f64,
        is_bullish: bool,
        confirming_bar_index: u64,
    },
}

impl Default for BreakoutState {
    fn default() -> Self {
        Self::NoBreakout
    }
}

impl std::fmt::Display for BreakoutState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BreakoutState::NoBreakout => write!(f, "NO_BREAKOUT"),
            BreakoutState::Breakout { .. } => write!(f, "BREAKOUT"),
            BreakoutState::AwaitingRetest { .. } => write!(f, "AWAITING_RETEST"),
            BreakoutState::RetestConfirmed { .. } => write!(f, "RETEST_CONFIRMED"),
        }
    }
}

/// What a step of the state machine did
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StateTransition {
    /// Breakout with retest disabled; signal now
    BreakoutDetected {
        level: f64,
        is_bullish: bool,
        price: f64,
        strength: f64,
    },
    /// Breakout confirmed, waiting for a retest
    AwaitingRetest {
        level: f64,
        is_bullish: bool,
        price: f64,
    },
    /// Retest accepted; signal now
    RetestConfirmed {
        level: f64,
        is_bullish: bool,
        price: f64,
        strength: f64,
        bars_waited: u64,
    },
    /// Retest never came
    RetestTimeout {
        level: f64,
        bars_waited: u64,
        minutes_waited: i64,
    },
    /// A bar reached the zone but failed a confirmation gate
    RetestRejected {
        level: f64,
        reason: String,
    },
    /// Pending protocol dropped because a position is already open
    ForcedReset {
        from: String,
    },
}

impl StateTransition {
    /// Whether this transition produces a trade signal
    pub fn emits_signal(&self) -> bool {
        matches!(
            self,
            StateTransition::BreakoutDetected { .. } | StateTransition::RetestConfirmed { .. }
        )
    }
}

#[derive(Debug, Clone)]
pub struct RetestStateMachine {
    config: RetestConfig,
    /// Zone half-width without ATR, price units
    fallback_distance: f64,
    state: BreakoutState,
}

impl RetestStateMachine {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            config: config.retest.clone(),
            fallback_distance: config.retest_fallback_distance(),
            state: BreakoutState::NoBreakout,
        }
    }

    pub fn state(&self) -> &BreakoutState {
        &self.state
    }

    pub fn is_idle(&self) -> bool {
        self.state == BreakoutState::NoBreakout
    }

    pub fn is_awaiting_retest(&self) -> bool {
        matches!(self.state, BreakoutState::AwaitingRetest { .. })
    }

    /// Retest zone half-width; falls back to the pip distance without ATR
    pub fn retest_zone(&self, atr: Option<f64>) -> f64 {
        match atr {
            Some(a) if a > 0.0 => a * self.config.atr_multiplier,
            _ => self.fallback_distance,
        }
    }

    /// Enter BREAKOUT for a validated breakout, then either signal
    /// immediately or start waiting for a retest
    pub fn on_breakout(
        &mut self,
        level: f64,
        strength: f64,
        signal: &BreakoutSignal,
        bar_index: u64,
        time: DateTime<Utc>,
    ) -> StateTransition {
        self.state = BreakoutState::Breakout {
            level,
            is_bullish: signal.is_bullish,
            detected_at: time,
            breakout_volume: signal.volume,
            strength,
        };

        if !self.config.enabled {
            self.state = BreakoutState::NoBreakout;
            return StateTransition::BreakoutDetected {
                level,
                is_bullish: signal.is_bullish,
                price: signal.close,
                strength,
            };
        }

        self.state = BreakoutState::AwaitingRetest {
            level,
            is_bullish: signal.is_bullish,
            retest_start_time: time,
            retest_start_bar: bar_index,
            bars_waiting: 0,
            breakout_volume: signal.volume,
            strength,
        };
        StateTransition::AwaitingRetest {
            level,
            is_bullish: signal.is_bullish,
            price: signal.close,
        }
    }

    /// Process a closed bar while waiting for a retest.
    ///
    /// `series` is the detection timeframe (newest first); `confirmation` is
    /// the candlestick confirmation timeframe, when available.
    pub fn on_bar(
        &mut self,
        series: &BarSeries,
        confirmation: Option<&BarSeries>,
        atr: Option<f64>,
        bar_index: u64,
        time: DateTime<Utc>,
    ) -> Option<StateTransition> {
        let BreakoutState::AwaitingRetest {
            level,
            is_bullish,
            retest_start_time,
            retest_start_bar,
            breakout_volume,
            strength,
            ..
        } = self.state.clone()
        else {
            return None;
        };

        let bars_waiting = bar_index.saturating_sub(retest_start_bar);
        if let BreakoutState::AwaitingRetest { bars_waiting: w, .. } = &mut self.state {
            *w = bars_waiting;
        }

        if let Some(timeout) = self.timed_out(bars_waiting, retest_start_time, time) {
            return Some(timeout);
        }

        // The breakout bar itself is not a retest
        if bars_waiting == 0 {
            return None;
        }

        let bar = series.latest()?;
        // Back in the zone once the pullback reaches its near edge; a bar that
        // pierces straight through still counts
        let zone = self.retest_zone(atr);
        let reached = if is_bullish {
            bar.low <= level + zone
        } else {
            bar.high >= level - zone
        };
        if !reached {
            return None;
        }

        let reject = |reason: &str| {
            debug!("RETEST: bar {} at {:.5} rejected: {}", bar_index, level, reason);
            Some(StateTransition::RetestRejected {
                level,
                reason: reason.to_string(),
            })
        };

        let held = if is_bullish { bar.close > level } else { bar.close < level };
        if !held {
            return reject("closed back through level");
        }
        if self.config.require_momentum {
            let aligned = if is_bullish { bar.is_bullish() } else { bar.is_bearish() };
            if !aligned {
                return reject("momentum not aligned");
            }
        }
        if self.config.require_engulfing {
            let confirmed = confirmation.map_or(false, |c| engulfing_confirms(c, is_bullish));
            if !confirmed {
                return reject("no engulfing confirmation");
            }
        }
        if self.config.min_volume_ratio > 0.0
            && bar.volume < self.config.min_volume_ratio * breakout_volume
        {
            return reject("volume below breakout ratio");
        }

        self.state = BreakoutState::RetestConfirmed {
            level,
            is_bullish,
            confirming_bar_index: bar_index,
        };
        let transition = StateTransition::RetestConfirmed {
            level,
            is_bullish,
            price: bar.close,
            strength,
            bars_waited: bars_waiting,
        };
        self.state = BreakoutState::NoBreakout;
        Some(transition)
    }

    /// Wall-clock check between bars; only the minute timeout applies
    pub fn on_clock(&mut self, time: DateTime<Utc>) -> Option<StateTransition> {
        let BreakoutState::AwaitingRetest {
            bars_waiting,
            retest_start_time,
            ..
        } = self.state
        else {
            return None;
        };
        if self.config.max_retest_minutes <= 0 {
            return None;
        }
        self.timed_out(bars_waiting, retest_start_time, time)
    }

    /// Drop any pending breakout because a position is already open
    pub fn force_reset(&mut self) -> Option<StateTransition> {
        if self.is_idle() {
            return None;
        }
        let from = self.state.to_string();
        self.state = BreakoutState::NoBreakout;
        Some(StateTransition::ForcedReset { from })
    }

    fn timed_out(
        &mut self,
        bars_waiting: u64,
        start: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Option<StateTransition> {
        let level = match self.state {
            BreakoutState::AwaitingRetest { level, .. } => level,
            _ => return None,
        };
        let minutes_waited = (now - start).num_minutes();
        let max_bars = self.config.max_retest_bars as u64;
        let max_minutes = self.config.max_retest_minutes;

        let bars_expired = max_bars > 0 && bars_waiting >= max_bars;
        let minutes_expired = max_minutes > 0 && minutes_waited >= max_minutes;
        if !(bars_expired || minutes_expired) {
            return None;
        }

        self.state = BreakoutState::NoBreakout;
        Some(StateTransition::RetestTimeout {
            level,
            bars_waited: bars_waiting,
            minutes_waited,
        })
    }
}
