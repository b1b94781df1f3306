//! Key level breakout engine
//!
//! One engine per symbol x timeframe x parameter set. Every event reads the
//! whole mutable state, works on a copy and commits it in one assignment, so a
//! half-processed event is never observable.
//!
//! Per closed bar:
//! 1. Open position: drop any pending breakout, emit nothing
//! 2. Lockout release check (ticks between closes may release it too)
//! 3. Retest evaluation while AWAITING_RETEST
//! 4. Breakout validation against the active level (suppressed by lockout)
//! 5. Level detection refresh

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::bars::BarSeries;
use super::breakout::BreakoutValidator;
use super::config::EngineConfig;
use super::error::ConfigError;
use super::levels::{DetectionStatus, LevelDetector, PriceLevel};
use super::lockout::LockoutZone;
use super::market_data::MarketData;
use super::state_machine::{BreakoutState, RetestStateMachine, StateTransition};

/// Something happened in the market or on the clock
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MarketEvent {
    /// A bar closed
    NewBar { bar_index: u64, time: DateTime<Utc> },
    /// Price update between bar closes; can release the lockout early
    Tick { price: f64, time: DateTime<Utc> },
    /// Periodic wall-clock re-evaluation
    Timer { time: DateTime<Utc> },
}

impl MarketEvent {
    pub fn time(&self) -> DateTime<Utc> {
        match self {
            MarketEvent::NewBar { time, .. }
            | MarketEvent::Tick { time, .. }
            | MarketEvent::Timer { time } => *time,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryKind {
    /// Signalled on the breakout bar
    Immediate,
    /// Signalled after a confirmed retest
    Retest,
}

impl std::fmt::Display for EntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntryKind::Immediate => write!(f, "IMMEDIATE"),
            EntryKind::Retest => write!(f, "RETEST"),
        }
    }
}

/// Trade signal handed to the execution collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeSignal {
    pub id: Uuid,
    pub symbol: String,
    pub is_bullish: bool,
    /// Broken level price
    pub level: f64,
    /// Strength of the broken level
    pub confidence: f64,
    /// Close of the signalling bar
    pub price: f64,
    pub time: DateTime<Utc>,
    pub bar_index: u64,
    pub entry: EntryKind,
}

/// Running counters for telemetry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineStats {
    pub bars_evaluated: u64,
    pub level_changes: u64,
    pub breakouts: u64,
    pub signals: u64,
    pub retests_confirmed: u64,
    pub retests_abandoned: u64,
    pub retests_rejected: u64,
    pub forced_resets: u64,
    pub lockout_suppressions: u64,
    pub data_errors: u64,
}

/// Everything that changes between events
#[derive(Debug, Clone)]
struct EngineState {
    machine: RetestStateMachine,
    lockout: LockoutZone,
    levels: Vec<PriceLevel>,
    active_level: Option<PriceLevel>,
    /// Index and ATR of the last closed bar, for tick-time lockout checks
    last_bar_index: u64,
    last_atr: Option<f64>,
    stats: EngineStats,
}

#[derive(Debug)]
pub struct KeyLevelEngine {
    config: EngineConfig,
    detector: LevelDetector,
    validator: BreakoutValidator,
    state: EngineState,
}

impl KeyLevelEngine {
    pub fn new(config: EngineConfig) -> Result<Self, ConfigError> {
        let detector = LevelDetector::new(config.clone())?;
        let validator = BreakoutValidator::from_config(&config);
        let state = EngineState {
            machine: RetestStateMachine::new(&config),
            lockout: LockoutZone::new(&config),
            levels: Vec::new(),
            active_level: None,
            last_bar_index: 0,
            last_atr: None,
            stats: EngineStats::default(),
        };
        info!(
            "ENGINE: {} {} | lookback={} min_touches={} retest={} filters={:?}",
            config.symbol,
            config.timeframe,
            config.detector.lookback_bars,
            config.detector.min_touches,
            config.retest.enabled,
            validator.filter_names()
        );
        Ok(Self {
            config,
            detector,
            validator,
            state,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn breakout_state(&self) -> &BreakoutState {
        self.state.machine.state()
    }

    /// Levels accepted by the latest detection pass
    pub fn tracked_levels(&self) -> &[PriceLevel] {
        &self.state.levels
    }

    pub fn active_level(&self) -> Option<&PriceLevel> {
        self.state.active_level.as_ref()
    }

    pub fn lockout(&self) -> &LockoutZone {
        &self.state.lockout
    }

    pub fn stats(&self) -> &EngineStats {
        &self.state.stats
    }

    /// Overwrite the lockout with the actual fill
    pub fn record_execution(&mut self, price: f64, is_bullish: bool, bar_index: u64) {
        if !self.config.lockout.enabled {
            return;
        }
        info!(
            "LOCKOUT: execution {} @ {:.5} (bar {})",
            if is_bullish { "LONG" } else { "SHORT" },
            price,
            bar_index
        );
        self.state.lockout.engage(price, is_bullish, bar_index);
    }

    /// Process one event; returns a signal if this event produced one
    pub fn evaluate(&mut self, event: MarketEvent, data: &impl MarketData) -> Option<TradeSignal> {
        let mut next = self.state.clone();
        let signal = match event {
            MarketEvent::NewBar { bar_index, time } => self.on_new_bar(&mut next, bar_index, time, data),
            MarketEvent::Tick { price, time } => {
                self.on_tick(&mut next, price, time, data);
                None
            }
            MarketEvent::Timer { time } => {
                self.on_clock(&mut next, time, data);
                None
            }
        };
        self.state = next;
        signal
    }

    fn on_clock(&self, next: &mut EngineState, time: DateTime<Utc>, data: &impl MarketData) {
        if self.position_reset(next, data) {
            return;
        }
        if let Some(transition) = next.machine.on_clock(time) {
            self.log_timeout(next, &transition);
        }
    }

    fn on_tick(&self, next: &mut EngineState, price: f64, time: DateTime<Utc>, data: &impl MarketData) {
        if next.lockout.is_active() && next.lockout.try_release(next.last_bar_index, price, next.last_atr) {
            info!(
                "LOCKOUT: released on tick at {:.5} (zone {:.5})",
                price, next.lockout.active_price
            );
        }
        self.on_clock(next, time, data);
    }

    /// Force the protocol back to idle if a position is open. Returns true if one is.
    fn position_reset(&self, next: &mut EngineState, data: &impl MarketData) -> bool {
        if !data.has_open_position(&self.config.symbol) {
            return false;
        }
        if let Some(StateTransition::ForcedReset { from }) = next.machine.force_reset() {
            warn!("FORCED RESET: {} open position, dropped {}", self.config.symbol, from);
            next.stats.forced_resets += 1;
        }
        true
    }

    fn log_timeout(&self, next: &mut EngineState, transition: &StateTransition) {
        if let StateTransition::RetestTimeout {
            level,
            bars_waited,
            minutes_waited,
        } = transition
        {
            info!(
                "RETEST TIMEOUT: {} level {:.5} after {} bars / {} min",
                self.config.symbol, level, bars_waited, minutes_waited
            );
            next.stats.retests_abandoned += 1;
        }
    }

    fn on_new_bar(
        &self,
        next: &mut EngineState,
        bar_index: u64,
        time: DateTime<Utc>,
        data: &impl MarketData,
    ) -> Option<TradeSignal> {
        next.stats.bars_evaluated += 1;
        if self.position_reset(next, data) {
            return None;
        }

        let cfg = &self.config;
        let series = match data.bars(&cfg.symbol, cfg.timeframe, cfg.history_bars) {
            Ok(series) => series,
            Err(e) => {
                debug!("DATA: {} bars unavailable: {}", cfg.symbol, e);
                next.stats.data_errors += 1;
                return None;
            }
        };
        let close = series.latest()?.close;
        let atr = match data.atr(&cfg.symbol, cfg.timeframe, cfg.breakout.atr_period) {
            Ok(a) => Some(a),
            Err(e) => {
                debug!("DATA: ATR unavailable, filters fail open: {}", e);
                None
            }
        };
        let volumes = data
            .volumes(&cfg.symbol, cfg.timeframe, cfg.breakout.volume_lookback + 2)
            .unwrap_or_else(|e| {
                debug!("DATA: volumes unavailable, volume filter fails open: {}", e);
                Vec::new()
            });
        next.last_bar_index = bar_index;
        next.last_atr = atr;

        if next.lockout.is_active() && next.lockout.try_release(bar_index, close, atr) {
            info!(
                "LOCKOUT: released at {:.5} (zone {:.5})",
                close, next.lockout.active_price
            );
        }

        let mut signal = None;
        if next.machine.is_awaiting_retest() {
            signal = self.step_retest(next, &series, atr, bar_index, time, data);
        }
        if signal.is_none() && next.machine.is_idle() {
            signal = self.check_breakout(next, &series, &volumes, atr, bar_index, time);
        }

        self.refresh_levels(next, &series);
        signal
    }

    fn step_retest(
        &self,
        next: &mut EngineState,
        series: &BarSeries,
        atr: Option<f64>,
        bar_index: u64,
        time: DateTime<Utc>,
        data: &impl MarketData,
    ) -> Option<TradeSignal> {
        let cfg = &self.config;
        let confirmation = if cfg.retest.require_engulfing {
            data.bars(&cfg.symbol, cfg.confirmation_timeframe(), 2).ok()
        } else {
            None
        };

        match next.machine.on_bar(series, confirmation.as_ref(), atr, bar_index, time)? {
            transition @ StateTransition::RetestTimeout { .. } => {
                self.log_timeout(next, &transition);
                None
            }
            StateTransition::RetestRejected { .. } => {
                next.stats.retests_rejected += 1;
                None
            }
            StateTransition::RetestConfirmed {
                level,
                is_bullish,
                price,
                strength,
                bars_waited,
            } => {
                info!(
                    "RETEST CONFIRMED: {} level {:.5} after {} bars",
                    cfg.symbol, level, bars_waited
                );
                next.stats.retests_confirmed += 1;
                Some(self.emit_signal(next, level, is_bullish, strength, price, bar_index, time, EntryKind::Retest))
            }
            _ => None,
        }
    }

    fn check_breakout(
        &self,
        next: &mut EngineState,
        series: &BarSeries,
        volumes: &[f64],
        atr: Option<f64>,
        bar_index: u64,
        time: DateTime<Utc>,
    ) -> Option<TradeSignal> {
        let level = next.active_level.clone()?;
        let breakout = self.validator.validate(&level, series, volumes, atr)?;

        if next.lockout.is_active() {
            debug!(
                "LOCKOUT: suppressed breakout of {:.5} ({:.5} from zone {:.5})",
                level.price,
                (breakout.close - next.lockout.active_price).abs(),
                next.lockout.active_price
            );
            next.stats.lockout_suppressions += 1;
            return None;
        }

        next.stats.breakouts += 1;
        info!(
            "BREAKOUT: {} {} through {:.5} @ {:.5} | vol x{:.2} strength={:.2}",
            self.config.symbol,
            if breakout.is_bullish { "UP" } else { "DOWN" },
            level.price,
            breakout.close,
            breakout.volume_ratio,
            level.strength
        );

        match next
            .machine
            .on_breakout(level.price, level.strength, &breakout, bar_index, time)
        {
            StateTransition::BreakoutDetected {
                level,
                is_bullish,
                price,
                strength,
            } => Some(self.emit_signal(next, level, is_bullish, strength, price, bar_index, time, EntryKind::Immediate)),
            StateTransition::AwaitingRetest { level, .. } => {
                info!("STATE: AWAITING_RETEST of {:.5}", level);
                None
            }
            _ => None,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn emit_signal(
        &self,
        next: &mut EngineState,
        level: f64,
        is_bullish: bool,
        confidence: f64,
        price: f64,
        bar_index: u64,
        time: DateTime<Utc>,
        entry: EntryKind,
    ) -> TradeSignal {
        let signal = TradeSignal {
            id: Uuid::new_v4(),
            symbol: self.config.symbol.clone(),
            is_bullish,
            level,
            confidence,
            price,
            time,
            bar_index,
            entry,
        };
        info!(
            "SIGNAL: {} {} @ {:.5} | level {:.5} conf {:.2} ({})",
            signal.symbol,
            if is_bullish { "LONG" } else { "SHORT" },
            price,
            level,
            confidence,
            entry
        );
        next.stats.signals += 1;
        if self.config.lockout.enabled {
            next.lockout.engage(price, is_bullish, bar_index);
        }
        signal
    }

    fn refresh_levels(&self, next: &mut EngineState, series: &BarSeries) {
        let result = self.detector.detect(series);
        if result.status == DetectionStatus::InsufficientData {
            return;
        }

        if let Some(best) = &result.best {
            let changed = match &next.active_level {
                Some(prev) => !prev.same_level(best, self.config.touch_zone()),
                None => true,
            };
            if changed {
                info!(
                    "LEVEL: {} active {} {:.5} | touches={} strength={:.2}",
                    self.config.symbol,
                    if best.is_support() { "support" } else { "resistance" },
                    best.price,
                    best.touch_count,
                    best.strength
                );
                next.stats.level_changes += 1;
            }
        }
        next.active_level = result.best;
        next.levels = result.candidates;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trading_core::bars::Bar;
    use crate::trading_core::market_data::BarFeed;
    use crate::trading_core::timeframe::Timeframe;
    use chrono::{Duration, TimeZone};

    fn t(i: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 3, 0, 0, 0).unwrap() + Duration::hours(i)
    }

    fn config(retest: bool) -> EngineConfig {
        let mut c = EngineConfig::default();
        c.timeframe = Timeframe::H1;
        c.history_bars = 30;
        c.detector.lookback_bars = 30;
        c.detector.swing_window = Some(2);
        c.detector.window_size = Some(5);
        c.detector.min_swing_height_pips = Some(5.0);
        c.detector.touch_zone_pips = Some(5.0);
        c.detector.key_level_min_distance_pips = 5.0;
        c.detector.min_level_duration_hours = 1.0;
        c.breakout.atr_multiplier = 0.1;
        c.retest.enabled = retest;
        c.retest.max_retest_bars = 5;
        c
    }

    /// 25 bars below 1.1000 with swing highs at 1.1000 on bars 10 and 18
    fn history() -> Vec<Bar> {
        (0..25)
            .map(|i| {
                if i == 10 || i == 18 {
                    Bar::new(t(i), 1.0992, 1.1000, 1.0990, 1.0996, 100.0)
                } else {
                    Bar::new(t(i), 1.0983, 1.0990, 1.0980, 1.0987, 100.0)
                }
            })
            .collect()
    }

    fn breakout_bar() -> Bar {
        Bar::new(t(25), 1.0995, 1.1003, 1.0993, 1.1002, 250.0)
    }

    fn away_bar(i: i64) -> Bar {
        Bar::new(t(i), 1.1016, 1.1025, 1.1015, 1.1022, 100.0)
    }

    struct Harness {
        engine: KeyLevelEngine,
        feed: BarFeed,
    }

    impl Harness {
        fn new(config: EngineConfig) -> Self {
            let feed = BarFeed::new(&config.symbol, config.timeframe, config.history_bars);
            Self {
                engine: KeyLevelEngine::new(config).unwrap(),
                feed,
            }
        }

        fn push(&mut self, bar: Bar) -> Option<TradeSignal> {
            let time = bar.timestamp;
            let bar_index = self.feed.push_bar(bar);
            self.engine.evaluate(MarketEvent::NewBar { bar_index, time }, &self.feed)
        }

        fn warm_up(&mut self) {
            for bar in history() {
                assert!(self.push(bar).is_none());
            }
        }
    }

    #[test]
    fn test_detects_active_level() {
        let mut h = Harness::new(config(false));
        h.warm_up();
        let level = h.engine.active_level().expect("active level");
        assert!(level.is_resistance);
        assert!((level.price - 1.1000).abs() < 1e-12);
        assert_eq!(level.touch_count, 2);
        assert_eq!(h.engine.tracked_levels().len(), 1);
    }

    #[test]
    fn test_immediate_signal_on_breakout_bar() {
        let mut h = Harness::new(config(false));
        h.warm_up();
        let signal = h.push(breakout_bar()).expect("signal");
        assert!(signal.is_bullish);
        assert_eq!(signal.entry, EntryKind::Immediate);
        assert_eq!(signal.bar_index, 26);
        assert!((signal.level - 1.1000).abs() < 1e-12);
        assert!(h.engine.lockout().is_active());
        assert_eq!(h.engine.breakout_state(), &BreakoutState::NoBreakout);
        assert_eq!(h.engine.stats().signals, 1);
    }

    #[test]
    fn test_signal_after_retest_on_third_bar() {
        let mut h = Harness::new(config(true));
        h.warm_up();
        assert!(h.push(breakout_bar()).is_none());
        assert!(matches!(h.engine.breakout_state(), BreakoutState::AwaitingRetest { .. }));

        assert!(h.push(away_bar(26)).is_none());
        assert!(h.push(away_bar(27)).is_none());
        let retest = Bar::new(t(28), 1.1005, 1.1012, 1.1003, 1.1010, 100.0);
        let signal = h.push(retest).expect("retest signal");
        assert_eq!(signal.entry, EntryKind::Retest);
        assert!(signal.is_bullish);
        assert_eq!(signal.bar_index, 29);
        assert_eq!(h.engine.stats().retests_confirmed, 1);
    }

    #[test]
    fn test_retest_timeout_without_signal() {
        let mut h = Harness::new(config(true));
        h.warm_up();
        assert!(h.push(breakout_bar()).is_none());
        for i in 26..30 {
            assert!(h.push(away_bar(i)).is_none());
            assert!(matches!(h.engine.breakout_state(), BreakoutState::AwaitingRetest { .. }));
        }
        assert!(h.push(away_bar(30)).is_none());
        assert_eq!(h.engine.breakout_state(), &BreakoutState::NoBreakout);
        assert_eq!(h.engine.stats().retests_abandoned, 1);
        assert_eq!(h.engine.stats().signals, 0);
    }

    #[test]
    fn test_lockout_suppresses_nearby_breakout() {
        let mut h = Harness::new(config(false));
        h.warm_up();
        assert!(h.push(breakout_bar()).is_some());

        assert!(h.push(Bar::new(t(26), 1.1000, 1.1001, 1.0988, 1.0990, 100.0)).is_none());
        let again = Bar::new(t(27), 1.0995, 1.1003, 1.0993, 1.1002, 300.0);
        assert!(h.push(again).is_none());
        assert!(h.engine.lockout().is_active());
        assert_eq!(h.engine.stats().lockout_suppressions, 1);
        assert_eq!(h.engine.stats().signals, 1);
    }

    #[test]
    fn test_lockout_release_allows_new_breakout() {
        let mut h = Harness::new(config(false));
        h.warm_up();
        let first = h.push(breakout_bar()).expect("first signal");
        assert!(first.is_bullish);
        assert!(h.engine.lockout().is_active());

        // Collapses 42 pips from the locked price and closes back under the level
        let drop = Bar::new(t(26), 1.1000, 1.1001, 1.0958, 1.0960, 300.0);
        let second = h.push(drop).expect("second signal");
        assert!(!second.is_bullish);
        assert!((second.level - 1.1000).abs() < 1e-12);
        assert_eq!(second.bar_index, 27);
        assert_eq!(h.engine.stats().signals, 2);
        assert_eq!(h.engine.stats().lockout_suppressions, 0);
        // Locked again around the new signal
        assert!((h.engine.lockout().active_price - 1.0960).abs() < 1e-12);
    }

    #[test]
    fn test_tick_releases_lockout_between_bars() {
        let mut h = Harness::new(config(false));
        h.warm_up();
        assert!(h.push(breakout_bar()).is_some());

        // Signal bar itself never releases
        h.engine.evaluate(MarketEvent::Tick { price: 1.0960, time: t(25) }, &h.feed);
        assert!(h.engine.lockout().is_active());

        assert!(h.push(Bar::new(t(26), 1.1000, 1.1001, 1.0988, 1.0990, 100.0)).is_none());
        assert!(h.engine.lockout().is_active());
        h.engine.evaluate(MarketEvent::Tick { price: 1.0995, time: t(27) }, &h.feed);
        assert!(h.engine.lockout().is_active());
        h.engine.evaluate(MarketEvent::Tick { price: 1.0960, time: t(27) }, &h.feed);
        assert!(!h.engine.lockout().is_active());
    }

    #[test]
    fn test_open_position_forces_reset() {
        let mut h = Harness::new(config(true));
        h.warm_up();
        h.push(breakout_bar());
        assert!(matches!(h.engine.breakout_state(), BreakoutState::AwaitingRetest { .. }));

        h.feed.set_open_position(true);
        let retest = Bar::new(t(26), 1.1005, 1.1012, 1.1003, 1.1010, 100.0);
        assert!(h.push(retest).is_none());
        assert_eq!(h.engine.breakout_state(), &BreakoutState::NoBreakout);
        assert_eq!(h.engine.stats().forced_resets, 1);
    }

    #[test]
    fn test_timer_applies_minute_timeout() {
        let mut c = config(true);
        c.retest.max_retest_minutes = 90;
        let mut h = Harness::new(c);
        h.warm_up();
        h.push(breakout_bar());

        let start = t(25);
        h.engine.evaluate(MarketEvent::Timer { time: start + Duration::minutes(60) }, &h.feed);
        assert!(matches!(h.engine.breakout_state(), BreakoutState::AwaitingRetest { .. }));
        h.engine.evaluate(
            MarketEvent::Tick { price: 1.1010, time: start + Duration::minutes(90) },
            &h.feed,
        );
        assert_eq!(h.engine.breakout_state(), &BreakoutState::NoBreakout);
    }

    #[test]
    fn test_record_execution_moves_lockout() {
        let mut h = Harness::new(config(false));
        h.warm_up();
        h.push(breakout_bar());
        h.engine.record_execution(1.1004, true, 26);
        assert!((h.engine.lockout().active_price - 1.1004).abs() < 1e-12);
    }

    #[test]
    fn test_invalid_config_refused() {
        let mut c = config(false);
        c.scoring.weights.touch = 0.9;
        assert!(KeyLevelEngine::new(c).is_err());
    }
}
