//! Key level detection
//!
//! Turns a newest-first window of bars into ranked support/resistance levels:
//! 1. Swing highs/lows (strict over `swing_window`, extreme over `window_size`)
//! 2. Deduplication against levels already accepted this pass
//! 3. Touch counting inside the touch zone, rejecting isolated spikes
//! 4. Minimum touch and duration gates
//! 5. Strength scoring (see `scoring`)
//! 6. Selection of the strongest level

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::bars::{Bar, BarSeries};
use super::config::EngineConfig;
use super::error::ConfigError;
use super::scoring::{score_level, StrengthInputs};

/// Neighbours on each side inspected when validating a touch
const TOUCH_CONTEXT_BARS: usize = 2;

/// Strength difference treated as a tie
const STRENGTH_TIE_EPSILON: f64 = 1e-9;

/// One instance of price entering a level's touch zone
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Touch {
    pub timestamp: DateTime<Utc>,
    /// High (resistance) or low (support) of the touching bar
    pub price: f64,
    /// Touch quality in [0, 1]
    pub strength: f64,
    pub is_valid: bool,
}

/// A detected support or resistance level
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: f64,
    pub is_resistance: bool,
    pub first_touch: DateTime<Utc>,
    pub last_touch: DateTime<Utc>,
    pub touch_count: usize,
    /// Composite confidence in [0.45, 0.98]
    pub strength: f64,
    pub volume_confirmed: bool,
    /// Origin bar volume / trailing average
    pub volume_ratio: f64,
    /// Valid touches, newest first
    pub touches: Vec<Touch>,
}

impl PriceLevel {
    pub fn is_support(&self) -> bool {
        !self.is_resistance
    }

    pub fn duration_hours(&self) -> f64 {
        (self.last_touch - self.first_touch).num_seconds() as f64 / 3600.0
    }

    /// Whether `other` describes the same level within `tolerance`
    pub fn same_level(&self, other: &PriceLevel, tolerance: f64) -> bool {
        self.is_resistance == other.is_resistance && (self.price - other.price).abs() <= tolerance
    }
}

/// Why a candidate level was not accepted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RejectReason {
    TooFewTouches { found: usize, required: usize },
    TooShort { hours: f64, required: f64 },
    WeakStrength { strength: f64, required: f64 },
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::TooFewTouches { found, required } => {
                write!(f, "touches {} < {}", found, required)
            }
            RejectReason::TooShort { hours, required } => {
                write!(f, "duration {:.1}h < {:.1}h", hours, required)
            }
            RejectReason::WeakStrength { strength, required } => {
                write!(f, "strength {:.3} < {:.3}", strength, required)
            }
        }
    }
}

/// A candidate that failed a gate, kept for the logging collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedLevel {
    pub price: f64,
    pub is_resistance: bool,
    pub reason: RejectReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DetectionStatus {
    Found,
    NoLevel,
    InsufficientData,
}

/// Output of one detection pass
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionResult {
    pub status: DetectionStatus,
    /// Strongest accepted level
    pub best: Option<PriceLevel>,
    /// All accepted levels, in detection order
    pub candidates: Vec<PriceLevel>,
    pub rejected: Vec<RejectedLevel>,
}

impl DetectionResult {
    fn empty(status: DetectionStatus) -> Self {
        Self {
            status,
            best: None,
            candidates: Vec::new(),
            rejected: Vec::new(),
        }
    }
}

/// A swing point found in the window
#[derive(Debug, Clone, Copy, PartialEq)]
struct Swing {
    /// Bars ago
    index: usize,
    price: f64,
    is_resistance: bool,
}

fn extreme(bar: &Bar, is_resistance: bool) -> f64 {
    if is_resistance {
        bar.high
    } else {
        bar.low
    }
}

/// `a` is beyond `b` in the level's direction (higher for highs, lower for lows)
fn beyond(a: f64, b: f64, is_resistance: bool) -> bool {
    if is_resistance {
        a > b
    } else {
        a < b
    }
}

/// Detects key levels from bar windows
#[derive(Debug, Clone)]
pub struct LevelDetector {
    config: EngineConfig,
}

impl LevelDetector {
    /// Create a detector; fails if the configuration is invalid
    pub fn new(config: EngineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run one detection pass over the newest `lookback_bars` of `series`
    pub fn detect(&self, series: &BarSeries) -> DetectionResult {
        let cfg = &self.config;
        let lookback = cfg.detector.lookback_bars.min(series.len());
        let window = &series.as_slice()[..lookback];

        let needed = (2 * cfg.swing_window() + 1).max(cfg.detector.min_touches);
        if window.len() < needed {
            debug!(
                "DETECT: insufficient data ({} bars, need {})",
                window.len(),
                needed
            );
            return DetectionResult::empty(DetectionStatus::InsufficientData);
        }

        let now = window[0].timestamp;
        let min_distance = cfg.key_level_min_distance();
        let mut result = DetectionResult::empty(DetectionStatus::NoLevel);

        for swing in self.find_swings(window) {
            let duplicate = result
                .candidates
                .iter()
                .any(|l| (l.price - swing.price).abs() <= min_distance);
            if duplicate {
                debug!("DETECT: {:.5} skipped, near an accepted level", swing.price);
                continue;
            }

            match self.evaluate_swing(window, swing, now) {
                Ok(level) => {
                    debug!(
                        "DETECT: accepted {} {:.5} | touches={} strength={:.3}",
                        if level.is_support() { "support" } else { "resistance" },
                        level.price,
                        level.touch_count,
                        level.strength
                    );
                    result.candidates.push(level);
                }
                Err(reason) => {
                    debug!("DETECT: rejected {:.5} | {}", swing.price, reason);
                    result.rejected.push(RejectedLevel {
                        price: swing.price,
                        is_resistance: swing.is_resistance,
                        reason,
                    });
                }
            }
        }

        result.best = select_best(&result.candidates).cloned();
        if result.best.is_some() {
            result.status = DetectionStatus::Found;
        }
        result
    }

    /// Swing highs and lows, newest first
    fn find_swings(&self, window: &[Bar]) -> Vec<Swing> {
        let sw = self.config.swing_window();
        let mut swings = Vec::new();
        if window.len() < 2 * sw + 1 {
            return swings;
        }

        for i in sw..window.len() - sw {
            for is_resistance in [true, false] {
                if self.is_swing(window, i, is_resistance) {
                    swings.push(Swing {
                        index: i,
                        price: extreme(&window[i], is_resistance),
                        is_resistance,
                    });
                }
            }
        }
        swings
    }

    fn is_swing(&self, window: &[Bar], i: usize, is_resistance: bool) -> bool {
        let cfg = &self.config;
        let sw = cfg.swing_window();
        let pivot = extreme(&window[i], is_resistance);

        // Strictly beyond every neighbour within the swing window,
        // by more than the minimum swing height
        let mut closest = None;
        for k in (i - sw..=i + sw).filter(|&k| k != i) {
            let p = extreme(&window[k], is_resistance);
            if !beyond(pivot, p, is_resistance) {
                return false;
            }
            closest = match closest {
                Some(c) if !beyond(p, c, is_resistance) => Some(c),
                _ => Some(p),
            };
        }
        let min_height = cfg.min_swing_height();
        if let Some(c) = closest {
            if min_height > 0.0 && (pivot - c).abs() <= min_height {
                return false;
            }
        }

        if cfg.detector.require_monotonic_slope {
            for j in 1..sw {
                // Newer side moves away from the pivot
                let a = extreme(&window[i - j], is_resistance);
                let b = extreme(&window[i - j - 1], is_resistance);
                if !beyond(a, b, is_resistance) {
                    return false;
                }
                // Older side moves away from the pivot
                let a = extreme(&window[i + j], is_resistance);
                let b = extreme(&window[i + j + 1], is_resistance);
                if !beyond(a, b, is_resistance) {
                    return false;
                }
            }
        }

        // Nothing in the wider neighbourhood goes further
        let ws = cfg.window_size();
        let lo = i.saturating_sub(ws);
        let hi = (i + ws).min(window.len() - 1);
        (lo..=hi)
            .filter(|&k| k != i)
            .all(|k| !beyond(extreme(&window[k], is_resistance), pivot, is_resistance))
    }

    fn evaluate_swing(
        &self,
        window: &[Bar],
        swing: Swing,
        now: DateTime<Utc>,
    ) -> Result<PriceLevel, RejectReason> {
        let cfg = &self.config;
        let (touches, rejected_touches) = self.count_touches(window, swing);
        if rejected_touches > 0 {
            debug!(
                "DETECT: {:.5} dropped {} spike touches",
                swing.price, rejected_touches
            );
        }

        let touch_count = touches.len();
        if touch_count < cfg.detector.min_touches {
            return Err(RejectReason::TooFewTouches {
                found: touch_count,
                required: cfg.detector.min_touches,
            });
        }

        // touches are newest first
        let last_touch = touches.first().map(|t| t.timestamp).unwrap_or(now);
        let first_touch = touches.last().map(|t| t.timestamp).unwrap_or(now);
        let mean_touch_quality =
            touches.iter().map(|t| t.strength).sum::<f64>() / touch_count as f64;
        let mut level = PriceLevel {
            price: swing.price,
            is_resistance: swing.is_resistance,
            first_touch,
            last_touch,
            touch_count,
            strength: 0.0,
            volume_confirmed: false,
            volume_ratio: self.origin_volume_ratio(window, swing.index),
            touches,
        };

        let duration_hours = level.duration_hours();
        if duration_hours < cfg.detector.min_level_duration_hours {
            return Err(RejectReason::TooShort {
                hours: duration_hours,
                required: cfg.detector.min_level_duration_hours,
            });
        }

        let inputs = StrengthInputs {
            touch_count,
            mean_touch_quality,
            hours_since_last_touch: (now - last_touch).num_seconds() as f64 / 3600.0,
            duration_hours,
            volume_ratio: level.volume_ratio,
        };
        let breakdown = score_level(&inputs, cfg);
        debug!(
            "SCORE: {:.5} | touch={:.3} recency={:.3} duration={:.3} vol_bonus={:.3} tf_bonus={:.3} => {:.3}",
            swing.price,
            breakdown.touch_score,
            breakdown.recency_score,
            breakdown.duration_score,
            breakdown.volume_bonus,
            breakdown.timeframe_bonus,
            breakdown.strength
        );

        if breakdown.strength < cfg.detector.min_strength {
            return Err(RejectReason::WeakStrength {
                strength: breakdown.strength,
                required: cfg.detector.min_strength,
            });
        }

        level.strength = breakdown.strength;
        level.volume_confirmed = breakdown.volume_confirmed;
        Ok(level)
    }

    /// Valid touches of the swing's price (newest first) and the number rejected
    fn count_touches(&self, window: &[Bar], swing: Swing) -> (Vec<Touch>, usize) {
        let cfg = &self.config;
        let zone = cfg.touch_zone();
        let spacing = cfg.detector.touch_spacing_bars.max(1);

        let mut touches: Vec<Touch> = Vec::new();
        let mut last_index: Option<usize> = None;
        let mut rejected = 0;

        for (k, bar) in window.iter().enumerate() {
            let price = extreme(bar, swing.is_resistance);
            if (price - swing.price).abs() > zone {
                continue;
            }

            // The swing bar itself always counts
            let touch = if k == swing.index {
                Touch {
                    timestamp: bar.timestamp,
                    price,
                    strength: 1.0,
                    is_valid: true,
                }
            } else {
                self.validate_touch(window, k, swing.price, swing.is_resistance)
            };

            if !touch.is_valid {
                rejected += 1;
                continue;
            }

            match (last_index, touches.last_mut()) {
                (Some(prev), Some(last)) if k - prev < spacing => {
                    if touch.strength > last.strength {
                        *last = touch;
                        last_index = Some(k);
                    }
                }
                _ => {
                    touches.push(touch);
                    last_index = Some(k);
                }
            }
        }

        (touches, rejected)
    }

    /// Check a bar's touch against its local context.
    ///
    /// A touch surrounded by bars whose mean range exceeds
    /// `max_touch_volatility * touch_zone` is treated as an isolated spike and
    /// rejected, unless a neighbour's extreme also lies within the zone.
    /// Neighbours cut off by the window edges are simply not inspected.
    fn validate_touch(&self, window: &[Bar], k: usize, level: f64, is_resistance: bool) -> Touch {
        let cfg = &self.config;
        let zone = cfg.touch_zone();
        let bar = &window[k];
        let price = extreme(bar, is_resistance);
        let proximity = 1.0 - 0.5 * ((price - level).abs() / zone).min(1.0);

        let lo = k.saturating_sub(TOUCH_CONTEXT_BARS);
        let hi = (k + TOUCH_CONTEXT_BARS).min(window.len() - 1);
        let neighbours: Vec<&Bar> = (lo..=hi).filter(|&n| n != k).map(|n| &window[n]).collect();

        let mut touch = Touch {
            timestamp: bar.timestamp,
            price,
            strength: proximity,
            is_valid: true,
        };
        if neighbours.is_empty() {
            return touch;
        }

        let mean_range = neighbours.iter().map(|b| b.range()).sum::<f64>() / neighbours.len() as f64;
        let limit = cfg.detector.max_touch_volatility * zone;

        if mean_range <= limit {
            touch.strength = proximity * (1.0 - 0.5 * mean_range / limit).clamp(0.5, 1.0);
            return touch;
        }

        let corroborated = neighbours
            .iter()
            .any(|b| (extreme(b, is_resistance) - level).abs() <= zone);
        if corroborated {
            touch.strength = proximity * 0.5;
        } else {
            touch.is_valid = false;
        }
        touch
    }

    /// Origin bar volume relative to the bars before it
    fn origin_volume_ratio(&self, window: &[Bar], index: usize) -> f64 {
        let lookback = self.config.scoring.volume_lookback.max(1);
        let prior: Vec<f64> = window
            .iter()
            .skip(index + 1)
            .take(lookback)
            .map(|b| b.volume)
            .collect();
        let avg = if prior.is_empty() {
            window.iter().map(|b| b.volume).sum::<f64>() / window.len() as f64
        } else {
            prior.iter().sum::<f64>() / prior.len() as f64
        };
        if avg > 0.0 {
            window[index].volume / avg
        } else {
            1.0
        }
    }
}

/// Pick the strongest level.
///
/// Ties (within 1e-9) go to the earliest first touch, then the lower price.
pub fn select_best(levels: &[PriceLevel]) -> Option<&PriceLevel> {
    levels.iter().min_by(|a, b| {
        if (a.strength - b.strength).abs() > STRENGTH_TIE_EPSILON {
            return b.strength.total_cmp(&a.strength);
        }
        a.first_touch
            .cmp(&b.first_touch)
            .then_with(|| a.price.total_cmp(&b.price))
    })
}

/// One-shot detection with a config; configuration errors are returned distinctly
pub fn detect_levels(series: &BarSeries, config: &EngineConfig) -> Result<DetectionResult, ConfigError> {
    let detector = LevelDetector::new(config.clone())?;
    Ok(detector.detect(series))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trading_core::scoring::touch_base;
    use crate::trading_core::timeframe::Timeframe;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 6, 12, 0, 0).unwrap()
    }

    /// Bars from newest-first (high, low) pairs, one hour apart
    fn series_from_highs_lows(rows: &[(f64, f64)]) -> BarSeries {
        let bars = rows
            .iter()
            .enumerate()
            .map(|(i, &(high, low))| {
                let open = low + (high - low) * 0.3;
                let close = low + (high - low) * 0.6;
                Bar::new(now() - Duration::hours(i as i64), open, high, low, close, 100.0)
            })
            .collect();
        BarSeries::from_newest_first(bars)
    }

    fn scenario_config() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.timeframe = Timeframe::H1;
        config.detector.lookback_bars = 10;
        config.history_bars = 10;
        config.detector.swing_window = Some(2);
        config.detector.window_size = Some(4);
        config.detector.min_swing_height_pips = Some(5.0);
        config.detector.touch_zone_pips = Some(5.0);
        config.detector.key_level_min_distance_pips = 5.0;
        config.detector.min_touches = 3;
        config.detector.min_level_duration_hours = 1.0;
        config
    }

    /// 9 bars: bar 5 is a swing high at 1.1000, bars 0-2 come back within 5 pips
    fn scenario_series() -> BarSeries {
        let highs = [1.0998, 1.0997, 1.0999, 1.0985, 1.0980, 1.1000, 1.0985, 1.0975, 1.0970];
        let lows = [1.0988, 1.0987, 1.0989, 1.0975, 1.0972, 1.0990, 1.0975, 1.0965, 1.0960];
        let rows: Vec<(f64, f64)> = highs.iter().zip(lows.iter()).map(|(&h, &l)| (h, l)).collect();
        series_from_highs_lows(&rows)
    }

    #[test]
    fn test_swing_high_with_three_later_touches() {
        let detector = LevelDetector::new(scenario_config()).unwrap();
        let result = detector.detect(&scenario_series());

        assert_eq!(result.status, DetectionStatus::Found);
        let level = result.best.expect("level");
        assert!(level.is_resistance);
        assert!((level.price - 1.1000).abs() < 1e-12);
        // Inclusive convention: the origin bar plus three later touches
        assert_eq!(level.touch_count, 4);
        assert!(level.strength >= touch_base(3));
        assert_eq!(level.first_touch, now() - Duration::hours(5));
        assert_eq!(level.last_touch, now());
    }

    #[test]
    fn test_touch_count_matches_valid_touches() {
        let detector = LevelDetector::new(scenario_config()).unwrap();
        let result = detector.detect(&scenario_series());
        for level in &result.candidates {
            assert_eq!(level.touch_count, level.touches.len());
            assert!(level.touches.iter().all(|t| t.is_valid));
            assert!(level.first_touch <= level.last_touch);
        }
    }

    #[test]
    fn test_detection_is_deterministic() {
        let detector = LevelDetector::new(scenario_config()).unwrap();
        let series = scenario_series();
        assert_eq!(detector.detect(&series), detector.detect(&series));
    }

    #[test]
    fn test_min_touches_gate() {
        let mut config = scenario_config();
        config.detector.min_touches = 5;
        // Make any passing level trivially strong enough
        config.detector.min_strength = 0.0;
        let result = detect_levels(&scenario_series(), &config).unwrap();

        assert!(result.best.is_none());
        assert_eq!(result.status, DetectionStatus::NoLevel);
        assert!(result.rejected.iter().any(|r| matches!(
            r.reason,
            RejectReason::TooFewTouches { found: 4, required: 5 }
        )));
    }

    #[test]
    fn test_min_duration_gate() {
        let mut config = scenario_config();
        config.detector.min_level_duration_hours = 10.0;
        let result = detect_levels(&scenario_series(), &config).unwrap();
        assert!(result.best.is_none());
        assert!(matches!(result.rejected[0].reason, RejectReason::TooShort { .. }));
    }

    #[test]
    fn test_insufficient_data_is_neutral() {
        let detector = LevelDetector::new(scenario_config()).unwrap();
        let short = series_from_highs_lows(&[(1.1, 1.0), (1.2, 1.1), (1.1, 1.0)]);
        let result = detector.detect(&short);
        assert_eq!(result.status, DetectionStatus::InsufficientData);
        assert!(result.best.is_none());
    }

    #[test]
    fn test_invalid_weights_refuse_detection() {
        let mut config = scenario_config();
        config.scoring.weights.recency = 0.9;
        assert!(matches!(
            detect_levels(&scenario_series(), &config),
            Err(ConfigError::WeightsNotNormalized { .. })
        ));
    }

    #[test]
    fn test_swing_height_filter() {
        let mut config = scenario_config();
        // Swing stands 15 pips above its neighbours
        config.detector.min_swing_height_pips = Some(20.0);
        let result = detect_levels(&scenario_series(), &config).unwrap();
        assert!(result.best.is_none());
        assert!(result.rejected.is_empty());
    }

    #[test]
    fn test_monotonic_slope_requirement() {
        let mut config = scenario_config();
        config.detector.require_monotonic_slope = true;
        // Bar 4 dips below bar 3 on the way down from the swing
        let result = detect_levels(&scenario_series(), &config).unwrap();
        assert!(result.best.is_none());
        assert!(result.rejected.is_empty());

        let mut rows: Vec<(f64, f64)> = scenario_series()
            .iter()
            .map(|b| (b.high, b.low))
            .collect();
        rows[4].0 = 1.0986;
        let result = detect_levels(&series_from_highs_lows(&rows), &config).unwrap();
        let level = result.best.expect("level");
        assert!((level.price - 1.1000).abs() < 1e-12);
        assert_eq!(level.touch_count, 4);
    }

    #[test]
    fn test_touch_spacing_merges_adjacent_touches() {
        let mut config = scenario_config();
        config.detector.min_touches = 2;
        config.detector.min_strength = 0.0;

        let resistance = |config: &EngineConfig| {
            detect_levels(&scenario_series(), config)
                .unwrap()
                .candidates
                .into_iter()
                .find(|l| l.is_resistance && (l.price - 1.1000).abs() < 1e-12)
                .expect("resistance")
        };

        // Bars 0 and 1 merge, keeping bar 0; bar 2 starts a new touch
        config.detector.touch_spacing_bars = 2;
        let level = resistance(&config);
        assert_eq!(level.touch_count, 3);
        assert_eq!(level.touches[0].timestamp, now());

        // Bars 0-2 collapse into bar 2, the closest to the level
        config.detector.touch_spacing_bars = 3;
        let level = resistance(&config);
        assert_eq!(level.touch_count, 2);
        assert_eq!(level.touches.len(), 2);
        assert_eq!(level.last_touch, now() - Duration::hours(2));
        assert!((level.touches[0].price - 1.0999).abs() < 1e-12);
    }

    #[test]
    fn test_origin_volume_confirms_level() {
        let config = scenario_config();
        let base = detect_levels(&scenario_series(), &config).unwrap().best.expect("level");
        assert!(!base.volume_confirmed);
        assert!((base.volume_ratio - 1.0).abs() < 1e-12);

        let mut bars = scenario_series().as_slice().to_vec();
        bars[5].volume = 300.0;
        let heavy = BarSeries::from_newest_first(bars);
        let level = detect_levels(&heavy, &config).unwrap().best.expect("level");
        assert!(level.volume_confirmed);
        assert!((level.volume_ratio - 3.0).abs() < 1e-12);
        assert!(level.strength > base.strength);
    }

    #[test]
    fn test_interior_spike_touch_rejected() {
        let config = scenario_config();
        let detector = LevelDetector::new(config).unwrap();
        // Bar 2 touches 1.1000 but its neighbours swing 40 pips each
        let rows = [
            (1.1040, 1.1000),
            (1.1030, 1.0990),
            (1.0999, 1.0995),
            (1.1020, 1.0980),
            (1.1010, 1.0970),
            (1.0990, 1.0985),
            (1.0990, 1.0985),
        ];
        let series = series_from_highs_lows(&rows);
        let touch = detector.validate_touch(series.as_slice(), 2, 1.1000, true);
        assert!(!touch.is_valid);
    }

    #[test]
    fn test_edge_touch_kept_when_corroborated() {
        let detector = LevelDetector::new(scenario_config()).unwrap();
        // Oldest bar touches; its newer neighbour is volatile but also reaches the zone
        let rows = [
            (1.0950, 1.0945),
            (1.0950, 1.0945),
            (1.0950, 1.0945),
            (1.1003, 1.0940),
            (1.0998, 1.0996),
        ];
        let series = series_from_highs_lows(&rows);
        let touch = detector.validate_touch(series.as_slice(), 4, 1.1000, true);
        assert!(touch.is_valid);
        assert!(touch.strength <= 0.5);
    }

    #[test]
    fn test_dedup_near_levels() {
        let mut config = scenario_config();
        config.detector.min_touches = 1;
        config.detector.min_level_duration_hours = 0.0;
        config.detector.min_strength = 0.0;
        let result = detect_levels(&scenario_series(), &config).unwrap();
        for (i, a) in result.candidates.iter().enumerate() {
            for b in &result.candidates[i + 1..] {
                assert!((a.price - b.price).abs() > config.key_level_min_distance());
            }
        }
    }

    fn level(price: f64, strength: f64, first_hours_ago: i64) -> PriceLevel {
        PriceLevel {
            price,
            is_resistance: true,
            first_touch: now() - Duration::hours(first_hours_ago),
            last_touch: now(),
            touch_count: 2,
            strength,
            volume_confirmed: false,
            volume_ratio: 1.0,
            touches: Vec::new(),
        }
    }

    #[test]
    fn test_tie_break_earliest_first_touch() {
        let levels = vec![level(1.2, 0.8, 5), level(1.1, 0.8, 10), level(1.3, 0.7, 50)];
        let best = select_best(&levels).unwrap();
        assert_eq!(best.price, 1.1);

        let levels = vec![level(1.3, 0.8, 10), level(1.1, 0.8, 10)];
        assert_eq!(select_best(&levels).unwrap().price, 1.1);

        let levels = vec![level(1.3, 0.6, 10), level(1.1, 0.9, 1)];
        assert_eq!(select_best(&levels).unwrap().price, 1.1);
    }
}
