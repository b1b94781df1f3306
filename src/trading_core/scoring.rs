//! Level strength scoring
//!
//! Strength is a weighted sum of normalized touch, recency and duration
//! sub-scores, plus additive volume and timeframe bonuses, clamped to
//! [`MIN_STRENGTH`, `MAX_STRENGTH`].

use super::config::{EngineConfig, ScoringPolicy, TouchScoring};

pub const MIN_STRENGTH: f64 = 0.45;
pub const MAX_STRENGTH: f64 = 0.98;

/// Duration ratio at which the duration sub-score saturates
const DURATION_CAP_RATIO: f64 = 1.5;

/// Inputs to the strength calculation for one level
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StrengthInputs {
    pub touch_count: usize,
    /// Mean touch strength in [0, 1]
    pub mean_touch_quality: f64,
    pub hours_since_last_touch: f64,
    /// Hours between first and last touch
    pub duration_hours: f64,
    /// Origin bar volume / trailing average volume
    pub volume_ratio: f64,
}

/// Strength with its components, for logging
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StrengthBreakdown {
    pub touch_score: f64,
    pub recency_score: f64,
    pub duration_score: f64,
    pub volume_bonus: f64,
    pub timeframe_bonus: f64,
    pub volume_confirmed: bool,
    pub strength: f64,
}

/// Step function of the touch count
pub fn touch_base(touch_count: usize) -> f64 {
    match touch_count {
        0 | 1 => 0.35,
        2 => 0.50,
        3 => 0.68,
        4 => 0.80,
        n => (0.90 + 0.01 * (n - 5) as f64).min(0.95),
    }
}

pub fn touch_score(inputs: &StrengthInputs, mode: TouchScoring) -> f64 {
    let base = touch_base(inputs.touch_count);
    match mode {
        TouchScoring::Count => base,
        TouchScoring::Quality => base * (0.7 + 0.3 * inputs.mean_touch_quality.clamp(0.0, 1.0)),
    }
}

/// Banded recency modifier keyed to the fraction of the lookback elapsed
pub fn banded_recency_modifier(hours_since: f64, lookback_hours: f64) -> f64 {
    if lookback_hours <= 0.0 {
        return 1.0;
    }
    let fraction = hours_since.max(0.0) / lookback_hours;
    if fraction <= 0.1 {
        1.3
    } else if fraction <= 0.25 {
        1.2
    } else if fraction <= 0.5 {
        1.1
    } else if fraction <= 1.0 {
        1.0
    } else {
        0.4
    }
}

pub fn recency_score(hours_since: f64, lookback_hours: f64, policy: ScoringPolicy, k: f64) -> f64 {
    match policy {
        ScoringPolicy::ExponentialRecency => {
            let scale = lookback_hours * k;
            if scale <= 0.0 {
                return 1.0;
            }
            (-hours_since.max(0.0) / scale).exp()
        }
        ScoringPolicy::BandedRecency => banded_recency_modifier(hours_since, lookback_hours) / 1.3,
    }
}

/// Logarithmic duration score saturating at `DURATION_CAP_RATIO` times the reference
pub fn duration_score(duration_hours: f64, reference_hours: f64) -> f64 {
    if reference_hours <= 0.0 {
        return 1.0;
    }
    let ratio = (duration_hours.max(0.0) / reference_hours).min(DURATION_CAP_RATIO);
    (1.0 + ratio).ln() / (1.0 + DURATION_CAP_RATIO).ln()
}

/// Additive volume bonus; zero unless the ratio reaches the multiplier
pub fn volume_bonus(volume_ratio: f64, multiplier: f64, factor: f64, max_bonus: f64) -> f64 {
    if volume_ratio < multiplier {
        return 0.0;
    }
    ((volume_ratio - 1.0) * factor).clamp(0.0, max_bonus)
}

/// Score a level
pub fn score_level(inputs: &StrengthInputs, config: &EngineConfig) -> StrengthBreakdown {
    let scoring = &config.scoring;
    let lookback_hours = config.lookback_hours();

    let touch = touch_score(inputs, scoring.touch_scoring);
    let recency = recency_score(
        inputs.hours_since_last_touch,
        lookback_hours,
        scoring.policy,
        scoring.recency_decay_k,
    );
    // Without a minimum duration, measure against a quarter of the lookback
    let reference = if config.detector.min_level_duration_hours > 0.0 {
        config.detector.min_level_duration_hours
    } else {
        lookback_hours / 4.0
    };
    let duration = duration_score(inputs.duration_hours, reference);

    let volume_confirmed = inputs.volume_ratio >= scoring.volume_multiplier;
    let vol_bonus = volume_bonus(
        inputs.volume_ratio,
        scoring.volume_multiplier,
        scoring.volume_bonus_factor,
        scoring.max_volume_bonus,
    );
    let tf_bonus = if scoring.timeframe_bonus {
        config.timeframe.profile().strength_bonus
    } else {
        0.0
    };

    let w = &scoring.weights;
    let raw = w.touch * touch + w.recency * recency + w.duration * duration + vol_bonus + tf_bonus;

    StrengthBreakdown {
        touch_score: touch,
        recency_score: recency,
        duration_score: duration,
        volume_bonus: vol_bonus,
        timeframe_bonus: tf_bonus,
        volume_confirmed,
        strength: raw.clamp(MIN_STRENGTH, MAX_STRENGTH),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(touch_count: usize) -> StrengthInputs {
        StrengthInputs {
            touch_count,
            mean_touch_quality: 0.9,
            hours_since_last_touch: 10.0,
            duration_hours: 40.0,
            volume_ratio: 1.0,
        }
    }

    #[test]
    fn test_touch_base_steps() {
        assert_eq!(touch_base(2), 0.50);
        assert_eq!(touch_base(3), 0.68);
        assert_eq!(touch_base(4), 0.80);
        assert_eq!(touch_base(5), 0.90);
        assert!((touch_base(7) - 0.92).abs() < 1e-12);
        assert_eq!(touch_base(50), 0.95);
    }

    #[test]
    fn test_strength_monotonic_in_touches() {
        for policy in [ScoringPolicy::BandedRecency, ScoringPolicy::ExponentialRecency] {
            let mut config = EngineConfig::default();
            config.scoring.policy = policy;
            let mut prev = 0.0;
            for n in 0..20 {
                let s = score_level(&inputs(n), &config).strength;
                assert!(s >= prev, "strength dropped at {} touches", n);
                assert!((MIN_STRENGTH..=MAX_STRENGTH).contains(&s));
                prev = s;
            }
        }
    }

    #[test]
    fn test_quality_touch_scoring() {
        let mut worn = inputs(4);
        worn.mean_touch_quality = 0.5;
        assert_eq!(touch_score(&worn, TouchScoring::Count), 0.80);
        assert!((touch_score(&worn, TouchScoring::Quality) - 0.80 * 0.85).abs() < 1e-12);

        let mut clean = worn;
        clean.mean_touch_quality = 1.0;
        assert!((touch_score(&clean, TouchScoring::Quality) - 0.80).abs() < 1e-12);

        let mut config = EngineConfig::default();
        let by_count = score_level(&worn, &config);
        config.scoring.touch_scoring = TouchScoring::Quality;
        let by_quality = score_level(&worn, &config);
        assert!(by_quality.touch_score < by_count.touch_score);
        assert!(by_quality.strength <= by_count.strength);
    }

    #[test]
    fn test_strength_clamped() {
        let mut config = EngineConfig::default();
        config.scoring.max_volume_bonus = 1.0;
        config.scoring.volume_bonus_factor = 1.0;
        let mut big = inputs(30);
        big.volume_ratio = 10.0;
        big.hours_since_last_touch = 0.0;
        assert_eq!(score_level(&big, &config).strength, MAX_STRENGTH);

        let mut weak = inputs(0);
        weak.hours_since_last_touch = 1e6;
        weak.duration_hours = 0.0;
        assert_eq!(score_level(&weak, &config).strength, MIN_STRENGTH);
    }

    #[test]
    fn test_recency_policies() {
        assert_eq!(recency_score(0.0, 100.0, ScoringPolicy::ExponentialRecency, 0.5), 1.0);
        let half = recency_score(50.0, 100.0, ScoringPolicy::ExponentialRecency, 0.5);
        assert!((half - (-1.0f64).exp()).abs() < 1e-12);

        assert_eq!(recency_score(5.0, 100.0, ScoringPolicy::BandedRecency, 0.5), 1.0);
        assert!((recency_score(80.0, 100.0, ScoringPolicy::BandedRecency, 0.5) - 1.0 / 1.3).abs() < 1e-12);
        assert!((recency_score(150.0, 100.0, ScoringPolicy::BandedRecency, 0.5) - 0.4 / 1.3).abs() < 1e-12);
    }

    #[test]
    fn test_duration_score_caps() {
        assert_eq!(duration_score(0.0, 4.0), 0.0);
        assert!((duration_score(6.0, 4.0) - 1.0).abs() < 1e-12);
        assert!((duration_score(100.0, 4.0) - 1.0).abs() < 1e-12);
        assert!(duration_score(2.0, 4.0) < duration_score(4.0, 4.0));
    }

    #[test]
    fn test_volume_bonus() {
        assert_eq!(volume_bonus(1.4, 1.5, 0.1, 0.15), 0.0);
        assert!((volume_bonus(2.0, 1.5, 0.1, 0.15) - 0.1).abs() < 1e-12);
        assert_eq!(volume_bonus(5.0, 1.5, 0.1, 0.15), 0.15);
    }
}
