//! Chart timeframes and their per-timeframe detection constants

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::error::ParseTimeframeError;

/// Chart timeframe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    M1,
    M5,
    M15,
    M30,
    H1,
    H4,
    D1,
    W1,
}

/// Constants used by level detection for one timeframe
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeframeProfile {
    /// Bars on each side a swing must exceed
    pub swing_window: usize,
    /// Wider neighbourhood in which a swing must be the extreme
    pub window_size: usize,
    /// Minimum swing height over its neighbours (pips)
    pub min_swing_height_pips: f64,
    /// Default touch tolerance (pips)
    pub touch_zone_pips: f64,
    /// Additive strength bonus
    pub strength_bonus: f64,
}

const PROFILES: [TimeframeProfile; 8] = [
    // M1
    TimeframeProfile { swing_window: 2, window_size: 10, min_swing_height_pips: 3.0, touch_zone_pips: 3.0, strength_bonus: 0.0 },
    // M5
    TimeframeProfile { swing_window: 2, window_size: 15, min_swing_height_pips: 5.0, touch_zone_pips: 5.0, strength_bonus: 0.0 },
    // M15
    TimeframeProfile { swing_window: 3, window_size: 20, min_swing_height_pips: 8.0, touch_zone_pips: 7.0, strength_bonus: 0.01 },
    // M30
    TimeframeProfile { swing_window: 3, window_size: 25, min_swing_height_pips: 10.0, touch_zone_pips: 10.0, strength_bonus: 0.02 },
    // H1
    TimeframeProfile { swing_window: 3, window_size: 30, min_swing_height_pips: 15.0, touch_zone_pips: 15.0, strength_bonus: 0.03 },
    // H4
    TimeframeProfile { swing_window: 4, window_size: 40, min_swing_height_pips: 25.0, touch_zone_pips: 25.0, strength_bonus: 0.05 },
    // D1
    TimeframeProfile { swing_window: 5, window_size: 50, min_swing_height_pips: 50.0, touch_zone_pips: 50.0, strength_bonus: 0.08 },
    // W1
    TimeframeProfile { swing_window: 5, window_size: 60, min_swing_height_pips: 100.0, touch_zone_pips: 100.0, strength_bonus: 0.10 },
];

impl Timeframe {
    pub const ALL: [Timeframe; 8] = [
        Timeframe::M1,
        Timeframe::M5,
        Timeframe::M15,
        Timeframe::M30,
        Timeframe::H1,
        Timeframe::H4,
        Timeframe::D1,
        Timeframe::W1,
    ];

    /// Length of one bar in minutes
    pub fn minutes(&self) -> u32 {
        match self {
            Timeframe::M1 => 1,
            Timeframe::M5 => 5,
            Timeframe::M15 => 15,
            Timeframe::M30 => 30,
            Timeframe::H1 => 60,
            Timeframe::H4 => 240,
            Timeframe::D1 => 1440,
            Timeframe::W1 => 10080,
        }
    }

    pub fn duration(&self) -> Duration {
        Duration::minutes(self.minutes() as i64)
    }

    /// Offset of bucket boundaries from the unix epoch. Weekly bars open on
    /// Sunday 00:00 UTC; the epoch itself fell on a Thursday.
    pub fn bucket_offset(&self) -> Duration {
        match self {
            Timeframe::W1 => Duration::days(3),
            _ => Duration::zero(),
        }
    }

    /// Hours covered by `bars` bars of this timeframe
    pub fn hours_for_bars(&self, bars: usize) -> f64 {
        bars as f64 * self.minutes() as f64 / 60.0
    }

    pub fn profile(&self) -> &'static TimeframeProfile {
        &PROFILES[*self as usize]
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Timeframe::M1 => write!(f, "M1"),
            Timeframe::M5 => write!(f, "M5"),
            Timeframe::M15 => write!(f, "M15"),
            Timeframe::M30 => write!(f, "M30"),
            Timeframe::H1 => write!(f, "H1"),
            Timeframe::H4 => write!(f, "H4"),
            Timeframe::D1 => write!(f, "D1"),
            Timeframe::W1 => write!(f, "W1"),
        }
    }
}

impl FromStr for Timeframe {
    type Err = ParseTimeframeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "M1" => Ok(Timeframe::M1),
            "M5" => Ok(Timeframe::M5),
            "M15" => Ok(Timeframe::M15),
            "M30" => Ok(Timeframe::M30),
            "H1" => Ok(Timeframe::H1),
            "H4" => Ok(Timeframe::H4),
            "D1" => Ok(Timeframe::D1),
            "W1" => Ok(Timeframe::W1),
            other => Err(ParseTimeframeError(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strength_bonus_monotonic() {
        let bonuses: Vec<f64> = Timeframe::ALL.iter().map(|tf| tf.profile().strength_bonus).collect();
        assert!(bonuses.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_swing_window_bounds() {
        for tf in Timeframe::ALL {
            let p = tf.profile();
            assert!((2..=5).contains(&p.swing_window), "{} swing window", tf);
            assert!(p.window_size > p.swing_window);
        }
    }

    #[test]
    fn test_parse_timeframe() {
        assert_eq!("h4".parse::<Timeframe>().unwrap(), Timeframe::H4);
        assert_eq!(Timeframe::M15.to_string(), "M15");
        assert_eq!(
            "M2".parse::<Timeframe>(),
            Err(ParseTimeframeError("M2".to_string()))
        );
        assert_eq!(Timeframe::H1.hours_for_bars(24), 24.0);
    }
}
