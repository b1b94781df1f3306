//! Post-trade zone lockout
//!
//! After a signal the traded zone is locked. New breakouts are ignored until
//! a later bar trades at least `max(ATR * multiplier, floor)` away.

use serde::{Deserialize, Serialize};

use super::config::EngineConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockoutZone {
    pub active_price: f64,
    /// true = long
    pub direction: bool,
    pub active: bool,
    /// Bar index at which the zone was locked
    pub set_at_bar: u64,
    atr_multiplier: f64,
    /// Release distance without ATR, price units
    floor: f64,
}

impl LockoutZone {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            active_price: 0.0,
            direction: true,
            active: false,
            set_at_bar: 0,
            atr_multiplier: config.lockout.atr_multiplier,
            floor: config.lockout_floor(),
        }
    }

    /// Lock the zone around `price`
    pub fn engage(&mut self, price: f64, is_bullish: bool, bar_index: u64) {
        self.active_price = price;
        self.direction = is_bullish;
        self.active = true;
        self.set_at_bar = bar_index;
    }

    pub fn clear(&mut self) {
        self.active = false;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Release distance; the floor applies when ATR is missing
    pub fn threshold(&self, atr: Option<f64>) -> f64 {
        match atr {
            Some(a) if a > 0.0 => (a * self.atr_multiplier).max(self.floor),
            _ => self.floor,
        }
    }

    /// Release the lock if a later bar has moved far enough. Returns true on release.
    pub fn try_release(&mut self, bar_index: u64, price: f64, atr: Option<f64>) -> bool {
        if !self.active {
            return false;
        }
        if bar_index <= self.set_at_bar {
            return false;
        }
        if (price - self.active_price).abs() < self.threshold(atr) {
            return false;
        }
        self.clear();
        true
    }
}
