// Library crate - key level detection, breakout validation and retest protocol

pub mod trading_core;
pub mod streams;

// Re-export commonly used types
pub use trading_core::*;
