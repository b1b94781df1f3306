//! Candlestick confirmation patterns

use super::bars::{Bar, BarSeries};

/// Bearish candle followed by a larger bullish candle that swallows its body
pub fn is_bullish_engulfing(prev: &Bar, curr: &Bar) -> bool {
    prev.is_bearish()
        && curr.is_bullish()
        && curr.open <= prev.close
        && curr.close >= prev.open
        && curr.body() > prev.body()
}

/// Bullish candle followed by a larger bearish candle that swallows its body
pub fn is_bearish_engulfing(prev: &Bar, curr: &Bar) -> bool {
    prev.is_bullish()
        && curr.is_bearish()
        && curr.open >= prev.close
        && curr.close <= prev.open
        && curr.body() > prev.body()
}

/// Engulfing pattern in the trade direction on the two newest bars
pub fn engulfing_confirms(series: &BarSeries, is_bullish: bool) -> bool {
    match (series.get(1), series.get(0)) {
        (Some(prev), Some(curr)) if is_bullish => is_bullish_engulfing(prev, curr),
        (Some(prev), Some(curr)) => is_bearish_engulfing(prev, curr),
        _ => false,
    }
}
