//! Indicators computed over newest-first bar series

use super::bars::{Bar, BarSeries};

fn true_range(bar: &Bar, prev_close: f64) -> f64 {
    (bar.high - bar.low)
        .max((bar.high - prev_close).abs())
        .max((bar.low - prev_close).abs())
}

/// Wilder-smoothed Average True Range.
///
/// Uses every available bar: the first `period` true ranges seed a simple
/// average, later ones are smoothed. Returns `None` with fewer than
/// `period + 1` bars.
pub fn atr(series: &BarSeries, period: usize) -> Option<f64> {
    if period == 0 || series.len() < period + 1 {
        return None;
    }

    // Walk oldest to newest
    let bars: Vec<&Bar> = series.iter().rev().collect();
    let mut prev_close = bars[0].close;
    let mut trs = Vec::with_capacity(bars.len() - 1);
    for bar in bars.iter().skip(1) {
        trs.push(true_range(bar, prev_close));
        prev_close = bar.close;
    }

    let mut value = trs[..period].iter().sum::<f64>() / period as f64;
    for tr in &trs[period..] {
        value = (value * (period as f64 - 1.0) + tr) / period as f64;
    }
    Some(value)
}

/// Mean of `count` newest-first volumes after skipping the newest `skip`.
///
/// Uses whatever values exist if fewer than `count` remain; `None` if none do.
pub fn mean_volume(volumes: &[f64], skip: usize, count: usize) -> Option<f64> {
    let window: Vec<f64> = volumes.iter().skip(skip).take(count).copied().collect();
    if window.is_empty() {
        return None;
    }
    Some(window.iter().sum::<f64>() / window.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn series(ranges: &[(f64, f64, f64, f64)]) -> BarSeries {
        let base = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        let bars = ranges
            .iter()
            .enumerate()
            .map(|(i, &(o, h, l, c))| Bar::new(base + Duration::hours(i as i64), o, h, l, c, 100.0 + i as f64))
            .collect();
        BarSeries::from_oldest_first(bars)
    }

    #[test]
    fn test_atr_constant_range() {
        let s = series(&[(1.0, 1.5, 0.5, 1.0); 20]);
        let value = atr(&s, 14).unwrap();
        assert!((value - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_atr_uses_gaps() {
        // Second bar gaps up: TR = high - prev close = 3.0
        let s = series(&[(1.0, 1.0, 1.0, 1.0), (3.5, 4.0, 3.5, 4.0)]);
        assert_eq!(atr(&s, 1), Some(3.0));
    }

    #[test]
    fn test_atr_insufficient_bars() {
        let s = series(&[(1.0, 1.5, 0.5, 1.0); 5]);
        assert_eq!(atr(&s, 14), None);
        assert_eq!(atr(&s, 0), None);
    }

    #[test]
    fn test_mean_volume_skips_newest() {
        // volumes oldest-first: 100, 101, 102, 103 -> newest-first 103, 102, 101, 100
        let s = series(&[(1.0, 1.0, 1.0, 1.0); 4]);
        assert_eq!(mean_volume(&s.volumes(), 2, 20), Some(100.5));
        assert_eq!(mean_volume(&s.volumes(), 4, 20), None);
        assert_eq!(mean_volume(&[300.0, 200.0, 100.0, 50.0], 2, 1), Some(100.0));
    }
}
