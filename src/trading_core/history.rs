//! Historical bar loading from CSV files
//!
//! Expected columns: `timestamp,open,high,low,close,volume`. Timestamps may be
//! RFC 3339, `YYYY-MM-DD HH:MM:SS`, `YYYY.MM.DD HH:MM` (MetaTrader export) or
//! unix seconds. Rows are returned oldest first.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::bars::Bar;

#[derive(Debug, Deserialize)]
struct CsvRow {
    timestamp: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    #[serde(default)]
    volume: f64,
}

const NAIVE_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y.%m.%d %H:%M:%S",
    "%Y.%m.%d %H:%M",
];

/// Parse a bar timestamp in any of the supported formats (naive times are UTC)
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(naive.and_utc());
        }
    }
    raw.parse::<i64>()
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
}

/// Load bars from a CSV file, sorted oldest first
pub fn load_bars_csv(path: &Path) -> Result<Vec<Bar>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("Failed to open bar file: {:?}", path))?;

    let mut bars = Vec::new();
    for (line, result) in reader.deserialize().enumerate() {
        let row: CsvRow = result.with_context(|| format!("Failed to parse row {} of {:?}", line + 2, path))?;
        let Some(timestamp) = parse_timestamp(&row.timestamp) else {
            bail!("Unrecognised timestamp '{}' on row {} of {:?}", row.timestamp, line + 2, path);
        };
        if row.high < row.low {
            debug!("Skipping inverted bar at {} in {:?}", row.timestamp, path);
            continue;
        }
        bars.push(Bar::new(timestamp, row.open, row.high, row.low, row.close, row.volume));
    }

    bars.sort_by_key(|b| b.timestamp);
    bars.dedup_by_key(|b| b.timestamp);
    info!("Loaded {} bars from {:?}", bars.len(), path);
    Ok(bars)
}

/// Find all .csv files in a directory, optionally filtered by file stem.
///
/// The filter is either a substring (`"EURUSD"`) or an inclusive stem range
/// (`"EURUSD_2023:EURUSD_2024"`).
pub fn list_bar_files(dir: &Path, filter: Option<&str>) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for entry in std::fs::read_dir(dir).with_context(|| format!("Failed to read directory: {:?}", dir))? {
        let path = entry?.path();
        if !path.extension().map_or(false, |ext| ext == "csv") {
            continue;
        }
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();

        let keep = match filter {
            None => true,
            Some(f) => match f.split_once(':') {
                Some((start, end)) => stem.as_str() >= start && stem.as_str() <= end,
                None => stem.contains(f),
            },
        };
        if keep {
            files.push(path);
        }
    }

    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::io::Write;

    #[test]
    fn test_parse_timestamp_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 0).unwrap();
        assert_eq!(parse_timestamp("2024-01-02T03:04:00Z"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-02 03:04:00"), Some(expected));
        assert_eq!(parse_timestamp("2024.01.02 03:04"), Some(expected));
        assert_eq!(parse_timestamp(&expected.timestamp().to_string()), Some(expected));
        assert_eq!(parse_timestamp("yesterday"), None);
    }

    #[test]
    fn test_load_sorts_and_dedups() {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        writeln!(file, "timestamp,open,high,low,close,volume").unwrap();
        writeln!(file, "2024-01-02 01:00:00,1.1,1.2,1.0,1.15,10").unwrap();
        writeln!(file, "2024-01-02 00:00:00,1.0,1.1,0.9,1.05,20").unwrap();
        writeln!(file, "2024-01-02 00:00:00,1.0,1.1,0.9,1.05,20").unwrap();
        file.flush().unwrap();

        let bars = load_bars_csv(file.path()).unwrap();
        assert_eq!(bars.len(), 2);
        assert!(bars[0].timestamp < bars[1].timestamp);
        assert_eq!(bars[0].volume, 20.0);
    }

    #[test]
    fn test_bad_timestamp_is_an_error() {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        writeln!(file, "timestamp,open,high,low,close,volume").unwrap();
        writeln!(file, "not-a-time,1.0,1.1,0.9,1.05,20").unwrap();
        file.flush().unwrap();
        assert!(load_bars_csv(file.path()).is_err());
    }

    #[test]
    fn test_list_bar_files_filters() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["EURUSD_2023.csv", "EURUSD_2024.csv", "GBPUSD_2024.csv", "notes.txt"] {
            std::fs::write(dir.path().join(name), "timestamp,open,high,low,close,volume\n").unwrap();
        }

        assert_eq!(list_bar_files(dir.path(), None).unwrap().len(), 3);
        assert_eq!(list_bar_files(dir.path(), Some("GBP")).unwrap().len(), 1);
        let range = list_bar_files(dir.path(), Some("EURUSD_2023:EURUSD_2024")).unwrap();
        assert_eq!(range.len(), 2);
    }
}
