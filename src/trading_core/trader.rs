//! Replay trader
//!
//! Drives a [`KeyLevelEngine`] over historical bars through a [`BarFeed`] and
//! plays the execution collaborator: every signal opens a paper position that
//! is held for `hold_bars` bars. While it is open the engine sees an open
//! position, so pending breakouts are reset and no new signals fire.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;
use uuid::Uuid;

use super::bars::Bar;
use super::config::EngineConfig;
use super::engine::{EngineStats, KeyLevelEngine, MarketEvent, TradeSignal};
use super::market_data::BarFeed;

/// One emitted signal and its paper outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalRecord {
    pub id: Uuid,
    pub symbol: String,
    pub time: DateTime<Utc>,
    pub bar_index: u64,
    pub direction: String,
    pub entry: String,
    pub level: f64,
    pub price: f64,
    pub confidence: f64,
    pub exit_price: Option<f64>,
    pub pnl_pips: Option<f64>,
}

impl SignalRecord {
    fn from_signal(signal: &TradeSignal) -> Self {
        Self {
            id: signal.id,
            symbol: signal.symbol.clone(),
            time: signal.time,
            bar_index: signal.bar_index,
            direction: if signal.is_bullish { "LONG" } else { "SHORT" }.to_string(),
            entry: signal.entry.to_string(),
            level: signal.level,
            price: signal.price,
            confidence: signal.confidence,
            exit_price: None,
            pnl_pips: None,
        }
    }
}

/// Results of one replay
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplaySummary {
    pub symbol: String,
    pub bars: usize,
    pub signals: usize,
    pub longs: usize,
    pub shorts: usize,
    pub retest_entries: usize,
    pub wins: usize,
    pub losses: usize,
    pub win_rate: f64,
    pub net_pips: f64,
    pub avg_pips: f64,
    pub max_drawdown_pips: f64,
    pub engine: EngineStats,
}

#[derive(Debug, Clone)]
struct PaperPosition {
    record: usize,
    is_bullish: bool,
    entry_price: f64,
    opened_at_bar: u64,
}

pub struct ReplayTrader {
    engine: KeyLevelEngine,
    feed: BarFeed,
    hold_bars: u64,
    pip_size: f64,
    position: Option<PaperPosition>,
    records: Vec<SignalRecord>,
    bars_seen: usize,
    equity: f64,
    peak_equity: f64,
    max_drawdown: f64,
}

impl ReplayTrader {
    pub fn new(config: EngineConfig, hold_bars: usize) -> Result<Self> {
        let feed = BarFeed::new(&config.symbol, config.timeframe, config.history_bars);
        let pip_size = config.pip_size;
        let engine = KeyLevelEngine::new(config).context("Invalid engine configuration")?;
        Ok(Self {
            engine,
            feed,
            hold_bars: hold_bars as u64,
            pip_size,
            position: None,
            records: Vec::new(),
            bars_seen: 0,
            equity: 0.0,
            peak_equity: 0.0,
            max_drawdown: 0.0,
        })
    }

    pub fn records(&self) -> &[SignalRecord] {
        &self.records
    }

    pub fn is_flat(&self) -> bool {
        self.position.is_none()
    }

    /// Feed one closed bar; returns the signal it produced, if any
    pub fn process_bar(&mut self, bar: Bar) -> Option<TradeSignal> {
        let close = bar.close;
        let time = bar.timestamp;
        let bar_index = self.feed.push_bar(bar);
        self.bars_seen += 1;

        let expired = self
            .position
            .as_ref()
            .map_or(false, |p| bar_index - p.opened_at_bar >= self.hold_bars);
        if expired {
            self.close_position(close, "HOLD");
        }

        let signal = self.engine.evaluate(MarketEvent::NewBar { bar_index, time }, &self.feed)?;
        self.records.push(SignalRecord::from_signal(&signal));

        if self.hold_bars > 0 && self.position.is_none() {
            self.position = Some(PaperPosition {
                record: self.records.len() - 1,
                is_bullish: signal.is_bullish,
                entry_price: signal.price,
                opened_at_bar: bar_index,
            });
            self.feed.set_open_position(true);
            self.engine
                .record_execution(signal.price, signal.is_bullish, bar_index);
        }
        Some(signal)
    }

    /// Replay all bars (oldest first), closing any open position at the end
    pub fn run(&mut self, bars: &[Bar]) -> ReplaySummary {
        for bar in bars {
            self.process_bar(bar.clone());
        }
        if let Some(last) = bars.last() {
            self.close_position(last.close, "END");
        }
        self.summary()
    }

    fn close_position(&mut self, price: f64, reason: &str) {
        let Some(pos) = self.position.take() else {
            return;
        };
        self.feed.set_open_position(false);

        let move_pips = (price - pos.entry_price) / self.pip_size;
        let pnl = if pos.is_bullish { move_pips } else { -move_pips };
        if let Some(record) = self.records.get_mut(pos.record) {
            record.exit_price = Some(price);
            record.pnl_pips = Some(pnl);
        }

        self.equity += pnl;
        self.peak_equity = self.peak_equity.max(self.equity);
        self.max_drawdown = self.max_drawdown.max(self.peak_equity - self.equity);
        info!(
            "EXIT ({}): {} @ {:.5} | P&L: {:.1} pips",
            reason,
            if pos.is_bullish { "LONG" } else { "SHORT" },
            price,
            pnl
        );
    }

    pub fn summary(&self) -> ReplaySummary {
        let closed: Vec<f64> = self.records.iter().filter_map(|r| r.pnl_pips).collect();
        let wins = closed.iter().filter(|p| **p > 0.0).count();
        let losses = closed.iter().filter(|p| **p < 0.0).count();
        let net_pips: f64 = closed.iter().sum();

        ReplaySummary {
            symbol: self.engine.config().symbol.clone(),
            bars: self.bars_seen,
            signals: self.records.len(),
            longs: self.records.iter().filter(|r| r.direction == "LONG").count(),
            shorts: self.records.iter().filter(|r| r.direction == "SHORT").count(),
            retest_entries: self.records.iter().filter(|r| r.entry == "RETEST").count(),
            wins,
            losses,
            win_rate: if closed.is_empty() {
                0.0
            } else {
                wins as f64 / closed.len() as f64 * 100.0
            },
            net_pips,
            avg_pips: if closed.is_empty() {
                0.0
            } else {
                net_pips / closed.len() as f64
            },
            max_drawdown_pips: self.max_drawdown,
            engine: self.engine.stats().clone(),
        }
    }
}

/// Write signal records to a CSV file
pub fn write_signals_csv(path: &Path, records: &[SignalRecord]) -> Result<()> {
    let mut wtr = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {:?}", path))?;
    for record in records {
        wtr.serialize(record)?;
    }
    wtr.flush()?;
    info!("Wrote {} signals to {:?}", records.len(), path);
    Ok(())
}
