use anyhow::Result;
use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::trading_core::{Bar, BarFeed, EngineStats, KeyLevelEngine, MarketEvent, TradeSignal};

/// Market time: the last bar's timestamp advanced by wall time since it arrived
#[derive(Debug, Default)]
struct MarketClock {
    anchor: Option<(DateTime<Utc>, Instant)>,
}

impl MarketClock {
    fn on_bar(&mut self, time: DateTime<Utc>) {
        self.anchor = Some((time, Instant::now()));
    }

    fn now(&self) -> DateTime<Utc> {
        match self.anchor {
            Some((time, at)) => {
                time + chrono::Duration::from_std(at.elapsed()).unwrap_or_else(|_| chrono::Duration::zero())
            }
            None => Utc::now(),
        }
    }
}

/// Run one engine instance over a stream of closed bars.
///
/// New bars and timer ticks are handled in a single task, so the engine never
/// sees two events at once. Signals are forwarded on `signal_tx`. Returns when
/// the bar stream ends or the signal receiver is dropped.
pub async fn run_event_loop(
    mut engine: KeyLevelEngine,
    mut feed: BarFeed,
    mut bar_rx: mpsc::Receiver<Bar>,
    signal_tx: mpsc::Sender<TradeSignal>,
    timer_period: Duration,
) -> Result<EngineStats> {
    let mut timer = tokio::time::interval(timer_period);
    timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut clock = MarketClock::default();

    info!(
        "STREAM: {} {} started (timer {:?})",
        feed.symbol(),
        feed.timeframe(),
        timer_period
    );

    loop {
        tokio::select! {
            maybe_bar = bar_rx.recv() => {
                let Some(bar) = maybe_bar else {
                    info!("STREAM: bar source closed");
                    break;
                };
                let time = bar.timestamp;
                clock.on_bar(time);
                let bar_index = feed.push_bar(bar);

                if let Some(signal) = engine.evaluate(MarketEvent::NewBar { bar_index, time }, &feed) {
                    if signal_tx.send(signal).await.is_err() {
                        warn!("STREAM: signal receiver dropped, stopping");
                        break;
                    }
                }
            }
            _ = timer.tick() => {
                let time = clock.now();
                debug!("STREAM: timer @ {}", time);
                engine.evaluate(MarketEvent::Timer { time }, &feed);
            }
        }
    }

    let stats = engine.stats().clone();
    info!(
        "STREAM: done | bars={} breakouts={} signals={}",
        stats.bars_evaluated, stats.breakouts, stats.signals
    );
    Ok(stats)
}
