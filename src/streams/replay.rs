use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::trading_core::Bar;

/// Push historical bars into a channel, `pace` apart, then close it
pub fn spawn_bar_replay(bars: Vec<Bar>, pace: Duration, tx: mpsc::Sender<Bar>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let total = bars.len();
        info!("REPLAY: streaming {} bars ({:?} apart)", total, pace);
        for (i, bar) in bars.into_iter().enumerate() {
            if tx.send(bar).await.is_err() {
                debug!("REPLAY: receiver closed after {} of {} bars", i, total);
                return;
            }
            if !pace.is_zero() {
                tokio::time::sleep(pace).await;
            }
        }
    })
}
