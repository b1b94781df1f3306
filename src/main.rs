use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use keylevel_breakout::streams::{run_event_loop, spawn_bar_replay};
use keylevel_breakout::trading_core::{
    list_bar_files, load_bars_csv, write_signals_csv, Bar, BarFeed, BarSeries, EngineConfig,
    KeyLevelEngine, LevelDetector, ReplaySummary, ReplayTrader, SignalRecord, Timeframe,
    TradeSignal,
};

#[derive(Parser, Debug)]
#[command(name = "keylevel-breakout")]
#[command(about = "Key level detection and breakout/retest signals over bar data")]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Print verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Detect key levels on the newest bars of a CSV file
    Detect {
        /// Bar CSV (timestamp,open,high,low,close,volume)
        #[arg(short, long)]
        file: PathBuf,

        /// Engine config JSON; defaults when omitted
        #[arg(short, long, env = "KEYLEVEL_CONFIG")]
        config: Option<PathBuf>,

        /// Override the configured symbol
        #[arg(short, long)]
        symbol: Option<String>,

        /// Override the configured timeframe (M1..W1)
        #[arg(short, long)]
        timeframe: Option<Timeframe>,
    },

    /// Replay bar files through independent engines in parallel
    Replay {
        /// Bar CSV files
        #[arg(short, long, num_args = 1..)]
        files: Vec<PathBuf>,

        /// Directory of bar CSVs (used when no files are given)
        #[arg(short, long)]
        data_dir: Option<PathBuf>,

        /// File stem filter for --data-dir (substring or "start:end")
        #[arg(short = 'F', long)]
        filter: Option<String>,

        /// Engine config JSON; defaults when omitted
        #[arg(short, long, env = "KEYLEVEL_CONFIG")]
        config: Option<PathBuf>,

        /// Bars to hold each paper position (0 = no position simulation)
        #[arg(long, default_value = "5")]
        hold_bars: usize,

        /// Write every signal to this CSV
        #[arg(long)]
        signals_out: Option<PathBuf>,
    },

    /// Stream a bar file through the async event loop
    Stream {
        /// Bar CSV
        #[arg(short, long)]
        file: PathBuf,

        /// Engine config JSON; defaults when omitted
        #[arg(short, long, env = "KEYLEVEL_CONFIG")]
        config: Option<PathBuf>,

        /// Delay between bars in milliseconds
        #[arg(long, default_value = "0")]
        pace_ms: u64,

        /// Timer re-evaluation period in seconds
        #[arg(long, default_value = "30")]
        timer_secs: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(if args.verbose { Level::DEBUG } else { Level::INFO })
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match args.command {
        Commands::Detect { file, config, symbol, timeframe } => {
            run_detect(&file, config.as_deref(), symbol, timeframe)?;
        }
        Commands::Replay { files, data_dir, filter, config, hold_bars, signals_out } => {
            let files = if files.is_empty() {
                let Some(dir) = data_dir else {
                    bail!("Provide --files or --data-dir");
                };
                list_bar_files(&dir, filter.as_deref())?
            } else {
                files
            };
            run_replay(files, config.as_deref(), hold_bars, signals_out.as_deref())?;
        }
        Commands::Stream { file, config, pace_ms, timer_secs } => {
            run_stream(&file, config.as_deref(), pace_ms, timer_secs).await?;
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let config = match path {
        Some(p) => EngineConfig::from_json_file(p)?,
        None => EngineConfig::default(),
    };
    config.validate().context("Invalid engine configuration")?;
    Ok(config)
}

fn run_detect(
    file: &Path,
    config: Option<&Path>,
    symbol: Option<String>,
    timeframe: Option<Timeframe>,
) -> Result<()> {
    let mut config = load_config(config)?;
    if let Some(symbol) = symbol {
        config.symbol = symbol;
    }
    if let Some(tf) = timeframe {
        config.timeframe = tf;
    }

    let bars = load_bars_csv(file)?;
    let series = BarSeries::from_oldest_first(bars).window(config.history_bars);
    let detector = LevelDetector::new(config.clone()).context("Invalid engine configuration")?;
    let result = detector.detect(&series);

    info!(
        "{} {} | {} bars | status {:?}",
        config.symbol,
        config.timeframe,
        series.len(),
        result.status
    );

    let mut levels = result.candidates.clone();
    levels.sort_by(|a, b| b.strength.total_cmp(&a.strength));

    println!("\n{:<4} {:<11} {:>10} {:>8} {:>9} {:>7}  {}", "#", "TYPE", "PRICE", "TOUCHES", "STRENGTH", "VOLx", "SPAN");
    for (i, level) in levels.iter().enumerate() {
        println!(
            "{:<4} {:<11} {:>10.5} {:>8} {:>9.3} {:>7.2}  {} -> {} ({:.1}h)",
            i + 1,
            if level.is_support() { "SUPPORT" } else { "RESISTANCE" },
            level.price,
            level.touch_count,
            level.strength,
            level.volume_ratio,
            level.first_touch.format("%Y-%m-%d %H:%M"),
            level.last_touch.format("%Y-%m-%d %H:%M"),
            level.duration_hours(),
        );
    }
    println!("\n{} accepted, {} rejected", levels.len(), result.rejected.len());
    for rejected in &result.rejected {
        info!(
            "REJECTED: {} {:.5} | {}",
            if rejected.is_resistance { "resistance" } else { "support" },
            rejected.price,
            rejected.reason
        );
    }
    Ok(())
}

fn run_replay(
    files: Vec<PathBuf>,
    config: Option<&Path>,
    hold_bars: usize,
    signals_out: Option<&Path>,
) -> Result<()> {
    if files.is_empty() {
        bail!("No bar files to replay");
    }
    let config = load_config(config)?;
    info!("Replaying {} files ({} {})", files.len(), config.symbol, config.timeframe);

    let results: Vec<(PathBuf, Result<(ReplaySummary, Vec<SignalRecord>)>)> = files
        .into_par_iter()
        .map(|file| {
            let result = replay_file(&file, &config, hold_bars);
            (file, result)
        })
        .collect();

    let mut all_records = Vec::new();
    for (file, result) in results {
        match result {
            Ok((summary, records)) => {
                print_summary(&file, &summary);
                all_records.extend(records);
            }
            Err(e) => warn!("Replay of {:?} failed: {:#}", file, e),
        }
    }

    if let Some(path) = signals_out {
        write_signals_csv(path, &all_records)?;
    }
    Ok(())
}

fn replay_file(file: &Path, config: &EngineConfig, hold_bars: usize) -> Result<(ReplaySummary, Vec<SignalRecord>)> {
    let bars = load_bars_csv(file)?;
    let mut trader = ReplayTrader::new(config.clone(), hold_bars)?;
    let summary = trader.run(&bars);
    Ok((summary, trader.records().to_vec()))
}

fn print_summary(file: &Path, s: &ReplaySummary) {
    println!("\n═══ {} ({}) ═══", file.display(), s.symbol);
    println!("  Bars: {} | Breakouts: {} | Signals: {} ({} long / {} short, {} retest)",
        s.bars, s.engine.breakouts, s.signals, s.longs, s.shorts, s.retest_entries);
    println!("  Retests: {} confirmed / {} abandoned | Lockout suppressions: {} | Forced resets: {}",
        s.engine.retests_confirmed, s.engine.retests_abandoned,
        s.engine.lockout_suppressions, s.engine.forced_resets);
    println!("  Wins: {} | Losses: {} | Win rate: {:.1}%", s.wins, s.losses, s.win_rate);
    println!("  Net: {:.1} pips | Avg: {:.1} pips | Max DD: {:.1} pips",
        s.net_pips, s.avg_pips, s.max_drawdown_pips);
}

async fn run_stream(file: &Path, config: Option<&Path>, pace_ms: u64, timer_secs: u64) -> Result<()> {
    let config = load_config(config)?;
    let bars = load_bars_csv(file)?;

    let feed = BarFeed::new(&config.symbol, config.timeframe, config.history_bars);
    let engine = KeyLevelEngine::new(config).context("Invalid engine configuration")?;

    let (bar_tx, bar_rx) = mpsc::channel::<Bar>(1024);
    let (signal_tx, mut signal_rx) = mpsc::channel::<TradeSignal>(64);

    let feeder = spawn_bar_replay(bars, Duration::from_millis(pace_ms), bar_tx);
    let printer = tokio::spawn(async move {
        while let Some(signal) = signal_rx.recv().await {
            println!(
                "{} {} {} @ {:.5} | level {:.5} conf {:.2} ({})",
                signal.time.format("%Y-%m-%d %H:%M"),
                signal.symbol,
                if signal.is_bullish { "LONG" } else { "SHORT" },
                signal.price,
                signal.level,
                signal.confidence,
                signal.entry
            );
        }
    });

    let stats = run_event_loop(engine, feed, bar_rx, signal_tx, Duration::from_secs(timer_secs.max(1))).await?;
    feeder.await?;
    printer.await?;

    println!("\nBars: {} | Breakouts: {} | Signals: {}", stats.bars_evaluated, stats.breakouts, stats.signals);
    Ok(())
}
