//! BarWalk CLI: outcome simulation and bar diagnostics.
//!
//! Commands:
//! - `simulate`: run a batch of entries and upsert outcomes into a JSON store
//! - `atr`: print true range and ATR for one series
//! - `structure`: print the structure fold for one series, or a multi-timeframe snapshot
//! - `info`: summarize a bars file and the resolved configuration
//!
//! Every command reads bars from `--bars <csv>` or generates them with
//! `--synthetic`. Logging goes to stderr and honours `RUST_LOG`.

use anyhow::{bail, Context, Result};
use chrono::{Local, NaiveDate, NaiveTime};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use barwalk_core::data::{BarSource, HtfCache};
use barwalk_core::domain::{BarSeries, SeriesKey, Timeframe};
use barwalk_core::indicators::{atr_series, DEFAULT_ATR_PERIOD};
use barwalk_core::structure::{classify, structure_at, DEFAULT_FRACTAL_HALF_WINDOW};
use barwalk_runner::{
    load_bars, load_entries, recent_weekdays, synthetic_entries, synthetic_store, BacktestConfig,
    BarStore, BatchReport, BatchRunner, JsonOutcomeStore,
};

#[derive(Parser)]
#[command(
    name = "barwalk",
    about = "BarWalk CLI: forward bar-walk trade outcome simulation"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct DataArgs {
    /// Bars CSV (instrument,timestamp,open,high,low,close,volume), one-minute bars.
    #[arg(long)]
    bars: Option<PathBuf>,

    /// Generate deterministic synthetic sessions instead of reading a file.
    #[arg(long, default_value_t = false)]
    synthetic: bool,

    /// Instruments for synthetic data.
    #[arg(long, value_delimiter = ',', default_value = "SPY")]
    instruments: Vec<String>,

    /// Number of synthetic weekday sessions.
    #[arg(long, default_value_t = 5)]
    sessions: usize,

    /// Last synthetic session (YYYY-MM-DD). Defaults to today.
    #[arg(long)]
    end: Option<NaiveDate>,
}

#[derive(Args)]
struct SeriesArgs {
    /// Instrument. Defaults to the first one in the store.
    #[arg(long)]
    instrument: Option<String>,

    /// Session date (YYYY-MM-DD). Defaults to the latest session for the instrument.
    #[arg(long)]
    session: Option<NaiveDate>,

    /// Bar timeframe (M1, M5, M15, M30, H1, H4, D1).
    #[arg(long, default_value = "M5")]
    timeframe: Timeframe,

    /// Calendar days of history to include, ending at the session.
    #[arg(long, default_value_t = 1)]
    lookback_days: u32,
}

#[derive(Subcommand)]
enum Commands {
    /// Simulate entries and upsert outcomes into a JSON store.
    Simulate {
        /// Path to a TOML config file. Defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        #[command(flatten)]
        data: DataArgs,

        /// Entries CSV (trade_id,instrument,session,entry_time,entry_price,direction).
        /// Required unless --synthetic is set.
        #[arg(long)]
        entries: Option<PathBuf>,

        /// Synthetic entries per session.
        #[arg(long, default_value_t = 3)]
        per_session: usize,

        /// Seed for synthetic entries.
        #[arg(long, default_value_t = 42)]
        seed: u64,

        /// Outcome store directory.
        #[arg(long, default_value = "outcomes")]
        out: PathBuf,

        /// Write the full batch report as JSON to this path.
        #[arg(long)]
        report: Option<PathBuf>,

        /// Process sessions one at a time.
        #[arg(long, default_value_t = false)]
        sequential: bool,
    },
    /// Print true range and ATR for one series.
    Atr {
        #[command(flatten)]
        data: DataArgs,

        #[command(flatten)]
        series: SeriesArgs,

        /// ATR period.
        #[arg(long, default_value_t = DEFAULT_ATR_PERIOD)]
        period: usize,
    },
    /// Print structure labels for one series, or a snapshot at --at.
    Structure {
        #[command(flatten)]
        data: DataArgs,

        #[command(flatten)]
        series: SeriesArgs,

        /// Fractal half-window.
        #[arg(long, default_value_t = DEFAULT_FRACTAL_HALF_WINDOW)]
        half_window: usize,

        /// Time of day (HH:MM:SS) for a multi-timeframe snapshot.
        #[arg(long)]
        at: Option<NaiveTime>,

        /// Timeframes for the snapshot.
        #[arg(long, value_delimiter = ',', default_value = "M5,M15,H1")]
        timeframes: Vec<Timeframe>,
    },
    /// Summarize the bars and the resolved configuration.
    Info {
        /// Path to a TOML config file.
        #[arg(long)]
        config: Option<PathBuf>,

        #[command(flatten)]
        data: DataArgs,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Simulate {
            config,
            data,
            entries,
            per_session,
            seed,
            out,
            report,
            sequential,
        } => run_simulate(
            config,
            &data,
            entries,
            per_session,
            seed,
            out,
            report,
            sequential,
        ),
        Commands::Atr {
            data,
            series,
            period,
        } => run_atr(&data, &series, period),
        Commands::Structure {
            data,
            series,
            half_window,
            at,
            timeframes,
        } => run_structure(&data, &series, half_window, at, &timeframes),
        Commands::Info { config, data } => run_info(config, &data),
    }
}

fn load_config(path: Option<PathBuf>) -> Result<BacktestConfig> {
    let config = match path {
        Some(path) => BacktestConfig::load(&path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => BacktestConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

fn load_store(data: &DataArgs, session_open: NaiveTime) -> Result<BarStore> {
    match (&data.bars, data.synthetic) {
        (Some(_), true) => bail!("--bars and --synthetic are mutually exclusive"),
        (Some(path), false) => Ok(load_bars(path, Timeframe::M1)?),
        (None, true) => {
            let end = data.end.unwrap_or_else(|| Local::now().date_naive());
            let sessions = recent_weekdays(end, data.sessions.max(1));
            let store = synthetic_store(&data.instruments, &sessions, session_open)?;
            info!(
                instruments = data.instruments.len(),
                sessions = sessions.len(),
                bars = store.bar_count(),
                "synthetic bars generated"
            );
            Ok(store)
        }
        (None, false) => bail!("one of --bars or --synthetic is required"),
    }
}

fn default_session_open() -> NaiveTime {
    BacktestConfig::default().session_open
}

/// Resolve the instrument and session to inspect and build its series.
fn select_series(store: &BarStore, args: &SeriesArgs) -> Result<BarSeries> {
    let instrument = match &args.instrument {
        Some(instrument) => instrument.clone(),
        None => store
            .instruments()
            .next()
            .map(str::to_string)
            .context("bar store is empty")?,
    };
    let session = match args.session {
        Some(session) => session,
        None => store
            .sessions(&instrument)
            .last()
            .copied()
            .with_context(|| format!("no sessions for {instrument}"))?,
    };
    let bars = store.fetch(&instrument, args.timeframe, session, args.lookback_days)?;
    Ok(BarSeries::from_unsorted(
        SeriesKey::new(instrument, session, args.timeframe),
        bars,
    )?)
}

#[allow(clippy::too_many_arguments)]
fn run_simulate(
    config_path: Option<PathBuf>,
    data: &DataArgs,
    entries_path: Option<PathBuf>,
    per_session: usize,
    seed: u64,
    out: PathBuf,
    report_path: Option<PathBuf>,
    sequential: bool,
) -> Result<()> {
    let mut config = load_config(config_path)?;
    if sequential {
        config.parallel = false;
    }

    let store = Arc::new(load_store(data, config.session_open)?);
    let entries = match entries_path {
        Some(path) => load_entries(&path)?,
        None if data.synthetic => synthetic_entries(&store, per_session, seed),
        None => bail!("--entries is required unless --synthetic is set"),
    };

    let outcomes = JsonOutcomeStore::new(&out)?;
    let runner = BatchRunner::new(config, store)?;
    let report = runner.run(&entries, &outcomes)?;

    print_report(&report);
    println!("Outcomes saved to: {}", outcomes.dir().display());

    if let Some(path) = report_path {
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(&path, json)
            .with_context(|| format!("writing report {}", path.display()))?;
        println!("Report saved to:   {}", path.display());
    }
    Ok(())
}

fn run_atr(data: &DataArgs, args: &SeriesArgs, period: usize) -> Result<()> {
    let store = load_store(data, default_session_open())?;
    let series = select_series(&store, args)?;
    let points = atr_series(series.bars(), period)?;

    println!("{} ATR({period})", series.key());
    println!("{:<20} {:>10} {:>10}", "timestamp", "tr", "atr");
    for p in &points {
        let atr = p.atr.map_or_else(|| "-".to_string(), |v| format!("{v:.4}"));
        println!(
            "{:<20} {:>10.4} {:>10}",
            p.timestamp.format("%Y-%m-%d %H:%M"),
            p.true_range,
            atr
        );
    }
    Ok(())
}

fn run_structure(
    data: &DataArgs,
    args: &SeriesArgs,
    half_window: usize,
    at: Option<NaiveTime>,
    timeframes: &[Timeframe],
) -> Result<()> {
    let config = BacktestConfig::default();
    let store = Arc::new(load_store(data, config.session_open)?);
    let series = select_series(&store, args)?;

    if let Some(time) = at {
        let key = series.key();
        let cache = HtfCache::new(store.clone(), config.htf_lookback);
        let snapshot = structure_at(
            &cache,
            &key.instrument,
            key.session,
            timeframes,
            half_window,
            key.session.and_time(time),
        )?;
        println!("{} {} @ {}", key.instrument, key.session, snapshot.as_of);
        println!("{snapshot}");
        if snapshot.is_aligned() {
            println!("aligned");
        }
        return Ok(());
    }

    let states = classify(series.bars(), half_window)?;
    println!("{} structure (p={half_window})", series.key());
    for (bar, state) in series.bars().iter().zip(&states) {
        let event = state
            .event()
            .map(|e| format!("{:?} {} through {:.2}", e.kind, e.label, e.reference))
            .unwrap_or_default();
        println!(
            "{:<20} {:>10.2} {:>3} {}",
            bar.timestamp.format("%Y-%m-%d %H:%M"),
            bar.close,
            state.label().code(),
            event
        );
    }
    Ok(())
}

fn run_info(config_path: Option<PathBuf>, data: &DataArgs) -> Result<()> {
    let config = load_config(config_path)?;
    let store = load_store(data, config.session_open)?;

    println!("=== Bars ===");
    println!("Instruments:    {}", store.instrument_count());
    println!("Sessions:       {}", store.session_count());
    println!("Bars:           {}", store.bar_count());
    for instrument in store.instruments() {
        let sessions = store.sessions(instrument);
        if let (Some(first), Some(last)) = (sessions.first(), sessions.last()) {
            println!("  {instrument:<8} {} sessions, {first} to {last}", sessions.len());
        }
    }
    println!();
    println!("=== Config ===");
    println!("Config hash:    {}", config.config_hash()?);
    println!("Method:         {}", config.simulation.outcome_method());
    println!("ATR period:     {}", config.simulation.atr_period);
    println!("ATR multiplier: {}", config.simulation.atr_multiplier);
    println!("Ladder depth:   {}", config.simulation.ladder_depth);
    println!("Cutoff:         {}", config.simulation.session_cutoff);
    println!(
        "Structure:      p={} on {}",
        config.structure.half_window,
        config
            .structure
            .timeframes
            .iter()
            .map(|tf| tf.as_str())
            .collect::<Vec<_>>()
            .join(",")
    );
    println!("Parallel:       {}", config.parallel);
    Ok(())
}

fn print_report(report: &BatchReport) {
    let stats = &report.stats;
    let summary = &report.summary;
    println!();
    println!("=== Batch Result ===");
    println!("Config hash:    {}", report.config_hash);
    println!("Entries:        {} in {} sessions", stats.entries, stats.sessions);
    println!("Simulated:      {}", stats.simulated);
    println!("Skipped:        {}", stats.skipped_total());
    for (reason, count) in &stats.skipped {
        println!("  {:<28} {count}", reason.as_str());
    }
    println!(
        "Store:          {} inserted, {} replaced, {} unchanged",
        stats.inserted, stats.replaced, stats.unchanged
    );
    println!("HTF fetches:    {}", stats.htf_fetches);
    println!();
    println!("--- Outcomes ---");
    println!("Wins:           {}", summary.wins);
    println!("Losses:         {}", summary.losses);
    println!("Win Rate:       {:.1}%", summary.win_rate * 100.0);
    println!("Mean max R:     {:.2}", summary.mean_max_r);
    println!("Total R:        {:.1}", summary.total_pnl_r);
    for (k, hits) in summary.level_hits.iter().enumerate() {
        println!("  R{:<3} {hits}", k + 1);
    }
    for (exit, count) in &summary.exits {
        println!("  {exit:<10} {count}");
    }
}
