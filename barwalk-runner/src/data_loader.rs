//! CSV loading and the in-memory bar store.
//!
//! Bars file: `instrument,timestamp,open,high,low,close,volume`, one row per
//! base-timeframe bar. Timestamps accept `YYYY-MM-DD HH:MM[:SS]` with either a
//! space or `T` separator.
//!
//! Entries file: `trade_id,instrument,session,entry_time,entry_price,direction`.
//! `entry_time` is either a full timestamp or a time of day on `session`.
//! Empty `entry_time`/`entry_price` cells are kept as missing; the simulator
//! skips those entries.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use barwalk_core::data::{lookback_start, BarSource, DataError};
use barwalk_core::domain::{
    Bar, BarSeries, Direction, Entry, ParseDirectionError, SeriesError, SeriesKey, Timeframe,
    TradeId,
};

const TIMESTAMP_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

const TIME_FORMATS: [&str; 2] = ["%H:%M:%S", "%H:%M"];

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to open {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("row {row}: invalid timestamp '{value}'")]
    BadTimestamp { row: usize, value: String },

    #[error("row {row}: {source}")]
    BadDirection {
        row: usize,
        #[source]
        source: ParseDirectionError,
    },

    #[error(transparent)]
    Series(#[from] SeriesError),
}

#[derive(Debug, Deserialize)]
struct BarRow {
    instrument: String,
    timestamp: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct EntryRow {
    trade_id: String,
    instrument: String,
    session: NaiveDate,
    entry_time: Option<String>,
    entry_price: Option<f64>,
    direction: String,
}

fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
}

fn parse_entry_time(session: NaiveDate, value: &str) -> Option<NaiveDateTime> {
    parse_timestamp(value).or_else(|| {
        TIME_FORMATS
            .iter()
            .find_map(|fmt| NaiveTime::parse_from_str(value, fmt).ok())
            .map(|t| session.and_time(t))
    })
}

fn open_file(path: &Path) -> Result<File, LoadError> {
    File::open(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn csv_reader<R: Read>(reader: R) -> csv::Reader<R> {
    csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader)
}

/// Parse `(instrument, bar)` rows from any reader.
pub fn read_bars<R: Read>(reader: R) -> Result<Vec<(String, Bar)>, LoadError> {
    let mut rows = Vec::new();
    for (i, record) in csv_reader(reader).deserialize::<BarRow>().enumerate() {
        let row = record?;
        let timestamp = parse_timestamp(&row.timestamp).ok_or_else(|| LoadError::BadTimestamp {
            row: i + 2,
            value: row.timestamp.clone(),
        })?;
        rows.push((
            row.instrument,
            Bar {
                timestamp,
                open: row.open,
                high: row.high,
                low: row.low,
                close: row.close,
                volume: row.volume.unwrap_or(0),
            },
        ));
    }
    Ok(rows)
}

/// Parse entries from any reader.
pub fn read_entries<R: Read>(reader: R) -> Result<Vec<Entry>, LoadError> {
    let mut entries = Vec::new();
    for (i, record) in csv_reader(reader).deserialize::<EntryRow>().enumerate() {
        let row = record?;
        let line = i + 2;
        let direction: Direction = row
            .direction
            .parse()
            .map_err(|source| LoadError::BadDirection { row: line, source })?;
        let entry_time = match row.entry_time.as_deref().filter(|s| !s.is_empty()) {
            Some(value) => Some(parse_entry_time(row.session, value).ok_or_else(|| {
                LoadError::BadTimestamp {
                    row: line,
                    value: value.to_string(),
                }
            })?),
            None => None,
        };
        entries.push(Entry {
            trade_id: TradeId::new(row.trade_id),
            instrument: row.instrument,
            session: row.session,
            entry_time,
            entry_price: row.entry_price,
            direction,
        });
    }
    Ok(entries)
}

/// Load a bars CSV into a store whose bars are all `base` granularity.
pub fn load_bars(path: impl AsRef<Path>, base: Timeframe) -> Result<BarStore, LoadError> {
    let path = path.as_ref();
    let rows = read_bars(open_file(path)?)?;
    let store = BarStore::from_rows(base, rows)?;
    info!(
        path = %path.display(),
        instruments = store.instrument_count(),
        sessions = store.session_count(),
        bars = store.bar_count(),
        "bars loaded"
    );
    Ok(store)
}

pub fn load_entries(path: impl AsRef<Path>) -> Result<Vec<Entry>, LoadError> {
    let path = path.as_ref();
    let entries = read_entries(open_file(path)?)?;
    info!(path = %path.display(), entries = entries.len(), "entries loaded");
    Ok(entries)
}

/// Aggregate time-ordered bars into `timeframe` buckets.
///
/// Buckets follow [`Timeframe::truncate`], so they never straddle midnight.
/// Open comes from the first bar, close from the last, high/low are the
/// extremes and volume is summed. Empty buckets produce no bar.
pub fn resample(bars: &[Bar], timeframe: Timeframe) -> Vec<Bar> {
    let mut out: Vec<Bar> = Vec::new();
    for bar in bars {
        let bucket = timeframe.truncate(bar.timestamp);
        match out.last_mut() {
            Some(current) if current.timestamp == bucket => {
                current.high = current.high.max(bar.high);
                current.low = current.low.min(bar.low);
                current.close = bar.close;
                current.volume += bar.volume;
            }
            _ => out.push(Bar {
                timestamp: bucket,
                ..*bar
            }),
        }
    }
    out
}

/// Base-granularity bars held per instrument and session.
///
/// Implements [`BarSource`]: coarser timeframes are resampled on each fetch.
#[derive(Debug, Clone)]
pub struct BarStore {
    base: Timeframe,
    sessions: BTreeMap<String, BTreeMap<NaiveDate, Arc<[Bar]>>>,
}

impl BarStore {
    pub fn new(base: Timeframe) -> Self {
        Self {
            base,
            sessions: BTreeMap::new(),
        }
    }

    /// Group rows by instrument and calendar day. Duplicate timestamps keep
    /// the first row.
    pub fn from_rows(
        base: Timeframe,
        rows: impl IntoIterator<Item = (String, Bar)>,
    ) -> Result<Self, SeriesError> {
        let mut grouped: BTreeMap<(String, NaiveDate), Vec<Bar>> = BTreeMap::new();
        for (instrument, bar) in rows {
            grouped
                .entry((instrument, bar.timestamp.date()))
                .or_default()
                .push(bar);
        }
        let mut store = Self::new(base);
        for ((instrument, session), bars) in grouped {
            store.insert_session(instrument, session, bars)?;
        }
        Ok(store)
    }

    /// Replace the bars of one session. Bars are sorted and validated first.
    pub fn insert_session(
        &mut self,
        instrument: impl Into<String>,
        session: NaiveDate,
        bars: Vec<Bar>,
    ) -> Result<(), SeriesError> {
        let instrument = instrument.into();
        let key = SeriesKey::new(instrument.clone(), session, self.base);
        let series = BarSeries::from_unsorted(key, bars)?;
        self.sessions
            .entry(instrument)
            .or_default()
            .insert(session, Arc::from(series.bars()));
        Ok(())
    }

    pub fn base(&self) -> Timeframe {
        self.base
    }

    pub fn instruments(&self) -> impl Iterator<Item = &str> {
        self.sessions.keys().map(String::as_str)
    }

    pub fn sessions(&self, instrument: &str) -> Vec<NaiveDate> {
        self.sessions
            .get(instrument)
            .map(|days| days.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn session_bars(&self, instrument: &str, session: NaiveDate) -> Option<&[Bar]> {
        self.sessions
            .get(instrument)
            .and_then(|days| days.get(&session))
            .map(|bars| &bars[..])
    }

    pub fn instrument_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.values().map(BTreeMap::len).sum()
    }

    pub fn bar_count(&self) -> usize {
        self.sessions
            .values()
            .flat_map(BTreeMap::values)
            .map(|bars| bars.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl BarSource for BarStore {
    fn name(&self) -> &str {
        "bar-store"
    }

    fn fetch(
        &self,
        instrument: &str,
        timeframe: Timeframe,
        session: NaiveDate,
        lookback_days: u32,
    ) -> Result<Vec<Bar>, DataError> {
        if timeframe < self.base {
            return Err(DataError::UnsupportedTimeframe {
                requested: timeframe,
                base: self.base,
            });
        }
        let not_found = || DataError::NotFound {
            instrument: instrument.to_string(),
            session,
        };
        let days = self.sessions.get(instrument).ok_or_else(not_found)?;
        if !days.contains_key(&session) {
            return Err(not_found());
        }

        let start = lookback_start(session, lookback_days);
        let mut out = Vec::new();
        for bars in days.range(start..=session).map(|(_, bars)| bars) {
            if timeframe == self.base {
                out.extend_from_slice(bars);
            } else {
                out.extend(resample(bars, timeframe));
            }
        }
        debug!(
            instrument,
            %timeframe,
            %session,
            lookback_days,
            bars = out.len(),
            "bar store fetch"
        );
        Ok(out)
    }
}
