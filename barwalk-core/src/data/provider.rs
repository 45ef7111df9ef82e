//! Bar source trait and structured error types.
//!
//! The BarSource trait abstracts over wherever historical bars live (CSV files,
//! an in-memory store, a test double) so the HTF cache never knows about
//! storage details.

use chrono::NaiveDate;
use thiserror::Error;

use crate::domain::{Bar, SeriesError, Timeframe};

/// Structured error types for bar access.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("no bars for {instrument} on {session}")]
    NotFound {
        instrument: String,
        session: NaiveDate,
    },

    #[error("bar store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("timeframe {requested} cannot be built from {base} bars")]
    UnsupportedTimeframe {
        requested: Timeframe,
        base: Timeframe,
    },

    #[error(transparent)]
    InvalidSeries(#[from] SeriesError),

    #[error("data error: {0}")]
    Other(String),
}

/// Trait for bar sources.
///
/// Implementations return every bar of `timeframe` for `instrument` whose
/// session date falls in the `lookback_days` calendar days ending at `session`
/// (inclusive). `lookback_days == 1` means the session alone. Bars need not be
/// sorted; callers build a [`crate::domain::BarSeries`] from them.
pub trait BarSource: Send + Sync {
    /// Human-readable name of this source.
    fn name(&self) -> &str;

    fn fetch(
        &self,
        instrument: &str,
        timeframe: Timeframe,
        session: NaiveDate,
        lookback_days: u32,
    ) -> Result<Vec<Bar>, DataError>;
}

impl<S: BarSource + ?Sized> BarSource for std::sync::Arc<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn fetch(
        &self,
        instrument: &str,
        timeframe: Timeframe,
        session: NaiveDate,
        lookback_days: u32,
    ) -> Result<Vec<Bar>, DataError> {
        (**self).fetch(instrument, timeframe, session, lookback_days)
    }
}

/// First calendar day covered by a lookback window ending at `session`.
pub fn lookback_start(session: NaiveDate, lookback_days: u32) -> NaiveDate {
    let span = i64::from(lookback_days.max(1)) - 1;
    session - chrono::Duration::days(span)
}
