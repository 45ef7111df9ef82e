//! BarSeries: an immutable, strictly time-ordered run of bars for one key.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{Bar, SeriesKey};

#[derive(Debug, Error, PartialEq)]
pub enum SeriesError {
    #[error("{key}: bar {index} at {timestamp} does not come after {previous}")]
    NotIncreasing {
        key: String,
        index: usize,
        timestamp: NaiveDateTime,
        previous: NaiveDateTime,
    },

    #[error("{key}: bar {index} at {timestamp} has NaN prices")]
    VoidBar {
        key: String,
        index: usize,
        timestamp: NaiveDateTime,
    },

    #[error("{key}: bar {index} at {timestamp} has inconsistent OHLC prices")]
    InconsistentBar {
        key: String,
        index: usize,
        timestamp: NaiveDateTime,
    },
}

/// Ordered bars for one (instrument, session, timeframe).
///
/// Invariant: timestamps are strictly increasing (and therefore unique), and
/// every bar has positive prices with open and close inside `[low, high]`.
/// The only way to build a series is through [`BarSeries::new`], which checks it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarSeries {
    key: SeriesKey,
    bars: Vec<Bar>,
}

impl BarSeries {
    pub fn new(key: SeriesKey, bars: Vec<Bar>) -> Result<Self, SeriesError> {
        for (index, bar) in bars.iter().enumerate() {
            if bar.is_void() {
                return Err(SeriesError::VoidBar {
                    key: key.to_string(),
                    index,
                    timestamp: bar.timestamp,
                });
            }
            if !bar.is_sane() {
                return Err(SeriesError::InconsistentBar {
                    key: key.to_string(),
                    index,
                    timestamp: bar.timestamp,
                });
            }
            if index > 0 && bar.timestamp <= bars[index - 1].timestamp {
                return Err(SeriesError::NotIncreasing {
                    key: key.to_string(),
                    index,
                    timestamp: bar.timestamp,
                    previous: bars[index - 1].timestamp,
                });
            }
        }
        Ok(Self { key, bars })
    }

    /// Sort by timestamp, drop later duplicates, then validate.
    pub fn from_unsorted(key: SeriesKey, mut bars: Vec<Bar>) -> Result<Self, SeriesError> {
        bars.sort_by_key(|b| b.timestamp);
        bars.dedup_by_key(|b| b.timestamp);
        Self::new(key, bars)
    }

    pub fn key(&self) -> &SeriesKey {
        &self.key
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn first(&self) -> Option<&Bar> {
        self.bars.first()
    }

    pub fn last(&self) -> Option<&Bar> {
        self.bars.last()
    }

    /// Number of bars with `timestamp <= as_of`.
    pub fn count_up_to(&self, as_of: NaiveDateTime) -> usize {
        self.bars.partition_point(|b| b.timestamp <= as_of)
    }

    /// Prefix of bars with `timestamp <= as_of`.
    pub fn up_to(&self, as_of: NaiveDateTime) -> &[Bar] {
        &self.bars[..self.count_up_to(as_of)]
    }

    /// Index of the last bar whose timestamp is `<= ts`, i.e. the bar that
    /// encloses `ts` or, if `ts` falls in a gap, the one immediately before it.
    pub fn index_at_or_before(&self, ts: NaiveDateTime) -> Option<usize> {
        self.count_up_to(ts).checked_sub(1)
    }
}
