//! Structure labels across several timeframes at a point in time.
//!
//! Only higher-timeframe bars that have fully closed by the query time are
//! folded, so a label never reflects price action after that time.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use super::classifier::{final_label, StructureError, StructureLabel};
use crate::data::{HtfCache, HtfError};
use crate::domain::{Bar, Timeframe};

#[derive(Debug, Error)]
pub enum MtfError {
    #[error(transparent)]
    Htf(#[from] HtfError),

    #[error(transparent)]
    Structure(#[from] StructureError),
}

/// Number of leading bars that have closed by `time`.
pub fn closed_count(bars: &[Bar], timeframe: Timeframe, time: NaiveDateTime) -> usize {
    bars.partition_point(|b| timeframe.close_time(b.timestamp) <= time)
}

/// Label of `timeframe` bars as of `time`.
pub fn label_at(
    bars: &[Bar],
    timeframe: Timeframe,
    half_window: usize,
    time: NaiveDateTime,
) -> Result<StructureLabel, StructureError> {
    final_label(&bars[..closed_count(bars, timeframe, time)], half_window)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeframeLabel {
    pub timeframe: Timeframe,
    pub label: StructureLabel,
}

/// Labels for a set of timeframes at one instant, in the order requested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiTimeframeStructure {
    pub as_of: NaiveDateTime,
    pub labels: Vec<TimeframeLabel>,
}

impl MultiTimeframeStructure {
    pub fn get(&self, timeframe: Timeframe) -> Option<StructureLabel> {
        self.labels
            .iter()
            .find(|l| l.timeframe == timeframe)
            .map(|l| l.label)
    }

    /// True when every timeframe carries the same non-neutral label.
    pub fn is_aligned(&self) -> bool {
        match self.labels.first() {
            Some(first) if first.label != StructureLabel::Neutral => {
                self.labels.iter().all(|l| l.label == first.label)
            }
            _ => false,
        }
    }
}

impl fmt::Display for MultiTimeframeStructure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, l) in self.labels.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{}:{}", l.timeframe, l.label)?;
        }
        Ok(())
    }
}

/// Labels for `timeframes` at `time`, pulling bars through the HTF cache.
pub fn structure_at(
    cache: &HtfCache,
    instrument: &str,
    session: NaiveDate,
    timeframes: &[Timeframe],
    half_window: usize,
    time: NaiveDateTime,
) -> Result<MultiTimeframeStructure, MtfError> {
    let mut labels = Vec::with_capacity(timeframes.len());
    for &timeframe in timeframes {
        let window = cache.get_bars(instrument, timeframe, session, time)?;
        let label = label_at(window.bars(), timeframe, half_window, time)?;
        labels.push(TimeframeLabel { timeframe, label });
    }
    Ok(MultiTimeframeStructure { as_of: time, labels })
}
