use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::Timeframe;

/// Identity of an entry record, assigned by the entry-detection collaborator.
///
/// Outcomes are keyed by this id so a rerun overwrites instead of appending.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TradeId(pub String);

impl TradeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TradeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of one bar series: (instrument, session, timeframe).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SeriesKey {
    pub instrument: String,
    pub session: NaiveDate,
    pub timeframe: Timeframe,
}

impl SeriesKey {
    pub fn new(instrument: impl Into<String>, session: NaiveDate, timeframe: Timeframe) -> Self {
        Self {
            instrument: instrument.into(),
            session,
            timeframe,
        }
    }
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.instrument, self.session, self.timeframe)
    }
}
