//! Bar access: the source trait and the higher-timeframe cache.

pub mod htf;
pub mod provider;

pub use htf::{HtfCache, HtfError, HtfLookback, HtfWindow};
pub use provider::{lookback_start, BarSource, DataError};
