//! Domain types shared by every engine component.

pub mod bar;
pub mod entry;
pub mod ids;
pub mod series;
pub mod timeframe;

pub use bar::Bar;
pub use entry::{Direction, Entry, ParseDirectionError};
pub use ids::{SeriesKey, TradeId};
pub use series::{BarSeries, SeriesError};
pub use timeframe::{ParseTimeframeError, Timeframe};
