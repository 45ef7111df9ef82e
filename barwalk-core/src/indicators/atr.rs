//! Average True Range (ATR).
//!
//! True Range: max(high-low, |high-prev_close|, |low-prev_close|), or just
//! high-low for the first bar of a slice.
//! ATR: arithmetic mean of the last `period` true-range values. No smoothing,
//! so the value at bar t depends on exactly bars t-period..=t.
//!
//! Everything here is granularity-agnostic. Callers decide which series
//! (M1, M5, ...) to hand in.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use thiserror::Error;

use crate::domain::{Bar, BarSeries};

pub const DEFAULT_ATR_PERIOD: usize = 14;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AtrError {
    #[error("ATR period must be >= 1")]
    ZeroPeriod,
}

/// True range of `bar` given the bar before it.
///
/// Returns NaN if any input price is NaN. Otherwise always >= 0 for sane bars.
pub fn true_range(bar: &Bar, prev: Option<&Bar>) -> f64 {
    let (h, l) = (bar.high, bar.low);
    if h.is_nan() || l.is_nan() {
        return f64::NAN;
    }
    match prev {
        None => h - l,
        Some(p) if p.close.is_nan() => f64::NAN,
        Some(p) => {
            let pc = p.close;
            (h - l).max((h - pc).abs()).max((l - pc).abs())
        }
    }
}

/// True range for every bar in the slice. TR[0] uses high-low only.
pub fn true_range_series(bars: &[Bar]) -> Vec<f64> {
    bars.iter()
        .enumerate()
        .map(|(i, bar)| true_range(bar, i.checked_sub(1).map(|p| &bars[p])))
        .collect()
}

/// ATR at `as_of_index`: mean of the `period` true ranges ending there.
///
/// `None` while fewer than `period` defined true ranges are available, when a
/// NaN falls inside the window, when `period` is zero or when the index is out
/// of range.
pub fn atr(bars: &[Bar], period: usize, as_of_index: usize) -> Option<f64> {
    if period == 0 || as_of_index >= bars.len() || as_of_index + 1 < period {
        return None;
    }
    let start = as_of_index + 1 - period;
    let mut sum = 0.0;
    for i in start..=as_of_index {
        let tr = true_range(&bars[i], i.checked_sub(1).map(|p| &bars[p]));
        if tr.is_nan() {
            return None;
        }
        sum += tr;
    }
    Some(sum / period as f64)
}

/// One step of the ATR fold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AtrPoint {
    pub timestamp: NaiveDateTime,
    pub true_range: f64,
    pub atr: Option<f64>,
}

/// Sequential ATR accumulator for one series.
///
/// Consumed and returned by [`AtrState::step`], so each bar produces a new
/// state value. Feed bars in chronological order.
#[derive(Debug, Clone)]
pub struct AtrState {
    period: usize,
    window: VecDeque<f64>,
    prev: Option<Bar>,
    last: Option<AtrPoint>,
}

impl AtrState {
    pub fn new(period: usize) -> Result<Self, AtrError> {
        if period == 0 {
            return Err(AtrError::ZeroPeriod);
        }
        Ok(Self {
            period,
            window: VecDeque::with_capacity(period),
            prev: None,
            last: None,
        })
    }

    pub fn step(mut self, bar: &Bar) -> Self {
        let tr = true_range(bar, self.prev.as_ref());
        if tr.is_nan() {
            // A gap in defined values restarts warmup.
            self.window.clear();
        } else {
            if self.window.len() == self.period {
                self.window.pop_front();
            }
            self.window.push_back(tr);
        }
        let atr = (self.window.len() == self.period)
            .then(|| self.window.iter().sum::<f64>() / self.period as f64);
        self.last = Some(AtrPoint {
            timestamp: bar.timestamp,
            true_range: tr,
            atr,
        });
        self.prev = Some(*bar);
        self
    }

    pub fn period(&self) -> usize {
        self.period
    }

    pub fn last(&self) -> Option<AtrPoint> {
        self.last
    }

    pub fn atr(&self) -> Option<f64> {
        self.last.and_then(|p| p.atr)
    }

    pub fn is_warm(&self) -> bool {
        self.atr().is_some()
    }
}

/// Run the ATR fold over a slice, one point per bar.
pub fn atr_series(bars: &[Bar], period: usize) -> Result<Vec<AtrPoint>, AtrError> {
    let mut state = AtrState::new(period)?;
    let mut out = Vec::with_capacity(bars.len());
    for bar in bars {
        state = state.step(bar);
        if let Some(point) = state.last() {
            out.push(point);
        }
    }
    Ok(out)
}

/// Stop distance (1R) at `time`: ATR of the bar enclosing or immediately
/// preceding `time`, scaled by `multiplier`.
///
/// `None` means insufficient data. A non-positive result is returned as-is;
/// the simulator treats it as a skip.
pub fn stop_distance_at(
    series: &BarSeries,
    period: usize,
    time: NaiveDateTime,
    multiplier: f64,
) -> Option<f64> {
    let index = series.index_at_or_before(time)?;
    atr(series.bars(), period, index).map(|value| value * multiplier)
}
