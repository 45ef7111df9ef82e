//! Fractal swing detection.
//!
//! Bar `i` is a swing high when its high is strictly greater than the highs of
//! the `p` bars before it and the `p` bars after it (swing low: strictly lower
//! low). An equal neighbour disqualifies the candidate. Because the `p` bars
//! after the candidate must exist, a swing at bar `i` is only confirmed when
//! bar `i + p` arrives.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::domain::Bar;

/// Default half-window: a 5-bar fractal.
pub const DEFAULT_FRACTAL_HALF_WINDOW: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SwingKind {
    High,
    Low,
}

/// A confirmed swing point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Fractal {
    pub kind: SwingKind,
    /// Timestamp of the swing bar itself.
    pub timestamp: NaiveDateTime,
    /// The swing bar's high (for `High`) or low (for `Low`).
    pub price: f64,
    /// Timestamp of the bar whose arrival confirmed the swing.
    pub confirmed_at: NaiveDateTime,
}

pub fn is_swing_high(bars: &[Bar], index: usize, half_window: usize) -> bool {
    if half_window == 0 || index < half_window || index + half_window >= bars.len() {
        return false;
    }
    let high = bars[index].high;
    bars[index - half_window..=index + half_window]
        .iter()
        .enumerate()
        .all(|(j, b)| j == half_window || high > b.high)
}

pub fn is_swing_low(bars: &[Bar], index: usize, half_window: usize) -> bool {
    if half_window == 0 || index < half_window || index + half_window >= bars.len() {
        return false;
    }
    let low = bars[index].low;
    bars[index - half_window..=index + half_window]
        .iter()
        .enumerate()
        .all(|(j, b)| j == half_window || low < b.low)
}

/// All fractals in a slice, in confirmation order (highs before lows on the
/// same confirming bar).
pub fn find_fractals(bars: &[Bar], half_window: usize) -> Vec<Fractal> {
    let mut out = Vec::new();
    if half_window == 0 {
        return out;
    }
    for i in half_window..bars.len().saturating_sub(half_window) {
        let confirmed_at = bars[i + half_window].timestamp;
        if is_swing_high(bars, i, half_window) {
            out.push(Fractal {
                kind: SwingKind::High,
                timestamp: bars[i].timestamp,
                price: bars[i].high,
                confirmed_at,
            });
        }
        if is_swing_low(bars, i, half_window) {
            out.push(Fractal {
                kind: SwingKind::Low,
                timestamp: bars[i].timestamp,
                price: bars[i].low,
                confirmed_at,
            });
        }
    }
    out
}

/// Swings confirmed by the most recent bar.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Confirmed {
    pub high: Option<Fractal>,
    pub low: Option<Fractal>,
}

/// Rolling `2p + 1` bar window for incremental confirmation.
#[derive(Debug, Clone)]
pub struct FractalWindow {
    half_window: usize,
    bars: VecDeque<Bar>,
}

impl FractalWindow {
    /// `half_window` must be >= 1; callers validate it.
    pub fn new(half_window: usize) -> Self {
        Self {
            half_window,
            bars: VecDeque::with_capacity(2 * half_window + 1),
        }
    }

    pub fn half_window(&self) -> usize {
        self.half_window
    }

    /// Push the next bar and report which swings (if any) it confirms.
    pub fn push(&mut self, bar: &Bar) -> Confirmed {
        let size = 2 * self.half_window + 1;
        if self.bars.len() == size {
            self.bars.pop_front();
        }
        self.bars.push_back(*bar);
        if self.half_window == 0 || self.bars.len() < size {
            return Confirmed::default();
        }

        let p = self.half_window;
        let center = self.bars[p];
        let neighbours = || self.bars.iter().enumerate().filter(move |(j, _)| *j != p);

        let high = neighbours()
            .all(|(_, b)| center.high > b.high)
            .then_some(Fractal {
                kind: SwingKind::High,
                timestamp: center.timestamp,
                price: center.high,
                confirmed_at: bar.timestamp,
            });
        let low = neighbours()
            .all(|(_, b)| center.low < b.low)
            .then_some(Fractal {
                kind: SwingKind::Low,
                timestamp: center.timestamp,
                price: center.low,
                confirmed_at: bar.timestamp,
            });
        Confirmed { high, low }
    }
}
