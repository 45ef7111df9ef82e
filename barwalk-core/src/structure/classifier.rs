//! Breakout state machine.
//!
//! One [`StructureState`] per (instrument, session, timeframe). The label
//! starts NEUTRAL and only moves when a close breaks one of the swing
//! references: above the upper reference means BULL, below the lower
//! reference means BEAR. References track the most recently confirmed
//! fractal high and low.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use super::fractal::{Fractal, FractalWindow};
use crate::domain::Bar;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StructureError {
    #[error("fractal half-window must be >= 1")]
    ZeroHalfWindow,

    #[error("bar at {timestamp} is not after the last processed bar at {last}")]
    OutOfOrder {
        timestamp: NaiveDateTime,
        last: NaiveDateTime,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StructureLabel {
    Bull,
    Bear,
    #[default]
    Neutral,
}

impl StructureLabel {
    /// Short code used in reports: `B+`, `B-`, `N`.
    pub fn code(self) -> &'static str {
        match self {
            StructureLabel::Bull => "B+",
            StructureLabel::Bear => "B-",
            StructureLabel::Neutral => "N",
        }
    }
}

impl fmt::Display for StructureLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Break of structure (continuation) or change of character (reversal).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BreakKind {
    Bos,
    Choch,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StructureEvent {
    pub kind: BreakKind,
    /// Label after the break.
    pub label: StructureLabel,
    pub timestamp: NaiveDateTime,
    pub close: f64,
    /// The reference price that was broken.
    pub reference: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SwingReference {
    pub price: f64,
    pub swing_time: NaiveDateTime,
    pub confirmed_at: NaiveDateTime,
    /// Set once a close has broken this level; cleared on replacement.
    pub broken: bool,
}

impl From<Fractal> for SwingReference {
    fn from(f: Fractal) -> Self {
        Self {
            price: f.price,
            swing_time: f.timestamp,
            confirmed_at: f.confirmed_at,
            broken: false,
        }
    }
}

/// Per-key structure accumulator.
///
/// [`StructureState::step`] borrows the current state and returns the next one,
/// so a rejected bar leaves the caller's state exactly as it was.
#[derive(Debug, Clone)]
pub struct StructureState {
    window: FractalWindow,
    label: StructureLabel,
    upper: Option<SwingReference>,
    lower: Option<SwingReference>,
    last_timestamp: Option<NaiveDateTime>,
    bars_seen: usize,
    event: Option<StructureEvent>,
}

impl StructureState {
    pub fn new(half_window: usize) -> Result<Self, StructureError> {
        if half_window == 0 {
            return Err(StructureError::ZeroHalfWindow);
        }
        Ok(Self {
            window: FractalWindow::new(half_window),
            label: StructureLabel::Neutral,
            upper: None,
            lower: None,
            last_timestamp: None,
            bars_seen: 0,
            event: None,
        })
    }

    pub fn step(&self, bar: &Bar) -> Result<Self, StructureError> {
        if let Some(last) = self.last_timestamp {
            if bar.timestamp <= last {
                return Err(StructureError::OutOfOrder {
                    timestamp: bar.timestamp,
                    last,
                });
            }
        }

        let mut next = self.clone();
        next.event = None;

        // Breaks are judged against references known before this bar.
        let close = bar.close;
        let up = next.upper.filter(|r| close > r.price);
        let down = next.lower.filter(|r| close < r.price);

        // A close through both references counts as bearish.
        let broken = match (up, down) {
            (_, Some(r)) => Some((StructureLabel::Bear, r)),
            (Some(r), None) => Some((StructureLabel::Bull, r)),
            (None, None) => None,
        };

        if let Some((label, reference)) = broken {
            if label != next.label || !reference.broken {
                let kind = if next.label == StructureLabel::Neutral || next.label == label {
                    BreakKind::Bos
                } else {
                    BreakKind::Choch
                };
                next.event = Some(StructureEvent {
                    kind,
                    label,
                    timestamp: bar.timestamp,
                    close,
                    reference: reference.price,
                });
            }
            next.label = label;
            let slot = match label {
                StructureLabel::Bear => &mut next.lower,
                _ => &mut next.upper,
            };
            if let Some(r) = slot.as_mut() {
                r.broken = true;
            }
        }

        let confirmed = next.window.push(bar);
        if let Some(high) = confirmed.high {
            next.upper = Some(high.into());
        }
        if let Some(low) = confirmed.low {
            next.lower = Some(low.into());
        }

        next.last_timestamp = Some(bar.timestamp);
        next.bars_seen += 1;
        Ok(next)
    }

    pub fn label(&self) -> StructureLabel {
        self.label
    }

    pub fn half_window(&self) -> usize {
        self.window.half_window()
    }

    pub fn upper_reference(&self) -> Option<&SwingReference> {
        self.upper.as_ref()
    }

    pub fn lower_reference(&self) -> Option<&SwingReference> {
        self.lower.as_ref()
    }

    pub fn last_timestamp(&self) -> Option<NaiveDateTime> {
        self.last_timestamp
    }

    pub fn bars_seen(&self) -> usize {
        self.bars_seen
    }

    /// Break event produced by the most recent step, if any.
    pub fn event(&self) -> Option<&StructureEvent> {
        self.event.as_ref()
    }
}

/// Fold the classifier over a slice, returning the state after every bar.
pub fn classify(bars: &[Bar], half_window: usize) -> Result<Vec<StructureState>, StructureError> {
    let mut state = StructureState::new(half_window)?;
    let mut out = Vec::with_capacity(bars.len());
    for bar in bars {
        state = state.step(bar)?;
        out.push(state.clone());
    }
    Ok(out)
}

/// Label after folding the whole slice.
pub fn final_label(bars: &[Bar], half_window: usize) -> Result<StructureLabel, StructureError> {
    let mut state = StructureState::new(half_window)?;
    for bar in bars {
        state = state.step(bar)?;
    }
    Ok(state.label())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::make_ohlc_bars;

    /// Scenario: swing high at 101 confirmed, later close at 101.5 flips to BULL.
    fn breakout_bars() -> Vec<Bar> {
        make_ohlc_bars(&[
            (99.0, 99.5, 98.5, 99.2),    // 0
            (99.2, 100.0, 98.8, 99.8),   // 1
            (99.8, 101.0, 99.5, 100.6),  // 2 swing high 101
            (100.6, 100.7, 99.6, 99.9),  // 3
            (99.9, 100.2, 99.7, 100.0),  // 4 confirms bar 2
            (100.0, 101.8, 99.9, 101.5), // 5 close breaks 101
        ])
    }

    #[test]
    fn starts_neutral() {
        let state = StructureState::new(2).unwrap();
        assert_eq!(state.label(), StructureLabel::Neutral);
        assert!(state.upper_reference().is_none());
        assert!(state.lower_reference().is_none());
    }

    #[test]
    fn zero_half_window_rejected() {
        assert_eq!(
            StructureState::new(0).unwrap_err(),
            StructureError::ZeroHalfWindow
        );
    }

    #[test]
    fn close_above_swing_high_turns_bull() {
        let bars = breakout_bars();
        let states = classify(&bars, 2).unwrap();
        // Reference appears only once bar 4 confirms the fractal.
        assert!(states[3].upper_reference().is_none());
        assert_eq!(states[4].upper_reference().unwrap().price, 101.0);
        assert_eq!(states[4].label(), StructureLabel::Neutral);
        assert_eq!(states[5].label(), StructureLabel::Bull);
        let event = states[5].event().expect("break event");
        assert_eq!(event.kind, BreakKind::Bos);
        assert_eq!(event.reference, 101.0);
    }

    #[test]
    fn wick_through_reference_is_not_a_break() {
        let mut bars = breakout_bars();
        bars[5].close = 100.9; // high still 101.8
        assert_eq!(final_label(&bars, 2).unwrap(), StructureLabel::Neutral);
    }

    #[test]
    fn stays_neutral_without_fractals() {
        let bars = make_ohlc_bars(&[
            (100.0, 101.0, 99.0, 100.5),
            (100.5, 102.0, 100.0, 101.5),
            (101.5, 103.0, 101.0, 102.5),
            (102.5, 104.0, 102.0, 103.5),
            (103.5, 105.0, 103.0, 104.5),
            (104.5, 106.0, 104.0, 105.5),
        ]);
        // Monotonic climb: no bar beats both neighbours.
        assert_eq!(final_label(&bars, 2).unwrap(), StructureLabel::Neutral);
    }

    #[test]
    fn reversal_is_choch() {
        let mut data = vec![
            (99.0, 99.5, 98.5, 99.2),
            (99.2, 100.0, 98.8, 99.8),
            (99.8, 101.0, 99.5, 100.6),
            (100.6, 100.7, 99.6, 99.9),
            (99.9, 100.2, 99.7, 100.0),
            (100.0, 101.8, 99.9, 101.5), // BULL
        ];
        data.extend_from_slice(&[
            (101.5, 101.6, 100.8, 101.0), // 6
            (101.0, 101.2, 99.8, 100.5),  // 7 swing low 99.8
            (100.5, 101.0, 100.4, 100.8), // 8
            (100.8, 101.1, 100.5, 100.9), // 9 confirms bar 7
            (100.9, 101.0, 99.5, 99.6),   // 10 close < 99.8
        ]);
        let bars = make_ohlc_bars(&data);
        let states = classify(&bars, 2).unwrap();
        assert_eq!(states[5].label(), StructureLabel::Bull);
        assert_eq!(states[9].lower_reference().unwrap().price, 99.8);
        assert_eq!(states[10].label(), StructureLabel::Bear);
        assert_eq!(states[10].event().unwrap().kind, BreakKind::Choch);
    }

    #[test]
    fn crossed_references_break_bearish() {
        let bars = make_ohlc_bars(&[(100.0, 101.0, 99.0, 100.0)]);
        let mut state = StructureState::new(1).unwrap();
        // Reference prices set so one close is above the upper and below the lower.
        state.upper = Some(SwingReference {
            price: 99.0,
            swing_time: bars[0].timestamp,
            confirmed_at: bars[0].timestamp,
            broken: false,
        });
        state.lower = Some(SwingReference {
            price: 101.0,
            swing_time: bars[0].timestamp,
            confirmed_at: bars[0].timestamp,
            broken: false,
        });
        let next = state.step(&bars[0]).unwrap();
        assert_eq!(next.label(), StructureLabel::Bear);
    }

    #[test]
    fn out_of_order_bar_leaves_state_untouched() {
        let bars = breakout_bars();
        let mut state = StructureState::new(2).unwrap();
        for bar in &bars[..3] {
            state = state.step(bar).unwrap();
        }
        let err = state.step(&bars[1]).unwrap_err();
        assert!(matches!(err, StructureError::OutOfOrder { .. }));
        assert_eq!(state.bars_seen(), 3);
        assert_eq!(state.last_timestamp(), Some(bars[2].timestamp));

        let dup = state.step(&bars[2]).unwrap_err();
        assert!(matches!(dup, StructureError::OutOfOrder { .. }));
    }

    #[test]
    fn repeated_break_of_same_level_emits_once() {
        let mut bars = breakout_bars();
        let mut next = bars[5];
        next.timestamp += chrono::Duration::minutes(1);
        next.close = 101.7;
        bars.push(next);
        let states = classify(&bars, 2).unwrap();
        assert!(states[5].event().is_some());
        assert!(states[6].event().is_none());
        assert_eq!(states[6].label(), StructureLabel::Bull);
    }

    #[test]
    fn label_codes() {
        assert_eq!(StructureLabel::Bull.to_string(), "B+");
        assert_eq!(StructureLabel::Bear.to_string(), "B-");
        assert_eq!(StructureLabel::Neutral.to_string(), "N");
    }
}
