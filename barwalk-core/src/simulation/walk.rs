//! Lazy forward walk over the bars after an entry.
//!
//! Each bar is checked for the stop first. A stop bar ends the walk and any
//! targets that bar would have reached are ignored. Otherwise every newly
//! reached level is yielded, lowest first. The walk also ends at the first bar
//! opening after the cutoff.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::iter::Enumerate;
use std::slice::Iter;

use super::ladder::StopLadder;
use crate::domain::Bar;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum WalkEvent {
    Target {
        level: usize,
        /// 1 for the first bar after the anchor.
        bars_from_entry: usize,
        timestamp: NaiveDateTime,
    },
    Stop {
        bars_from_entry: usize,
        timestamp: NaiveDateTime,
        close: f64,
    },
}

pub struct ForwardWalk<'a> {
    ladder: &'a StopLadder,
    bars: Enumerate<Iter<'a, Bar>>,
    cutoff: NaiveDateTime,
    reached: usize,
    current: Option<(usize, &'a Bar)>,
    finished: bool,
}

impl<'a> ForwardWalk<'a> {
    /// `bars` must start with the first bar after the anchor.
    pub fn new(ladder: &'a StopLadder, bars: &'a [Bar], cutoff: NaiveDateTime) -> Self {
        Self {
            ladder,
            bars: bars.iter().enumerate(),
            cutoff,
            reached: 0,
            current: None,
            finished: false,
        }
    }

    /// Highest level reached so far.
    pub fn reached(&self) -> usize {
        self.reached
    }
}

impl<'a> Iterator for ForwardWalk<'a> {
    type Item = WalkEvent;

    fn next(&mut self) -> Option<WalkEvent> {
        loop {
            if self.finished {
                return None;
            }

            if let Some((bars_from_entry, bar)) = self.current {
                let level = self.reached + 1;
                if self.ladder.target_reached(level, bar) {
                    self.reached = level;
                    return Some(WalkEvent::Target {
                        level,
                        bars_from_entry,
                        timestamp: bar.timestamp,
                    });
                }
                self.current = None;
            }

            let Some((i, bar)) = self.bars.next() else {
                self.finished = true;
                return None;
            };
            if bar.timestamp > self.cutoff {
                self.finished = true;
                return None;
            }

            let bars_from_entry = i + 1;
            if self.ladder.stop_triggered(bar) {
                self.finished = true;
                return Some(WalkEvent::Stop {
                    bars_from_entry,
                    timestamp: bar.timestamp,
                    close: bar.close,
                });
            }
            self.current = Some((bars_from_entry, bar));
        }
    }
}
