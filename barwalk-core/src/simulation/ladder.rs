//! Stop and R-multiple target ladder.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{Bar, Direction};

pub const DEFAULT_LADDER_DEPTH: usize = 5;

#[derive(Debug, Error, PartialEq)]
pub enum LadderError {
    #[error("stop distance must be positive and finite, got {0}")]
    InvalidDistance(f64),

    #[error("entry price must be positive and finite, got {0}")]
    InvalidEntryPrice(f64),

    #[error("ladder depth must be >= 1")]
    ZeroDepth,
}

/// Stop price and R1..Rn targets for one trade.
///
/// LONG: `stop = entry - d`, `R(k) = entry + k*d`.
/// SHORT: `stop = entry + d`, `R(k) = entry - k*d`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopLadder {
    direction: Direction,
    entry_price: f64,
    stop_distance: f64,
    stop_price: f64,
    targets: Vec<f64>,
}

impl StopLadder {
    pub fn new(
        direction: Direction,
        entry_price: f64,
        stop_distance: f64,
        depth: usize,
    ) -> Result<Self, LadderError> {
        if !(entry_price.is_finite() && entry_price > 0.0) {
            return Err(LadderError::InvalidEntryPrice(entry_price));
        }
        if !(stop_distance.is_finite() && stop_distance > 0.0) {
            return Err(LadderError::InvalidDistance(stop_distance));
        }
        if depth == 0 {
            return Err(LadderError::ZeroDepth);
        }
        let sign = direction.sign();
        let targets = (1..=depth)
            .map(|k| entry_price + sign * k as f64 * stop_distance)
            .collect();
        Ok(Self {
            direction,
            entry_price,
            stop_distance,
            stop_price: entry_price - sign * stop_distance,
            targets,
        })
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn entry_price(&self) -> f64 {
        self.entry_price
    }

    pub fn stop_distance(&self) -> f64 {
        self.stop_distance
    }

    pub fn stop_price(&self) -> f64 {
        self.stop_price
    }

    pub fn depth(&self) -> usize {
        self.targets.len()
    }

    pub fn targets(&self) -> &[f64] {
        &self.targets
    }

    /// Price of level `k` (1-based).
    pub fn target(&self, level: usize) -> Option<f64> {
        level.checked_sub(1).and_then(|i| self.targets.get(i).copied())
    }

    /// Close-based stop: a wick through the stop does not count.
    pub fn stop_triggered(&self, bar: &Bar) -> bool {
        match self.direction {
            Direction::Long => bar.close <= self.stop_price,
            Direction::Short => bar.close >= self.stop_price,
        }
    }

    /// Price-based target: the bar's extreme only has to touch the level.
    pub fn target_reached(&self, level: usize, bar: &Bar) -> bool {
        let Some(price) = self.target(level) else {
            return false;
        };
        match self.direction {
            Direction::Long => bar.high >= price,
            Direction::Short => bar.low <= price,
        }
    }
}
