//! Simulation result records.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::{Direction, TradeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeResult {
    Win,
    Loss,
}

impl fmt::Display for TradeResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeResult::Win => f.write_str("WIN"),
            TradeResult::Loss => f.write_str("LOSS"),
        }
    }
}

/// Why the walk ended. The stop takes priority over reaching the deepest level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitReason {
    StopHit,
    RMaxHit,
    Eod,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::StopHit => f.write_str("STOP_HIT"),
            ExitReason::RMaxHit => f.write_str("R_MAX_HIT"),
            ExitReason::Eod => f.write_str("EOD"),
        }
    }
}

/// Hit record for one price level (a target or the stop).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LevelHit {
    pub price: f64,
    pub hit: bool,
    pub time: Option<NaiveDateTime>,
    pub bars_from_entry: Option<usize>,
}

impl LevelHit {
    pub fn pending(price: f64) -> Self {
        Self {
            price,
            hit: false,
            time: None,
            bars_from_entry: None,
        }
    }

    pub(crate) fn mark(&mut self, time: NaiveDateTime, bars_from_entry: usize) {
        self.hit = true;
        self.time = Some(time);
        self.bars_from_entry = Some(bars_from_entry);
    }
}

/// Outcome of one simulated trade.
///
/// `max_r` is -1 for a LOSS and the deepest level reached (>= 1) for a WIN.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationOutcome {
    pub trade_id: TradeId,
    pub instrument: String,
    pub session: NaiveDate,
    pub direction: Direction,
    pub entry_time: NaiveDateTime,
    /// Entry time truncated to the simulation timeframe.
    pub anchor_time: NaiveDateTime,
    pub entry_price: f64,
    pub stop_distance: f64,
    pub stop_distance_pct: f64,
    pub stop: LevelHit,
    /// R1..Rn, in order.
    pub levels: Vec<LevelHit>,
    pub result: TradeResult,
    pub max_r: i32,
    pub pnl_r: f64,
    pub exit_reason: ExitReason,
    pub minutes_to_r1: Option<i64>,
    pub eod_price: Option<f64>,
    pub outcome_method: String,
    pub input_hash: String,
}

impl SimulationOutcome {
    /// Hit record for level `k` (1-based).
    pub fn level(&self, k: usize) -> Option<&LevelHit> {
        k.checked_sub(1).and_then(|i| self.levels.get(i))
    }

    pub fn is_win(&self) -> bool {
        self.result == TradeResult::Win
    }
}

/// Realised R for an actual exit price. `None` when the stop distance is not
/// positive.
pub fn pnl_r_from_exit(
    direction: Direction,
    entry_price: f64,
    exit_price: f64,
    stop_distance: f64,
) -> Option<f64> {
    if stop_distance.is_nan() || stop_distance <= 0.0 {
        return None;
    }
    Some(direction.sign() * (exit_price - entry_price) / stop_distance)
}
