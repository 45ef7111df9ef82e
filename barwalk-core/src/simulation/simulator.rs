//! Outcome simulator: one entry in, one deterministic R-multiple outcome out.
//!
//! The simulator is a pure function of the entry, the bar series, the stop
//! distance and the config. Inputs that cannot produce an outcome yield a
//! [`SkipReason`] instead of an error; nothing here is retried.

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::ladder::{LadderError, StopLadder, DEFAULT_LADDER_DEPTH};
use super::outcome::{ExitReason, LevelHit, SimulationOutcome, TradeResult};
use super::walk::{ForwardWalk, WalkEvent};
use crate::domain::{Bar, BarSeries, Entry, Timeframe};
use crate::indicators::{stop_distance_at, DEFAULT_ATR_PERIOD};

/// Why an entry produced no outcome. Counted, never fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    #[error("entry time missing")]
    MissingEntryTime,

    #[error("entry price missing or invalid")]
    MissingEntryPrice,

    #[error("entry time falls outside the entry's session date")]
    EntryOutsideSession,

    #[error("not enough bars to compute ATR at entry")]
    InsufficientWarmup,

    #[error("stop distance is not positive")]
    NonPositiveStopDistance,

    #[error("no bars after the entry before the session cutoff")]
    NoForwardBars,

    #[error("no bars for the entry's session")]
    UnknownSession,

    #[error("higher-timeframe data unavailable")]
    HtfUnavailable,
}

impl SkipReason {
    pub const ALL: [SkipReason; 8] = [
        SkipReason::MissingEntryTime,
        SkipReason::MissingEntryPrice,
        SkipReason::EntryOutsideSession,
        SkipReason::InsufficientWarmup,
        SkipReason::NonPositiveStopDistance,
        SkipReason::NoForwardBars,
        SkipReason::UnknownSession,
        SkipReason::HtfUnavailable,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SkipReason::MissingEntryTime => "missing_entry_time",
            SkipReason::MissingEntryPrice => "missing_entry_price",
            SkipReason::EntryOutsideSession => "entry_outside_session",
            SkipReason::InsufficientWarmup => "insufficient_warmup",
            SkipReason::NonPositiveStopDistance => "non_positive_stop_distance",
            SkipReason::NoForwardBars => "no_forward_bars",
            SkipReason::UnknownSession => "unknown_session",
            SkipReason::HtfUnavailable => "htf_unavailable",
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum SimulationConfigError {
    #[error("atr_period must be >= 1")]
    ZeroAtrPeriod,

    #[error("atr_multiplier must be positive and finite, got {0}")]
    InvalidMultiplier(f64),

    #[error("ladder_depth must be >= 1")]
    ZeroLadderDepth,

    #[error("stop timeframe {stop} is finer than simulation timeframe {sim}")]
    StopFinerThanSim { stop: Timeframe, sim: Timeframe },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimulationConfig {
    pub atr_period: usize,
    /// Stop distance = ATR x multiplier.
    pub atr_multiplier: f64,
    pub ladder_depth: usize,
    /// Last bar open time considered on the session date (inclusive).
    pub session_cutoff: NaiveTime,
    /// Granularity of the bars walked forward.
    pub sim_timeframe: Timeframe,
    /// Granularity of the bars the ATR stop distance is measured on.
    pub stop_timeframe: Timeframe,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            atr_period: DEFAULT_ATR_PERIOD,
            atr_multiplier: 1.0,
            ladder_depth: DEFAULT_LADDER_DEPTH,
            session_cutoff: NaiveTime::from_hms_opt(15, 30, 0).expect("15:30 is a valid time"),
            sim_timeframe: Timeframe::M1,
            stop_timeframe: Timeframe::M5,
        }
    }
}

impl SimulationConfig {
    pub fn validate(&self) -> Result<(), SimulationConfigError> {
        if self.atr_period == 0 {
            return Err(SimulationConfigError::ZeroAtrPeriod);
        }
        if !(self.atr_multiplier.is_finite() && self.atr_multiplier > 0.0) {
            return Err(SimulationConfigError::InvalidMultiplier(self.atr_multiplier));
        }
        if self.ladder_depth == 0 {
            return Err(SimulationConfigError::ZeroLadderDepth);
        }
        if self.stop_timeframe < self.sim_timeframe {
            return Err(SimulationConfigError::StopFinerThanSim {
                stop: self.stop_timeframe,
                sim: self.sim_timeframe,
            });
        }
        Ok(())
    }

    /// Label recorded on every outcome, e.g. `M5_ATR`.
    pub fn outcome_method(&self) -> String {
        format!("{}_ATR", self.stop_timeframe)
    }

    pub fn cutoff_for(&self, session: NaiveDate) -> NaiveDateTime {
        session.and_time(self.session_cutoff)
    }
}

#[derive(Debug, Clone)]
pub struct OutcomeSimulator {
    config: SimulationConfig,
}

impl OutcomeSimulator {
    pub fn new(config: SimulationConfig) -> Result<Self, SimulationConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// 1R for `entry`: ATR on `stop_series` at the bar enclosing (or just
    /// before) the entry time.
    pub fn stop_distance(&self, entry: &Entry, stop_series: &BarSeries) -> Result<f64, SkipReason> {
        let entry_time = entry.entry_time.ok_or(SkipReason::MissingEntryTime)?;
        if entry_time.date() != entry.session {
            return Err(SkipReason::EntryOutsideSession);
        }
        let d = stop_distance_at(
            stop_series,
            self.config.atr_period,
            entry_time,
            self.config.atr_multiplier,
        )
        .ok_or(SkipReason::InsufficientWarmup)?;
        if d.is_nan() || d <= 0.0 {
            return Err(SkipReason::NonPositiveStopDistance);
        }
        Ok(d)
    }

    /// Resolve the stop distance on `stop_series`, then walk `sim_series`.
    pub fn run(
        &self,
        entry: &Entry,
        sim_series: &BarSeries,
        stop_series: &BarSeries,
    ) -> Result<SimulationOutcome, SkipReason> {
        let d = self.stop_distance(entry, stop_series)?;
        self.simulate(entry, sim_series, Some(d))
    }

    pub fn simulate(
        &self,
        entry: &Entry,
        sim_series: &BarSeries,
        stop_distance: Option<f64>,
    ) -> Result<SimulationOutcome, SkipReason> {
        let entry_time = entry.entry_time.ok_or(SkipReason::MissingEntryTime)?;
        if entry_time.date() != entry.session {
            return Err(SkipReason::EntryOutsideSession);
        }
        let entry_price = entry
            .entry_price
            .filter(|p| p.is_finite() && *p > 0.0)
            .ok_or(SkipReason::MissingEntryPrice)?;
        let d = stop_distance.ok_or(SkipReason::InsufficientWarmup)?;
        if sim_series.is_empty() {
            return Err(SkipReason::UnknownSession);
        }

        let ladder = StopLadder::new(entry.direction, entry_price, d, self.config.ladder_depth)
            .map_err(|e| match e {
                LadderError::InvalidEntryPrice(_) => SkipReason::MissingEntryPrice,
                LadderError::InvalidDistance(_) | LadderError::ZeroDepth => {
                    SkipReason::NonPositiveStopDistance
                }
            })?;

        let anchor_time = self.config.sim_timeframe.truncate(entry_time);
        let cutoff = self.config.cutoff_for(entry.session);
        let forward = &sim_series.bars()[sim_series.count_up_to(anchor_time)..];
        let in_session = forward.partition_point(|b| b.timestamp <= cutoff);
        if in_session == 0 {
            return Err(SkipReason::NoForwardBars);
        }
        let forward = &forward[..in_session];

        let mut levels: Vec<LevelHit> = ladder
            .targets()
            .iter()
            .map(|&p| LevelHit::pending(p))
            .collect();
        let mut stop = LevelHit::pending(ladder.stop_price());
        for event in ForwardWalk::new(&ladder, forward, cutoff) {
            match event {
                WalkEvent::Target {
                    level,
                    bars_from_entry,
                    timestamp,
                } => levels[level - 1].mark(timestamp, bars_from_entry),
                WalkEvent::Stop {
                    bars_from_entry,
                    timestamp,
                    ..
                } => stop.mark(timestamp, bars_from_entry),
            }
        }

        let reached = levels.iter().take_while(|l| l.hit).count();
        let (result, max_r) = if reached >= 1 {
            (TradeResult::Win, reached as i32)
        } else {
            (TradeResult::Loss, -1)
        };
        let exit_reason = if stop.hit {
            ExitReason::StopHit
        } else if reached == ladder.depth() {
            ExitReason::RMaxHit
        } else {
            ExitReason::Eod
        };
        let minutes_to_r1 = levels[0].time.map(|t| minutes_between(entry_time, t));
        let eod_price = eod_close(sim_series, entry.session, cutoff);

        let outcome = SimulationOutcome {
            trade_id: entry.trade_id.clone(),
            instrument: entry.instrument.clone(),
            session: entry.session,
            direction: entry.direction,
            entry_time,
            anchor_time,
            entry_price,
            stop_distance: d,
            stop_distance_pct: d / entry_price * 100.0,
            stop,
            levels,
            result,
            max_r,
            pnl_r: f64::from(max_r),
            exit_reason,
            minutes_to_r1,
            eod_price,
            outcome_method: self.config.outcome_method(),
            input_hash: input_hash(
                entry,
                entry_time,
                entry_price,
                d,
                &self.config,
                forward,
                eod_price,
            ),
        };
        debug!(
            trade_id = %outcome.trade_id,
            result = %outcome.result,
            max_r = outcome.max_r,
            exit = %outcome.exit_reason,
            "simulated"
        );
        Ok(outcome)
    }
}

/// Close of the last bar on `session` opening at or before `cutoff`.
fn eod_close(series: &BarSeries, session: NaiveDate, cutoff: NaiveDateTime) -> Option<f64> {
    series
        .up_to(cutoff)
        .last()
        .filter(|b| b.timestamp.date() == session)
        .map(|b| b.close)
}

/// BLAKE3 over everything the outcome depends on.
fn input_hash(
    entry: &Entry,
    entry_time: NaiveDateTime,
    entry_price: f64,
    stop_distance: f64,
    config: &SimulationConfig,
    forward: &[Bar],
    eod_price: Option<f64>,
) -> String {
    let session = entry.session.to_string();
    let direction = entry.direction.to_string();
    let time = entry_time.to_string();
    let cutoff = config.session_cutoff.to_string();
    let fields: [&str; 8] = [
        entry.trade_id.as_str(),
        &entry.instrument,
        &session,
        &direction,
        &time,
        &cutoff,
        config.sim_timeframe.as_str(),
        config.stop_timeframe.as_str(),
    ];

    let mut hasher = blake3::Hasher::new();
    for field in fields {
        hasher.update(field.as_bytes());
        hasher.update(&[0]);
    }
    hasher.update(&entry_price.to_le_bytes());
    hasher.update(&stop_distance.to_le_bytes());
    hasher.update(&(config.ladder_depth as u64).to_le_bytes());
    hasher.update(&eod_price.unwrap_or(f64::NAN).to_le_bytes());
    for bar in forward {
        hasher.update(bar.timestamp.to_string().as_bytes());
        for px in [bar.open, bar.high, bar.low, bar.close] {
            hasher.update(&px.to_le_bytes());
        }
    }
    hasher.finalize().to_hex().to_string()
}

/// Whole minutes between two times, floored at zero.
pub fn minutes_between(from: NaiveDateTime, to: NaiveDateTime) -> i64 {
    (to - from).max(Duration::zero()).num_minutes()
}
