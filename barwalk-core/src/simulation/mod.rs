//! Forward bar-walk trade outcome simulation.

pub mod ladder;
pub mod outcome;
pub mod simulator;
pub mod walk;

pub use ladder::{LadderError, StopLadder, DEFAULT_LADDER_DEPTH};
pub use outcome::{pnl_r_from_exit, ExitReason, LevelHit, SimulationOutcome, TradeResult};
pub use simulator::{
    minutes_between, OutcomeSimulator, SimulationConfig, SimulationConfigError, SkipReason,
};
pub use walk::{ForwardWalk, WalkEvent};
