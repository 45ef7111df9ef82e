//! BarWalk Core: bar series, ATR, market structure and trade outcome simulation.
//!
//! This crate contains the analytics engine:
//! - Domain types (bars, timeframes, series, entries)
//! - Gap-aware True Range / ATR, usable at any granularity
//! - Higher-timeframe bar cache with single-fetch population
//! - Fractal swing detection and the BULL/BEAR/NEUTRAL structure classifier
//! - Forward bar-walk outcome simulator over a stop/R-multiple ladder

pub mod data;
pub mod domain;
pub mod indicators;
pub mod simulation;
pub mod structure;
